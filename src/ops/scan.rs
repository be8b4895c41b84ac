//! Implementation of `kitenv scan`.

use anyhow::Result;

use crate::core::{ToolkitCandidate, ToolkitFamily};
use crate::filter::{select, select_best, ToolkitSpecFilter};
use crate::scanner::{discover_all, ScanHints, ScanReport};

/// Options for the scan command.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Families to scan (empty = every family supported here, or the
    /// families named by `filters`)
    pub families: Vec<ToolkitFamily>,

    /// Only report candidates matching one of these
    pub filters: Vec<ToolkitSpecFilter>,

    /// Keep only the best candidate per filter (per family without filters)
    pub select: bool,

    pub hints: ScanHints,

    /// Number of parallel family scans
    pub jobs: usize,
}

/// Outcome of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub report: ScanReport,
    /// Candidates that passed the filters, in scan order.
    pub selected: Vec<ToolkitCandidate>,
}

/// Families a scan must cover.
pub fn families_for(families: &[ToolkitFamily], filters: &[ToolkitSpecFilter]) -> Vec<ToolkitFamily> {
    let mut wanted: Vec<ToolkitFamily> = if !families.is_empty() {
        families.to_vec()
    } else if !filters.is_empty() && filters.iter().all(|f| f.family.is_some()) {
        filters.iter().filter_map(|f| f.family).collect()
    } else {
        ToolkitFamily::ALL.to_vec()
    };
    wanted.sort();
    wanted.dedup();
    wanted.retain(|f| f.is_supported());
    wanted
}

/// Scan for toolkits and apply the filters.
pub fn scan(opts: &ScanOptions) -> Result<ScanResult> {
    for filter in &opts.filters {
        filter.validate()?;
    }

    let families = families_for(&opts.families, &opts.filters);
    tracing::debug!(
        "scanning families: {}",
        families
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let report = discover_all(&families, &opts.hints, opts.jobs);

    let filters: Vec<ToolkitSpecFilter> = if opts.filters.is_empty() {
        families.iter().map(|f| ToolkitSpecFilter::family(*f)).collect()
    } else {
        opts.filters.clone()
    };

    let mut selected: Vec<ToolkitCandidate> = Vec::new();
    for filter in &filters {
        let matches = if opts.select {
            select_best(&report.candidates, filter).into_iter().collect()
        } else {
            select(&report.candidates, filter)
        };
        for candidate in matches {
            if !selected.iter().any(|c| c.id() == candidate.id()) {
                selected.push(candidate);
            }
        }
    }

    Ok(ScanResult { report, selected })
}
