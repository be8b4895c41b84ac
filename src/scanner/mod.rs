//! Toolkit discovery.
//!
//! Each family has its own scanner. Scanners never fail because nothing was
//! found: unreadable directories, failing probes and similar problems become
//! [`ScanWarning`]s on the report and the scan goes on.

pub mod gcc;
pub mod msvc;
pub mod oneapi;
pub mod script;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use rayon::prelude::*;
use thiserror::Error;

use crate::core::candidate::dedup_candidates;
use crate::core::{ToolkitCandidate, ToolkitFamily};
use crate::util::config::Config;
use crate::util::process::CancelToken;

/// Where and how long to look.
#[derive(Debug, Clone)]
pub struct ScanHints {
    /// Replaces the family's default search roots when set.
    pub roots: Option<Vec<PathBuf>>,
    /// Searched in addition to the default (or overridden) roots.
    pub extra_roots: Vec<PathBuf>,
    /// Script wrapped by the custom-script scanner.
    pub script: Option<PathBuf>,
    /// Time limit for a single probe subprocess.
    pub probe_timeout: Duration,
    /// Maximum directory depth for filesystem walks.
    pub max_depth: usize,
    /// Point in time after which the scan stops and reports a timeout.
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl Default for ScanHints {
    fn default() -> Self {
        ScanHints {
            roots: None,
            extra_roots: Vec::new(),
            script: None,
            probe_timeout: Duration::from_secs(10),
            max_depth: 8,
            deadline: None,
            cancel: CancelToken::new(),
        }
    }
}

impl ScanHints {
    /// Hints seeded from configuration.
    pub fn from_config(config: &Config) -> Self {
        ScanHints {
            extra_roots: config.scan.extra_dirs.clone(),
            probe_timeout: config.probe_timeout(),
            max_depth: config.max_depth(),
            ..ScanHints::default()
        }
    }

    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = Some(roots);
        self
    }

    pub fn with_extra_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.extra_roots.extend(roots);
        self
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Search roots: the override list or `defaults`, followed by the extra roots.
    pub fn search_roots(&self, defaults: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut roots = self.roots.clone().unwrap_or(defaults);
        for extra in &self.extra_roots {
            if !roots.contains(extra) {
                roots.push(extra.clone());
            }
        }
        roots
    }

    /// Whether the scan must stop now.
    pub fn expired(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Probe time limit, shortened so it never runs past the scan deadline.
    pub fn probe_limit(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .probe_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.probe_timeout,
        }
    }
}

/// Non-fatal problem met during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ScanWarning {
    #[error("cannot access {}: {message}", .path.display())]
    #[diagnostic(code(kitenv::scan::access))]
    Access { path: PathBuf, message: String },

    #[error("probe of {} failed: {message}", .binary.display())]
    #[diagnostic(code(kitenv::scan::probe))]
    Probe { binary: PathBuf, message: String },

    #[error("{family} scan stopped before finishing (deadline or cancellation)")]
    #[diagnostic(code(kitenv::scan::timeout))]
    Timeout { family: ToolkitFamily },

    #[error("vswhere: {message}")]
    #[diagnostic(code(kitenv::scan::vswhere))]
    Vswhere { message: String },
}

/// Result of scanning one or more families.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub candidates: Vec<ToolkitCandidate>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    pub fn extend(&mut self, other: ScanReport) {
        self.candidates.extend(other.candidates);
        self.warnings.extend(other.warnings);
    }
}

/// Discover installations of one family.
pub fn discover(family: ToolkitFamily, hints: &ScanHints) -> ScanReport {
    if !family.is_supported() {
        tracing::debug!("{} is not supported on this platform", family.display_name());
        return ScanReport::default();
    }

    tracing::debug!("scanning for {}", family.display_name());
    let mut report = match family {
        ToolkitFamily::Msvc => msvc::discover(hints),
        ToolkitFamily::Gcc => gcc::discover(hints),
        ToolkitFamily::OneApi => oneapi::discover(hints),
        ToolkitFamily::CustomScript => script::discover(hints),
    };

    report.candidates = dedup_candidates(report.candidates);
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::debug!("{}: {} candidate(s)", family, report.candidates.len());
    report
}

/// Scan several families in parallel on a pool of `jobs` threads.
///
/// Reports are concatenated in the order of `families`.
pub fn discover_all(families: &[ToolkitFamily], hints: &ScanHints, jobs: usize) -> ScanReport {
    let run = || -> Vec<ScanReport> {
        families
            .par_iter()
            .map(|family| discover(*family, hints))
            .collect()
    };

    let reports = match rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
    {
        Ok(pool) => pool.install(run),
        Err(e) => {
            tracing::debug!("falling back to the global pool: {}", e);
            run()
        }
    };

    let mut all = ScanReport::default();
    for report in reports {
        all.extend(report);
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_roots_override_and_extra() {
        let hints = ScanHints::default().with_extra_roots(vec![PathBuf::from("/extra")]);
        assert_eq!(
            hints.search_roots(vec![PathBuf::from("/usr/bin")]),
            vec![PathBuf::from("/usr/bin"), PathBuf::from("/extra")]
        );

        let hints = hints.with_roots(vec![PathBuf::from("/only")]);
        assert_eq!(
            hints.search_roots(vec![PathBuf::from("/usr/bin")]),
            vec![PathBuf::from("/only"), PathBuf::from("/extra")]
        );
    }

    #[test]
    fn test_expired() {
        let hints = ScanHints::default();
        assert!(!hints.expired());

        let past = ScanHints::default().with_deadline(Instant::now());
        assert!(past.expired());
        assert_eq!(past.probe_limit(), Duration::ZERO);

        let cancel = CancelToken::new();
        let hints = ScanHints::default().with_cancel(cancel.clone());
        cancel.cancel();
        assert!(hints.expired());
    }

    #[test]
    fn test_discover_all_keeps_family_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = tmp.path().join("env.sh");
        std::fs::write(&script, "export FOO=1\n").unwrap();

        let hints = ScanHints::default()
            .with_roots(vec![tmp.path().to_path_buf()])
            .with_script(&script);
        let report = discover_all(
            &[ToolkitFamily::CustomScript, ToolkitFamily::OneApi],
            &hints,
            2,
        );

        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].family(), ToolkitFamily::CustomScript);
    }
}
