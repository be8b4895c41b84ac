//! Intel oneAPI discovery.
//!
//! A oneAPI root holds one directory per component (`compiler`, `mkl`, ...)
//! with one subdirectory per installed version. A version is a candidate
//! when at least one component ships its `env/vars` script for it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::core::candidate::{Arch, CandidateAttributes, OneApiAttributes};
use crate::core::{ToolkitCandidate, ToolkitFamily, Version};
use crate::util::fs::subdirs;

use super::{ScanHints, ScanReport, ScanWarning};

/// Components probed under each root, in sourcing order.
pub const COMPONENTS: &[&str] = &["compiler", "mkl", "tbb", "mpi"];

#[cfg(windows)]
pub(crate) const VARS_SCRIPT: &str = "env/vars.bat";
#[cfg(not(windows))]
pub(crate) const VARS_SCRIPT: &str = "env/vars.sh";

/// Candidate locations of `ifx` relative to `compiler/<version>`. Older
/// releases keep binaries under an OS directory.
#[cfg(windows)]
pub(crate) const IFX_PATHS: &[&str] = &["windows/bin/ifx.exe", "bin/ifx.exe"];
#[cfg(not(windows))]
pub(crate) const IFX_PATHS: &[&str] = &["linux/bin/ifx", "bin/ifx"];

#[cfg(windows)]
pub(crate) const IFORT_PATHS: &[&str] = &["windows/bin/intel64/ifort.exe", "bin/intel64/ifort.exe"];
#[cfg(not(windows))]
pub(crate) const IFORT_PATHS: &[&str] = &["linux/bin/intel64/ifort", "bin/intel64/ifort"];

fn default_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(root) = std::env::var_os("ONEAPI_ROOT") {
        roots.push(PathBuf::from(root));
    }

    if cfg!(windows) {
        let program_files = std::env::var("ProgramFiles(x86)")
            .unwrap_or_else(|_| "C:\\Program Files (x86)".to_string());
        roots.push(PathBuf::from(program_files).join("Intel").join("oneAPI"));
    } else {
        roots.push(PathBuf::from("/opt/intel/oneapi"));
        if let Some(dirs) = directories::BaseDirs::new() {
            roots.push(dirs.home_dir().join("intel").join("oneapi"));
        }
    }
    roots
}

pub fn discover(hints: &ScanHints) -> ScanReport {
    let mut report = ScanReport::default();

    for root in hints.search_roots(default_roots()) {
        if hints.expired() {
            report.warnings.push(ScanWarning::Timeout {
                family: ToolkitFamily::OneApi,
            });
            break;
        }
        if !root.is_dir() {
            continue;
        }
        tracing::debug!("scanning oneAPI root {}", root.display());
        scan_root(&root, &mut report);
    }

    report
}

fn scan_root(root: &Path, report: &mut ScanReport) {
    let mut versions: BTreeSet<Version> = BTreeSet::new();
    for component in COMPONENTS {
        let dir = root.join(component);
        if !dir.is_dir() {
            continue;
        }
        match subdirs(&dir) {
            Ok(entries) => {
                versions.extend(entries.iter().filter_map(|(name, _)| Version::parse_lenient(name)));
            }
            Err(e) => report.warnings.push(ScanWarning::Access {
                path: dir,
                message: e.to_string(),
            }),
        }
    }

    for version in versions.into_iter().rev() {
        if let Some(candidate) = scan_version(root, &version) {
            report.candidates.push(candidate);
        }
    }
}

/// Build the candidate for one version, or `None` when no component has it.
fn scan_version(root: &Path, version: &Version) -> Option<ToolkitCandidate> {
    let mut scripts = BTreeMap::new();
    let mut ifx = None;
    let mut ifort = None;

    for component in COMPONENTS {
        let Some(dir) = version_dir(&root.join(component), version) else {
            continue;
        };
        let vars = dir.join(VARS_SCRIPT);
        if !vars.is_file() {
            continue;
        }
        scripts.insert(component.to_string(), vars);

        if *component == "compiler" {
            ifx = first_existing(&dir, IFX_PATHS);
            ifort = first_existing(&dir, IFORT_PATHS);
        }
    }

    if scripts.is_empty() {
        return None;
    }

    let components: Vec<String> = scripts.keys().cloned().collect();
    Some(ToolkitCandidate::new(
        version.clone(),
        root,
        Arch::X86_64,
        components,
        CandidateAttributes::OneApi(OneApiAttributes {
            scripts,
            ifx,
            ifort,
        }),
    ))
}

/// Directory under `component_dir` whose name parses to `version`
/// (`2021.3` and `2021.3.0` are the same version).
fn version_dir(component_dir: &Path, version: &Version) -> Option<PathBuf> {
    let direct = component_dir.join(version.to_string());
    if direct.is_dir() {
        return Some(direct);
    }
    subdirs(component_dir).ok()?.into_iter().find_map(|(name, path)| {
        (Version::parse_lenient(&name).as_ref() == Some(version)).then_some(path)
    })
}

fn first_existing(base: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|rel| base.join(rel))
        .find(|p| p.is_file())
}

/// Order in which component scripts must be sourced.
pub fn sourcing_order(scripts: &BTreeMap<String, PathBuf>) -> Vec<&Path> {
    COMPONENTS
        .iter()
        .filter_map(|c| scripts.get(*c).map(PathBuf::as_path))
        .collect()
}
