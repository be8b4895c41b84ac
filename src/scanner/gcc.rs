//! GNU compiler discovery.
//!
//! Walks the search roots for `bin/` directories holding files named like
//! `gcc`, `g++-12` or `x86_64-linux-gnu-gfortran-11`, probes every distinct
//! binary, and groups binaries that share a directory, version and machine
//! into one candidate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::core::candidate::{Arch, CandidateAttributes, GccAttributes};
use crate::core::{ToolkitCandidate, ToolkitFamily, Version};
use crate::util::fs::is_executable;
use crate::util::process::ProcessBuilder;

use super::{ScanHints, ScanReport, ScanWarning};

static COMPILER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9_]+-[a-zA-Z0-9_\-]+-)?(gcc|g\+\+|gfortran)(-[0-9.]+)?$")
        .expect("compiler name regex is valid")
});

/// Line of `--version` output that identifies a genuine GNU compiler.
const FSF_MARKER: &str = "Free Software Foundation";

/// Language a compiler binary handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Language {
    C,
    Cxx,
    Fortran,
}

impl Language {
    pub fn component(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cxx => "cxx",
            Language::Fortran => "fortran",
        }
    }

    fn from_driver(name: &str) -> Option<Self> {
        match name {
            "gcc" => Some(Language::C),
            "g++" => Some(Language::Cxx),
            "gfortran" => Some(Language::Fortran),
            _ => None,
        }
    }
}

/// Language handled by a binary with this file name, if it looks like a GNU driver.
pub fn classify(file_name: &str) -> Option<Language> {
    COMPILER_NAME
        .captures(file_name)
        .and_then(|caps| Language::from_driver(&caps[2]))
}

/// What a successful probe tells about a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub version: Version,
    pub machine: String,
}

fn default_roots() -> Vec<PathBuf> {
    let mut roots = vec![
        PathBuf::from("/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/usr/local"),
        PathBuf::from("/opt"),
    ];
    if let Some(dirs) = directories::BaseDirs::new() {
        roots.push(dirs.home_dir().to_path_buf());
    }
    roots
}

pub fn discover(hints: &ScanHints) -> ScanReport {
    let mut report = ScanReport::default();
    let roots = hints.search_roots(default_roots());

    let binaries = find_binaries(&roots, hints, &mut report);
    if hints.expired() {
        report.warnings.push(ScanWarning::Timeout {
            family: ToolkitFamily::Gcc,
        });
        return report;
    }

    tracing::debug!("probing {} compiler binaries", binaries.len());
    let probes: Vec<(PathBuf, Language, Result<ProbeResult, ScanWarning>)> = binaries
        .into_par_iter()
        .map(|(binary, lang)| {
            let result = probe(&binary, hints);
            (binary, lang, result)
        })
        .collect();

    let mut groups: BTreeMap<(PathBuf, Version, String), BTreeMap<Language, PathBuf>> =
        BTreeMap::new();
    for (binary, lang, result) in probes {
        match result {
            Ok(probe) => {
                let Some(bin_dir) = binary.parent().map(Path::to_path_buf) else {
                    continue;
                };
                let slot = groups
                    .entry((bin_dir, probe.version, probe.machine))
                    .or_default();
                let replace = slot
                    .get(&lang)
                    .map_or(true, |current| prefer(&binary, current));
                if replace {
                    slot.insert(lang, binary);
                }
            }
            Err(warning) => {
                tracing::debug!("discarding {}: {}", binary.display(), warning);
                report.warnings.push(warning);
            }
        }
    }

    if hints.expired() {
        report.warnings.push(ScanWarning::Timeout {
            family: ToolkitFamily::Gcc,
        });
    }

    for ((bin_dir, version, machine), binaries) in groups {
        let root = bin_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| bin_dir.clone());
        let components: Vec<&str> = binaries.keys().map(Language::component).collect();
        let attributes = GccAttributes {
            machine: machine.clone(),
            bin_dir,
            c: binaries.get(&Language::C).cloned(),
            cxx: binaries.get(&Language::Cxx).cloned(),
            fortran: binaries.get(&Language::Fortran).cloned(),
        };
        report.candidates.push(ToolkitCandidate::new(
            version,
            root,
            Arch::from_triplet(&machine),
            components,
            CandidateAttributes::Gcc(attributes),
        ));
    }

    report
}

/// Between two binaries for the same language, keep the one with the
/// shorter (least decorated) file name.
fn prefer(candidate: &Path, current: &Path) -> bool {
    let len = |p: &Path| p.file_name().map_or(usize::MAX, |n| n.len());
    (len(candidate), candidate) < (len(current), current)
}

/// Walk the roots and return the real path of every matching binary.
fn find_binaries(
    roots: &[PathBuf],
    hints: &ScanHints,
    report: &mut ScanReport,
) -> BTreeMap<PathBuf, Language> {
    let mut found = BTreeMap::new();

    for root in roots {
        if !root.exists() {
            continue;
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(hints.max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            if hints.expired() {
                return found;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.clone());
                    report.warnings.push(ScanWarning::Access {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }
            let in_bin = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|n| n == "bin");
            if !in_bin {
                continue;
            }
            let Some(lang) = entry.file_name().to_str().and_then(classify) else {
                continue;
            };

            let Ok(real) = entry.path().canonicalize() else {
                tracing::debug!("dangling link {}", entry.path().display());
                continue;
            };
            if !is_executable(&real) {
                continue;
            }
            found.entry(real).or_insert(lang);
        }
    }

    found
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

/// Run the three identification probes against one binary.
pub fn probe(binary: &Path, hints: &ScanHints) -> Result<ProbeResult, ScanWarning> {
    let banner = run_probe(binary, &["--version"], hints)?;
    let is_gnu = banner
        .lines()
        .nth(1)
        .is_some_and(|line| line.contains(FSF_MARKER));
    if !is_gnu {
        return Err(probe_error(binary, "not a GNU compiler"));
    }

    let raw_version = run_probe(binary, &["-dumpfullversion", "-dumpversion"], hints)?;
    let version = Version::parse(raw_version.trim())
        .ok()
        .filter(|v| v.len() == 3)
        .ok_or_else(|| {
            probe_error(
                binary,
                format!("unexpected version output `{}`", raw_version.trim()),
            )
        })?;

    let machine = run_probe(binary, &["-dumpmachine"], hints)?.trim().to_string();
    if machine.is_empty() || machine.contains(char::is_whitespace) {
        return Err(probe_error(
            binary,
            format!("unexpected machine output `{}`", machine),
        ));
    }

    Ok(ProbeResult { version, machine })
}

fn run_probe(binary: &Path, args: &[&str], hints: &ScanHints) -> Result<String, ScanWarning> {
    let output = ProcessBuilder::new(binary)
        .args(args)
        .env("LC_ALL", "C")
        .env("LANG", "C")
        .exec_with_deadline(Some(hints.probe_limit()), &hints.cancel)
        .map_err(|e| probe_error(binary, e.to_string()))?;

    if !output.status.success() {
        return Err(probe_error(
            binary,
            format!("`{}` exited with {}", args.join(" "), output.status),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn probe_error(binary: &Path, message: impl Into<String>) -> ScanWarning {
    ScanWarning::Probe {
        binary: binary.to_path_buf(),
        message: message.into(),
    }
}
