//! Visual Studio discovery.
//!
//! Instances come from `vswhere -products * -all -format json`. For each
//! supported instance the MSVC toolsets under `VC/Tools/MSVC` and the
//! Windows 10/11 SDK versions are recorded. JSON parsing and directory
//! scanning are plain functions so they can be exercised on any platform.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::candidate::{Arch, CandidateAttributes, MsvcAttributes, Toolset};
use crate::core::{ToolkitCandidate, Version};
use crate::util::fs::subdirs;
use crate::util::process::{find_executable, ProcessBuilder};

use super::{ScanHints, ScanReport, ScanWarning};

const PRODUCT_PREFIX: &str = "microsoft.visualstudio.product.";
const EDITIONS: &[&str] = &["community", "professional", "enterprise", "buildtools"];
const PRODUCT_LINES: &[u32] = &[2017, 2019, 2022];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VsWhereInstance {
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    installation_path: PathBuf,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    is_complete: bool,
    #[serde(default)]
    catalog: Option<VsWhereCatalog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VsWhereCatalog {
    #[serde(default)]
    product_line_version: Option<String>,
    #[serde(default)]
    product_display_version: Option<String>,
}

/// A Visual Studio installation reported by vswhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VsInstance {
    pub instance_id: String,
    pub product_id: String,
    pub display_name: String,
    pub install_dir: PathBuf,
    /// Product line year (`2019`).
    pub product_line: Version,
    /// Marketing version (`16.11.29`).
    pub display_version: Option<Version>,
}

/// Parse vswhere JSON, keeping complete instances of supported editions and
/// product lines.
pub fn parse_instances(json: &str) -> Result<Vec<VsInstance>, serde_json::Error> {
    let raw: Vec<VsWhereInstance> = serde_json::from_str(json)?;
    Ok(raw.into_iter().filter_map(accept_instance).collect())
}

fn accept_instance(raw: VsWhereInstance) -> Option<VsInstance> {
    let product = raw.product_id.to_ascii_lowercase();
    let Some(edition) = product.strip_prefix(PRODUCT_PREFIX) else {
        tracing::debug!("skipping product {}", raw.product_id);
        return None;
    };
    if !EDITIONS.contains(&edition) {
        tracing::debug!("skipping edition {}", raw.product_id);
        return None;
    }
    if !raw.is_complete
        || raw.instance_id.is_empty()
        || raw.display_name.is_empty()
        || raw.installation_path.as_os_str().is_empty()
    {
        tracing::debug!("skipping incomplete instance {}", raw.instance_id);
        return None;
    }

    let catalog = raw.catalog?;
    let product_line = catalog
        .product_line_version
        .as_deref()
        .and_then(Version::parse_lenient)?;
    if !PRODUCT_LINES.iter().any(|year| product_line == Version::new([*year])) {
        tracing::debug!("unsupported product line {}", product_line);
        return None;
    }

    Some(VsInstance {
        instance_id: raw.instance_id,
        product_id: raw.product_id,
        display_name: raw.display_name,
        install_dir: raw.installation_path,
        product_line,
        display_version: catalog
            .product_display_version
            .as_deref()
            .and_then(Version::parse_lenient),
    })
}

/// MSVC toolsets of an installation, newest first.
pub fn scan_toolsets(install_dir: &Path) -> std::io::Result<Vec<Toolset>> {
    let tools_dir = install_dir.join("VC").join("Tools").join("MSVC");
    let mut toolsets = Vec::new();

    for (name, dir) in subdirs(&tools_dir)? {
        let Some(version) = Version::parse_lenient(&name) else {
            continue;
        };

        let bin = dir.join("bin");
        let mut hosts = Vec::new();
        let mut targets = Vec::new();
        for host in ["x64", "x86"] {
            let host_dir = bin.join(format!("Host{}", host));
            if !host_dir.is_dir() {
                continue;
            }
            hosts.push(host.to_string());
            if targets.is_empty() {
                targets = subdirs(&host_dir)
                    .map(|entries| entries.into_iter().map(|(name, _)| name).collect())
                    .unwrap_or_default();
            }
        }

        toolsets.push(Toolset {
            version,
            dir,
            hosts,
            targets,
        });
    }

    toolsets.sort_by(|a, b| b.version.cmp(&a.version));
    Ok(toolsets)
}

/// Windows SDK versions under `<kits_root>/Include`, newest first.
pub fn scan_sdks(kits_root: &Path) -> Vec<Version> {
    let mut versions: Vec<Version> = subdirs(&kits_root.join("Include"))
        .map(|entries| {
            entries
                .into_iter()
                .filter_map(|(name, _)| Version::parse_lenient(&name))
                .collect()
        })
        .unwrap_or_default();
    versions.sort_by(|a, b| b.cmp(a));
    versions
}

fn program_files_x86() -> PathBuf {
    PathBuf::from(
        std::env::var("ProgramFiles(x86)")
            .unwrap_or_else(|_| "C:\\Program Files (x86)".to_string()),
    )
}

/// Locate vswhere.exe: its standard install location, then PATH.
pub fn find_vswhere() -> Option<PathBuf> {
    let standard = program_files_x86()
        .join("Microsoft Visual Studio")
        .join("Installer")
        .join("vswhere.exe");
    if standard.is_file() {
        return Some(standard);
    }
    find_executable("vswhere")
}

/// Turn a vswhere instance into a candidate, or explain why not.
pub fn build_candidate(instance: &VsInstance, sdks: &[Version]) -> Result<ToolkitCandidate, String> {
    if !instance.install_dir.is_dir() {
        return Err(format!(
            "install directory {} does not exist",
            instance.install_dir.display()
        ));
    }

    let vcvarsall = instance
        .install_dir
        .join("VC")
        .join("Auxiliary")
        .join("Build")
        .join("vcvarsall.bat");
    if !vcvarsall.is_file() {
        return Err(format!("{} not found", vcvarsall.display()));
    }

    let toolsets = scan_toolsets(&instance.install_dir)
        .map_err(|e| format!("cannot list MSVC toolsets: {}", e))?;
    if toolsets.is_empty() {
        return Err("no MSVC toolsets installed".to_string());
    }

    let mut components = vec!["vc"];
    if !sdks.is_empty() {
        components.push("winsdk");
    }

    Ok(ToolkitCandidate::new(
        instance.product_line.clone(),
        instance.install_dir.clone(),
        Arch::X86_64,
        components,
        CandidateAttributes::Msvc(MsvcAttributes {
            instance_id: instance.instance_id.clone(),
            product_id: instance.product_id.clone(),
            display_name: instance.display_name.clone(),
            toolsets,
            sdk_versions: sdks.to_vec(),
            vcvarsall,
        }),
    ))
}

pub fn discover(hints: &ScanHints) -> ScanReport {
    let mut report = ScanReport::default();

    let Some(vswhere) = find_vswhere() else {
        tracing::debug!("vswhere.exe not found, cannot detect Visual Studio");
        return report;
    };
    tracing::debug!("found vswhere at {}", vswhere.display());

    let output = ProcessBuilder::new(&vswhere)
        .args(["-products", "*", "-all", "-format", "json", "-utf8"])
        .exec_with_deadline(Some(hints.probe_limit()), &hints.cancel);
    let output = match output {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            report.warnings.push(ScanWarning::Vswhere {
                message: format!("exited with {}", out.status),
            });
            return report;
        }
        Err(e) => {
            report.warnings.push(ScanWarning::Vswhere {
                message: e.to_string(),
            });
            return report;
        }
    };

    let instances = match parse_instances(&String::from_utf8_lossy(&output.stdout)) {
        Ok(instances) => instances,
        Err(e) => {
            report.warnings.push(ScanWarning::Vswhere {
                message: format!("unexpected output: {}", e),
            });
            return report;
        }
    };

    let kits_root = program_files_x86().join("Windows Kits").join("10");
    let sdks = scan_sdks(&kits_root);

    for instance in &instances {
        match build_candidate(instance, &sdks) {
            Ok(candidate) => report.candidates.push(candidate),
            Err(message) => report.warnings.push(ScanWarning::Access {
                path: instance.install_dir.clone(),
                message,
            }),
        }
    }

    report
}
