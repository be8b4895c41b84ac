//! Discovered toolkit installations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::family::ToolkitFamily;
use super::version::Version;

/// Target architecture of a toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
    Other,
}

impl Arch {
    /// Architecture of the running host.
    pub fn host() -> Self {
        Arch::from_name(std::env::consts::ARCH)
    }

    /// Architecture from the first component of a machine triplet
    /// (`x86_64-linux-gnu` -> `X86_64`).
    pub fn from_triplet(triplet: &str) -> Self {
        let first = triplet.split('-').next().unwrap_or_default();
        Arch::from_name(first)
    }

    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Arch::X86_64,
            "x86" | "i386" | "i486" | "i586" | "i686" => Arch::X86,
            "aarch64" | "arm64" => Arch::Aarch64,
            _ => Arch::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::X86 => "x86",
            Arch::Aarch64 => "aarch64",
            Arch::Other => "other",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Arch::from_name(s.trim()) {
            Arch::Other => Err(format!("unknown architecture `{}`", s)),
            arch => Ok(arch),
        }
    }
}

/// How a custom script must be sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// POSIX shell script, sourced with `.`.
    Shell,
    /// Windows batch file, run with `call`.
    Batch,
}

impl ScriptKind {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("bat") | Some("cmd") => ScriptKind::Batch,
            _ => ScriptKind::Shell,
        }
    }
}

/// One MSVC toolset inside a Visual Studio installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolset {
    pub version: Version,
    /// `VC/Tools/MSVC/<version>`
    pub dir: PathBuf,
    /// Host architectures with a `bin/Host<arch>` directory (`x64`, `x86`).
    pub hosts: Vec<String>,
    /// Target architectures reachable from the preferred host.
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsvcAttributes {
    pub instance_id: String,
    pub product_id: String,
    pub display_name: String,
    /// Newest first.
    pub toolsets: Vec<Toolset>,
    /// Newest first.
    pub sdk_versions: Vec<Version>,
    pub vcvarsall: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GccAttributes {
    /// Output of `-dumpmachine`.
    pub machine: String,
    pub bin_dir: PathBuf,
    pub c: Option<PathBuf>,
    pub cxx: Option<PathBuf>,
    pub fortran: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneApiAttributes {
    /// Component name to its `env/vars.{sh,bat}` script.
    pub scripts: BTreeMap<String, PathBuf>,
    pub ifx: Option<PathBuf>,
    pub ifort: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAttributes {
    pub script: PathBuf,
    pub kind: ScriptKind,
}

/// Family-specific details of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum CandidateAttributes {
    Msvc(MsvcAttributes),
    Gcc(GccAttributes),
    OneApi(OneApiAttributes),
    Script(ScriptAttributes),
}

impl CandidateAttributes {
    pub fn family(&self) -> ToolkitFamily {
        match self {
            CandidateAttributes::Msvc(_) => ToolkitFamily::Msvc,
            CandidateAttributes::Gcc(_) => ToolkitFamily::Gcc,
            CandidateAttributes::OneApi(_) => ToolkitFamily::OneApi,
            CandidateAttributes::Script(_) => ToolkitFamily::CustomScript,
        }
    }

    /// Text that distinguishes two installations sharing a root.
    fn identity_detail(&self) -> String {
        match self {
            CandidateAttributes::Msvc(a) => a.instance_id.clone(),
            CandidateAttributes::Gcc(a) => format!("{}|{}", a.machine, a.bin_dir.display()),
            CandidateAttributes::OneApi(_) => String::new(),
            CandidateAttributes::Script(a) => a.script.display().to_string(),
        }
    }
}

/// A toolkit installation found by a scan.
///
/// Candidates are never modified after the scan; narrowing (for example to
/// a subset of MSVC toolsets) produces a new value with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitCandidate {
    id: String,
    version: Version,
    root: PathBuf,
    arch: Arch,
    components: BTreeSet<String>,
    attributes: CandidateAttributes,
}

impl ToolkitCandidate {
    pub fn new(
        version: Version,
        root: impl Into<PathBuf>,
        arch: Arch,
        components: impl IntoIterator<Item = impl Into<String>>,
        attributes: CandidateAttributes,
    ) -> Self {
        let root = root.into();
        let id = candidate_id(&attributes, &version, &root, arch);
        ToolkitCandidate {
            id,
            version,
            root,
            arch,
            components: components.into_iter().map(Into::into).collect(),
            attributes,
        }
    }

    /// Stable identifier: `<family>-<version>-<hash>`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn family(&self) -> ToolkitFamily {
        self.attributes.family()
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Installation root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn components(&self) -> &BTreeSet<String> {
        &self.components
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains(name)
    }

    pub fn attributes(&self) -> &CandidateAttributes {
        &self.attributes
    }

    /// Copy of this candidate with replaced attributes.
    pub fn narrowed(&self, attributes: CandidateAttributes) -> Self {
        ToolkitCandidate {
            attributes,
            ..self.clone()
        }
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> String {
        let detail = match &self.attributes {
            CandidateAttributes::Msvc(a) => {
                let toolsets: Vec<String> =
                    a.toolsets.iter().map(|t| t.version.to_string()).collect();
                format!("{} [toolsets: {}]", a.display_name, toolsets.join(", "))
            }
            CandidateAttributes::Gcc(a) => format!("{} in {}", a.machine, a.bin_dir.display()),
            CandidateAttributes::OneApi(_) => format!("{}", self.root.display()),
            CandidateAttributes::Script(a) => format!("{}", a.script.display()),
        };
        let components: Vec<&str> = self.components.iter().map(String::as_str).collect();
        if components.is_empty() {
            format!("{} {} ({}) {}", self.family(), self.version, self.arch, detail)
        } else {
            format!(
                "{} {} ({}) {} +{}",
                self.family(),
                self.version,
                self.arch,
                detail,
                components.join("+")
            )
        }
    }

    fn dedup_key(&self) -> (ToolkitFamily, PathBuf, Version, Arch, String) {
        (
            self.family(),
            real_path(&self.root),
            self.version.clone(),
            self.arch,
            self.attributes.identity_detail(),
        )
    }
}

impl fmt::Display for ToolkitCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

fn real_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn candidate_id(attributes: &CandidateAttributes, version: &Version, root: &Path, arch: Arch) -> String {
    let family = attributes.family();
    let mut hasher = Sha256::new();
    hasher.update(family.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(real_path(root).to_string_lossy().as_bytes());
    hasher.update([0]);
    hasher.update(version.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(arch.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(attributes.identity_detail().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}-{}", family, version, &digest[..12])
}

/// Remove duplicate installations, keeping the first position.
///
/// Two candidates are duplicates when they share family, real root path,
/// version and architecture. The one with more components wins.
pub fn dedup_candidates(candidates: Vec<ToolkitCandidate>) -> Vec<ToolkitCandidate> {
    let mut kept: Vec<ToolkitCandidate> = Vec::with_capacity(candidates.len());
    let mut index: HashMap<(ToolkitFamily, PathBuf, Version, Arch, String), usize> = HashMap::new();

    for candidate in candidates {
        match index.get(&candidate.dedup_key()) {
            Some(&pos) => {
                if candidate.components.len() > kept[pos].components.len() {
                    kept[pos] = candidate;
                }
            }
            None => {
                index.insert(candidate.dedup_key(), kept.len());
                kept.push(candidate);
            }
        }
    }

    kept
}
