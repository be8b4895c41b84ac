//! Toolkit versions and version range specifications.
//!
//! Toolkit vendors use anything from a single number (`2019`) up to four
//! dot-separated parts (`16.11.33927.289`), so versions here are a short list
//! of numeric parts rather than semver. Missing trailing parts compare as
//! zero: `8 == 8.0.0`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum number of numeric parts kept from a version string.
pub const MAX_PARTS: usize = 4;

const RE_VERSION: &str = r"(\d+(?:\.\d+){0,3})";
const RE_OP: &str = r"(<=|>=|lte|gte|lt|gt|<|>)";
const RE_OP_SINGLE: &str = r"(<=|>=|lte|gte|range|eq|lt|gt|<|>|=)";

static SPEC_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*{RE_OP_SINGLE}?\s*{RE_VERSION}\s*$"))
        .expect("single version spec regex is valid")
});

static SPEC_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*{RE_OP}\s*{RE_VERSION}\s*,\s*{RE_OP}\s*{RE_VERSION}\s*$"
    ))
    .expect("range version spec regex is valid")
});

/// Errors from parsing versions and version specifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version `{0}`: expected up to four dot-separated numbers")]
    InvalidVersion(String),

    #[error("could not parse version specification `{0}`")]
    InvalidSpec(String),

    #[error("no version can satisfy specification `{0}`")]
    EmptyRange(String),
}

/// A numeric toolkit version with one to four parts.
#[derive(Debug, Clone, Default)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    /// Create a version from explicit parts. Extra parts beyond four are dropped.
    pub fn new(parts: impl IntoIterator<Item = u32>) -> Self {
        Version {
            parts: parts.into_iter().take(MAX_PARTS).collect(),
        }
    }

    /// The empty version, used for toolkits without a version (custom scripts).
    pub fn unspecified() -> Self {
        Version::default()
    }

    /// Parse a version string such as `11`, `11.2.0` or `10.0.22621.0`.
    ///
    /// Parts after the fourth are ignored, matching how vendor directories
    /// are sometimes suffixed with build numbers.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }

        let mut parts = Vec::with_capacity(MAX_PARTS);
        for piece in trimmed.split('.').take(MAX_PARTS) {
            if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::InvalidVersion(s.to_string()));
            }
            let value = piece
                .parse::<u32>()
                .map_err(|_| VersionError::InvalidVersion(s.to_string()))?;
            parts.push(value);
        }

        Ok(Version { parts })
    }

    /// Parse a version, returning `None` instead of an error.
    ///
    /// Used when scanning directory names, most of which are not versions.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        Version::parse(s).ok()
    }

    /// The numeric parts.
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether this version has no parts at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Version with its last part incremented (`11.2` -> `11.3`).
    ///
    /// This is the exclusive upper bound of the prefix range of `self`.
    pub fn bump_last(&self) -> Version {
        let mut parts = self.parts.clone();
        if let Some(last) = parts.last_mut() {
            *last = last.saturating_add(1);
        }
        Version { parts }
    }

    /// Parts joined without separator (`11.2.0` -> `1120`), used in preset names.
    pub fn joined(&self) -> String {
        self.join_with("")
    }

    /// Parts joined with underscores (`2021.3.0` -> `2021_3_0`).
    pub fn underscored(&self) -> String {
        self.join_with("_")
    }

    fn join_with(&self, sep: &str) -> String {
        self.parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(sep)
    }

    fn significant(&self) -> &[u32] {
        let end = self
            .parts
            .iter()
            .rposition(|p| *p != 0)
            .map_or(0, |idx| idx + 1);
        &self.parts[..end]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for idx in 0..len {
            let lhs = self.parts.get(idx).copied().unwrap_or(0);
            let rhs = other.parts.get(idx).copied().unwrap_or(0);
            match lhs.cmp(&rhs) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            write!(f, "unspecified")
        } else {
            write!(f, "{}", self.join_with("."))
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.parts.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(&self.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Version::unspecified());
        }
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One end of a version range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(version: Version) -> Self {
        Bound {
            version,
            inclusive: true,
        }
    }

    pub fn exclusive(version: Version) -> Self {
        Bound {
            version,
            inclusive: false,
        }
    }
}

/// A version range with optional lower and upper bounds.
///
/// The default spec has no bounds and matches every version, including the
/// unspecified one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionSpec {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl VersionSpec {
    /// A spec matching any version.
    pub fn any() -> Self {
        VersionSpec::default()
    }

    /// Inclusive range `[min, max]`.
    pub fn between(min: Version, max: Version) -> Self {
        VersionSpec {
            lower: Some(Bound::inclusive(min)),
            upper: Some(Bound::inclusive(max)),
        }
    }

    /// `>= min`.
    pub fn at_least(min: Version) -> Self {
        VersionSpec {
            lower: Some(Bound::inclusive(min)),
            upper: None,
        }
    }

    /// `<= max`.
    pub fn at_most(max: Version) -> Self {
        VersionSpec {
            lower: None,
            upper: Some(Bound::inclusive(max)),
        }
    }

    /// All versions starting with `prefix`: `11.2` matches `11.2`, `11.2.0`, `11.2.7`.
    pub fn prefix(prefix: Version) -> Self {
        let upper = prefix.bump_last();
        VersionSpec {
            lower: Some(Bound::inclusive(prefix)),
            upper: Some(Bound::exclusive(upper)),
        }
    }

    /// Build a spec from explicit bounds.
    pub fn from_bounds(lower: Option<Bound>, upper: Option<Bound>) -> Self {
        VersionSpec { lower, upper }
    }

    pub fn lower(&self) -> Option<&Bound> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Bound> {
        self.upper.as_ref()
    }

    /// Whether the spec places no constraint at all.
    pub fn is_any(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Whether no version can satisfy the spec.
    pub fn is_empty_range(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi)) => match lo.version.cmp(&hi.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(lo.inclusive && hi.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    /// Check whether `version` lies within the range.
    ///
    /// An unspecified version only matches the unconstrained spec.
    pub fn matches(&self, version: &Version) -> bool {
        if self.is_any() {
            return true;
        }
        if version.is_empty() {
            return false;
        }
        if let Some(lo) = &self.lower {
            match version.cmp(&lo.version) {
                Ordering::Less => return false,
                Ordering::Equal if !lo.inclusive => return false,
                _ => {}
            }
        }
        if let Some(hi) = &self.upper {
            match version.cmp(&hi.version) {
                Ordering::Greater => return false,
                Ordering::Equal if !hi.inclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// Parse a specification.
    ///
    /// Accepted forms:
    /// - `11`, `=11`, `eq11`, `range11`: every version starting with `11`
    /// - `>=10`, `gte10`, `>10`, `gt10`, `<=2.5`, `lte2.5`, `<2.5`, `lt2.5`
    /// - `>1.2.3,<3.2.1`: two comparisons, intersected
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        if s.trim().is_empty() {
            return Ok(VersionSpec::any());
        }

        if let Some(caps) = SPEC_SINGLE.captures(s) {
            let version = Version::parse(&caps[2])?;
            let op = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
            return match op.as_deref() {
                None | Some("=") | Some("eq") | Some("range") => Ok(VersionSpec::prefix(version)),
                Some(op) => Ok(VersionSpec::any().constrain(op, version)),
            };
        }

        if let Some(caps) = SPEC_RANGE.captures(s) {
            let first = Version::parse(&caps[2])?;
            let second = Version::parse(&caps[4])?;
            let spec = VersionSpec::any()
                .constrain(&caps[1].to_ascii_lowercase(), first)
                .constrain(&caps[3].to_ascii_lowercase(), second);
            if spec.is_empty_range() {
                return Err(VersionError::EmptyRange(s.to_string()));
            }
            return Ok(spec);
        }

        Err(VersionError::InvalidSpec(s.to_string()))
    }

    /// Parse an MSVC build tools specification.
    ///
    /// Besides the regular forms, accepts the platform toolset names
    /// `v141`, `v142` and `v143`.
    pub fn parse_toolset(s: &str) -> Result<Self, VersionError> {
        let range = |lo: u32, hi: u32| {
            VersionSpec::from_bounds(
                Some(Bound::inclusive(Version::new([14, lo]))),
                Some(Bound::exclusive(Version::new([14, hi]))),
            )
        };
        match s.trim().to_ascii_lowercase().as_str() {
            "v143" => Ok(range(30, 40)),
            "v142" => Ok(range(20, 30)),
            "v141" => Ok(range(10, 20)),
            other if other.starts_with('v') => Err(VersionError::InvalidSpec(s.to_string())),
            _ => VersionSpec::parse(s),
        }
    }

    /// Intersect with a single comparison.
    fn constrain(mut self, op: &str, version: Version) -> Self {
        match op {
            ">=" | "gte" => self.raise_lower(Bound::inclusive(version)),
            ">" | "gt" => self.raise_lower(Bound::exclusive(version)),
            "<=" | "lte" => self.lower_upper(Bound::inclusive(version)),
            "<" | "lt" => self.lower_upper(Bound::exclusive(version)),
            _ => {}
        }
        self
    }

    fn raise_lower(&mut self, bound: Bound) {
        let replace = match &self.lower {
            None => true,
            Some(cur) => match bound.version.cmp(&cur.version) {
                Ordering::Greater => true,
                Ordering::Equal => cur.inclusive && !bound.inclusive,
                Ordering::Less => false,
            },
        };
        if replace {
            self.lower = Some(bound);
        }
    }

    fn lower_upper(&mut self, bound: Bound) {
        let replace = match &self.upper {
            None => true,
            Some(cur) => match bound.version.cmp(&cur.version) {
                Ordering::Less => true,
                Ordering::Equal => cur.inclusive && !bound.inclusive,
                Ordering::Greater => false,
            },
        };
        if replace {
            self.upper = Some(bound);
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lower, &self.upper) {
            (None, None) => write!(f, "any"),
            (Some(lo), None) => write!(f, "{}{}", if lo.inclusive { ">=" } else { ">" }, lo.version),
            (None, Some(hi)) => write!(f, "{}{}", if hi.inclusive { "<=" } else { "<" }, hi.version),
            (Some(lo), Some(hi)) => write!(
                f,
                "{}{}, {}{}",
                if lo.inclusive { ">=" } else { ">" },
                lo.version,
                if hi.inclusive { "<=" } else { "<" },
                hi.version
            ),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionSpec::parse(s)
    }
}
