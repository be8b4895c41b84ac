//! Resolved and merged environments.
//!
//! A [`ResolvedEnvironment`] is what one toolkit contributes: environment
//! variables plus CMake cache variables. Maps are ordered so that rendering
//! the same environment twice gives byte-identical output.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between entries of a path-like variable on this platform.
#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Canonical spelling of an environment variable name.
///
/// Windows treats names case-insensitively, so they are upper-cased there.
pub fn normalize_key(name: &str) -> String {
    if cfg!(windows) {
        name.to_ascii_uppercase()
    } else {
        name.to_string()
    }
}

/// Split a path-like value into its non-empty segments.
pub fn split_paths(value: &str) -> Vec<String> {
    value
        .split(PATH_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop repeated segments, keeping the position of the first occurrence.
pub fn dedup_segments<I, S>(segments: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for segment in segments {
        let segment = segment.into();
        if !segment.is_empty() && seen.insert(segment.clone()) {
            out.push(segment);
        }
    }
    out
}

/// Value of one environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    /// Plain value. Later writers win.
    Scalar(String),
    /// Ordered search list.
    Paths(Vec<String>),
}

impl EnvValue {
    /// Render as the string a process would see.
    pub fn render(&self) -> String {
        match self {
            EnvValue::Scalar(s) => s.clone(),
            EnvValue::Paths(segments) => segments.join(&PATH_SEPARATOR.to_string()),
        }
    }

    pub fn is_paths(&self) -> bool {
        matches!(self, EnvValue::Paths(_))
    }

    /// Segments of the value, splitting a scalar on the path separator.
    pub fn segments(&self) -> Vec<String> {
        match self {
            EnvValue::Scalar(s) => split_paths(s),
            EnvValue::Paths(segments) => segments.clone(),
        }
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Variables contributed by a single toolkit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvironment {
    vars: BTreeMap<String, EnvValue>,
    cache: BTreeMap<String, String>,
}

impl ResolvedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a scalar variable, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.vars
            .insert(normalize_key(key), EnvValue::Scalar(value.into()));
    }

    /// Set a path-like variable to exactly `segments` (deduplicated).
    pub fn set_paths<I, S>(&mut self, key: &str, segments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vars
            .insert(normalize_key(key), EnvValue::Paths(dedup_segments(segments)));
    }

    /// Put `segments` ahead of the current segments of `key`.
    pub fn prepend_paths<I, S>(&mut self, key: &str, segments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = normalize_key(key);
        let mut combined: Vec<String> = segments.into_iter().map(Into::into).collect();
        if let Some(existing) = self.vars.get(&key) {
            combined.extend(existing.segments());
        }
        self.vars.insert(key, EnvValue::Paths(dedup_segments(combined)));
    }

    /// Insert a value as-is.
    pub fn insert(&mut self, key: &str, value: EnvValue) {
        self.vars.insert(normalize_key(key), value);
    }

    pub fn set_cache(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.cache.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.vars.get(&normalize_key(key))
    }

    /// Rendered value of a variable.
    pub fn value(&self, key: &str) -> Option<String> {
        self.get(key).map(EnvValue::render)
    }

    pub fn cache_value(&self, key: &str) -> Option<&str> {
        self.cache.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, EnvValue> {
        &self.vars
    }

    pub fn cache(&self) -> &BTreeMap<String, String> {
        &self.cache
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.cache.is_empty()
    }

    /// Overlay this environment on `base`, the way a child process would
    /// see it: scalars replace, path-like values are put ahead of the base
    /// value.
    pub fn apply_to(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut out = base.clone();
        for (key, value) in &self.vars {
            let rendered = match value {
                EnvValue::Scalar(s) => s.clone(),
                EnvValue::Paths(segments) => {
                    let mut all = segments.clone();
                    if let Some(existing) = base.get(key) {
                        all.extend(split_paths(existing));
                    }
                    dedup_segments(all).join(&PATH_SEPARATOR.to_string())
                }
            };
            out.insert(key.clone(), rendered);
        }
        out
    }
}

/// Which map a merge conflict happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Env,
    Cache,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Env => write!(f, "environment"),
            Namespace::Cache => write!(f, "cache"),
        }
    }
}

/// A value overridden during a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeWarning {
    pub namespace: Namespace,
    pub key: String,
    pub previous: String,
    pub replacement: String,
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} variable `{}` overridden: `{}` -> `{}`",
            self.namespace, self.key, self.previous, self.replacement
        )
    }
}

/// The composition of a chain of resolved environments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEnvironment {
    environment: ResolvedEnvironment,
    warnings: Vec<MergeWarning>,
}

impl MergedEnvironment {
    pub fn new(environment: ResolvedEnvironment, warnings: Vec<MergeWarning>) -> Self {
        MergedEnvironment {
            environment,
            warnings,
        }
    }

    pub fn environment(&self) -> &ResolvedEnvironment {
        &self.environment
    }

    pub fn warnings(&self) -> &[MergeWarning] {
        &self.warnings
    }

    pub fn into_environment(self) -> ResolvedEnvironment {
        self.environment
    }
}

impl From<MergedEnvironment> for ResolvedEnvironment {
    fn from(merged: MergedEnvironment) -> Self {
        merged.environment
    }
}
