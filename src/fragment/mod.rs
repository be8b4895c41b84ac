//! CMake configure-preset fragments.
//!
//! A [`Fragment`] is a hidden configure preset carrying a merged toolkit
//! environment. Path-like variables end in `$penv{NAME}` so CMake appends
//! the inherited value; that tail is also what marks a value as path-like
//! when a fragment is read back.
//!
//! [`PresetDocument`] is the `CMakeUserPresets.json` file fragments are
//! written into.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::environment::{dedup_segments, split_paths, EnvValue, PATH_SEPARATOR};
use crate::core::{MergedEnvironment, ResolvedEnvironment, ToolkitFamily};
use crate::filter::ToolkitSpecFilter;
use crate::util::fs::{read_to_string, write_string};

/// Prefix of every generated preset name.
pub const NAME_PREFIX: &str = "toolkit_";

/// Preset schema version written to new documents.
pub const DEFAULT_PRESET_VERSION: u32 = 7;

#[derive(Debug, Error, Diagnostic)]
pub enum FragmentError {
    #[error("configure preset is malformed: {message}")]
    #[diagnostic(code(kitenv::fragment::malformed))]
    Malformed { message: String },

    #[error("no configure preset named `{name}`")]
    #[diagnostic(code(kitenv::fragment::missing))]
    Missing { name: String },
}

/// `$penv{NAME}`
pub fn penv(name: &str) -> String {
    format!("$penv{{{}}}", name)
}

/// A hidden configure preset holding one toolkit chain's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub name: String,
    #[serde(default = "default_hidden")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "inherits::deserialize")]
    pub inherits: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cache_variables: BTreeMap<String, String>,
}

fn default_hidden() -> bool {
    true
}

/// `inherits` may be a single string or a list.
mod inherits {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match OneOrMany::deserialize(d)? {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        })
    }
}

impl Fragment {
    /// Build a fragment from a merged environment.
    pub fn build(name: impl Into<String>, inherits: Vec<String>, merged: &MergedEnvironment) -> Self {
        let env = merged.environment();
        let environment = env
            .vars()
            .iter()
            .map(|(key, value)| (key.clone(), render_value(key, value)))
            .collect();

        Fragment {
            name: name.into(),
            hidden: true,
            inherits,
            environment,
            cache_variables: env.cache().clone(),
        }
    }

    /// Fragment with no environment, written for toolkits that cannot be
    /// resolved on this host so that presets inheriting it stay valid.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Fragment {
            name: name.into(),
            hidden: true,
            inherits: Vec::new(),
            environment: BTreeMap::new(),
            cache_variables: BTreeMap::new(),
        }
    }

    /// Read a fragment from a configure preset object.
    pub fn parse(value: &Value) -> Result<Self, FragmentError> {
        Fragment::deserialize(value).map_err(|e| FragmentError::Malformed {
            message: e.to_string(),
        })
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// The environment this fragment encodes.
    pub fn to_environment(&self) -> ResolvedEnvironment {
        let mut env = ResolvedEnvironment::new();
        for (key, value) in &self.environment {
            env.insert(key, parse_value(key, value));
        }
        for (key, value) in &self.cache_variables {
            env.set_cache(key.clone(), value.clone());
        }
        env
    }
}

fn render_value(key: &str, value: &EnvValue) -> String {
    match value {
        EnvValue::Scalar(s) => s.clone(),
        EnvValue::Paths(segments) => {
            let mut parts = segments.clone();
            parts.push(penv(key));
            parts.join(&PATH_SEPARATOR.to_string())
        }
    }
}

fn parse_value(key: &str, value: &str) -> EnvValue {
    match value.strip_suffix(&penv(key)) {
        Some(head) => EnvValue::Paths(split_paths(head)),
        None => EnvValue::Scalar(value.to_string()),
    }
}

/// Default preset name for a chain, e.g. `toolkit_vs2019_oneapi2021_3`.
pub fn default_name(specs: &[ToolkitSpecFilter], script: Option<&Path>) -> String {
    let parts: Vec<String> = specs
        .iter()
        .map(|spec| {
            let version = spec
                .version
                .lower()
                .or(spec.version.upper())
                .map(|bound| &bound.version)
                .filter(|v| !v.is_empty());
            match spec.family {
                Some(ToolkitFamily::Msvc) => match version {
                    Some(v) => format!("vs{}", v),
                    None => "vs_latest".to_string(),
                },
                Some(ToolkitFamily::Gcc) => match version {
                    Some(v) => format!("gcc{}", v.joined()),
                    None => "gcc_latest".to_string(),
                },
                Some(ToolkitFamily::OneApi) => match version {
                    Some(v) => format!("oneapi{}", v.underscored()),
                    None => "oneapi_latest".to_string(),
                },
                Some(ToolkitFamily::CustomScript) => {
                    let stem = script
                        .and_then(|p| p.file_stem())
                        .and_then(|s| s.to_str())
                        .unwrap_or("env");
                    format!("script_{}", sanitize(stem))
                }
                None => "any".to_string(),
            }
        })
        .collect();

    if parts.is_empty() {
        format!("{}empty", NAME_PREFIX)
    } else {
        format!("{}{}", NAME_PREFIX, parts.join("_"))
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// How [`PresetDocument::add_preset`] treats a preset that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    /// Overwrite the existing preset.
    Replace,
    /// Keep existing keys, fill in missing ones. Path-like variables gain
    /// the new segments ahead of the existing ones.
    Merge,
    /// Leave an existing preset untouched.
    KeepExisting,
}

/// A `CMakeUserPresets.json` document.
#[derive(Debug, Clone)]
pub struct PresetDocument {
    path: PathBuf,
    data: Map<String, Value>,
    existed: bool,
}

impl PresetDocument {
    /// Empty document that will be written to `path`.
    pub fn new(path: impl Into<PathBuf>, version: u32) -> Self {
        let mut data = Map::new();
        data.insert("version".to_string(), Value::from(version));
        data.insert("configurePresets".to_string(), Value::Array(Vec::new()));
        PresetDocument {
            path: path.into(),
            data,
            existed: false,
        }
    }

    /// Load `path` if it exists, otherwise start an empty document.
    pub fn load(path: impl Into<PathBuf>, version: u32) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Ok(Self::new(path, version));
        }

        let contents = read_to_string(&path)?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let Value::Object(mut data) = value else {
            anyhow::bail!("{} is not a JSON object", path.display());
        };
        if !data.contains_key("version") {
            data.insert("version".to_string(), Value::from(version));
        }
        if !matches!(data.get("configurePresets"), Some(Value::Array(_))) {
            data.insert("configurePresets".to_string(), Value::Array(Vec::new()));
        }
        Ok(PresetDocument {
            path,
            data,
            existed: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the document was read from disk.
    pub fn existed(&self) -> bool {
        self.existed
    }

    fn presets_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.data
            .get_mut("configurePresets")
            .and_then(Value::as_array_mut)
    }

    fn presets(&self) -> &[Value] {
        match self.data.get("configurePresets") {
            Some(Value::Array(presets)) => presets,
            _ => &[],
        }
    }

    /// Names of all configure presets, in document order.
    pub fn preset_names(&self) -> Vec<String> {
        self.presets()
            .iter()
            .filter_map(|p| p.get("name").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// The configure preset called `name`, read as a fragment.
    pub fn get(&self, name: &str) -> Result<Fragment, FragmentError> {
        let preset = self
            .presets()
            .iter()
            .find(|p| p.get("name").and_then(Value::as_str) == Some(name))
            .ok_or_else(|| FragmentError::Missing {
                name: name.to_string(),
            })?;
        Fragment::parse(preset)
    }

    /// Add `fragment`, resolving a name clash according to `mode`.
    pub fn add_preset(&mut self, fragment: &Fragment, mode: AddMode) -> Result<()> {
        let value = fragment
            .to_value()
            .with_context(|| format!("failed to serialize preset `{}`", fragment.name))?;
        self.add_value(value, mode)?;
        Ok(())
    }

    /// Add an arbitrary configure preset object, resolving a name clash
    /// according to `mode`.
    pub fn add_value(&mut self, preset: Value, mode: AddMode) -> Result<(), FragmentError> {
        let name = preset_name(&preset)?.to_string();
        let Some(presets) = self.presets_mut() else {
            return Ok(());
        };
        let existing = presets
            .iter_mut()
            .find(|p| p.get("name").and_then(Value::as_str) == Some(name.as_str()));

        match (existing, mode) {
            (None, _) => presets.push(preset),
            (Some(slot), AddMode::Replace) => *slot = preset,
            (Some(slot), AddMode::Merge) => merge_preset(slot, &preset),
            (Some(_), AddMode::KeepExisting) => {}
        }
        Ok(())
    }

    /// Pretty JSON with a four-space indent.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.data
            .serialize(&mut ser)
            .context("failed to serialize presets")?;
        let mut text = String::from_utf8(buf).context("preset JSON is not UTF-8")?;
        text.push('\n');
        Ok(text)
    }

    pub fn save(&self) -> Result<()> {
        write_string(&self.path, &self.render()?)
    }
}

fn preset_name(preset: &Value) -> Result<&str, FragmentError> {
    if !preset.is_object() {
        return Err(FragmentError::Malformed {
            message: "preset is not a JSON object".to_string(),
        });
    }
    preset
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| FragmentError::Malformed {
            message: "preset has no `name`".to_string(),
        })
}

/// Read hand-written configure presets from `path`.
///
/// The file is either a preset document (its `configurePresets` are used)
/// or a bare array of presets.
pub fn load_static_presets(path: &Path) -> Result<Vec<Value>> {
    let contents = read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let presets = match value {
        Value::Array(presets) => presets,
        Value::Object(mut data) => match data.remove("configurePresets") {
            Some(Value::Array(presets)) => presets,
            _ => anyhow::bail!("{} has no `configurePresets` array", path.display()),
        },
        _ => anyhow::bail!("{} is neither a preset document nor an array", path.display()),
    };
    for preset in &presets {
        preset_name(preset).with_context(|| format!("invalid preset in {}", path.display()))?;
    }
    Ok(presets)
}

/// Fill `dst` with what `src` has and `dst` lacks.
fn merge_preset(dst: &mut Value, src: &Value) {
    let (Value::Object(dst), Value::Object(src)) = (dst, src) else {
        return;
    };

    for (key, value) in src {
        match (key.as_str(), dst.get_mut(key)) {
            (_, None) => {
                dst.insert(key.clone(), value.clone());
            }
            ("environment", Some(Value::Object(existing))) => {
                let Value::Object(incoming) = value else { continue };
                for (name, new_value) in incoming {
                    match existing.get_mut(name) {
                        None => {
                            existing.insert(name.clone(), new_value.clone());
                        }
                        Some(old_value) => {
                            if let (Some(old), Some(new)) = (old_value.as_str(), new_value.as_str()) {
                                if let Some(merged) = merge_path_value(name, old, new) {
                                    *old_value = Value::String(merged);
                                }
                            }
                        }
                    }
                }
            }
            ("cacheVariables", Some(Value::Object(existing))) => {
                let Value::Object(incoming) = value else { continue };
                for (name, new_value) in incoming {
                    if !existing.contains_key(name) {
                        existing.insert(name.clone(), new_value.clone());
                    }
                }
            }
            _ => {}
        }
    }
}

/// Combine two path-like values, new segments first. `None` unless both
/// values are path-like.
fn merge_path_value(name: &str, old: &str, new: &str) -> Option<String> {
    let (EnvValue::Paths(old), EnvValue::Paths(new)) = (parse_value(name, old), parse_value(name, new))
    else {
        return None;
    };
    let mut segments = new;
    segments.extend(old);
    Some(render_value(name, &EnvValue::Paths(dedup_segments(segments))))
}
