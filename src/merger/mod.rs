//! Chaining resolved environments.
//!
//! [`merge`] folds an ordered list of environments over an empty one. Later
//! entries shadow earlier ones: their scalars win and their path segments go
//! first.

use miette::Diagnostic;
use thiserror::Error;

use crate::core::environment::{dedup_segments, EnvValue, MergeWarning, Namespace};
use crate::core::{MergedEnvironment, ResolvedEnvironment};
use crate::util::config::MergeConfig;

/// What to do when two toolkits set different values for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Later value wins; the override is recorded as a warning.
    #[default]
    Warn,
    /// Abort the merge.
    Fail,
}

/// Conflict policies for environment and cache variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergePolicy {
    pub env: ConflictPolicy,
    pub cache: ConflictPolicy,
}

impl MergePolicy {
    pub fn strict() -> Self {
        MergePolicy {
            env: ConflictPolicy::Fail,
            cache: ConflictPolicy::Fail,
        }
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        let policy = |strict: bool| {
            if strict {
                ConflictPolicy::Fail
            } else {
                ConflictPolicy::Warn
            }
        };
        MergePolicy {
            env: policy(config.is_strict()),
            cache: policy(config.is_strict_cache()),
        }
    }

    fn for_namespace(&self, namespace: Namespace) -> ConflictPolicy {
        match namespace {
            Namespace::Env => self.env,
            Namespace::Cache => self.cache,
        }
    }
}

/// Two toolkits disagree on a value under a failing policy.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{namespace} variable `{key}` is set to `{previous}` and `{replacement}` by different toolkits")]
#[diagnostic(
    code(kitenv::merge::conflict),
    help("drop strict merging to let later toolkits override earlier ones")
)]
pub struct MergeConflictError {
    pub namespace: Namespace,
    pub key: String,
    pub previous: String,
    pub replacement: String,
}

/// Fold `envs` in order into one environment.
pub fn merge<'a, I>(envs: I, policy: MergePolicy) -> Result<MergedEnvironment, MergeConflictError>
where
    I: IntoIterator<Item = &'a ResolvedEnvironment>,
{
    let mut acc = ResolvedEnvironment::new();
    let mut warnings = Vec::new();

    for env in envs {
        for (key, value) in env.vars() {
            let merged = match acc.get(key) {
                None => value.clone(),
                Some(previous) if previous.is_paths() || value.is_paths() => {
                    let mut segments = value.segments();
                    segments.extend(previous.segments());
                    EnvValue::Paths(dedup_segments(segments))
                }
                Some(previous) => {
                    check_scalar(
                        Namespace::Env,
                        key,
                        &previous.render(),
                        &value.render(),
                        policy,
                        &mut warnings,
                    )?;
                    value.clone()
                }
            };
            acc.insert(key, merged);
        }

        for (key, value) in env.cache() {
            if let Some(previous) = acc.cache_value(key) {
                let previous = previous.to_string();
                check_scalar(Namespace::Cache, key, &previous, value, policy, &mut warnings)?;
            }
            acc.set_cache(key.clone(), value.clone());
        }
    }

    Ok(MergedEnvironment::new(acc, warnings))
}

fn check_scalar(
    namespace: Namespace,
    key: &str,
    previous: &str,
    replacement: &str,
    policy: MergePolicy,
    warnings: &mut Vec<MergeWarning>,
) -> Result<(), MergeConflictError> {
    if previous == replacement || previous.is_empty() || replacement.is_empty() {
        return Ok(());
    }

    match policy.for_namespace(namespace) {
        ConflictPolicy::Fail => Err(MergeConflictError {
            namespace,
            key: key.to_string(),
            previous: previous.to_string(),
            replacement: replacement.to_string(),
        }),
        ConflictPolicy::Warn => {
            let warning = MergeWarning {
                namespace,
                key: key.to_string(),
                previous: previous.to_string(),
                replacement: replacement.to_string(),
            };
            tracing::warn!("{}", warning);
            warnings.push(warning);
            Ok(())
        }
    }
}
