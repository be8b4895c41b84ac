//! Environment resolution.
//!
//! Turns a [`ToolkitCandidate`] into the [`ResolvedEnvironment`] it
//! contributes. GCC is resolved directly from the scan result; every other
//! family sources a script in a subprocess (see [`script`]). Resolution
//! never touches shared state, so independent candidates resolve in
//! parallel.

pub mod direct;
pub mod errors;
pub mod script;

pub use errors::{ResolutionError, ScriptFailure};

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use rayon::prelude::*;

use crate::core::candidate::CandidateAttributes;
use crate::core::environment::{dedup_segments, normalize_key, split_paths, PATH_SEPARATOR};
use crate::core::{ResolvedEnvironment, ToolkitCandidate};
use crate::util::config::Config;
use crate::util::process::{host_env, CancelToken};

/// Compiler variables and the CMake cache entries they become.
pub const COMPILER_CACHE_VARS: &[(&str, &str)] = &[
    ("CC", "CMAKE_C_COMPILER"),
    ("CXX", "CMAKE_CXX_COMPILER"),
    ("FC", "CMAKE_Fortran_COMPILER"),
];

/// Knobs shared by every resolution of a run.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Limit for one script run.
    pub timeout: Duration,
    /// Worker threads for [`resolve_all`].
    pub jobs: usize,
    /// Shell used for POSIX scripts. `bash`, else `sh`, when unset.
    pub shell: Option<PathBuf>,
    pub cancel: CancelToken,
    /// Host environment to start from. The current process environment
    /// when unset.
    pub host: Option<BTreeMap<String, String>>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            timeout: Duration::from_secs(120),
            jobs: 1,
            shell: None,
            cancel: CancelToken::new(),
            host: None,
        }
    }
}

impl ResolveOptions {
    pub fn from_config(config: &Config) -> Self {
        ResolveOptions {
            timeout: config.resolve_timeout(),
            jobs: config.jobs(),
            shell: config.resolve.shell.clone(),
            ..Default::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_host(mut self, host: BTreeMap<String, String>) -> Self {
        self.host = Some(host);
        self
    }

    /// Environment a resolution subprocess starts with: the host
    /// environment overlaid with `base`.
    pub fn process_env(&self, base: &ResolvedEnvironment) -> BTreeMap<String, String> {
        let host: BTreeMap<String, String> = match &self.host {
            Some(host) => host.clone(),
            None => host_env(),
        }
        .into_iter()
        .map(|(k, v)| (normalize_key(&k), v))
        .collect();
        base.apply_to(&host)
    }
}

/// One candidate to resolve on top of a predecessor environment.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub candidate: ToolkitCandidate,
    pub base: ResolvedEnvironment,
}

impl ResolveRequest {
    pub fn new(candidate: ToolkitCandidate) -> Self {
        ResolveRequest {
            candidate,
            base: ResolvedEnvironment::new(),
        }
    }

    pub fn with_base(mut self, base: ResolvedEnvironment) -> Self {
        self.base = base;
        self
    }
}

/// Resolve `candidate` starting from the host environment.
pub fn resolve(
    candidate: &ToolkitCandidate,
    options: &ResolveOptions,
) -> Result<ResolvedEnvironment, ResolutionError> {
    resolve_with_base(candidate, &ResolvedEnvironment::new(), options)
}

/// Resolve `candidate` starting from the host environment overlaid with
/// `base`, the environment of the toolkits earlier in a chain.
pub fn resolve_with_base(
    candidate: &ToolkitCandidate,
    base: &ResolvedEnvironment,
    options: &ResolveOptions,
) -> Result<ResolvedEnvironment, ResolutionError> {
    if options.cancel.is_cancelled() {
        return Err(ResolutionError::Cancelled {
            candidate: candidate.id().to_string(),
        });
    }

    tracing::debug!("resolving {}", candidate.id());
    let process_env = options.process_env(base);

    let mut env = match candidate.attributes() {
        CandidateAttributes::Gcc(attrs) => direct::resolve_gcc(attrs),
        CandidateAttributes::Msvc(_)
        | CandidateAttributes::OneApi(_)
        | CandidateAttributes::Script(_) => script::run(candidate, &process_env, options)?,
    };

    attach_compilers(candidate, &mut env, &process_env)?;
    tracing::debug!(
        "{}: {} variable(s), {} cache entr(ies)",
        candidate.id(),
        env.vars().len(),
        env.cache().len()
    );
    Ok(env)
}

/// Resolve independent requests concurrently on `options.jobs` threads.
/// Results come back in request order.
pub fn resolve_all(
    requests: &[ResolveRequest],
    options: &ResolveOptions,
) -> Vec<Result<ResolvedEnvironment, ResolutionError>> {
    let run = || -> Vec<Result<ResolvedEnvironment, ResolutionError>> {
        requests
            .par_iter()
            .map(|r| resolve_with_base(&r.candidate, &r.base, options))
            .collect()
    };

    match rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .build()
    {
        Ok(pool) => pool.install(run),
        Err(e) => {
            tracing::debug!("falling back to the global pool: {}", e);
            run()
        }
    }
}

/// Resolve `CC`, `CXX` and `FC` to executables and record them as CMake
/// cache variables.
///
/// Lookup goes through the toolkit's own `PATH` segments, then the
/// subprocess `PATH`.
fn attach_compilers(
    candidate: &ToolkitCandidate,
    env: &mut ResolvedEnvironment,
    process_env: &BTreeMap<String, String>,
) -> Result<(), ResolutionError> {
    let mut search = env.get("PATH").map(|v| v.segments()).unwrap_or_default();
    if let Some(path) = process_env.get(&normalize_key("PATH")) {
        search.extend(split_paths(path));
    }
    let search = dedup_segments(search);
    let search_path = std::env::join_paths(&search)
        .unwrap_or_else(|_| OsString::from(search.join(&PATH_SEPARATOR.to_string())));
    let cwd = std::env::current_dir().unwrap_or_else(|_| candidate.root().to_path_buf());

    let required = candidate.family().required_compilers();
    for (var, cache_key) in COMPILER_CACHE_VARS {
        let Some(value) = env.value(var) else {
            if required.contains(var) {
                return Err(ResolutionError::UnresolvedCompiler {
                    candidate: candidate.id().to_string(),
                    var: var.to_string(),
                    value: None,
                });
            }
            continue;
        };

        let exe = which::which_in(&value, Some(&search_path), &cwd).map_err(|_| {
            ResolutionError::UnresolvedCompiler {
                candidate: candidate.id().to_string(),
                var: var.to_string(),
                value: Some(value.clone()),
            }
        })?;
        env.set_cache(*cache_key, cmake_path(&exe.display().to_string()));
    }
    Ok(())
}

/// CMake accepts forward slashes everywhere.
fn cmake_path(path: &str) -> String {
    if cfg!(windows) {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}
