//! Script strategy.
//!
//! A wrapper script is written into a private temporary directory and run
//! in a fresh shell whose environment is exactly the base environment. The
//! wrapper dumps the environment once before sourcing the toolkit script and
//! once after, each dump introduced by a sentinel line carrying a per-run
//! nonce. Everything else the scripts print is chatter and only logged.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::core::candidate::{Arch, CandidateAttributes, ScriptKind};
use crate::core::environment::{normalize_key, split_paths};
use crate::core::family::SHELL_BOOKKEEPING_VARS;
use crate::core::{ResolvedEnvironment, ToolkitCandidate, ToolkitFamily};
use crate::scanner::oneapi::sourcing_order;
use crate::util::process::{default_shell, ExecError, ProcessBuilder};

use super::errors::{output_tail, ResolutionError, ScriptFailure};
use super::ResolveOptions;

/// Markers delimiting the sections of the wrapper output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    pub baseline: String,
    pub sourced: String,
    pub result: String,
}

impl Sentinels {
    pub fn new() -> Self {
        Self::with_nonce(&nonce())
    }

    pub fn with_nonce(nonce: &str) -> Self {
        Sentinels {
            baseline: format!("__KITENV_BASELINE_{}__", nonce),
            sourced: format!("__KITENV_SOURCED_{}__", nonce),
            result: format!("__KITENV_RESULT_{}__", nonce),
        }
    }
}

impl Default for Sentinels {
    fn default() -> Self {
        Self::new()
    }
}

fn nonce() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = Sha256::new();
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
        hasher.update(now.as_nanos().to_le_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}

/// Wrapper script for one candidate.
#[derive(Debug, Clone)]
pub struct Wrapper {
    pub kind: ScriptKind,
    pub text: String,
    pub sentinels: Sentinels,
}

impl Wrapper {
    /// Build the wrapper that sources `candidate`'s environment script(s).
    pub fn for_candidate(
        candidate: &ToolkitCandidate,
        sentinels: Sentinels,
    ) -> Result<Self, ResolutionError> {
        let kind = if cfg!(windows) {
            ScriptKind::Batch
        } else {
            ScriptKind::Shell
        };
        let unsupported = |reason: &str| ResolutionError::Unsupported {
            candidate: candidate.id().to_string(),
            family: candidate.family(),
            reason: reason.to_string(),
        };

        let body = match (candidate.attributes(), kind) {
            (CandidateAttributes::Msvc(attrs), ScriptKind::Batch) => {
                let toolset = attrs
                    .toolsets
                    .first()
                    .ok_or_else(|| unsupported("no MSVC toolset left after filtering"))?;
                let mut call = format!(
                    "call \"{}\" {}",
                    attrs.vcvarsall.display(),
                    vcvars_arch(candidate.arch())
                );
                if let Some(sdk) = attrs.sdk_versions.first() {
                    call.push_str(&format!(" {}", sdk));
                }
                call.push_str(&format!(" -vcvars_ver={}", toolset.version));
                vec![
                    call,
                    batch_check(),
                    "set CC=cl.exe".to_string(),
                    "set CXX=cl.exe".to_string(),
                ]
            }
            (CandidateAttributes::Msvc(_), ScriptKind::Shell) => {
                return Err(unsupported("vcvarsall.bat needs cmd.exe"));
            }
            (CandidateAttributes::OneApi(attrs), kind) => {
                let scripts = sourcing_order(&attrs.scripts);
                if scripts.is_empty() {
                    return Err(unsupported("no component environment scripts"));
                }
                let fortran = attrs.ifx.as_ref().or(attrs.ifort.as_ref());
                let mut lines = Vec::new();
                match kind {
                    ScriptKind::Shell => {
                        for script in scripts {
                            lines.push(source_sh(&script.display().to_string()));
                        }
                        if let Some(fc) = fortran {
                            lines.push(format!("export FC={}", sh_quote(&fc.display().to_string())));
                        }
                    }
                    ScriptKind::Batch => {
                        lines.push("if not defined VSCMD_VER (".to_string());
                        lines.push(
                            "    echo ERROR: Visual Studio must be set up first, chain an msvc toolkit before oneapi"
                                .to_string(),
                        );
                        lines.push("    exit /B 1".to_string());
                        lines.push(")".to_string());
                        for script in scripts {
                            lines.push(format!("call \"{}\"", script.display()));
                            lines.push(batch_check());
                        }
                        if let Some(fc) = fortran {
                            lines.push(format!("set \"FC={}\"", fc.display()));
                        }
                    }
                }
                lines
            }
            (CandidateAttributes::Script(attrs), kind) => match (attrs.kind, kind) {
                (ScriptKind::Shell, ScriptKind::Shell) => {
                    vec![source_sh(&attrs.script.display().to_string())]
                }
                (ScriptKind::Batch, ScriptKind::Batch) => {
                    vec![format!("call \"{}\"", attrs.script.display()), batch_check()]
                }
                (ScriptKind::Batch, ScriptKind::Shell) => {
                    return Err(unsupported("batch scripts need cmd.exe"));
                }
                (ScriptKind::Shell, ScriptKind::Batch) => {
                    return Err(unsupported("shell scripts cannot be sourced by cmd.exe"));
                }
            },
            (CandidateAttributes::Gcc(_), _) => {
                return Err(unsupported("GCC is resolved without a script"));
            }
        };

        let text = match kind {
            ScriptKind::Shell => shell_wrapper(&sentinels, &body),
            ScriptKind::Batch => batch_wrapper(&sentinels, &body),
        };
        Ok(Wrapper {
            kind,
            text,
            sentinels,
        })
    }

    pub fn file_name(&self) -> &'static str {
        match self.kind {
            ScriptKind::Shell => "kitenv-env.sh",
            ScriptKind::Batch => "kitenv-env.bat",
        }
    }
}

fn vcvars_arch(arch: Arch) -> &'static str {
    match arch {
        Arch::X86 => "x86",
        Arch::Aarch64 => "arm64",
        Arch::X86_64 | Arch::Other => "amd64",
    }
}

fn batch_check() -> String {
    "if errorlevel 1 exit /B %ERRORLEVEL%".to_string()
}

fn source_sh(path: &str) -> String {
    format!(". {} || exit $?", sh_quote(path))
}

/// Single-quote `s` for a POSIX shell.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Print a sentinel without the full marker appearing in the script text,
/// so shell tracing cannot produce a false match.
fn sh_marker(marker: &str) -> String {
    let (head, tail) = marker.split_at(marker.len() / 2);
    format!("printf '%s%s\\n' '{}' '{}'", head, tail)
}

fn shell_wrapper(sentinels: &Sentinels, body: &[String]) -> String {
    let mut lines = vec![
        "exec 2>&1".to_string(),
        "exec </dev/null".to_string(),
        sh_marker(&sentinels.baseline),
        "env -0".to_string(),
        sh_marker(&sentinels.sourced),
    ];
    lines.extend(body.iter().cloned());
    lines.push(sh_marker(&sentinels.result));
    lines.push("env -0".to_string());
    lines.push(String::new());
    lines.join("\n")
}

fn batch_wrapper(sentinels: &Sentinels, body: &[String]) -> String {
    let mut lines = vec![
        "@echo off".to_string(),
        format!("echo {}", sentinels.baseline),
        "set".to_string(),
        format!("echo {}", sentinels.sourced),
    ];
    lines.extend(body.iter().cloned());
    lines.push(format!("echo {}", sentinels.result));
    lines.push("set".to_string());
    lines.push(String::new());
    lines.join("\r\n")
}

/// The two environment dumps and the chatter in between.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapperOutput {
    pub baseline: BTreeMap<String, String>,
    pub result: BTreeMap<String, String>,
    pub chatter: String,
}

/// Split wrapper output into its sections. `None` when a sentinel is missing.
pub fn parse_output(output: &str, sentinels: &Sentinels, kind: ScriptKind) -> Option<WrapperOutput> {
    let baseline_start = section_start(output, &sentinels.baseline, 0)?;
    let sourced_at = output[baseline_start..].find(&sentinels.sourced)? + baseline_start;
    let sourced_start = section_start(output, &sentinels.sourced, sourced_at)?;
    let result_at = output[sourced_start..].rfind(&sentinels.result)? + sourced_start;
    let result_start = section_start(output, &sentinels.result, result_at)?;

    let parse = match kind {
        ScriptKind::Shell => parse_nul_dump,
        ScriptKind::Batch => parse_set_dump,
    };
    Some(WrapperOutput {
        baseline: parse(&output[baseline_start..sourced_at]),
        result: parse(&output[result_start..]),
        chatter: output[sourced_start..result_at].to_string(),
    })
}

/// Offset just past the line holding `marker`, searching from `from`.
fn section_start(output: &str, marker: &str, from: usize) -> Option<usize> {
    let at = output[from..].find(marker)? + from;
    let end = at + marker.len();
    let rest = &output[end..];
    let skip = if rest.starts_with("\r\n") {
        2
    } else if rest.starts_with('\n') {
        1
    } else {
        0
    };
    Some(end + skip)
}

/// Parse `env -0` output. Chunks without `=` are dropped.
pub fn parse_nul_dump(text: &str) -> BTreeMap<String, String> {
    text.split('\0')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            (!key.is_empty() && !key.contains('\n')).then(|| (normalize_key(key), value.to_string()))
        })
        .collect()
}

/// Parse cmd.exe `set` output. A line that is not an assignment continues
/// the previous value.
pub fn parse_set_dump(text: &str) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match line.split_once('=') {
            Some((key, value)) if !key.is_empty() && !key.contains(' ') => {
                let key = normalize_key(key);
                vars.insert(key.clone(), value.to_string());
                current = Some(key);
            }
            _ => {
                if let Some(value) = current.as_ref().and_then(|k| vars.get_mut(k)) {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }
    vars
}

fn is_ignored(family: ToolkitFamily, key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SHELL_BOOKKEEPING_VARS.contains(&key)
        || upper.starts_with("BASH")
        || family
            .ignored_vars()
            .iter()
            .any(|v| v.eq_ignore_ascii_case(key))
}

/// Variables that are new or changed in `result` relative to `baseline`.
///
/// Changed path-like variables keep only the segments that were not in the
/// baseline, in their new order. Removed variables are not reported.
pub fn diff(
    family: ToolkitFamily,
    baseline: &BTreeMap<String, String>,
    result: &BTreeMap<String, String>,
) -> ResolvedEnvironment {
    let mut env = ResolvedEnvironment::new();

    for (key, value) in result {
        if is_ignored(family, key) {
            continue;
        }
        let before = baseline.get(key);
        if before == Some(value) {
            continue;
        }

        if family.is_path_var(key) {
            let old: HashSet<String> = before
                .map(|b| split_paths(b).into_iter().collect())
                .unwrap_or_default();
            let added: Vec<String> = split_paths(value)
                .into_iter()
                .filter(|s| !old.contains(s))
                .collect();
            if added.is_empty() {
                continue;
            }
            env.set_paths(key, added);
        } else {
            env.set(key, value.clone());
        }
    }
    env
}

/// Run the wrapper for `candidate` with `process_env` as its entire
/// environment and return the diffed environment.
pub fn run(
    candidate: &ToolkitCandidate,
    process_env: &BTreeMap<String, String>,
    options: &ResolveOptions,
) -> Result<ResolvedEnvironment, ResolutionError> {
    let id = candidate.id().to_string();
    let wrapper = Wrapper::for_candidate(candidate, Sentinels::new())?;

    let io_error = |source| ResolutionError::Io {
        candidate: id.clone(),
        source,
    };
    let workdir = tempfile::Builder::new()
        .prefix("kitenv-")
        .tempdir()
        .map_err(io_error)?;
    let script_path = workdir.path().join(wrapper.file_name());
    std::fs::write(&script_path, &wrapper.text).map_err(io_error)?;
    tracing::debug!("wrote wrapper for {} to {}", id, script_path.display());

    let builder = match wrapper.kind {
        ScriptKind::Shell => {
            let shell = options.shell.clone().unwrap_or_else(default_shell);
            ProcessBuilder::new(shell).arg(&script_path)
        }
        ScriptKind::Batch => ProcessBuilder::new("cmd")
            .args(["/d", "/c"])
            .arg(&script_path),
    };
    let builder = builder
        .env_clear()
        .envs(process_env.iter())
        .cwd(workdir.path());

    let output = builder
        .exec_with_deadline(Some(options.timeout), &options.cancel)
        .map_err(|e| match e {
            ExecError::Spawn { source, .. } => ResolutionError::Spawn {
                candidate: id.clone(),
                source,
            },
            ExecError::Io { source, .. } => ResolutionError::Io {
                candidate: id.clone(),
                source,
            },
            ExecError::Timeout { .. } => ResolutionError::ScriptExecution {
                candidate: id.clone(),
                kind: ScriptFailure::Timeout,
                exit_code: None,
                output: String::new(),
            },
            ExecError::Cancelled { .. } => ResolutionError::Cancelled {
                candidate: id.clone(),
            },
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    let parsed = parse_output(&combined, &wrapper.sentinels, wrapper.kind);
    let chatter = match &parsed {
        Some(sections) => sections.chatter.clone(),
        None => chatter_after_baseline(&combined, &wrapper.sentinels),
    };
    for line in chatter.lines().filter(|l| !l.trim().is_empty()) {
        tracing::debug!("> {}", line);
    }

    if !output.status.success() {
        return Err(ResolutionError::ScriptExecution {
            candidate: id,
            kind: ScriptFailure::NonZeroExit,
            exit_code: output.status.code(),
            output: output_tail(&chatter),
        });
    }

    let sections = parsed.ok_or_else(|| ResolutionError::ScriptExecution {
        candidate: id.clone(),
        kind: ScriptFailure::SentinelMissing,
        exit_code: output.status.code(),
        output: output_tail(&chatter),
    })?;

    Ok(diff(candidate.family(), &sections.baseline, &sections.result))
}

/// Output printed after sourcing began, without the environment dumps.
fn chatter_after_baseline(output: &str, sentinels: &Sentinels) -> String {
    let start = section_start(output, &sentinels.sourced, 0).unwrap_or(0);
    let rest = &output[start..];
    let end = rest.find(&sentinels.result).unwrap_or(rest.len());
    rest[..end].replace('\0', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::candidate::ScriptAttributes;
    use crate::core::environment::EnvValue;
    use crate::core::Version;
    use std::path::PathBuf;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (normalize_key(k), v.to_string()))
            .collect()
    }

    fn shell_candidate(path: &str) -> ToolkitCandidate {
        ToolkitCandidate::new(
            Version::unspecified(),
            "/tmp",
            Arch::host(),
            Vec::<String>::new(),
            CandidateAttributes::Script(ScriptAttributes {
                script: PathBuf::from(path),
                kind: ScriptKind::from_path(std::path::Path::new(path)),
            }),
        )
    }

    #[test]
    fn test_sentinels_are_unique() {
        let a = Sentinels::new();
        let b = Sentinels::new();
        assert_ne!(a, b);
        assert!(a.baseline.starts_with("__KITENV_BASELINE_"));
    }

    #[test]
    fn test_parse_nul_dump() {
        let parsed = parse_nul_dump("A=1\0B=x=y\0MULTI=line1\nline2\0junk\0\n");
        assert_eq!(parsed.get("A").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("B").map(String::as_str), Some("x=y"));
        assert_eq!(parsed.get("MULTI").map(String::as_str), Some("line1\nline2"));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_parse_set_dump_continuations() {
        let parsed = parse_set_dump("A=1\r\nB=first\r\nsecond line\r\nC=3\r\n");
        assert_eq!(parsed.get(&normalize_key("A")).map(String::as_str), Some("1"));
        assert_eq!(
            parsed.get(&normalize_key("B")).map(String::as_str),
            Some("first\nsecond line")
        );
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_parse_output_ignores_chatter() {
        let s = Sentinels::with_nonce("abc");
        let output = format!(
            "noise\n{}\nA=1\0PATH=/usr/bin\0{}\nSetting up toolkit...\nA=not-a-var\n{}\nA=1\0PATH=/opt/x/bin:/usr/bin\0FOO=bar\0",
            s.baseline, s.sourced, s.result
        );
        let parsed = parse_output(&output, &s, ScriptKind::Shell).unwrap();
        assert_eq!(parsed.baseline.len(), 2);
        assert_eq!(parsed.result.len(), 3);
        assert!(parsed.chatter.contains("Setting up toolkit"));
    }

    #[test]
    fn test_parse_output_missing_sentinel() {
        let s = Sentinels::with_nonce("abc");
        let output = format!("{}\nA=1\0{}\nboom\n", s.baseline, s.sourced);
        assert!(parse_output(&output, &s, ScriptKind::Shell).is_none());
        assert!(chatter_after_baseline(&output, &s).contains("boom"));
    }

    #[test]
    fn test_diff_new_changed_and_paths() {
        let baseline = vars(&[("PATH", "/usr/bin:/bin"), ("KEEP", "same"), ("GONE", "x")]);
        let result = vars(&[
            ("PATH", "/opt/tool/bin:/usr/bin:/bin"),
            ("KEEP", "same"),
            ("FOO", "bar"),
            ("SHLVL", "2"),
            ("BASH_FUNC_x%%", "() {}"),
            ("_", "/usr/bin/env"),
        ]);

        let env = diff(ToolkitFamily::CustomScript, &baseline, &result);
        assert_eq!(
            env.get("PATH"),
            Some(&EnvValue::Paths(vec!["/opt/tool/bin".to_string()]))
        );
        assert_eq!(env.value("FOO").as_deref(), Some("bar"));
        assert!(env.get("KEEP").is_none());
        assert!(env.get("GONE").is_none());
        assert!(env.get("SHLVL").is_none());
        assert!(env.get("_").is_none());
        assert_eq!(env.vars().len(), 2);
    }

    #[test]
    fn test_diff_skips_family_ignored_vars() {
        let env = diff(
            ToolkitFamily::OneApi,
            &BTreeMap::new(),
            &vars(&[("SETVARS_COMPLETED", "1"), ("MKLROOT", "/opt/intel/mkl")]),
        );
        assert!(env.get("SETVARS_COMPLETED").is_none());
        assert!(env.get("MKLROOT").is_some());
    }

    #[test]
    fn test_diff_reordered_path_contributes_nothing() {
        let env = diff(
            ToolkitFamily::CustomScript,
            &vars(&[("PATH", "/a:/b")]),
            &vars(&[("PATH", "/b:/a")]),
        );
        assert!(env.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_wrapper_layout() {
        let wrapper =
            Wrapper::for_candidate(&shell_candidate("/opt/it's/env.sh"), Sentinels::with_nonce("n1"))
                .unwrap();
        assert_eq!(wrapper.kind, ScriptKind::Shell);
        assert!(wrapper.text.contains(r"'/opt/it'\''s/env.sh' || exit $?"));
        assert!(!wrapper.text.contains(&wrapper.sentinels.result));
        let baseline = wrapper.text.find("env -0").unwrap();
        let source = wrapper.text.find("env.sh").unwrap();
        assert!(baseline < source);
    }

    #[cfg(unix)]
    #[test]
    fn test_batch_script_unsupported_on_unix() {
        let err = Wrapper::for_candidate(&shell_candidate("/opt/env.bat"), Sentinels::new()).unwrap_err();
        assert!(matches!(err, ResolutionError::Unsupported { .. }));
    }
}
