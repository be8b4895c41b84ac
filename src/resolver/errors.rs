//! Resolution error types and diagnostics.

use std::fmt;
use std::io;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::ToolkitFamily;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Lines of script output kept for error reports.
pub const OUTPUT_TAIL_LINES: usize = 20;

/// How an environment script run went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFailure {
    NonZeroExit,
    SentinelMissing,
    Timeout,
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScriptFailure::NonZeroExit => "exited with an error",
            ScriptFailure::SentinelMissing => "did not report its environment",
            ScriptFailure::Timeout => "timed out",
        };
        write!(f, "{}", s)
    }
}

/// Failure to compute a candidate's environment.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ResolutionError {
    #[error("environment script for `{candidate}` {kind}")]
    #[diagnostic(code(kitenv::resolve::script))]
    ScriptExecution {
        candidate: String,
        kind: ScriptFailure,
        exit_code: Option<i32>,
        /// Last lines of combined output.
        output: String,
    },

    #[error("failed to start a shell for `{candidate}`")]
    #[diagnostic(code(kitenv::resolve::spawn))]
    Spawn {
        candidate: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while resolving `{candidate}`")]
    #[diagnostic(code(kitenv::resolve::io))]
    Io {
        candidate: String,
        #[source]
        source: io::Error,
    },

    #[error("resolution of `{candidate}` was cancelled")]
    #[diagnostic(code(kitenv::resolve::cancelled))]
    Cancelled { candidate: String },

    #[error("`{candidate}` cannot be resolved on this platform: {reason}")]
    #[diagnostic(code(kitenv::resolve::unsupported))]
    Unsupported {
        candidate: String,
        family: ToolkitFamily,
        reason: String,
    },

    #[error("{}", unresolved_message(.candidate, .var, .value.as_deref()))]
    #[diagnostic(code(kitenv::resolve::compiler))]
    UnresolvedCompiler {
        candidate: String,
        var: String,
        value: Option<String>,
    },
}

fn unresolved_message(candidate: &str, var: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!(
            "`{}` sets {}=`{}` but no such executable was found",
            candidate, var, value
        ),
        None => format!("`{}` did not set {}", candidate, var),
    }
}

impl ResolutionError {
    /// Candidate the error belongs to.
    pub fn candidate(&self) -> &str {
        match self {
            ResolutionError::ScriptExecution { candidate, .. }
            | ResolutionError::Spawn { candidate, .. }
            | ResolutionError::Io { candidate, .. }
            | ResolutionError::Cancelled { candidate }
            | ResolutionError::Unsupported { candidate, .. }
            | ResolutionError::UnresolvedCompiler { candidate, .. } => candidate,
        }
    }

    pub fn script_failure(&self) -> Option<ScriptFailure> {
        match self {
            ResolutionError::ScriptExecution { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());
        match self {
            ResolutionError::ScriptExecution {
                kind,
                exit_code,
                output,
                ..
            } => {
                let mut diag = diag;
                if let Some(code) = exit_code {
                    diag = diag.with_context(format!("exit code: {}", code));
                }
                for line in output.lines() {
                    diag = diag.with_context(format!("| {}", line));
                }
                match kind {
                    ScriptFailure::Timeout => diag.with_suggestion(suggestions::SCRIPT_TIMEOUT),
                    _ => diag.with_suggestion(suggestions::SCRIPT_FAILED),
                }
            }
            ResolutionError::Spawn { source, .. } | ResolutionError::Io { source, .. } => {
                diag.with_context(source.to_string())
            }
            ResolutionError::UnresolvedCompiler { .. } => {
                diag.with_suggestion("Check that the toolkit installation is complete")
            }
            ResolutionError::Cancelled { .. } | ResolutionError::Unsupported { .. } => diag,
        }
    }
}

/// Keep the last `OUTPUT_TAIL_LINES` lines of `output`.
pub fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_failure_diagnostic() {
        let err = ResolutionError::ScriptExecution {
            candidate: "script-unspecified-0123456789ab".to_string(),
            kind: ScriptFailure::NonZeroExit,
            exit_code: Some(1),
            output: "setting up\nerror: license not found".to_string(),
        };

        let output = err.to_diagnostic().format(false);
        assert!(output.contains("exited with an error"));
        assert!(output.contains("exit code: 1"));
        assert!(output.contains("license not found"));
        assert!(output.contains("--verbose"));
    }

    #[test]
    fn test_timeout_suggests_limit() {
        let err = ResolutionError::ScriptExecution {
            candidate: "oneapi-2021.3.0-0123456789ab".to_string(),
            kind: ScriptFailure::Timeout,
            exit_code: None,
            output: String::new(),
        };
        assert_eq!(err.script_failure(), Some(ScriptFailure::Timeout));
        assert!(err.to_diagnostic().format(false).contains("--timeout"));
    }

    #[test]
    fn test_unresolved_compiler_message() {
        let err = ResolutionError::UnresolvedCompiler {
            candidate: "msvc-2019-0123456789ab".to_string(),
            var: "CC".to_string(),
            value: Some("cl.exe".to_string()),
        };
        assert_eq!(err.candidate(), "msvc-2019-0123456789ab");
        assert!(err.to_string().contains("CC=`cl.exe`"));

        let err = ResolutionError::UnresolvedCompiler {
            candidate: "msvc-2019-0123456789ab".to_string(),
            var: "CXX".to_string(),
            value: None,
        };
        assert!(err.to_string().contains("did not set CXX"));
    }

    #[test]
    fn test_output_tail() {
        let long: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        let tail = output_tail(&long.join("\n"));
        assert_eq!(tail.lines().count(), OUTPUT_TAIL_LINES);
        assert!(tail.ends_with("line 49"));
        assert_eq!(output_tail("short"), "short");
    }
}
