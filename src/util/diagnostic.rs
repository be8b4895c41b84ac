//! User-friendly diagnostic messages.
//!
//! Every failure reported to the user names what went wrong, where it
//! happened, and what to try next.

use std::fmt;
use std::path::PathBuf;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// No toolkit matched a request.
    pub const NO_MATCH: &str = "Run `kitenv scan` to see the toolkits found on this machine";

    /// A root was not searched.
    pub const EXTRA_DIRS: &str =
        "Add the installation directory to `[scan] extra_dirs` in .kitenv/config.toml";

    /// An environment script failed.
    pub const SCRIPT_FAILED: &str = "Run `kitenv generate --verbose` to see the script output";

    /// An environment script timed out.
    pub const SCRIPT_TIMEOUT: &str = "Raise the limit with `--timeout <SECS>`";

    /// A chain member failed.
    pub const PARTIAL_CHAIN: &str = "Pass `--force` to write a preset from the toolkits that resolved";

    /// Some presets failed.
    pub const SKIP_BAD: &str = "Pass `--skip-bad` to keep the presets that succeeded";

    /// Conflicting values in strict mode.
    pub const STRICT_MERGE: &str = "Drop `--strict` to let later toolkits override earlier ones";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Additional context lines
    pub context: Vec<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
    /// Related location (file path)
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    fn with_severity(message: impl Into<String>, severity: Severity) -> Self {
        Diagnostic {
            message: message.into(),
            severity,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Error)
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Warning)
    }

    /// Create a new note diagnostic.
    pub fn note(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Note)
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity_str = if color {
            match self.severity {
                Severity::Error => "\x1b[1;31merror\x1b[0m",
                Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
                Severity::Note => "\x1b[1;36mnote\x1b[0m",
            }
        } else {
            match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Note => "note",
            }
        };

        output.push_str(&format!("{}: {}\n", severity_str, self.message));

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }

        if !self.suggestions.is_empty() {
            let help_prefix = if color {
                "\x1b[1;32mhelp\x1b[0m"
            } else {
                "help"
            };
            if self.suggestions.len() == 1 {
                output.push_str(&format!("{}: {}\n", help_prefix, self.suggestions[0]));
            } else {
                output.push_str(&format!("{}: consider:\n", help_prefix));
                for (i, suggestion) in self.suggestions.iter().enumerate() {
                    output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
                }
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

/// Render an error as a diagnostic, its source chain as context lines.
pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Diagnostic {
    let mut diag = Diagnostic::error(err.to_string());
    let mut source = err.source();
    while let Some(cause) = source {
        diag = diag.with_context(cause.to_string());
        source = cause.source();
    }
    diag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("preset `toolkit_oneapi_2021` failed")
            .with_context("oneapi-2021.3.0: environment script exited with status 1")
            .with_suggestion(suggestions::SCRIPT_FAILED)
            .with_suggestion(suggestions::SKIP_BAD);

        let output = diag.format(false);
        assert!(output.contains("error: preset `toolkit_oneapi_2021` failed"));
        assert!(output.contains("  = oneapi-2021.3.0"));
        assert!(output.contains("help: consider:"));
        assert!(output.contains("1. Run `kitenv generate --verbose`"));
    }

    #[test]
    fn test_single_suggestion_inline() {
        let diag = Diagnostic::warning("no toolkit matched `gcc@99`")
            .with_suggestion(suggestions::NO_MATCH);
        assert_eq!(
            diag.format(false),
            "warning: no toolkit matched `gcc@99`\nhelp: Run `kitenv scan` to see the toolkits found on this machine\n"
        );
    }

    #[test]
    fn test_from_error_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = anyhow::Error::new(io).context("reading presets");
        let diag = from_error(err.as_ref());
        assert_eq!(diag.message, "reading presets");
        assert_eq!(diag.context, vec!["missing"]);
        assert_eq!(diag.format(false), "error: reading presets\n  = missing\n");
    }
}
