//! Command implementations

pub mod completions;
pub mod generate;
pub mod list;
pub mod scan;

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::GlobalArgs;
use kitenv::resolver::ResolveOptions;
use kitenv::scanner::ScanHints;
use kitenv::util::config::Config;
use kitenv::util::process::CancelToken;

/// Spinner shown on stderr while a long step runs. None in verbose mode or
/// when stderr is not a terminal.
pub fn spinner(message: &str, global: &GlobalArgs) -> Option<ProgressBar> {
    if global.verbose || !io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

pub fn use_color(global: &GlobalArgs) -> bool {
    !global.no_color && io::stderr().is_terminal()
}

/// Cancel token tripped by Ctrl-C.
pub fn interrupt_token() -> CancelToken {
    let token = CancelToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::debug!("cannot install Ctrl-C handler: {}", e);
    }
    token
}

/// Scan hints: config first, then command line.
pub fn scan_hints(config: &Config, roots: Vec<PathBuf>, cancel: &CancelToken) -> ScanHints {
    let hints = ScanHints::from_config(config).with_cancel(cancel.clone());
    if roots.is_empty() {
        hints
    } else {
        hints.with_roots(roots)
    }
}

/// Resolver options: config first, then global flags.
pub fn resolve_options(config: &Config, global: &GlobalArgs, cancel: &CancelToken) -> ResolveOptions {
    let mut options = ResolveOptions::from_config(config).with_cancel(cancel.clone());
    if let Some(jobs) = global.jobs.filter(|j| *j > 0) {
        options.jobs = jobs;
    }
    if let Some(secs) = global.timeout {
        options.timeout = Duration::from_secs(secs);
    }
    options
}
