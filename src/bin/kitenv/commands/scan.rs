//! `kitenv scan` command

use anyhow::{Context, Result};

use crate::cli::{GlobalArgs, ScanArgs};
use crate::commands::{interrupt_token, scan_hints, spinner, use_color};
use kitenv::core::ToolkitFamily;
use kitenv::filter::ToolkitSpecFilter;
use kitenv::ops::{scan, ScanOptions};
use kitenv::util::config::load_for_cwd;
use kitenv::util::diagnostic::{emit, suggestions, Diagnostic};

pub fn execute(args: ScanArgs, global: &GlobalArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let config = load_for_cwd(&cwd);

    let families = args
        .families
        .iter()
        .map(|f| f.parse::<ToolkitFamily>().map_err(|e| anyhow::anyhow!(e)))
        .collect::<Result<Vec<_>>>()?;
    let filters = args
        .specs
        .iter()
        .map(|s| s.parse::<ToolkitSpecFilter>())
        .collect::<Result<Vec<_>, _>>()?;

    let cancel = interrupt_token();
    let mut hints = scan_hints(&config, args.roots, &cancel);
    if let Some(script) = args.script {
        hints = hints.with_script(script);
    }

    let opts = ScanOptions {
        families,
        filters,
        select: args.select,
        hints,
        jobs: global.jobs.unwrap_or_else(|| config.jobs()),
    };

    let pb = spinner("Scanning for toolkits", global);
    let result = scan(&opts);
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let result = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.selected)?);
        return Ok(());
    }

    if result.selected.is_empty() {
        emit(
            &Diagnostic::note("no toolkits found").with_suggestion(suggestions::EXTRA_DIRS),
            use_color(global),
        );
        return Ok(());
    }
    for candidate in &result.selected {
        println!("{}", candidate.summary());
        if global.verbose {
            println!("    root: {}", candidate.root().display());
        }
    }
    Ok(())
}
