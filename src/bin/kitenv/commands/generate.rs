//! `kitenv generate` command

use anyhow::{bail, Context, Result};

use crate::cli::{GenerateArgs, GlobalArgs};
use crate::commands::{interrupt_token, resolve_options, scan_hints, spinner, use_color};
use kitenv::filter::ToolkitSpecFilter;
use kitenv::fragment::load_static_presets;
use kitenv::merger::MergePolicy;
use kitenv::ops::{generate, GenerateOptions, PresetOutcome, PresetRequest};
use kitenv::util::config::load_for_cwd;
use kitenv::util::diagnostic::{emit, suggestions, Diagnostic, Severity};

pub fn execute(args: GenerateArgs, global: &GlobalArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let config = load_for_cwd(&cwd);
    let color = use_color(global);

    let mut presets = Vec::new();
    if !args.toolkits.is_empty() {
        let chain = args
            .toolkits
            .iter()
            .map(|s| s.parse::<ToolkitSpecFilter>())
            .collect::<Result<Vec<_>, _>>()?;
        let mut request = PresetRequest::new(chain).with_inherits(args.inherits.clone());
        if let Some(name) = args.name {
            request = request.with_name(name);
        }
        presets.push(request);
    }
    for chain in &args.presets {
        let request = chain
            .parse::<PresetRequest>()
            .with_context(|| format!("invalid preset `{}`", chain))?;
        presets.push(request.with_inherits(args.inherits.clone()));
    }

    let static_presets = match &args.static_presets {
        Some(path) => load_static_presets(&cwd.join(path))?,
        None => Vec::new(),
    };

    // Strict flag: CLI > config
    let policy = if args.strict {
        MergePolicy::strict()
    } else {
        MergePolicy::from_config(&config.merge)
    };

    let cancel = interrupt_token();
    let output = args.output.unwrap_or_else(|| config.output_file());
    let opts = GenerateOptions {
        presets,
        script: args.script,
        output: cwd.join(output),
        preset_version: config.preset_version(),
        static_presets,
        skip_bad: args.skip_bad,
        force: args.force,
        policy,
        hints: scan_hints(&config, args.roots, &cancel),
        resolve: resolve_options(&config, global, &cancel),
        dry_run: args.dry_run,
    };

    let pb = spinner("Resolving toolkit environments", global);
    let report = generate(&opts);
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let report = report?;

    for outcome in &report.outcomes {
        match outcome {
            PresetOutcome::Written {
                name,
                toolkits,
                dropped,
                ..
            } => {
                for error in dropped {
                    let mut diag = error.to_diagnostic();
                    diag.severity = Severity::Warning;
                    emit(&diag.with_context(format!("left out of preset `{}`", name)), color);
                }
                eprintln!("     Created preset `{}` ({})", name, toolkits.join(" -> "));
            }
            PresetOutcome::Placeholder { name, family } => {
                emit(
                    &Diagnostic::note(format!(
                        "{} is not available here; `{}` is an empty placeholder",
                        family.display_name(),
                        name
                    )),
                    color,
                );
            }
            PresetOutcome::Failed { name, errors } => {
                for error in errors {
                    let diag = error
                        .to_diagnostic()
                        .with_context(format!("preset `{}`", name))
                        .with_suggestion(suggestions::PARTIAL_CHAIN)
                        .with_location(report.document.path());
                    emit(&diag, color);
                }
            }
        }
    }

    if !report.succeeded {
        let good = report.outcomes.len() - report.failed().count();
        if good > 0 && !args.skip_bad {
            emit(
                &Diagnostic::note(format!("{} preset(s) were generated but not written", good))
                    .with_suggestion(suggestions::SKIP_BAD),
                color,
            );
        }
        bail!("no presets written to {}", opts.output.display());
    }

    if args.dry_run {
        print!("{}", report.document.render()?);
    } else if report.written {
        eprintln!("    Finished writing {}", report.document.path().display());
    }
    Ok(())
}
