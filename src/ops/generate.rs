//! Implementation of `kitenv generate`.
//!
//! Each requested preset is a chain of toolkit specs. The run scans once,
//! picks the best candidate for every chain member, resolves the chains
//! step by step (step `k` of every chain runs in parallel, on top of the
//! merged environment of steps `0..k`), merges, and writes one hidden
//! configure preset per chain into the preset document.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Result};
use miette::Diagnostic as MietteDiagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::core::environment::MergeWarning;
use crate::core::{MergedEnvironment, ResolvedEnvironment, ToolkitCandidate, ToolkitFamily};
use crate::filter::{select_best, SpecValidationError, ToolkitSpecFilter};
use crate::fragment::{default_name, AddMode, Fragment, PresetDocument, DEFAULT_PRESET_VERSION};
use crate::merger::{merge, MergeConflictError, MergePolicy};
use crate::ops::scan::families_for;
use crate::resolver::{resolve_all, ResolutionError, ResolveOptions, ResolveRequest};
use crate::scanner::{discover_all, ScanHints, ScanWarning};
use crate::util::config::DEFAULT_OUTPUT_FILE;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// One preset to generate.
#[derive(Debug, Clone, Default)]
pub struct PresetRequest {
    /// Preset name (derived from the chain when unset)
    pub name: Option<String>,

    /// Presets the generated one inherits from
    pub inherits: Vec<String>,

    /// Toolkits to chain, earliest first
    pub chain: Vec<ToolkitSpecFilter>,
}

impl PresetRequest {
    pub fn new(chain: Vec<ToolkitSpecFilter>) -> Self {
        PresetRequest {
            chain,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_inherits(mut self, inherits: Vec<String>) -> Self {
        self.inherits = inherits;
        self
    }

    fn preset_name(&self, script: Option<&Path>) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => default_name(&self.chain, script),
        }
    }
}

/// Separates chain members in the text form of a request.
pub const CHAIN_SEPARATOR: char = ':';

/// `gcc@11:script` chains `gcc@11` and then `script`.
impl FromStr for PresetRequest {
    type Err = SpecValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chain = s
            .split(CHAIN_SEPARATOR)
            .map(str::parse)
            .collect::<Result<Vec<ToolkitSpecFilter>, _>>()?;
        Ok(PresetRequest::new(chain))
    }
}

/// Options for the generate command.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub presets: Vec<PresetRequest>,

    /// Environment script wrapped by `script` chain members
    pub script: Option<PathBuf>,

    /// Preset document to update
    pub output: PathBuf,

    /// `version` of a newly created document
    pub preset_version: u32,

    /// Hand-written presets merged into the document before the generated
    /// ones; existing presets of the same name keep their own keys
    pub static_presets: Vec<Value>,

    /// Write the presets that succeeded even when others failed
    pub skip_bad: bool,

    /// Drop chain members that match nothing or fail to resolve
    pub force: bool,

    pub policy: MergePolicy,
    pub hints: ScanHints,
    pub resolve: ResolveOptions,

    /// Build the document without writing it
    pub dry_run: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            presets: Vec::new(),
            script: None,
            output: PathBuf::from(DEFAULT_OUTPUT_FILE),
            preset_version: DEFAULT_PRESET_VERSION,
            static_presets: Vec::new(),
            skip_bad: false,
            force: false,
            policy: MergePolicy::default(),
            hints: ScanHints::default(),
            resolve: ResolveOptions::default(),
            dry_run: false,
        }
    }
}

/// Why a preset (or one member of its chain) could not be produced.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum PresetError {
    #[error("no installed toolkit matches `{spec}`")]
    #[diagnostic(code(kitenv::generate::no_match))]
    NoMatch { spec: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Merge(#[from] MergeConflictError),

    #[error("no toolkit in the chain could be resolved")]
    #[diagnostic(code(kitenv::generate::empty_chain))]
    EmptyChain,
}

impl PresetError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            PresetError::NoMatch { .. } => Diagnostic::error(self.to_string())
                .with_suggestion(suggestions::NO_MATCH)
                .with_suggestion(suggestions::EXTRA_DIRS),
            PresetError::Resolution(e) => e.to_diagnostic(),
            PresetError::Merge(_) => {
                Diagnostic::error(self.to_string()).with_suggestion(suggestions::STRICT_MERGE)
            }
            PresetError::EmptyChain => {
                Diagnostic::error(self.to_string()).with_suggestion(suggestions::NO_MATCH)
            }
        }
    }
}

/// What happened to one requested preset.
#[derive(Debug)]
pub enum PresetOutcome {
    /// A fragment was built.
    Written {
        name: String,
        /// Ids of the chained candidates, earliest first.
        toolkits: Vec<String>,
        warnings: Vec<MergeWarning>,
        /// Chain members dropped under `force`.
        dropped: Vec<PresetError>,
    },
    /// The chain names a family this host cannot resolve; an empty preset
    /// keeps the name available to presets inheriting from it.
    Placeholder {
        name: String,
        family: ToolkitFamily,
    },
    Failed {
        name: String,
        errors: Vec<PresetError>,
    },
}

impl PresetOutcome {
    pub fn name(&self) -> &str {
        match self {
            PresetOutcome::Written { name, .. }
            | PresetOutcome::Placeholder { name, .. }
            | PresetOutcome::Failed { name, .. } => name,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PresetOutcome::Failed { .. })
    }
}

/// Result of a generate run.
#[derive(Debug)]
pub struct RunReport {
    /// One entry per requested preset, in request order.
    pub outcomes: Vec<PresetOutcome>,
    pub scan_warnings: Vec<ScanWarning>,
    /// The updated document (written to disk only when `written`).
    pub document: PresetDocument,
    pub succeeded: bool,
    pub written: bool,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &PresetOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }
}

/// Per-preset state while its chain is being resolved.
struct ChainState {
    name: String,
    inherits: Vec<String>,
    /// Selected candidate per chain member; `None` for dropped members.
    members: Vec<Option<ToolkitCandidate>>,
    resolved: Vec<String>,
    env: ResolvedEnvironment,
    warnings: Vec<MergeWarning>,
    dropped: Vec<PresetError>,
    failed: Option<Vec<PresetError>>,
}

/// Generate presets for `opts.presets` and update the preset document.
///
/// Returns an error for invalid requests and cancellation. Per-preset
/// failures are reported in the [`RunReport`]; the document is only written
/// when the run succeeded.
pub fn generate(opts: &GenerateOptions) -> Result<RunReport> {
    if opts.presets.is_empty() {
        bail!("no presets requested");
    }
    for request in &opts.presets {
        if request.chain.is_empty() {
            bail!("preset has no toolkits; pass at least one `--toolkit`");
        }
        for spec in &request.chain {
            spec.validate()?;
            if spec.family == Some(ToolkitFamily::CustomScript) && opts.script.is_none() {
                bail!("`{}` requested without an environment script (`--script`)", spec);
            }
        }
    }

    let specs: Vec<ToolkitSpecFilter> = opts
        .presets
        .iter()
        .flat_map(|r| r.chain.iter().cloned())
        .collect();
    let mut hints = opts.hints.clone().with_cancel(opts.resolve.cancel.clone());
    if let Some(script) = &opts.script {
        hints = hints.with_script(script);
    }
    let report = discover_all(&families_for(&[], &specs), &hints, opts.resolve.jobs);
    if opts.resolve.cancel.is_cancelled() {
        bail!("cancelled");
    }

    let script = opts.script.as_deref();
    let mut outcomes: Vec<Option<PresetOutcome>> = Vec::new();
    let mut chains: Vec<Option<ChainState>> = Vec::new();

    for request in &opts.presets {
        let name = request.preset_name(script);

        if let Some(family) = request
            .chain
            .iter()
            .filter_map(|s| s.family)
            .find(|f| !f.is_supported())
        {
            tracing::warn!(
                "{} is not available on this platform; writing placeholder `{}`",
                family.display_name(),
                name
            );
            outcomes.push(Some(PresetOutcome::Placeholder { name, family }));
            chains.push(None);
            continue;
        }

        let mut state = ChainState {
            name,
            inherits: request.inherits.clone(),
            members: Vec::new(),
            resolved: Vec::new(),
            env: ResolvedEnvironment::new(),
            warnings: Vec::new(),
            dropped: Vec::new(),
            failed: None,
        };
        let mut unmatched = Vec::new();
        for spec in &request.chain {
            let best = select_best(&report.candidates, spec);
            match &best {
                Some(candidate) => tracing::info!("`{}` -> {}", spec, candidate.summary()),
                None => unmatched.push(PresetError::NoMatch {
                    spec: spec.to_string(),
                }),
            }
            state.members.push(best);
        }
        if !unmatched.is_empty() {
            if opts.force {
                for error in &unmatched {
                    tracing::warn!("{}: dropping chain member: {}", state.name, error);
                }
                state.dropped.extend(unmatched);
            } else {
                state.failed = Some(unmatched);
            }
        }

        outcomes.push(None);
        chains.push(Some(state));
    }

    let steps = opts.presets.iter().map(|r| r.chain.len()).max().unwrap_or(0);
    for step in 0..steps {
        let mut slots = Vec::new();
        let mut requests = Vec::new();
        for (index, state) in chains.iter().enumerate() {
            let Some(state) = state else { continue };
            if state.failed.is_some() {
                continue;
            }
            if let Some(Some(candidate)) = state.members.get(step) {
                slots.push(index);
                requests.push(ResolveRequest::new(candidate.clone()).with_base(state.env.clone()));
            }
        }
        if requests.is_empty() {
            continue;
        }

        let results = resolve_all(&requests, &opts.resolve);
        if opts.resolve.cancel.is_cancelled() {
            bail!("cancelled");
        }

        for ((index, request), result) in slots.into_iter().zip(&requests).zip(results) {
            let Some(state) = chains[index].as_mut() else { continue };
            match result {
                Ok(env) => match merge([&state.env, &env], opts.policy) {
                    Ok(merged) => {
                        state.warnings.extend(merged.warnings().iter().cloned());
                        state.env = merged.into_environment();
                        state.resolved.push(request.candidate.id().to_string());
                    }
                    Err(e) => state.failed = Some(vec![e.into()]),
                },
                Err(e) if opts.force => {
                    tracing::warn!("{}: dropping chain member: {}", state.name, e);
                    state.dropped.push(e.into());
                }
                Err(e) => state.failed = Some(vec![e.into()]),
            }
        }
    }

    let mut document = PresetDocument::load(&opts.output, opts.preset_version)?;
    for preset in &opts.static_presets {
        document.add_value(preset.clone(), AddMode::Merge)?;
    }
    let mut final_outcomes = Vec::with_capacity(outcomes.len());
    for (outcome, state) in outcomes.into_iter().zip(chains) {
        let (outcome, fragment) = match (outcome, state) {
            (Some(outcome), _) => (outcome, None),
            (None, Some(state)) => finish_chain(state),
            (None, None) => continue,
        };

        match &outcome {
            PresetOutcome::Written { name, toolkits, .. } => {
                tracing::info!("preset `{}`: {}", name, toolkits.join(" -> "));
            }
            PresetOutcome::Placeholder { name, .. } => {
                document.add_preset(&Fragment::placeholder(name.clone()), AddMode::KeepExisting)?;
            }
            PresetOutcome::Failed { name, errors } => {
                for error in errors {
                    tracing::warn!("preset `{}` failed: {}", name, error);
                }
            }
        }
        if let Some(fragment) = fragment {
            document.add_preset(&fragment, AddMode::Replace)?;
        }
        final_outcomes.push(outcome);
    }

    let failures = final_outcomes.iter().filter(|o| o.is_failed()).count();
    let succeeded = failures < final_outcomes.len() && (failures == 0 || opts.skip_bad);

    let written = succeeded && !opts.dry_run;
    if written {
        document.save()?;
        tracing::info!(
            "wrote {} preset(s) to {}",
            final_outcomes.len() - failures,
            document.path().display()
        );
    }

    Ok(RunReport {
        outcomes: final_outcomes,
        scan_warnings: report.warnings,
        document,
        succeeded,
        written,
    })
}

/// Turn a resolved chain into its outcome and, on success, its fragment.
fn finish_chain(state: ChainState) -> (PresetOutcome, Option<Fragment>) {
    if let Some(errors) = state.failed {
        let outcome = PresetOutcome::Failed {
            name: state.name,
            errors,
        };
        return (outcome, None);
    }
    if state.resolved.is_empty() {
        let mut errors = state.dropped;
        errors.push(PresetError::EmptyChain);
        let outcome = PresetOutcome::Failed {
            name: state.name,
            errors,
        };
        return (outcome, None);
    }

    let merged = MergedEnvironment::new(state.env, state.warnings.clone());
    let fragment = Fragment::build(state.name.clone(), state.inherits, &merged);
    let outcome = PresetOutcome::Written {
        name: state.name,
        toolkits: state.resolved,
        warnings: state.warnings,
        dropped: state.dropped,
    };
    (outcome, Some(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::environment::EnvValue;

    #[test]
    fn test_invalid_spec_fails_before_scanning() {
        let tmp = tempfile::TempDir::new().unwrap();
        let opts = GenerateOptions {
            presets: vec![PresetRequest::new(vec![
                ToolkitSpecFilter::family(ToolkitFamily::Gcc).with_component(" ")
            ])],
            output: tmp.path().join("CMakeUserPresets.json"),
            ..Default::default()
        };
        assert!(generate(&opts).is_err());
        assert!(!opts.output.exists());
    }

    #[test]
    fn test_script_member_requires_script() {
        let opts = GenerateOptions {
            presets: vec![PresetRequest::new(vec!["script".parse().unwrap()])],
            ..Default::default()
        };
        let err = generate(&opts).unwrap_err();
        assert!(err.to_string().contains("--script"));
    }

    #[test]
    fn test_preset_error_diagnostics() {
        let diag = PresetError::NoMatch {
            spec: "gcc@99".to_string(),
        }
        .to_diagnostic();
        assert!(diag.message.contains("gcc@99"));
        assert_eq!(
            diag.suggestions,
            vec![
                suggestions::NO_MATCH.to_string(),
                suggestions::EXTRA_DIRS.to_string()
            ]
        );
    }

    #[test]
    fn test_preset_request_from_chain_text() {
        let request: PresetRequest = "gcc@11:script".parse().unwrap();
        assert_eq!(request.chain.len(), 2);
        assert_eq!(request.chain[0].family, Some(ToolkitFamily::Gcc));
        assert_eq!(request.chain[1].family, Some(ToolkitFamily::CustomScript));
        assert!(request.name.is_none());

        assert_eq!("oneapi".parse::<PresetRequest>().unwrap().chain.len(), 1);
        assert!("gcc@11::script".parse::<PresetRequest>().is_err());
        assert!("gcc@11:clang".parse::<PresetRequest>().is_err());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unsupported_family_writes_placeholder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("CMakeUserPresets.json");
        let opts = GenerateOptions {
            presets: vec![PresetRequest::new(vec!["msvc@2019".parse().unwrap()])],
            output: output.clone(),
            hints: ScanHints::default().with_roots(vec![tmp.path().to_path_buf()]),
            ..Default::default()
        };

        let report = generate(&opts).unwrap();
        assert!(report.succeeded);
        assert!(report.written);
        assert!(matches!(
            report.outcomes[0],
            PresetOutcome::Placeholder {
                family: ToolkitFamily::Msvc,
                ..
            }
        ));

        let doc = PresetDocument::load(&output, DEFAULT_PRESET_VERSION).unwrap();
        let fragment = doc.get("toolkit_vs2019").unwrap();
        assert!(fragment.hidden);
        assert!(fragment.environment.is_empty());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::test_support::{fake_gcc, write_sh, FakeGcc};
        use std::collections::BTreeMap;

        struct Fixture {
            _tmp: tempfile::TempDir,
            tools: PathBuf,
            scripts: PathBuf,
            output: PathBuf,
        }

        fn fixture() -> Fixture {
            let tmp = tempfile::TempDir::new().unwrap();
            let tools = tmp.path().join("tools");
            let scripts = tmp.path().join("scripts");
            fake_gcc(&tools.join("gcc-11/bin"), "gcc", &FakeGcc::new("11.2.0", "x86_64-linux-gnu"));
            fake_gcc(&tools.join("gcc-11/bin"), "gfortran", &FakeGcc::new("11.2.0", "x86_64-linux-gnu"));
            let output = tmp.path().join("CMakeUserPresets.json");
            Fixture {
                _tmp: tmp,
                tools,
                scripts,
                output,
            }
        }

        fn options(fx: &Fixture, presets: Vec<PresetRequest>) -> GenerateOptions {
            let mut host = BTreeMap::new();
            host.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
            GenerateOptions {
                presets,
                output: fx.output.clone(),
                hints: ScanHints::default().with_roots(vec![fx.tools.clone()]),
                resolve: ResolveOptions::default().with_host(host),
                ..Default::default()
            }
        }

        fn chain(specs: &[&str]) -> PresetRequest {
            PresetRequest::new(specs.iter().map(|s| s.parse().unwrap()).collect())
        }

        #[test]
        fn test_gcc_and_script_chain() {
            let fx = fixture();
            let script = write_sh(
                &fx.scripts,
                "env.sh",
                "export FOO=bar\nexport PATH=\"/opt/extra/bin:$PATH\"\n",
            );

            let mut opts = options(&fx, vec![chain(&["gcc@11", "script"])]);
            opts.script = Some(script);
            let report = generate(&opts).unwrap();
            assert!(report.succeeded, "{:?}", report.outcomes);
            assert!(report.written);
            assert_eq!(report.outcomes[0].name(), "toolkit_gcc11_script_env");

            let doc = PresetDocument::load(&fx.output, DEFAULT_PRESET_VERSION).unwrap();
            let env = doc.get("toolkit_gcc11_script_env").unwrap().to_environment();
            assert_eq!(env.value("FOO").as_deref(), Some("bar"));
            assert!(env
                .cache_value("CMAKE_C_COMPILER")
                .is_some_and(|c| c.ends_with("gcc-11/bin/gcc")));
            assert!(env.cache_value("CMAKE_Fortran_COMPILER").is_some());

            let path = env.get("PATH").map(EnvValue::segments).unwrap_or_default();
            assert_eq!(path[0], "/opt/extra/bin");
            assert!(path[1].ends_with("gcc-11/bin"));
        }

        #[test]
        fn test_failed_preset_blocks_write() {
            let fx = fixture();
            let opts = options(&fx, vec![chain(&["gcc@11"]), chain(&["gcc@99"])]);

            let report = generate(&opts).unwrap();
            assert!(!report.succeeded);
            assert!(!report.written);
            assert!(!fx.output.exists());
            assert_eq!(report.failed().count(), 1);
        }

        #[test]
        fn test_skip_bad_keeps_good_presets() {
            let fx = fixture();
            let mut opts = options(&fx, vec![chain(&["gcc@11"]), chain(&["gcc@99"])]);
            opts.skip_bad = true;

            let report = generate(&opts).unwrap();
            assert!(report.succeeded);
            let doc = PresetDocument::load(&fx.output, DEFAULT_PRESET_VERSION).unwrap();
            assert_eq!(doc.preset_names(), vec!["toolkit_gcc11"]);
        }

        #[test]
        fn test_all_failed_fails_even_with_skip_bad() {
            let fx = fixture();
            let mut opts = options(&fx, vec![chain(&["gcc@99"])]);
            opts.skip_bad = true;

            let report = generate(&opts).unwrap();
            assert!(!report.succeeded);
            assert!(!fx.output.exists());
        }

        #[test]
        fn test_force_drops_failing_members() {
            let fx = fixture();
            let script = write_sh(&fx.scripts, "broken.sh", "echo boom\nexit 3\n");

            let mut opts = options(&fx, vec![chain(&["gcc@11", "gcc@99", "script"])]);
            opts.script = Some(script);
            opts.force = true;

            let report = generate(&opts).unwrap();
            assert!(report.succeeded);
            match &report.outcomes[0] {
                PresetOutcome::Written {
                    toolkits, dropped, ..
                } => {
                    assert_eq!(toolkits.len(), 1);
                    assert_eq!(dropped.len(), 2);
                    assert!(matches!(dropped[0], PresetError::NoMatch { .. }));
                    assert!(matches!(dropped[1], PresetError::Resolution(_)));
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        #[test]
        fn test_force_with_nothing_resolved_fails() {
            let fx = fixture();
            let mut opts = options(&fx, vec![chain(&["gcc@99"])]);
            opts.force = true;

            let report = generate(&opts).unwrap();
            assert!(!report.succeeded);
            match &report.outcomes[0] {
                PresetOutcome::Failed { errors, .. } => {
                    assert!(matches!(errors.last(), Some(PresetError::EmptyChain)));
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        #[test]
        fn test_existing_presets_are_kept() {
            let fx = fixture();
            std::fs::write(
                &fx.output,
                r#"{"version": 6, "configurePresets": [{"name": "mine", "generator": "Ninja"}]}"#,
            )
            .unwrap();

            let opts = options(&fx, vec![chain(&["gcc"]).with_name("gnu").with_inherits(vec!["mine".into()])]);
            let report = generate(&opts).unwrap();
            assert!(report.written);

            let doc = PresetDocument::load(&fx.output, DEFAULT_PRESET_VERSION).unwrap();
            assert_eq!(doc.preset_names(), vec!["mine", "gnu"]);
            assert_eq!(doc.get("gnu").unwrap().inherits, vec!["mine"]);
            let text = std::fs::read_to_string(&fx.output).unwrap();
            assert!(text.contains("\"version\": 6"));
        }

        #[test]
        fn test_static_presets_are_merged_first() {
            let fx = fixture();
            std::fs::write(
                &fx.output,
                r#"{"version": 6, "configurePresets": [{"name": "base", "binaryDir": "out"}]}"#,
            )
            .unwrap();

            let mut opts = options(&fx, vec![chain(&["gcc"]).with_name("gnu").with_inherits(vec!["base".into()])]);
            opts.static_presets = vec![
                serde_json::json!({"name": "base", "binaryDir": "build", "generator": "Ninja"}),
                serde_json::json!({"name": "ci", "hidden": true}),
            ];
            let report = generate(&opts).unwrap();
            assert!(report.written);

            let doc = PresetDocument::load(&fx.output, DEFAULT_PRESET_VERSION).unwrap();
            assert_eq!(doc.preset_names(), vec!["base", "ci", "gnu"]);
            let text = std::fs::read_to_string(&fx.output).unwrap();
            assert!(text.contains("\"binaryDir\": \"out\""));
            assert!(text.contains("\"generator\": \"Ninja\""));
            assert!(!text.contains("\"binaryDir\": \"build\""));
        }

        #[test]
        fn test_dry_run_does_not_write() {
            let fx = fixture();
            let mut opts = options(&fx, vec![chain(&["gcc"])]);
            opts.dry_run = true;

            let report = generate(&opts).unwrap();
            assert!(report.succeeded);
            assert!(!report.written);
            assert!(!fx.output.exists());
            assert!(report.document.render().unwrap().contains("toolkit_gcc_latest"));
        }

        #[test]
        fn test_cancelled_run_fails() {
            let fx = fixture();
            let opts = options(&fx, vec![chain(&["gcc"])]);
            opts.resolve.cancel.cancel();

            assert!(generate(&opts).is_err());
            assert!(!fx.output.exists());
        }
    }
}
