//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// kitenv - detect compiler toolkits and bake their environments into CMake presets
#[derive(Parser)]
#[command(name = "kitenv")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every subcommand.
#[derive(Args)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Number of parallel jobs (defaults to the number of CPUs)
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Seconds an environment script may run before it is killed
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List toolkit families and whether this platform supports them
    List(ListArgs),

    /// Show installed toolkits
    Scan(ScanArgs),

    /// Write a configure preset carrying a chain of toolkit environments
    Generate(GenerateArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct ListArgs {}

#[derive(Args)]
pub struct ScanArgs {
    /// Toolkit spec to filter by, e.g. `gcc@>=10+fortran`
    pub specs: Vec<String>,

    /// Only scan this family (repeatable)
    #[arg(short, long = "family", value_name = "FAMILY")]
    pub families: Vec<String>,

    /// Show only the best match per spec (per family without specs)
    #[arg(long)]
    pub select: bool,

    /// Search these directories instead of the default locations
    #[arg(long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Environment script to list as a `script` toolkit
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Print candidates as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Toolkit spec to chain (repeatable; later toolkits take precedence)
    #[arg(
        short = 't',
        long = "toolkit",
        value_name = "SPEC",
        required_unless_present = "presets"
    )]
    pub toolkits: Vec<String>,

    /// Another preset, as toolkit specs joined by `:`, e.g. `msvc:oneapi`
    /// (repeatable)
    #[arg(short = 'p', long = "preset", value_name = "CHAIN")]
    pub presets: Vec<String>,

    /// Environment script used by a `script` toolkit
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Name of the `--toolkit` preset (defaults to one derived from the toolkits)
    #[arg(short, long, requires = "toolkits")]
    pub name: Option<String>,

    /// Preset every generated preset inherits from (repeatable)
    #[arg(long, value_name = "PRESET")]
    pub inherits: Vec<String>,

    /// Preset file to update (defaults to CMakeUserPresets.json)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Presets merged into the file before the generated ones, keeping
    /// any existing preset's own settings
    #[arg(long, value_name = "FILE")]
    pub static_presets: Option<PathBuf>,

    /// Search these directories instead of the default locations
    #[arg(long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Write the presets that succeeded even if others failed
    #[arg(long)]
    pub skip_bad: bool,

    /// Fail when toolkits set conflicting values for a variable
    #[arg(long)]
    pub strict: bool,

    /// Leave out toolkits that are missing or fail to resolve
    #[arg(long)]
    pub force: bool,

    /// Print the preset file instead of writing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
