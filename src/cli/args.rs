use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ResolveArgs {
    /// Task template file (JSON or YAML)
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    /// Resolution fixture with user, units, documents, and directory data
    #[arg(value_name = "FIXTURE")]
    pub fixture: PathBuf,

    /// Include the per-descriptor outcome report in the output
    #[arg(long, help_heading = "Output Options")]
    pub report: bool,
}

#[derive(Args)]
pub struct ParamsArgs {
    /// Task template file (JSON or YAML)
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    /// Resolution fixture providing documents, user, units, and events
    #[arg(value_name = "FIXTURE")]
    pub fixture: PathBuf,
}

#[derive(Args)]
pub struct ReassignArgs {
    /// Task template file (JSON or YAML)
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    /// Resolution fixture with user, units, documents, and directory data
    #[arg(value_name = "FIXTURE")]
    pub fixture: PathBuf,

    /// Updated document path; repeat the flag for multi-path updates
    #[arg(long = "path", value_name = "PATH", required = true)]
    pub updated_paths: Vec<String>,

    /// JSON file with the task's current permissions, recorded in the audit entry
    #[arg(long, value_name = "FILE")]
    pub previous: Option<PathBuf>,
}

#[derive(Args)]
pub struct LintArgs {
    /// Task template file (JSON or YAML)
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    /// Emit either terminal-friendly text or machine-readable JSON
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: LintFormat,
}

#[derive(Clone, clap::ValueEnum, Debug)]
pub enum LintFormat {
    /// Human-readable findings, one per block
    Text,
    /// JSON payload suitable for CI tooling
    Json,
}
