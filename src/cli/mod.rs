pub mod args;
pub mod commands;

pub use args::{LintArgs, ParamsArgs, ReassignArgs, ResolveArgs};
use clap::{Parser, Subcommand};

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
TEMPLATE COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "chancery")]
#[command(version = crate::VERSION)]
#[command(about = "Rule evaluation and task-permission resolution for document workflows")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: lint a template, then resolve it against a fixture to preview which units and users the task lands on."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Resolve a template's permission descriptors against a fixture",
        long_about = "Resolve folds the template's rule descriptors in order, evaluating conditions and calculators in the expression sandbox, and prints the merged permission set.",
        after_help = "Example:\n    chancery resolve template.json fixture.json --report"
    )]
    Resolve(ResolveArgs),
    #[command(
        about = "Calculate task parameters from a template's params block",
        long_about = "Params evaluates the template's name, label, meta, and copy-source expressions against the fixture's documents, user, units, and events.",
        after_help = "Example:\n    chancery params template.json fixture.json"
    )]
    Params(ParamsArgs),
    #[command(
        about = "Fire reassignment triggers for updated document paths",
        long_about = "Reassign narrows the template to the single trigger matching the updated paths, re-resolves permissions from it alone, and prints the replacement permission set with an audit entry.",
        after_help = "Example:\n    chancery reassign template.json fixture.json --path data.assignee --previous current.json"
    )]
    Reassign(ReassignArgs),
    #[command(
        about = "Check a template for hazardous or useless rule configurations",
        long_about = "Lint loads and validates the template, then reports descriptors that can never contribute, triggers that would strand a task, and other authoring mistakes.",
        after_help = "Example:\n    chancery lint template.yaml --format json"
    )]
    Lint(LintArgs),
}

pub async fn run(args: Args) -> crate::Result<()> {
    match args.command {
        Command::Resolve(resolve_args) => commands::resolve(resolve_args).await,
        Command::Params(params_args) => commands::params(params_args).await,
        Command::Reassign(reassign_args) => commands::reassign(reassign_args).await,
        Command::Lint(lint_args) => commands::lint(lint_args).await,
    }
}
