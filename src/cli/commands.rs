use crate::{
    cli::args::{LintArgs, LintFormat, ParamsArgs, ReassignArgs, ResolveArgs},
    core::{
        config::{ChanceryConfig, ConfigLoader},
        rule_engine::{
            accumulator::ResolvedPermissions,
            context::{EvalInputs, ResolutionContext},
            directory::{InMemoryDirectory, InMemorySnapshots, WorkflowSnapshot},
            expression::ExpressionEngine,
            lint::{LintRegistry, LintResult, LintSeverity},
            params::ParamsCalculator,
            reassign::ReassignmentHandler,
            resolver::Resolver,
            schema::{ResolutionFixture, TaskTemplate},
        },
        types::TaskOperation,
    },
    Result,
};
use anyhow::anyhow;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs to evaluate one fixture offline.
struct FixtureRuntime {
    template: TaskTemplate,
    fixture: ResolutionFixture,
    engine: Arc<ExpressionEngine>,
}

impl FixtureRuntime {
    fn load(template_path: &Path, fixture_path: &Path) -> Result<Self> {
        let config = load_config()?;
        let template = TaskTemplate::load_from_file(template_path)?;
        let fixture = ResolutionFixture::load_from_file(fixture_path)?;
        let engine = Arc::new(ExpressionEngine::new(&config.sandbox));
        Ok(FixtureRuntime {
            template,
            fixture,
            engine,
        })
    }

    fn resolver(&self) -> Resolver {
        let directory = Arc::new(InMemoryDirectory::from_fixture(&self.fixture.directory));
        let snapshots = match self.fixture.workflow {
            Some(ref workflow) => InMemorySnapshots::single(
                workflow.id.clone(),
                WorkflowSnapshot {
                    documents: self.fixture.documents.clone(),
                    events: self.fixture.events.clone(),
                },
            ),
            None => InMemorySnapshots::new(),
        };
        Resolver::new(self.engine.clone(), directory, Arc::new(snapshots))
    }

    fn resolution(&self, operation: TaskOperation) -> ResolutionContext {
        let mut resolution =
            ResolutionContext::new(self.fixture.user.clone(), self.fixture.units.clone())
                .with_performer_unit_ids(self.fixture.current_task_performer_unit_ids.clone())
                .with_activity_log(self.fixture.task_activity_log.clone())
                .with_operation(operation);
        if let Some(ref workflow) = self.fixture.workflow {
            resolution = resolution.with_workflow(workflow.clone());
        }
        resolution
    }
}

fn load_config() -> Result<ChanceryConfig> {
    let cwd = env::current_dir()?;
    Ok(ConfigLoader::load_from_dir(&cwd)?)
}

pub async fn resolve(args: ResolveArgs) -> Result<()> {
    tracing::info!(template = %args.template.display(), "resolving task permissions");

    let runtime = FixtureRuntime::load(&args.template, &args.fixture)?;
    let resolver = runtime.resolver();
    let resolution = runtime.resolution(TaskOperation::Create);

    if args.report {
        let report = resolver
            .resolve_with_report(&runtime.template, &resolution)
            .await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let permissions = resolver
            .resolve_permissions(&runtime.template, &resolution)
            .await?;
        println!("{}", serde_json::to_string_pretty(&permissions)?);
    }
    Ok(())
}

pub async fn params(args: ParamsArgs) -> Result<()> {
    tracing::info!(template = %args.template.display(), "calculating task params");

    let runtime = FixtureRuntime::load(&args.template, &args.fixture)?;
    let inputs = EvalInputs::prepare(
        &runtime.fixture.documents,
        &runtime.fixture.events,
        &runtime.fixture.user,
        &runtime.fixture.units,
    )?;
    let calculator = ParamsCalculator::new(runtime.engine.clone());
    let task_params = calculator.calculate(&runtime.template, &inputs)?;
    println!("{}", serde_json::to_string_pretty(&task_params)?);
    Ok(())
}

pub async fn reassign(args: ReassignArgs) -> Result<()> {
    tracing::info!(
        template = %args.template.display(),
        paths = ?args.updated_paths,
        "checking reassignment triggers"
    );

    let runtime = FixtureRuntime::load(&args.template, &args.fixture)?;
    let previous = match args.previous {
        Some(ref path) => {
            let text = fs::read_to_string(path)?;
            serde_json::from_str::<ResolvedPermissions>(&text)?
        }
        None => ResolvedPermissions::default(),
    };

    let handler = ReassignmentHandler::new(runtime.resolver());
    let resolution = runtime.resolution(TaskOperation::FieldUpdate);
    let outcome = handler
        .handle_document_update(&runtime.template, &resolution, &args.updated_paths, &previous)
        .await?;

    // `null` on stdout means no trigger matched the updated paths.
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub async fn lint(args: LintArgs) -> Result<()> {
    let template = TaskTemplate::load_from_file(&args.template)?;
    let results = LintRegistry::new().run(&template);

    match args.format {
        LintFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        LintFormat::Text => print_lint_text(&template, &results),
    }

    let errors = results
        .iter()
        .filter(|result| result.severity == LintSeverity::Error)
        .count();
    if errors > 0 {
        return Err(anyhow!(
            "template {} failed lint with {} error(s)",
            template.id,
            errors
        ));
    }
    Ok(())
}

fn print_lint_text(template: &TaskTemplate, results: &[LintResult]) {
    if results.is_empty() {
        println!("template {}: no findings", template.id);
        return;
    }
    for result in results {
        match result.location {
            Some(ref location) => {
                println!("{} [{}] {} ({})", result.severity, result.code, result.message, location)
            }
            None => println!("{} [{}] {}", result.severity, result.code, result.message),
        }
        if let Some(ref suggestion) = result.suggestion {
            println!("    hint: {}", suggestion);
        }
    }
    println!("{} finding(s) in template {}", results.len(), template.id);
}
