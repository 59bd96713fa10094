//! Task-permission rule evaluation for chancery.

pub mod accumulator;
pub mod assigner;
pub mod context;
pub mod directory;
pub mod expression;
pub mod lint;
pub mod params;
pub mod reassign;
pub mod resolver;
pub mod schema;

pub use accumulator::ResolvedPermissions;
pub use assigner::Assigner;
pub use context::{EvalInputs, ResolutionContext};
pub use directory::{
    InMemoryDirectory, InMemorySnapshots, SnapshotSource, UnitDirectory, UnitRoster,
    WorkflowSnapshot,
};
pub use expression::{EvalMeta, EvalOptions, ExpressionEngine, ExpressionEngineBuilder};
pub use lint::{LintRegistry, LintResult, LintSeverity};
pub use params::{ParamsCalculator, TaskParams};
pub use reassign::{ReassignmentHandler, ReassignmentOutcome};
pub use resolver::{ResolutionReport, Resolver};
pub use schema::{ResolutionFixture, RuleDescriptor, TaskTemplate};
