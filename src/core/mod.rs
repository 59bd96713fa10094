pub mod config;
pub mod entities;
pub mod error;
pub mod rule_engine;
pub mod types;

pub use entities::{
    ActivityEntry, Document, DocumentEvent, UnitMembership, UserProfile, WorkflowRef,
};
pub use error::AppError;
pub use rule_engine::{
    ExpressionEngine, ParamsCalculator, ReassignmentHandler, ResolutionContext,
    ResolvedPermissions, Resolver,
};
pub use types::*;
