#![allow(clippy::result_large_err)]

use crate::core::entities::ActivityEntry;
use crate::core::error::AppError;
use crate::core::rule_engine::accumulator::ResolvedPermissions;
use crate::core::rule_engine::context::ResolutionContext;
use crate::core::rule_engine::resolver::Resolver;
use crate::core::rule_engine::schema::{ReassignTrigger, RuleDescriptor, TaskTemplate};
use crate::core::types::{ErrorCategory, TaskOperation};
use serde::Serialize;

/// Result of one fired reassignment trigger.
///
/// `permissions` replaces the task's previous permission set entirely;
/// nothing from the old set survives the transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignmentOutcome {
    pub permissions: ResolvedPermissions,
    pub activity_entry: ActivityEntry,
    pub trigger_source: String,
}

/// Reacts to document updates by narrowing the template to a single
/// matching trigger and re-running resolution against it.
///
/// The narrowed rule list is never persisted: the next evaluation of
/// the same template starts from the full descriptor set again.
#[derive(Clone)]
pub struct ReassignmentHandler {
    resolver: Resolver,
}

impl ReassignmentHandler {
    pub fn new(resolver: Resolver) -> Self {
        ReassignmentHandler { resolver }
    }

    /// Triggers whose source path is among the updated paths. Matching
    /// is by exact path, not by prefix.
    pub fn matching_triggers<'a>(
        template: &'a TaskTemplate,
        updated_paths: &[String],
    ) -> Vec<&'a ReassignTrigger> {
        template
            .rules
            .iter()
            .filter_map(|rule| rule.reassign_trigger.as_ref())
            .filter(|trigger| updated_paths.iter().any(|path| path == &trigger.source))
            .collect()
    }

    pub async fn handle_document_update(
        &self,
        template: &TaskTemplate,
        resolution: &ResolutionContext,
        updated_paths: &[String],
        previous: &ResolvedPermissions,
    ) -> Result<Option<ReassignmentOutcome>, AppError> {
        let matches = Self::matching_triggers(template, updated_paths);
        let trigger = match matches.as_slice() {
            [] => return Ok(None),
            [only] => *only,
            many => {
                let sources: Vec<&str> =
                    many.iter().map(|trigger| trigger.source.as_str()).collect();
                let mut err = AppError::new(
                    ErrorCategory::ValidationError,
                    format!(
                        "{} reassign triggers match one document update",
                        many.len()
                    ),
                )
                .with_code("TPE-TRIG-001");
                err.add_context("template_id", &template.id);
                err.add_context("sources", &sources.join(", "));
                return Err(err);
            }
        };

        let narrowed = TaskTemplate {
            id: template.id.clone(),
            name: template.name.clone(),
            params: None,
            rules: vec![RuleDescriptor {
                reassign_trigger: Some(trigger.clone()),
                ..RuleDescriptor::default()
            }],
        };
        let resolution = resolution.clone().with_operation(TaskOperation::Reassign);
        let report = self
            .resolver
            .resolve_with_report(&narrowed, &resolution)
            .await?;
        let permissions = report.permissions;

        let mut entry = ActivityEntry::reassignment(&trigger.source);
        entry.previous_performer_units = previous.performer_units.clone();
        entry.new_performer_units = permissions.performer_units.clone();
        entry.previous_performer_users = previous.performer_users.clone();
        entry.new_performer_users = permissions.performer_users.clone();

        tracing::info!(
            template_id = %template.id,
            trigger_source = %trigger.source,
            previous_performer_users = ?entry.previous_performer_users,
            new_performer_users = ?entry.new_performer_users,
            "task reassigned after document update"
        );
        Ok(Some(ReassignmentOutcome {
            permissions,
            activity_entry: entry,
            trigger_source: trigger.source.clone(),
        }))
    }
}
