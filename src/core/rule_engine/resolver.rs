#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::rule_engine::accumulator::{PermissionAccumulator, ResolvedPermissions};
use crate::core::rule_engine::assigner::{normalize_string_items, normalize_unit_ids, Assigner};
use crate::core::rule_engine::context::{EvalInputs, ResolutionContext};
use crate::core::rule_engine::directory::{SnapshotSource, UnitDirectory, WorkflowSnapshot};
use crate::core::rule_engine::expression::{EvalMeta, ExpressionEngine};
use crate::core::rule_engine::schema::{MaybeExpr, RuleDescriptor, RuleKind, TaskTemplate};
use serde::Serialize;
use std::sync::Arc;

/// Per-descriptor outcome recorded during a resolution pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorOutcome {
    pub index: usize,
    pub kind: &'static str,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DescriptorOutcome {
    fn applied(index: usize, kind: RuleKind) -> Self {
        DescriptorOutcome {
            index,
            kind: kind.as_str(),
            applied: true,
            error: None,
        }
    }

    fn skipped(index: usize, kind: RuleKind, error: Option<String>) -> Self {
        DescriptorOutcome {
            index,
            kind: kind.as_str(),
            applied: false,
            error,
        }
    }
}

/// Merged permissions plus the per-descriptor audit trail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub permissions: ResolvedPermissions,
    pub outcomes: Vec<DescriptorOutcome>,
}

/// Folds a template's ordered rule descriptors into one permission set.
///
/// Descriptors are applied strictly in declaration order. A failing
/// condition or calculator is contained to its descriptor; only
/// reassign-trigger failures abort the whole pass.
#[derive(Clone)]
pub struct Resolver {
    engine: Arc<ExpressionEngine>,
    assigner: Assigner,
    snapshots: Arc<dyn SnapshotSource>,
}

impl Resolver {
    pub fn new(
        engine: Arc<ExpressionEngine>,
        directory: Arc<dyn UnitDirectory>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Self {
        let assigner = Assigner::new(engine.clone(), directory);
        Resolver {
            engine,
            assigner,
            snapshots,
        }
    }

    pub async fn resolve_permissions(
        &self,
        template: &TaskTemplate,
        resolution: &ResolutionContext,
    ) -> Result<ResolvedPermissions, AppError> {
        Ok(self
            .resolve_with_report(template, resolution)
            .await?
            .permissions)
    }

    pub async fn resolve_with_report(
        &self,
        template: &TaskTemplate,
        resolution: &ResolutionContext,
    ) -> Result<ResolutionReport, AppError> {
        let snapshot = self.fetch_snapshot(template, resolution).await?;
        let inputs = EvalInputs::prepare(
            &snapshot.documents,
            &snapshot.events,
            &resolution.user,
            &resolution.units,
        )?;
        let meta = self.base_meta(template, resolution);

        let mut acc = PermissionAccumulator::new();
        let mut outcomes = Vec::with_capacity(template.rules.len());
        for (index, rule) in template.rules.iter().enumerate() {
            let outcome = self
                .apply_rule(index, rule, &inputs, resolution, &meta, &mut acc)
                .await?;
            outcomes.push(outcome);
        }

        let report = ResolutionReport {
            permissions: acc.into_resolved(),
            outcomes,
        };
        tracing::debug!(
            template_id = %template.id,
            operation = resolution.operation.map(|op| op.as_str()),
            performer_units = report.permissions.performer_units.len(),
            performer_users = report.permissions.performer_users.len(),
            "permission resolution complete"
        );
        Ok(report)
    }

    /// Documents and events are fetched once per pass, and only when
    /// some descriptor actually evaluates an expression.
    async fn fetch_snapshot(
        &self,
        template: &TaskTemplate,
        resolution: &ResolutionContext,
    ) -> Result<WorkflowSnapshot, AppError> {
        if !template.needs_snapshot() {
            return Ok(WorkflowSnapshot::default());
        }
        match resolution.workflow {
            Some(ref workflow) => self.snapshots.workflow_snapshot(&workflow.id).await,
            None => Ok(WorkflowSnapshot::default()),
        }
    }

    fn base_meta(&self, template: &TaskTemplate, resolution: &ResolutionContext) -> EvalMeta {
        let mut meta =
            EvalMeta::for_caller("resolvePermissions").with_template(template.id.as_str());
        if let Some(ref workflow) = resolution.workflow {
            meta = meta.with_workflow(workflow.id.as_str());
        }
        if let Some(ref task_id) = resolution.task_id {
            meta = meta.with_task(task_id.as_str());
        }
        meta
    }

    async fn apply_rule(
        &self,
        index: usize,
        rule: &RuleDescriptor,
        inputs: &EvalInputs,
        resolution: &ResolutionContext,
        meta: &EvalMeta,
        acc: &mut PermissionAccumulator,
    ) -> Result<DescriptorOutcome, AppError> {
        if let Some(ref condition) = rule.condition {
            let call_meta = meta.clone().with_caller("condition");
            match self.engine.eval_predicate(
                &condition.source,
                &inputs.condition_args(),
                &call_meta,
            ) {
                Ok(true) => {}
                Ok(false) => return Ok(DescriptorOutcome::skipped(index, rule.kind(), None)),
                Err(err) => {
                    tracing::warn!(
                        code = "TPE-RULE-001",
                        rule = index,
                        source = %condition.source,
                        "condition evaluation failed, skipping descriptor: {}",
                        err
                    );
                    return Ok(DescriptorOutcome::skipped(
                        index,
                        rule.kind(),
                        Some(err.to_string()),
                    ));
                }
            }
        }

        acc.extend_performer_units(rule.performer_units.iter().copied());
        acc.extend_required_performer_units(rule.required_performer_units.iter().copied());
        acc.extend_performer_users(rule.performer_users.iter().cloned());
        acc.extend_performer_users_ipn(rule.performer_users_ipn.iter().cloned());
        acc.extend_performer_users_email(rule.performer_users_email.iter().cloned());
        acc.extend_signer_users(rule.signer_users.iter().cloned());

        match rule.only_for_heads {
            Some(MaybeExpr::Literal(flag)) => acc.or_only_for_heads(flag),
            Some(MaybeExpr::Expr(ref expr)) => {
                let call_meta = meta.clone().with_caller("onlyForHeads");
                match self.engine.eval_predicate(
                    &expr.source,
                    &inputs.condition_args(),
                    &call_meta,
                ) {
                    Ok(flag) => acc.or_only_for_heads(flag),
                    Err(err) => tracing::warn!(
                        code = "TPE-RULE-001",
                        rule = index,
                        source = %expr.source,
                        "onlyForHeads evaluation failed, treating as false: {}",
                        err
                    ),
                }
            }
            None => {}
        }

        // Soft hints merge directly, independent of the assigner.
        let calc_args = inputs.calc_args();
        if let Some(ref expr) = rule.prediction_performer_units {
            if let Some(value) =
                self.assigner
                    .eval_contained("predictionPerformerUnits", expr, &calc_args, meta)
            {
                acc.extend_performer_units(normalize_unit_ids(&value));
            }
        }
        if let Some(ref expr) = rule.prediction_required_performer_units {
            if let Some(value) = self.assigner.eval_contained(
                "predictionRequiredPerformerUnits",
                expr,
                &calc_args,
                meta,
            ) {
                acc.extend_required_performer_units(normalize_unit_ids(&value));
            }
        }
        if let Some(ref expr) = rule.prediction_performer_users {
            if let Some(value) =
                self.assigner
                    .eval_contained("predictionPerformerUsers", expr, &calc_args, meta)
            {
                acc.extend_performer_users(normalize_string_items(&value));
            }
        }
        if let Some(ref expr) = rule.prediction_signer_users {
            if let Some(value) =
                self.assigner
                    .eval_contained("predictionSignerUsers", expr, &calc_args, meta)
            {
                acc.extend_signer_users(normalize_string_items(&value));
            }
        }

        // Only reassign-tagged errors escape the assigner; they abort
        // the whole pass.
        let units = self.assigner.calculate_units(rule, inputs, resolution, meta)?;
        acc.extend_performer_units(units.performer_units);
        acc.extend_required_performer_units(units.required_performer_units);

        let users = self
            .assigner
            .calculate_users(rule, inputs, resolution, meta)
            .await?;
        acc.extend_performer_users(users.performer_users);
        acc.extend_performer_users_ipn(users.performer_users_ipn);
        acc.extend_performer_users_email(users.performer_users_email);
        acc.extend_performer_user_names(users.performer_user_names);

        Ok(DescriptorOutcome::applied(index, rule.kind()))
    }
}
