#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::rule_engine::context::{EvalInputs, ResolutionContext};
use crate::core::rule_engine::directory::UnitDirectory;
use crate::core::rule_engine::expression::{EvalMeta, EvalOptions, ExpressionEngine};
use crate::core::rule_engine::schema::{Expr, MaybeExpr, RuleDescriptor};
use crate::core::types::ErrorCategory;
use indexmap::IndexSet;
use rand::Rng;
use serde_json::{Number, Value};
use std::sync::Arc;

/// Incremental unit contribution from one descriptor.
#[derive(Debug, Clone, Default)]
pub struct UnitAssignment {
    pub performer_units: Vec<i64>,
    pub required_performer_units: Vec<i64>,
}

/// Incremental user contribution from one descriptor, split by category.
#[derive(Debug, Clone, Default)]
pub struct UserAssignment {
    pub performer_users: Vec<String>,
    pub performer_users_ipn: Vec<String>,
    pub performer_users_email: Vec<String>,
    pub performer_user_names: Vec<String>,
}

/// Turns one rule descriptor into its calculated contribution.
///
/// Reassign-trigger calculators, when present for a category, are that
/// category's exclusive source and fail hard; every other source is
/// contained: a failure is logged and contributes nothing.
#[derive(Clone)]
pub struct Assigner {
    engine: Arc<ExpressionEngine>,
    directory: Arc<dyn UnitDirectory>,
}

impl Assigner {
    pub fn new(engine: Arc<ExpressionEngine>, directory: Arc<dyn UnitDirectory>) -> Self {
        Assigner { engine, directory }
    }

    /// Performer and required-performer unit ids for one descriptor.
    pub fn calculate_units(
        &self,
        rule: &RuleDescriptor,
        inputs: &EvalInputs,
        resolution: &ResolutionContext,
        meta: &EvalMeta,
    ) -> Result<UnitAssignment, AppError> {
        let trigger = rule.reassign_trigger.as_ref();
        let mut assignment = UnitAssignment::default();

        assignment.performer_units = match trigger.and_then(|t| t.calc_performer_units.as_ref()) {
            Some(expr) => {
                let value = self.eval_trigger_calc(
                    "reassignTrigger.calcPerformerUnits",
                    expr,
                    inputs,
                    resolution,
                    meta,
                )?;
                normalize_unit_ids(&value)
            }
            None => match rule.calc_performer_units {
                Some(ref expr) => self
                    .eval_contained("calcPerformerUnits", expr, &inputs.calc_args(), meta)
                    .map(|value| normalize_unit_ids(&value))
                    .unwrap_or_default(),
                None => Vec::new(),
            },
        };

        assignment.required_performer_units =
            match trigger.and_then(|t| t.calc_required_performer_units.as_ref()) {
                Some(expr) => {
                    let value = self.eval_trigger_calc(
                        "reassignTrigger.calcRequiredPerformerUnits",
                        expr,
                        inputs,
                        resolution,
                        meta,
                    )?;
                    normalize_unit_ids(&value)
                }
                None => match rule.calc_required_performer_units {
                    Some(ref expr) => self
                        .eval_contained(
                            "calcRequiredPerformerUnits",
                            expr,
                            &inputs.calc_args(),
                            meta,
                        )
                        .map(|value| normalize_unit_ids(&value))
                        .unwrap_or_default(),
                    None => Vec::new(),
                },
            };

        Ok(assignment)
    }

    /// Performer user ids, ipns, emails and names for one descriptor.
    ///
    /// The non-trigger sources are independent: each failure is logged
    /// and skipped without blocking the others, and the result is never
    /// null — at worst every list is empty.
    pub async fn calculate_users(
        &self,
        rule: &RuleDescriptor,
        inputs: &EvalInputs,
        resolution: &ResolutionContext,
        meta: &EvalMeta,
    ) -> Result<UserAssignment, AppError> {
        let mut assignment = UserAssignment::default();

        if let Some(ref trigger) = rule.reassign_trigger {
            if trigger.calc_performer_users.is_some()
                || trigger.calc_performer_user_names.is_some()
            {
                if let Some(ref expr) = trigger.calc_performer_users {
                    let value = self.eval_trigger_calc(
                        "reassignTrigger.calcPerformerUsers",
                        expr,
                        inputs,
                        resolution,
                        meta,
                    )?;
                    assignment.performer_users = normalize_string_items(&value);
                }
                if let Some(ref expr) = trigger.calc_performer_user_names {
                    let value = self.eval_trigger_calc(
                        "reassignTrigger.calcPerformerUserNames",
                        expr,
                        inputs,
                        resolution,
                        meta,
                    )?;
                    assignment.performer_user_names = normalize_string_items(&value);
                }
                return Ok(assignment);
            }
        }

        let calc_args = inputs.calc_args();

        if let Some(ref expr) = rule.calc_performer_users {
            if let Some(value) = self.eval_contained("calcPerformerUsers", expr, &calc_args, meta)
            {
                assignment.performer_users.extend(normalize_string_items(&value));
            }
        }
        if let Some(ref expr) = rule.calc_performer_users_ipn {
            if let Some(value) =
                self.eval_contained("calcPerformerUsersIpn", expr, &calc_args, meta)
            {
                assignment
                    .performer_users_ipn
                    .extend(normalize_string_items(&value));
            }
        }
        if let Some(ref expr) = rule.calc_performer_users_email {
            if let Some(value) =
                self.eval_contained("calcPerformerUsersEmail", expr, &calc_args, meta)
            {
                assignment
                    .performer_users_email
                    .extend(normalize_string_items(&value));
            }
        }
        if let Some(ref expr) = rule.calc_performer_users_name {
            if let Some(value) =
                self.eval_contained("calcPerformerUsersName", expr, &calc_args, meta)
            {
                assignment
                    .performer_user_names
                    .extend(normalize_string_items(&value));
            }
        }

        if rule.performer_users_is_workflow_owner {
            match resolution.workflow {
                Some(ref workflow) if !workflow.created_by.is_empty() => {
                    assignment.performer_users.push(workflow.created_by.clone());
                }
                _ => tracing::warn!(
                    code = "TPE-RULE-001",
                    field = "performerUsersIsWorkflowOwner",
                    "workflow owner requested but no workflow in context"
                ),
            }
        }

        if let Some(ref selector) = rule.random_user_from_unit {
            if let Some(unit_id) =
                self.selected_unit_id("randomUserFromUnit", selector, &calc_args, meta)
            {
                match self.directory.unit_users(unit_id).await {
                    Ok(candidates) => {
                        if let Some(pick) = pick_random(&candidates) {
                            assignment.performer_users.push(pick);
                        }
                    }
                    Err(err) => log_directory_failure("randomUserFromUnit", unit_id, &err),
                }
            }
        }

        if let Some(ref selector) = rule.performer_users_is_random_head_from_unit {
            if let Some(unit_id) = self.selected_unit_id(
                "performerUsersIsRandomHeadFromUnit",
                selector,
                &calc_args,
                meta,
            ) {
                match self.directory.unit_heads(unit_id).await {
                    Ok(candidates) => {
                        if let Some(pick) = pick_random(&candidates) {
                            assignment.performer_users.push(pick);
                        }
                    }
                    Err(err) => {
                        log_directory_failure("performerUsersIsRandomHeadFromUnit", unit_id, &err)
                    }
                }
            }
        }

        if let Some(ref selector) = rule.random_member_from_unit {
            if let Some(unit_id) =
                self.selected_unit_id("randomMemberFromUnit", selector, &calc_args, meta)
            {
                match self.directory.unit_members(unit_id).await {
                    Ok(candidates) => {
                        if let Some(pick) = pick_random(&candidates) {
                            assignment.performer_users.push(pick);
                        }
                    }
                    Err(err) => log_directory_failure("randomMemberFromUnit", unit_id, &err),
                }
            }
        }

        if let Some(ref selector) = rule.optimal_member_from_unit {
            if let Some(unit_id) =
                self.selected_unit_id("optimalMemberFromUnit", selector, &calc_args, meta)
            {
                match self.directory.unit_members(unit_id).await {
                    Ok(candidates) => {
                        if let Some(pick) = self.least_loaded(&candidates).await {
                            assignment.performer_users.push(pick);
                        }
                    }
                    Err(err) => log_directory_failure("optimalMemberFromUnit", unit_id, &err),
                }
            }
        }

        Ok(assignment)
    }

    /// Evaluate a contained expression: errors are logged and become
    /// "no contribution" instead of aborting the resolution.
    pub(crate) fn eval_contained(
        &self,
        field: &'static str,
        expr: &Expr,
        args: &[Value],
        meta: &EvalMeta,
    ) -> Option<Value> {
        let call_meta = meta.clone().with_caller(field);
        match self
            .engine
            .eval_with_args(&expr.source, args, &EvalOptions::new(call_meta))
        {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    code = "TPE-RULE-001",
                    field = field,
                    source = %expr.source,
                    "rule calculator failed, contributing nothing: {}",
                    err
                );
                None
            }
        }
    }

    fn eval_trigger_calc(
        &self,
        field: &'static str,
        expr: &Expr,
        inputs: &EvalInputs,
        resolution: &ResolutionContext,
        meta: &EvalMeta,
    ) -> Result<Value, AppError> {
        let call_meta = meta.clone().with_caller(field);
        let args = vec![inputs.reassign_ctx(resolution)];
        let value = self
            .engine
            .eval_with_args(&expr.source, &args, &EvalOptions::new(call_meta.clone()))
            .map_err(|err| {
                let mut wrapped = AppError::new(
                    ErrorCategory::ReassignTriggerError,
                    format!("reassign trigger calculator failed: {}", err.message),
                )
                .with_code("TPE-TRIG-003");
                wrapped.source = Some(anyhow::Error::new(err));
                call_meta.annotate(wrapped)
            })?;
        if value.is_null() {
            return Err(call_meta.annotate(
                AppError::new(
                    ErrorCategory::ReassignTriggerError,
                    "reassign trigger calculator returned no assignment",
                )
                .with_code("TPE-TRIG-002"),
            ));
        }
        Ok(value)
    }

    fn selected_unit_id(
        &self,
        field: &'static str,
        selector: &MaybeExpr<i64>,
        calc_args: &[Value],
        meta: &EvalMeta,
    ) -> Option<i64> {
        match selector {
            MaybeExpr::Literal(id) if *id != 0 => Some(*id),
            MaybeExpr::Literal(_) => None,
            MaybeExpr::Expr(expr) => self
                .eval_contained(field, expr, calc_args, meta)
                .and_then(|value| unit_id_from_value(&value)),
        }
    }

    /// Sequential scan keeps the tie-break deterministic: the first
    /// member with the lowest open-task count wins.
    async fn least_loaded(&self, candidates: &[String]) -> Option<String> {
        let mut best: Option<(usize, usize)> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let count = match self.directory.open_task_count(candidate).await {
                Ok(count) => count,
                Err(err) => {
                    tracing::warn!(
                        code = "TPE-RULE-001",
                        user = %candidate,
                        "open-task lookup failed, skipping candidate: {}",
                        err
                    );
                    continue;
                }
            };
            match best {
                Some((_, best_count)) if count >= best_count => {}
                _ => best = Some((index, count)),
            }
        }
        best.map(|(index, _)| candidates[index].clone())
    }
}

fn pick_random(candidates: &[String]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates[index].clone())
}

fn log_directory_failure(field: &'static str, unit_id: i64, err: &AppError) {
    tracing::warn!(
        code = "TPE-RULE-001",
        field = field,
        unit_id = unit_id,
        "directory lookup failed, contributing nothing: {}",
        err
    );
}

/// Normalize a calculator result into deduplicated unit ids; falsy and
/// non-integer entries are dropped.
pub(crate) fn normalize_unit_ids(value: &Value) -> Vec<i64> {
    let mut out = IndexSet::new();
    match value {
        Value::Number(n) => {
            if let Some(id) = integral_id(n) {
                out.insert(id);
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Value::Number(n) = item {
                    if let Some(id) = integral_id(n) {
                        out.insert(id);
                    }
                }
            }
        }
        _ => {}
    }
    out.into_iter().collect()
}

/// Normalize a calculator result into deduplicated non-empty strings;
/// numbers are carried as their decimal form.
pub(crate) fn normalize_string_items(value: &Value) -> Vec<String> {
    let mut out = IndexSet::new();
    match value {
        Value::String(s) if !s.is_empty() => {
            out.insert(s.clone());
        }
        Value::Number(n) => {
            out.insert(n.to_string());
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) if !s.is_empty() => {
                        out.insert(s.clone());
                    }
                    Value::Number(n) => {
                        out.insert(n.to_string());
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    out.into_iter().collect()
}

fn unit_id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => integral_id(n),
        Value::Array(items) => items.first().and_then(|item| match item {
            Value::Number(n) => integral_id(n),
            _ => None,
        }),
        _ => None,
    }
}

fn integral_id(n: &Number) -> Option<i64> {
    n.as_i64()
        .or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        })
        .filter(|id| *id != 0)
}
