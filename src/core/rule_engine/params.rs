#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::rule_engine::context::EvalInputs;
use crate::core::rule_engine::expression::{EvalMeta, EvalOptions, ExpressionEngine};
use crate::core::rule_engine::schema::{MaybeExpr, TaskTemplate};
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Concrete task parameters after every expression field is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_from_document_id: Option<String>,
}

/// Resolves a template's `params` block into concrete values.
///
/// Unlike permission descriptors these values are task identity, so any
/// expression failure here is fatal for the whole calculation.
#[derive(Clone)]
pub struct ParamsCalculator {
    engine: Arc<ExpressionEngine>,
}

impl ParamsCalculator {
    pub fn new(engine: Arc<ExpressionEngine>) -> Self {
        ParamsCalculator { engine }
    }

    pub fn calculate(
        &self,
        template: &TaskTemplate,
        inputs: &EvalInputs,
    ) -> Result<TaskParams, AppError> {
        let spec = match template.params {
            Some(ref spec) => spec,
            None => return Ok(TaskParams::default()),
        };

        // No expressions anywhere means nothing to evaluate: literals
        // pass through untouched.
        if !spec.has_expressions() {
            return Ok(TaskParams {
                name: literal_string(&spec.name),
                label: literal_string(&spec.label),
                meta: spec.meta.as_ref().and_then(MaybeExpr::literal).cloned(),
                copy_from_document_id: literal_string(&spec.copy_from_document_id),
            });
        }

        let meta = EvalMeta::for_caller("calculateTaskParams").with_template(template.id.as_str());
        let args = inputs.calc_args();

        let name = self.string_field("params.name", &spec.name, &args, &meta)?;
        let label = self.string_field("params.label", &spec.label, &args, &meta)?;
        let meta_value = self.value_field("params.meta", &spec.meta, &args, &meta)?;
        let copy_candidate = self.string_field(
            "params.copyFromDocumentId",
            &spec.copy_from_document_id,
            &args,
            &meta,
        )?;
        let copy_from_document_id = check_copy_source(copy_candidate, inputs);

        tracing::debug!(
            template_id = %template.id,
            name = ?name,
            copy_from_document_id = ?copy_from_document_id,
            "task params calculated"
        );
        Ok(TaskParams {
            name,
            label,
            meta: meta_value,
            copy_from_document_id,
        })
    }

    fn string_field(
        &self,
        field: &'static str,
        spec: &Option<MaybeExpr<String>>,
        args: &[Value],
        meta: &EvalMeta,
    ) -> Result<Option<String>, AppError> {
        match spec {
            None => Ok(None),
            Some(MaybeExpr::Literal(text)) => Ok(Some(text.clone())),
            Some(MaybeExpr::Expr(expr)) => {
                let value = self.eval_field(field, &expr.source, args, meta)?;
                string_from_value(field, value)
            }
        }
    }

    fn value_field(
        &self,
        field: &'static str,
        spec: &Option<MaybeExpr<Value>>,
        args: &[Value],
        meta: &EvalMeta,
    ) -> Result<Option<Value>, AppError> {
        match spec {
            None => Ok(None),
            Some(MaybeExpr::Literal(value)) => Ok(Some(value.clone())),
            Some(MaybeExpr::Expr(expr)) => {
                match self.eval_field(field, &expr.source, args, meta)? {
                    Value::Null => Ok(None),
                    value => Ok(Some(value)),
                }
            }
        }
    }

    fn eval_field(
        &self,
        field: &'static str,
        source: &str,
        args: &[Value],
        meta: &EvalMeta,
    ) -> Result<Value, AppError> {
        let call_meta = meta.clone().with_caller(field);
        self.engine
            .eval_with_args(source, args, &EvalOptions::new(call_meta))
            .map_err(|err| fatal_param(field, err))
    }
}

fn literal_string(spec: &Option<MaybeExpr<String>>) -> Option<String> {
    spec.as_ref().and_then(MaybeExpr::literal).cloned()
}

fn string_from_value(field: &'static str, value: Value) -> Result<Option<String>, AppError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        Value::Number(number) => Ok(Some(number.to_string())),
        other => Err(AppError::new(
            ErrorCategory::ValidationError,
            format!(
                "{} must evaluate to a string, got {}",
                field,
                value_kind(&other)
            ),
        )
        .with_code("TPE-PARAM-001")),
    }
}

fn fatal_param(field: &'static str, err: AppError) -> AppError {
    let mut wrapped = AppError::new(
        ErrorCategory::ValidationError,
        format!("task parameter {} failed to evaluate", field),
    )
    .with_code("TPE-PARAM-001");
    wrapped.context = err.context.clone();
    wrapped.add_context("field", field);
    wrapped.source = Some(anyhow::Error::new(err));
    wrapped
}

/// A copy directive may only point at a document already visible in
/// this workflow; anything else is dropped rather than trusted.
fn check_copy_source(candidate: Option<String>, inputs: &EvalInputs) -> Option<String> {
    let candidate = candidate?;
    if visible_document_ids(inputs).contains(candidate.as_str()) {
        return Some(candidate);
    }
    tracing::warn!(
        code = "TPE-PARAM-002",
        document_id = %candidate,
        "copy source rejected: document is not part of this workflow"
    );
    None
}

fn visible_document_ids(inputs: &EvalInputs) -> HashSet<&str> {
    match inputs.documents.as_array() {
        Some(docs) => docs
            .iter()
            .filter_map(|doc| doc.get("id").and_then(Value::as_str))
            .collect(),
        None => HashSet::new(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
