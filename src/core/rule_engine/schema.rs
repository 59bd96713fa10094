#![allow(clippy::result_large_err)]

use crate::core::entities::{Document, DocumentEvent, UnitMembership, UserProfile, WorkflowRef};
use crate::core::error::AppError;
use crate::core::rule_engine::directory::UnitRoster;
use crate::core::rule_engine::expression::ExpressionEngine;
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// An expression carried in template data, marked explicitly with the
/// `$expr` key so literals never have to be sniffed apart from code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(rename = "$expr")]
    pub source: String,
}

impl Expr {
    pub fn new(source: impl Into<String>) -> Self {
        Expr {
            source: source.into(),
        }
    }
}

/// A field that is either a literal value or an expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaybeExpr<T> {
    Expr(Expr),
    Literal(T),
}

impl<T> MaybeExpr<T> {
    pub fn expression(&self) -> Option<&str> {
        match self {
            MaybeExpr::Expr(expr) => Some(expr.source.as_str()),
            MaybeExpr::Literal(_) => None,
        }
    }

    pub fn literal(&self) -> Option<&T> {
        match self {
            MaybeExpr::Expr(_) => None,
            MaybeExpr::Literal(value) => Some(value),
        }
    }
}

/// Reassignment trigger attached to a rule descriptor: when a document
/// update touches `source`, the trigger's calculators become the only
/// rule in force.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignTrigger {
    /// Document path whose update fires this trigger.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_units: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_required_performer_units: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_users: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_user_names: Option<Expr>,
}

/// Closed set of descriptor behaviors, derived from which fields are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Trigger calculators are the exclusive source for this descriptor.
    ReassignTrigger,
    /// At least one calculator, prediction or unit-selection source.
    Calculated,
    /// Static lists only.
    Static,
    /// No contribution at all.
    Empty,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::ReassignTrigger => "reassignTrigger",
            RuleKind::Calculated => "calculated",
            RuleKind::Static => "static",
            RuleKind::Empty => "empty",
        }
    }
}

/// One element of a template's ordered rule list.
///
/// A descriptor may combine static lists with calculators; the
/// reassign trigger, when present, overrides both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDescriptor {
    /// Gates the whole descriptor; re-evaluated on every resolution
    /// because it reads current documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer_units: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_performer_units: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer_users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer_users_ipn: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer_users_email: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signer_users: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_units: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_required_performer_units: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_users: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_users_ipn: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_users_email: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc_performer_users_name: Option<Expr>,

    #[serde(default)]
    pub performer_users_is_workflow_owner: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_user_from_unit: Option<MaybeExpr<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performer_users_is_random_head_from_unit: Option<MaybeExpr<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_member_from_unit: Option<MaybeExpr<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal_member_from_unit: Option<MaybeExpr<i64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_performer_units: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_required_performer_units: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_performer_users: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_signer_users: Option<Expr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_for_heads: Option<MaybeExpr<bool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reassign_trigger: Option<ReassignTrigger>,
}

impl RuleDescriptor {
    pub fn kind(&self) -> RuleKind {
        if self.reassign_trigger.is_some() {
            return RuleKind::ReassignTrigger;
        }
        if self.has_calculated_source() {
            return RuleKind::Calculated;
        }
        if self.has_static_lists() {
            return RuleKind::Static;
        }
        RuleKind::Empty
    }

    fn has_calculated_source(&self) -> bool {
        self.calc_performer_units.is_some()
            || self.calc_required_performer_units.is_some()
            || self.calc_performer_users.is_some()
            || self.calc_performer_users_ipn.is_some()
            || self.calc_performer_users_email.is_some()
            || self.calc_performer_users_name.is_some()
            || self.performer_users_is_workflow_owner
            || self.random_user_from_unit.is_some()
            || self.performer_users_is_random_head_from_unit.is_some()
            || self.random_member_from_unit.is_some()
            || self.optimal_member_from_unit.is_some()
            || self.prediction_performer_units.is_some()
            || self.prediction_required_performer_units.is_some()
            || self.prediction_performer_users.is_some()
            || self.prediction_signer_users.is_some()
    }

    fn has_static_lists(&self) -> bool {
        !self.performer_units.is_empty()
            || !self.required_performer_units.is_empty()
            || !self.performer_users.is_empty()
            || !self.performer_users_ipn.is_empty()
            || !self.performer_users_email.is_empty()
            || !self.signer_users.is_empty()
    }

    /// Expression sources carried by this descriptor, keyed by wire
    /// field name.
    pub fn expressions(&self) -> Vec<(&'static str, &str)> {
        let mut found = Vec::new();
        if let Some(ref expr) = self.condition {
            found.push(("condition", expr.source.as_str()));
        }
        for (field, slot) in [
            ("calcPerformerUnits", &self.calc_performer_units),
            ("calcRequiredPerformerUnits", &self.calc_required_performer_units),
            ("calcPerformerUsers", &self.calc_performer_users),
            ("calcPerformerUsersIpn", &self.calc_performer_users_ipn),
            ("calcPerformerUsersEmail", &self.calc_performer_users_email),
            ("calcPerformerUsersName", &self.calc_performer_users_name),
            ("predictionPerformerUnits", &self.prediction_performer_units),
            (
                "predictionRequiredPerformerUnits",
                &self.prediction_required_performer_units,
            ),
            ("predictionPerformerUsers", &self.prediction_performer_users),
            ("predictionSignerUsers", &self.prediction_signer_users),
        ] {
            if let Some(expr) = slot {
                found.push((field, expr.source.as_str()));
            }
        }
        for (field, slot) in [
            ("randomUserFromUnit", &self.random_user_from_unit),
            (
                "performerUsersIsRandomHeadFromUnit",
                &self.performer_users_is_random_head_from_unit,
            ),
            ("randomMemberFromUnit", &self.random_member_from_unit),
            ("optimalMemberFromUnit", &self.optimal_member_from_unit),
        ] {
            if let Some(MaybeExpr::Expr(expr)) = slot {
                found.push((field, expr.source.as_str()));
            }
        }
        if let Some(MaybeExpr::Expr(ref expr)) = self.only_for_heads {
            found.push(("onlyForHeads", expr.source.as_str()));
        }
        if let Some(ref trigger) = self.reassign_trigger {
            for (field, slot) in [
                ("reassignTrigger.calcPerformerUnits", &trigger.calc_performer_units),
                (
                    "reassignTrigger.calcRequiredPerformerUnits",
                    &trigger.calc_required_performer_units,
                ),
                ("reassignTrigger.calcPerformerUsers", &trigger.calc_performer_users),
                (
                    "reassignTrigger.calcPerformerUserNames",
                    &trigger.calc_performer_user_names,
                ),
            ] {
                if let Some(expr) = slot {
                    found.push((field, expr.source.as_str()));
                }
            }
        }
        found
    }

    /// Whether resolving this descriptor needs the workflow snapshot.
    ///
    /// Literal unit selections only hit the directory; any expression,
    /// including a unit selector written as one, pulls documents in.
    pub fn requires_documents(&self) -> bool {
        !self.expressions().is_empty()
    }
}

/// Task template: ordered rule descriptors plus optional parameter
/// expressions, loaded from the platform's template store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<TaskParamsSpec>,
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
}

/// Template-level parameter fields resolved at task creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParamsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<MaybeExpr<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<MaybeExpr<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MaybeExpr<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_from_document_id: Option<MaybeExpr<String>>,
}

impl TaskParamsSpec {
    pub fn expressions(&self) -> Vec<(&'static str, &str)> {
        let mut found = Vec::new();
        for (field, source) in [
            ("name", self.name.as_ref().and_then(MaybeExpr::expression)),
            ("label", self.label.as_ref().and_then(MaybeExpr::expression)),
            ("meta", self.meta.as_ref().and_then(MaybeExpr::expression)),
            (
                "copyFromDocumentId",
                self.copy_from_document_id
                    .as_ref()
                    .and_then(MaybeExpr::expression),
            ),
        ] {
            if let Some(source) = source {
                found.push((field, source));
            }
        }
        found
    }

    /// True when at least one field carries an expression; the caller
    /// short-circuits otherwise.
    pub fn has_expressions(&self) -> bool {
        !self.expressions().is_empty()
    }
}

impl TaskTemplate {
    /// Load and validate a task template from a YAML or JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        let template: TaskTemplate = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&text).map_err(|err| parse_error(path, err))?
            }
            _ => serde_json::from_str(&text).map_err(|err| parse_error(path, err))?,
        };
        let engine = ExpressionEngine::default();
        template.validate(&engine)?;
        Ok(template)
    }

    /// Validate the template: ids present, every expression compiles,
    /// and no two triggers share a source (they would always collide).
    pub fn validate(&self, engine: &ExpressionEngine) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "template id must not be empty",
            )
            .with_code("TPE-SCHEMA-001"));
        }

        let mut trigger_sources = HashSet::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if let Some(ref trigger) = rule.reassign_trigger {
                if trigger.source.trim().is_empty() {
                    return Err(AppError::new(
                        ErrorCategory::ValidationError,
                        format!("rules[{}].reassignTrigger.source must not be empty", index),
                    )
                    .with_code("TPE-SCHEMA-001"));
                }
                if !trigger_sources.insert(trigger.source.clone()) {
                    return Err(AppError::new(
                        ErrorCategory::ValidationError,
                        format!("duplicate reassign trigger source: {}", trigger.source),
                    )
                    .with_code("TPE-SCHEMA-002"));
                }
            }
            for (field, source) in rule.expressions() {
                engine.compile(source).map_err(|mut err| {
                    err.add_context("template_id", &self.id);
                    err.add_context("field", &format!("rules[{}].{}", index, field));
                    err
                })?;
            }
        }

        if let Some(ref params) = self.params {
            for (field, source) in params.expressions() {
                engine.compile(source).map_err(|mut err| {
                    err.add_context("template_id", &self.id);
                    err.add_context("field", &format!("params.{}", field));
                    err
                })?;
            }
        }
        Ok(())
    }

    /// Whether any descriptor needs the documents/events snapshot.
    pub fn needs_snapshot(&self) -> bool {
        self.rules.iter().any(RuleDescriptor::requires_documents)
    }
}

/// Full input set for one offline resolution run, as read by the CLI
/// and integration tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionFixture {
    pub user: UserProfile,
    #[serde(default)]
    pub units: UnitMembership,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowRef>,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub events: Vec<DocumentEvent>,
    #[serde(default)]
    pub current_task_performer_unit_ids: Vec<i64>,
    #[serde(default)]
    pub task_activity_log: Vec<Value>,
    #[serde(default)]
    pub directory: DirectoryFixture,
}

impl ResolutionFixture {
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&text).map_err(|err| parse_error(path, err))
            }
            _ => serde_json::from_str(&text).map_err(|err| parse_error(path, err)),
        }
    }
}

/// Unit rosters and open-task counts backing the in-memory directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryFixture {
    #[serde(default)]
    pub units: HashMap<i64, UnitRoster>,
    #[serde(default)]
    pub open_tasks: HashMap<String, usize>,
}

fn parse_error(path: &Path, err: impl std::fmt::Display) -> AppError {
    AppError::new(
        ErrorCategory::ValidationError,
        format!("failed to parse {}: {}", path.display(), err),
    )
    .with_code("TPE-SCHEMA-001")
}
