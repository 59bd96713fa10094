use crate::core::rule_engine::schema::{MaybeExpr, RuleDescriptor, RuleKind, TaskTemplate};
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Diagnostic severity levels emitted by template lint rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    Error,
    Warning,
    Info,
}

impl LintSeverity {
    fn rank(&self) -> u8 {
        match self {
            LintSeverity::Error => 3,
            LintSeverity::Warning => 2,
            LintSeverity::Info => 1,
        }
    }
}

impl fmt::Display for LintSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintSeverity::Error => write!(f, "Error"),
            LintSeverity::Warning => write!(f, "Warning"),
            LintSeverity::Info => write!(f, "Info"),
        }
    }
}

/// Individual lint result emitted by a rule.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub code: String,
    pub severity: LintSeverity,
    pub message: String,
    pub location: Option<String>,
    pub suggestion: Option<String>,
}

impl LintResult {
    pub fn new(
        code: impl Into<String>,
        severity: LintSeverity,
        message: impl Into<String>,
        location: Option<String>,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            location,
            suggestion,
        }
    }
}

/// Trait implemented by template lint rules.
///
/// Lint runs on templates that already passed schema validation, so
/// rules never see unparseable expressions; they flag configurations
/// that are legal but useless or hazardous at resolution time.
pub trait TemplateLintRule {
    fn validate(&self, template: &TaskTemplate) -> Vec<LintResult>;
}

fn built_in_rules() -> Vec<Box<dyn TemplateLintRule>> {
    vec![
        Box::new(EmptyDescriptorRule),
        Box::new(TriggerWithoutCalculatorsRule),
        Box::new(TriggerSourcePathRule),
        Box::new(ZeroUnitIdRule),
        Box::new(UnmatchableSelectorRule),
        Box::new(PredictionOverlapRule),
    ]
}

/// Registry that runs all built-in template lint rules.
pub struct LintRegistry {
    rules: Vec<Box<dyn TemplateLintRule>>,
}

impl LintRegistry {
    pub fn new() -> Self {
        Self {
            rules: built_in_rules(),
        }
    }

    /// Run all registered lint rules against the template.
    /// The results are already sorted by `(severity desc, code asc, location asc)`.
    pub fn run(&self, template: &TaskTemplate) -> Vec<LintResult> {
        let mut results = Vec::new();
        for rule in &self.rules {
            results.extend(rule.validate(template));
        }
        results.sort_by(|a, b| {
            let severity_cmp = b.severity.rank().cmp(&a.severity.rank());
            severity_cmp
                .then(a.code.cmp(&b.code))
                .then(a.location.cmp(&b.location))
        });
        results
    }
}

impl Default for LintRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct EmptyDescriptorRule;

impl TemplateLintRule for EmptyDescriptorRule {
    fn validate(&self, template: &TaskTemplate) -> Vec<LintResult> {
        let mut out = Vec::new();
        for (index, rule) in template.rules.iter().enumerate() {
            if rule.kind() == RuleKind::Empty {
                out.push(LintResult::new(
                    "TPE-LINT-001",
                    LintSeverity::Warning,
                    format!("rule descriptor {} carries no permission source", index),
                    Some(format!("rules[{}]", index)),
                    Some("remove the descriptor or add a static list, calculator, or trigger".to_string()),
                ));
            }
        }
        out
    }
}

struct TriggerWithoutCalculatorsRule;

impl TemplateLintRule for TriggerWithoutCalculatorsRule {
    fn validate(&self, template: &TaskTemplate) -> Vec<LintResult> {
        let mut out = Vec::new();
        for (index, rule) in template.rules.iter().enumerate() {
            let Some(ref trigger) = rule.reassign_trigger else {
                continue;
            };
            let has_calc = trigger.calc_performer_units.is_some()
                || trigger.calc_required_performer_units.is_some()
                || trigger.calc_performer_users.is_some()
                || trigger.calc_performer_user_names.is_some();
            if !has_calc {
                out.push(LintResult::new(
                    "TPE-LINT-002",
                    LintSeverity::Error,
                    format!(
                        "reassign trigger on '{}' has no calculators; firing it would clear every performer",
                        trigger.source
                    ),
                    Some(format!("rules[{}].reassignTrigger", index)),
                    Some("add at least one calc field to the trigger".to_string()),
                ));
            }
        }
        out
    }
}

struct TriggerSourcePathRule;

impl TemplateLintRule for TriggerSourcePathRule {
    fn validate(&self, template: &TaskTemplate) -> Vec<LintResult> {
        let dotted = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+$").unwrap();
        let mut out = Vec::new();
        for (index, rule) in template.rules.iter().enumerate() {
            let Some(ref trigger) = rule.reassign_trigger else {
                continue;
            };
            if !dotted.is_match(&trigger.source) {
                out.push(LintResult::new(
                    "TPE-LINT-003",
                    LintSeverity::Warning,
                    format!(
                        "trigger source '{}' does not look like a document field path",
                        trigger.source
                    ),
                    Some(format!("rules[{}].reassignTrigger.source", index)),
                    Some("use a dotted path such as 'data.status'".to_string()),
                ));
            }
        }
        out
    }
}

struct ZeroUnitIdRule;

impl TemplateLintRule for ZeroUnitIdRule {
    fn validate(&self, template: &TaskTemplate) -> Vec<LintResult> {
        let mut out = Vec::new();
        for (index, rule) in template.rules.iter().enumerate() {
            for (field, list) in [
                ("performerUnits", &rule.performer_units),
                ("requiredPerformerUnits", &rule.required_performer_units),
            ] {
                if list.contains(&0) {
                    out.push(LintResult::new(
                        "TPE-LINT-004",
                        LintSeverity::Warning,
                        format!("{} contains unit id 0, which is dropped at merge time", field),
                        Some(format!("rules[{}].{}", index, field)),
                        Some("remove the placeholder id".to_string()),
                    ));
                }
            }
        }
        out
    }
}

struct UnmatchableSelectorRule;

impl TemplateLintRule for UnmatchableSelectorRule {
    fn validate(&self, template: &TaskTemplate) -> Vec<LintResult> {
        let mut out = Vec::new();
        for (index, rule) in template.rules.iter().enumerate() {
            for (field, slot) in selector_fields(rule) {
                if let Some(MaybeExpr::Literal(unit_id)) = slot {
                    if *unit_id <= 0 {
                        out.push(LintResult::new(
                            "TPE-LINT-005",
                            LintSeverity::Error,
                            format!(
                                "literal unit selector {} is {}, which can never match a unit",
                                field, unit_id
                            ),
                            Some(format!("rules[{}].{}", index, field)),
                            Some("use a positive unit id or an expression".to_string()),
                        ));
                    }
                }
            }
        }
        out
    }
}

fn selector_fields(rule: &RuleDescriptor) -> [(&'static str, &Option<MaybeExpr<i64>>); 4] {
    [
        ("randomUserFromUnit", &rule.random_user_from_unit),
        (
            "performerUsersIsRandomHeadFromUnit",
            &rule.performer_users_is_random_head_from_unit,
        ),
        ("randomMemberFromUnit", &rule.random_member_from_unit),
        ("optimalMemberFromUnit", &rule.optimal_member_from_unit),
    ]
}

struct PredictionOverlapRule;

impl TemplateLintRule for PredictionOverlapRule {
    fn validate(&self, template: &TaskTemplate) -> Vec<LintResult> {
        let mut out = Vec::new();
        for (index, rule) in template.rules.iter().enumerate() {
            for (category, prediction, calc) in [
                (
                    "performerUnits",
                    rule.prediction_performer_units.is_some(),
                    rule.calc_performer_units.is_some(),
                ),
                (
                    "requiredPerformerUnits",
                    rule.prediction_required_performer_units.is_some(),
                    rule.calc_required_performer_units.is_some(),
                ),
                (
                    "performerUsers",
                    rule.prediction_performer_users.is_some(),
                    rule.calc_performer_users.is_some(),
                ),
            ] {
                if prediction && calc {
                    out.push(LintResult::new(
                        "TPE-LINT-006",
                        LintSeverity::Info,
                        format!(
                            "descriptor {} sets both a prediction and a calculator for {}; results merge by union",
                            index, category
                        ),
                        Some(format!("rules[{}]", index)),
                        None,
                    ));
                }
            }
        }
        out
    }
}
