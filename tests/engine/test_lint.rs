use chancery::core::rule_engine::lint::{LintRegistry, LintResult, LintSeverity};
use chancery::core::rule_engine::schema::TaskTemplate;
use serde_json::{json, Value};

fn lint(rules: Value) -> Vec<LintResult> {
    let template: TaskTemplate =
        serde_json::from_value(json!({"id": "tmpl-lint", "rules": rules})).expect("template");
    LintRegistry::new().run(&template)
}

fn codes(findings: &[LintResult]) -> Vec<&str> {
    findings.iter().map(|f| f.code.as_str()).collect()
}

#[test]
fn clean_template_has_no_findings() {
    let findings = lint(json!([
        {
            "condition": {"$expr": "|docs| docs.len() > 0"},
            "performerUnits": [4],
            "calcPerformerUsers": {"$expr": "|docs, user, units, events| [user.id]"}
        },
        {
            "reassignTrigger": {
                "source": "data.status",
                "calcPerformerUnits": {"$expr": "|ctx| [4]"}
            }
        }
    ]));
    assert!(findings.is_empty(), "unexpected findings: {:?}", findings);
}

#[test]
fn empty_descriptor_is_flagged() {
    let findings = lint(json!([
        {"performerUnits": [1]},
        {"condition": {"$expr": "|docs| true"}}
    ]));
    assert_eq!(codes(&findings), vec!["TPE-LINT-001"]);
    assert_eq!(findings[0].severity, LintSeverity::Warning);
    assert_eq!(findings[0].location.as_deref(), Some("rules[1]"));
}

#[test]
fn trigger_without_calculators_is_an_error() {
    let findings = lint(json!([
        {"reassignTrigger": {"source": "data.approver"}}
    ]));
    assert_eq!(codes(&findings), vec!["TPE-LINT-002"]);
    assert_eq!(findings[0].severity, LintSeverity::Error);
    assert!(findings[0].message.contains("clear every performer"));
    assert_eq!(
        findings[0].location.as_deref(),
        Some("rules[0].reassignTrigger")
    );
}

#[test]
fn flat_trigger_source_is_flagged() {
    let findings = lint(json!([
        {"reassignTrigger": {
            "source": "status",
            "calcPerformerUnits": {"$expr": "|ctx| [1]"}
        }}
    ]));
    assert_eq!(codes(&findings), vec!["TPE-LINT-003"]);
    assert_eq!(
        findings[0].suggestion.as_deref(),
        Some("use a dotted path such as 'data.status'")
    );
}

#[test]
fn zero_unit_id_is_flagged_per_list() {
    let findings = lint(json!([
        {"performerUnits": [0, 4], "requiredPerformerUnits": [0]}
    ]));
    assert_eq!(codes(&findings), vec!["TPE-LINT-004", "TPE-LINT-004"]);
    assert_eq!(
        findings[0].location.as_deref(),
        Some("rules[0].performerUnits")
    );
    assert_eq!(
        findings[1].location.as_deref(),
        Some("rules[0].requiredPerformerUnits")
    );
}

#[test]
fn non_positive_literal_selector_is_an_error() {
    let findings = lint(json!([
        {"optimalMemberFromUnit": -2}
    ]));
    assert_eq!(codes(&findings), vec!["TPE-LINT-005"]);
    assert_eq!(findings[0].severity, LintSeverity::Error);

    // An expression selector is out of lint's reach and stays silent.
    let findings = lint(json!([
        {"optimalMemberFromUnit": {"$expr": "|docs, user, units, events| docs[0].data.unit"}}
    ]));
    assert!(findings.is_empty());
}

#[test]
fn prediction_and_calculator_overlap_is_informational() {
    let findings = lint(json!([
        {
            "predictionPerformerUsers": {"$expr": "|docs, user, units, events| []"},
            "calcPerformerUsers": {"$expr": "|docs, user, units, events| []"}
        }
    ]));
    assert_eq!(codes(&findings), vec!["TPE-LINT-006"]);
    assert_eq!(findings[0].severity, LintSeverity::Info);
}

#[test]
fn findings_are_stably_sorted() {
    let findings = lint(json!([
        {},
        {"reassignTrigger": {"source": "flat"}},
        {"performerUnits": [0], "optimalMemberFromUnit": 0}
    ]));
    assert!(findings.len() >= 5);

    fn rank(severity: LintSeverity) -> u8 {
        match severity {
            LintSeverity::Error => 3,
            LintSeverity::Warning => 2,
            LintSeverity::Info => 1,
        }
    }
    for pair in findings.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let ordered = rank(a.severity) > rank(b.severity)
            || (a.severity == b.severity && a.code < b.code)
            || (a.severity == b.severity && a.code == b.code && a.location <= b.location);
        assert!(
            ordered,
            "finding {:?} sorted after {:?}",
            (&a.code, &a.location),
            (&b.code, &b.location)
        );
    }

    // Errors lead regardless of the descriptor order that produced them.
    assert_eq!(findings[0].severity, LintSeverity::Error);
}
