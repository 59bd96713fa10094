use chancery::core::entities::{Document, UnitMembership, UserProfile, WorkflowRef};
use chancery::core::rule_engine::context::ResolutionContext;
use chancery::core::rule_engine::directory::{
    InMemoryDirectory, InMemorySnapshots, WorkflowSnapshot,
};
use chancery::core::rule_engine::expression::ExpressionEngine;
use chancery::core::rule_engine::resolver::Resolver;
use chancery::core::rule_engine::schema::TaskTemplate;
use serde_json::{json, Value};
use std::sync::Arc;

fn template(rules: Value) -> TaskTemplate {
    serde_json::from_value(json!({"id": "tmpl-resolver", "rules": rules})).expect("template")
}

fn resolver(snapshots: InMemorySnapshots) -> Resolver {
    Resolver::new(
        Arc::new(ExpressionEngine::default()),
        Arc::new(InMemoryDirectory::new()),
        Arc::new(snapshots),
    )
}

fn resolution() -> ResolutionContext {
    ResolutionContext::new(UserProfile::new("caller"), UnitMembership::default())
}

fn resolution_for(workflow_id: &str) -> ResolutionContext {
    resolution().with_workflow(WorkflowRef {
        id: workflow_id.to_string(),
        created_by: "owner-1".to_string(),
    })
}

#[tokio::test]
async fn condition_gates_the_calculator_on_current_documents() {
    let template = template(json!([{
        "condition": {"$expr": "|docs| docs.len() > 0"},
        "calcPerformerUnits": {"$expr": "|docs, user, units, events| [42]"}
    }]));
    let snapshot = WorkflowSnapshot {
        documents: vec![Document {
            id: "d1".to_string(),
            data: json!({}),
        }],
        events: vec![],
    };

    let permissions = resolver(InMemorySnapshots::single("wf-1", snapshot))
        .resolve_permissions(&template, &resolution_for("wf-1"))
        .await
        .unwrap();
    assert_eq!(permissions.performer_units, vec![42]);

    // Same template against an empty snapshot: the condition is false
    // and the descriptor contributes nothing.
    let permissions = resolver(InMemorySnapshots::single("wf-1", WorkflowSnapshot::default()))
        .resolve_permissions(&template, &resolution_for("wf-1"))
        .await
        .unwrap();
    assert!(permissions.performer_units.is_empty());
}

#[tokio::test]
async fn descriptor_contributions_union_without_duplicates() {
    let template = template(json!([
        {"performerUnits": [5, 7], "signerUsers": ["s1"]},
        {"calcPerformerUnits": {"$expr": "|docs, user, units, events| [5, 11]"}},
        {"signerUsers": ["s1", "s2"]}
    ]));

    let permissions = resolver(InMemorySnapshots::new())
        .resolve_permissions(&template, &resolution())
        .await
        .unwrap();
    assert_eq!(permissions.performer_units, vec![5, 7, 11]);
    assert_eq!(permissions.signer_users, vec!["s1", "s2"]);
}

#[tokio::test]
async fn trigger_failure_aborts_the_whole_resolution() {
    let template = template(json!([
        {"performerUnits": [1]},
        {"reassignTrigger": {
            "source": "data.state",
            "calcPerformerUnits": {"$expr": "|ctx| boom()"}
        }}
    ]));

    let err = resolver(InMemorySnapshots::new())
        .resolve_permissions(&template, &resolution())
        .await
        .unwrap_err();
    assert_eq!(err.code, "TPE-TRIG-003");
    assert!(err.is_reassign_trigger());
}

#[tokio::test]
async fn contained_calculator_failure_still_applies_statics() {
    let template = template(json!([{
        "performerUnits": [3],
        "calcPerformerUsers": {"$expr": "|docs, user, units, events| nope()"}
    }]));

    let report = resolver(InMemorySnapshots::new())
        .resolve_with_report(&template, &resolution())
        .await
        .unwrap();
    assert_eq!(report.permissions.performer_units, vec![3]);
    assert!(report.permissions.performer_users.is_empty());
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcomes[0].applied);
    assert_eq!(report.outcomes[0].kind, "calculated");
}

#[tokio::test]
async fn only_for_heads_survives_later_descriptors() {
    let template = template(json!([
        {"performerUnits": [1], "onlyForHeads": true},
        {"performerUnits": [2], "onlyForHeads": false}
    ]));

    let permissions = resolver(InMemorySnapshots::new())
        .resolve_permissions(&template, &resolution())
        .await
        .unwrap();
    assert!(permissions.only_for_heads);
    assert_eq!(permissions.performer_units, vec![1, 2]);
}

#[tokio::test]
async fn calculated_lists_are_normalized_on_merge() {
    let template = template(json!([{
        "calcPerformerUnits": {
            "$expr": "|docs, user, units, events| [5, 0, 5, 7, \"x\", 2.0]"
        },
        "calcPerformerUsers": {
            "$expr": "|docs, user, units, events| [\"a\", \"\", \"a\", 7]"
        }
    }]));

    let permissions = resolver(InMemorySnapshots::new())
        .resolve_permissions(&template, &resolution())
        .await
        .unwrap();
    assert_eq!(permissions.performer_units, vec![5, 7, 2]);
    assert_eq!(permissions.performer_users, vec!["a", "7"]);
}

#[tokio::test]
async fn skipped_descriptors_carry_their_condition_error() {
    let template = template(json!([
        {
            "condition": {"$expr": "|docs| docs.missing_method()"},
            "performerUnits": [1]
        },
        {"performerUnits": [2]}
    ]));

    let report = resolver(InMemorySnapshots::new())
        .resolve_with_report(&template, &resolution())
        .await
        .unwrap();
    assert_eq!(report.permissions.performer_units, vec![2]);
    assert!(!report.outcomes[0].applied);
    assert!(report.outcomes[0].error.is_some());
    assert!(report.outcomes[1].applied);
}
