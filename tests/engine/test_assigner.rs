use async_trait::async_trait;
use chancery::core::entities::{Document, UnitMembership, UserProfile, WorkflowRef};
use chancery::core::error::AppError;
use chancery::core::rule_engine::assigner::Assigner;
use chancery::core::rule_engine::context::{EvalInputs, ResolutionContext};
use chancery::core::rule_engine::directory::{InMemoryDirectory, UnitDirectory, UnitRoster};
use chancery::core::rule_engine::expression::{EvalMeta, ExpressionEngine};
use chancery::core::rule_engine::schema::RuleDescriptor;
use chancery::core::types::ErrorCategory;
use serde_json::{json, Value};
use std::sync::Arc;

fn assigner(directory: impl UnitDirectory + 'static) -> Assigner {
    Assigner::new(Arc::new(ExpressionEngine::default()), Arc::new(directory))
}

fn rule(value: Value) -> RuleDescriptor {
    serde_json::from_value(value).expect("rule descriptor")
}

fn roster(heads: &[&str], members: &[&str]) -> UnitRoster {
    UnitRoster {
        heads: heads.iter().map(|s| s.to_string()).collect(),
        members: members.iter().map(|s| s.to_string()).collect(),
    }
}

fn inputs(documents: &[Document]) -> EvalInputs {
    EvalInputs::prepare(
        documents,
        &[],
        &UserProfile::new("caller"),
        &UnitMembership::default(),
    )
    .expect("inputs")
}

fn resolution() -> ResolutionContext {
    ResolutionContext::new(UserProfile::new("caller"), UnitMembership::default())
}

fn meta() -> EvalMeta {
    EvalMeta::for_caller("resolvePermissions").with_template("tmpl-assigner")
}

#[tokio::test]
async fn optimal_member_prefers_first_least_loaded() {
    let mut directory = InMemoryDirectory::new();
    directory.insert_unit(10, roster(&[], &["a", "b", "c"]));
    directory.set_open_tasks("a", 3);
    directory.set_open_tasks("b", 1);
    directory.set_open_tasks("c", 1);

    let users = assigner(directory)
        .calculate_users(
            &rule(json!({"optimalMemberFromUnit": 10})),
            &inputs(&[]),
            &resolution(),
            &meta(),
        )
        .await
        .unwrap();
    assert_eq!(users.performer_users, vec!["b"]);
}

#[tokio::test]
async fn random_head_selection_stays_inside_the_roster() {
    let mut directory = InMemoryDirectory::new();
    directory.insert_unit(20, roster(&["h1", "h2"], &["m1"]));

    let users = assigner(directory)
        .calculate_users(
            &rule(json!({"performerUsersIsRandomHeadFromUnit": 20})),
            &inputs(&[]),
            &resolution(),
            &meta(),
        )
        .await
        .unwrap();
    assert_eq!(users.performer_users.len(), 1);
    assert!(["h1", "h2"].contains(&users.performer_users[0].as_str()));
}

#[tokio::test]
async fn workflow_owner_is_added_only_with_a_workflow() {
    let descriptor = rule(json!({"performerUsersIsWorkflowOwner": true}));

    let with_workflow = resolution().with_workflow(WorkflowRef {
        id: "wf-1".to_string(),
        created_by: "owner-1".to_string(),
    });
    let users = assigner(InMemoryDirectory::new())
        .calculate_users(&descriptor, &inputs(&[]), &with_workflow, &meta())
        .await
        .unwrap();
    assert_eq!(users.performer_users, vec!["owner-1"]);

    let users = assigner(InMemoryDirectory::new())
        .calculate_users(&descriptor, &inputs(&[]), &resolution(), &meta())
        .await
        .unwrap();
    assert!(users.performer_users.is_empty());
}

#[tokio::test]
async fn trigger_calculator_is_exclusive_per_category() {
    let descriptor = rule(json!({
        "calcPerformerUnits": {"$expr": "|docs, user, units, events| [1]"},
        "calcRequiredPerformerUnits": {"$expr": "|docs, user, units, events| [2]"},
        "reassignTrigger": {
            "source": "data.approver",
            "calcPerformerUnits": {"$expr": "|ctx| [9]"}
        }
    }));

    let units = assigner(InMemoryDirectory::new())
        .calculate_units(&descriptor, &inputs(&[]), &resolution(), &meta())
        .unwrap();
    // The trigger owns performerUnits outright; requiredPerformerUnits
    // still comes from the descriptor's own calculator.
    assert_eq!(units.performer_units, vec![9]);
    assert_eq!(units.required_performer_units, vec![2]);
}

#[tokio::test]
async fn trigger_users_block_preempts_regular_sources() {
    let descriptor = rule(json!({
        "calcPerformerUsersIpn": {"$expr": "|docs, user, units, events| [\"ipn-1\"]"},
        "performerUsersIsWorkflowOwner": true,
        "reassignTrigger": {
            "source": "data.approver",
            "calcPerformerUsers": {"$expr": "|ctx| [\"u9\"]"}
        }
    }));
    let with_workflow = resolution().with_workflow(WorkflowRef {
        id: "wf-1".to_string(),
        created_by: "owner-1".to_string(),
    });

    let users = assigner(InMemoryDirectory::new())
        .calculate_users(&descriptor, &inputs(&[]), &with_workflow, &meta())
        .await
        .unwrap();
    assert_eq!(users.performer_users, vec!["u9"]);
    assert!(users.performer_users_ipn.is_empty());
}

#[tokio::test]
async fn expression_selector_resolves_the_unit_before_lookup() {
    let mut directory = InMemoryDirectory::new();
    directory.insert_unit(30, roster(&[], &["m-30"]));

    let documents = vec![Document {
        id: "d1".to_string(),
        data: json!({"unitId": 30}),
    }];
    let users = assigner(directory)
        .calculate_users(
            &rule(json!({
                "randomMemberFromUnit": {"$expr": "|docs, user, units, events| docs[0].data.unitId"}
            })),
            &inputs(&documents),
            &resolution(),
            &meta(),
        )
        .await
        .unwrap();
    assert_eq!(users.performer_users, vec!["m-30"]);
}

#[tokio::test]
async fn trigger_context_exposes_current_performers() {
    let descriptor = rule(json!({
        "reassignTrigger": {
            "source": "data.approver",
            "calcPerformerUnits": {"$expr": "|ctx| ctx.currentTaskPerformerUnitIds"}
        }
    }));
    let with_performers = resolution().with_performer_unit_ids(vec![4, 8]);

    let units = assigner(InMemoryDirectory::new())
        .calculate_units(&descriptor, &inputs(&[]), &with_performers, &meta())
        .unwrap();
    assert_eq!(units.performer_units, vec![4, 8]);
}

#[tokio::test]
async fn trigger_failure_is_tagged_for_propagation() {
    let descriptor = rule(json!({
        "reassignTrigger": {
            "source": "data.approver",
            "calcPerformerUsers": {"$expr": "|ctx| broken()"}
        }
    }));

    let err = assigner(InMemoryDirectory::new())
        .calculate_users(&descriptor, &inputs(&[]), &resolution(), &meta())
        .await
        .unwrap_err();
    assert_eq!(err.code, "TPE-TRIG-003");
    assert!(err.is_reassign_trigger());
    assert_eq!(
        err.context.get("fn").map(String::as_str),
        Some("reassignTrigger.calcPerformerUsers")
    );
}

struct FailingDirectory;

#[async_trait]
impl UnitDirectory for FailingDirectory {
    async fn unit_heads(&self, _unit_id: i64) -> Result<Vec<String>, AppError> {
        Err(AppError::new(
            ErrorCategory::DirectoryError,
            "directory offline",
        ))
    }

    async fn unit_members(&self, _unit_id: i64) -> Result<Vec<String>, AppError> {
        Err(AppError::new(
            ErrorCategory::DirectoryError,
            "directory offline",
        ))
    }

    async fn unit_users(&self, _unit_id: i64) -> Result<Vec<String>, AppError> {
        Err(AppError::new(
            ErrorCategory::DirectoryError,
            "directory offline",
        ))
    }

    async fn open_task_count(&self, _user_id: &str) -> Result<usize, AppError> {
        Err(AppError::new(
            ErrorCategory::DirectoryError,
            "directory offline",
        ))
    }
}

#[tokio::test]
async fn directory_failures_are_contained() {
    let descriptor = rule(json!({
        "randomUserFromUnit": 5,
        "optimalMemberFromUnit": 6
    }));

    let users = assigner(FailingDirectory)
        .calculate_users(&descriptor, &inputs(&[]), &resolution(), &meta())
        .await
        .unwrap();
    assert!(users.performer_users.is_empty());
}
