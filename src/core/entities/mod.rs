use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A workflow document visible to the task being resolved.
///
/// The `data` payload is schemaless: templates address fields inside it
/// from their expressions, so the engine never interprets it beyond
/// handing it to the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), data }
    }
}

/// A document lifecycle event (signature applied, field changed, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEvent {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// The acting user, as handed to user-scoped expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            ipn: None,
            email: None,
        }
    }
}

/// Unit ids the acting user belongs to, split by role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitMembership {
    #[serde(default)]
    pub all: Vec<i64>,
    #[serde(default)]
    pub head: Vec<i64>,
    #[serde(default)]
    pub member: Vec<i64>,
}

/// Minimal view of the owning workflow used by reassignment calculators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRef {
    pub id: String,
    #[serde(default)]
    pub created_by: String,
}

/// Audit record appended to a task when a reassignment trigger fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
    pub trigger_source: String,
    #[serde(default)]
    pub previous_performer_units: Vec<i64>,
    #[serde(default)]
    pub new_performer_units: Vec<i64>,
    #[serde(default)]
    pub previous_performer_users: Vec<String>,
    #[serde(default)]
    pub new_performer_users: Vec<String>,
}

impl ActivityEntry {
    pub fn reassignment(trigger_source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: "reassignment".to_string(),
            occurred_at: Utc::now(),
            trigger_source: trigger_source.into(),
            previous_performer_units: Vec::new(),
            new_performer_units: Vec::new(),
            previous_performer_users: Vec::new(),
            new_performer_users: Vec::new(),
        }
    }
}
