#![allow(clippy::result_large_err)]

use crate::core::entities::{Document, DocumentEvent};
use crate::core::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::schema::DirectoryFixture;

/// Unit roster: head user ids plus regular member user ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitRoster {
    #[serde(default)]
    pub heads: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl UnitRoster {
    /// Every user of the unit, heads first.
    pub fn users(&self) -> Vec<String> {
        let mut users = self.heads.clone();
        for member in &self.members {
            if !users.contains(member) {
                users.push(member.clone());
            }
        }
        users
    }
}

/// Read access to the organizational directory.
///
/// Unknown units resolve to empty rosters rather than errors; "no
/// candidates" is a normal outcome for unit-based user selection.
#[async_trait]
pub trait UnitDirectory: Send + Sync {
    /// Head user ids of a unit.
    async fn unit_heads(&self, unit_id: i64) -> Result<Vec<String>, AppError>;

    /// Member (non-head) user ids of a unit.
    async fn unit_members(&self, unit_id: i64) -> Result<Vec<String>, AppError>;

    /// Every user id in a unit.
    async fn unit_users(&self, unit_id: i64) -> Result<Vec<String>, AppError>;

    /// Number of unfinished tasks currently assigned to a user.
    async fn open_task_count(&self, user_id: &str) -> Result<usize, AppError>;
}

/// Documents and events of one workflow, fetched once per resolution.
#[derive(Debug, Clone, Default)]
pub struct WorkflowSnapshot {
    pub documents: Vec<Document>,
    pub events: Vec<DocumentEvent>,
}

/// Read access to workflow snapshots held by the persistence layer.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn workflow_snapshot(&self, workflow_id: &str) -> Result<WorkflowSnapshot, AppError>;
}

/// Directory backed by in-process maps, used by the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    units: HashMap<i64, UnitRoster>,
    open_tasks: HashMap<String, usize>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: &DirectoryFixture) -> Self {
        InMemoryDirectory {
            units: fixture.units.clone(),
            open_tasks: fixture.open_tasks.clone(),
        }
    }

    pub fn insert_unit(&mut self, unit_id: i64, roster: UnitRoster) {
        self.units.insert(unit_id, roster);
    }

    pub fn set_open_tasks(&mut self, user_id: impl Into<String>, count: usize) {
        self.open_tasks.insert(user_id.into(), count);
    }
}

#[async_trait]
impl UnitDirectory for InMemoryDirectory {
    async fn unit_heads(&self, unit_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self
            .units
            .get(&unit_id)
            .map(|roster| roster.heads.clone())
            .unwrap_or_default())
    }

    async fn unit_members(&self, unit_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self
            .units
            .get(&unit_id)
            .map(|roster| roster.members.clone())
            .unwrap_or_default())
    }

    async fn unit_users(&self, unit_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self
            .units
            .get(&unit_id)
            .map(UnitRoster::users)
            .unwrap_or_default())
    }

    async fn open_task_count(&self, user_id: &str) -> Result<usize, AppError> {
        Ok(self.open_tasks.get(user_id).copied().unwrap_or(0))
    }
}

/// Snapshot source backed by an in-process map.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshots {
    snapshots: HashMap<String, WorkflowSnapshot>,
}

impl InMemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(workflow_id: impl Into<String>, snapshot: WorkflowSnapshot) -> Self {
        let mut snapshots = Self::default();
        snapshots.insert(workflow_id, snapshot);
        snapshots
    }

    pub fn insert(&mut self, workflow_id: impl Into<String>, snapshot: WorkflowSnapshot) {
        self.snapshots.insert(workflow_id.into(), snapshot);
    }
}

#[async_trait]
impl SnapshotSource for InMemorySnapshots {
    async fn workflow_snapshot(&self, workflow_id: &str) -> Result<WorkflowSnapshot, AppError> {
        Ok(self
            .snapshots
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }
}
