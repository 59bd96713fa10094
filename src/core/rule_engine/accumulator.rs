use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Final permission set persisted onto the task.
///
/// Every field is always present, so callers can store the value
/// directly without null checks. Lists keep first-contribution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolvedPermissions {
    pub performer_units: Vec<i64>,
    pub required_performer_units: Vec<i64>,
    pub performer_users: Vec<String>,
    pub performer_users_ipn: Vec<String>,
    pub performer_users_email: Vec<String>,
    pub performer_user_names: Vec<String>,
    pub signer_users: Vec<String>,
    pub only_for_heads: bool,
}

/// Merge target folded over a template's rule descriptors.
///
/// All collections are sets: a later descriptor can add entries but
/// never duplicate or remove what an earlier one contributed. Falsy
/// entries (unit id `0`, empty strings) are dropped on insert.
#[derive(Debug, Default)]
pub struct PermissionAccumulator {
    performer_units: IndexSet<i64>,
    required_performer_units: IndexSet<i64>,
    performer_users: IndexSet<String>,
    performer_users_ipn: IndexSet<String>,
    performer_users_email: IndexSet<String>,
    performer_user_names: IndexSet<String>,
    signer_users: IndexSet<String>,
    only_for_heads: bool,
}

impl PermissionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_performer_units(&mut self, ids: impl IntoIterator<Item = i64>) {
        insert_unit_ids(&mut self.performer_units, ids);
    }

    pub fn extend_required_performer_units(&mut self, ids: impl IntoIterator<Item = i64>) {
        insert_unit_ids(&mut self.required_performer_units, ids);
    }

    pub fn extend_performer_users(&mut self, ids: impl IntoIterator<Item = String>) {
        insert_strings(&mut self.performer_users, ids);
    }

    pub fn extend_performer_users_ipn(&mut self, ipns: impl IntoIterator<Item = String>) {
        insert_strings(&mut self.performer_users_ipn, ipns);
    }

    pub fn extend_performer_users_email(&mut self, emails: impl IntoIterator<Item = String>) {
        insert_strings(&mut self.performer_users_email, emails);
    }

    pub fn extend_performer_user_names(&mut self, names: impl IntoIterator<Item = String>) {
        insert_strings(&mut self.performer_user_names, names);
    }

    pub fn extend_signer_users(&mut self, ids: impl IntoIterator<Item = String>) {
        insert_strings(&mut self.signer_users, ids);
    }

    /// Only-for-heads is an OR over every contributing descriptor.
    pub fn or_only_for_heads(&mut self, flag: bool) {
        self.only_for_heads |= flag;
    }

    pub fn into_resolved(self) -> ResolvedPermissions {
        ResolvedPermissions {
            performer_units: self.performer_units.into_iter().collect(),
            required_performer_units: self.required_performer_units.into_iter().collect(),
            performer_users: self.performer_users.into_iter().collect(),
            performer_users_ipn: self.performer_users_ipn.into_iter().collect(),
            performer_users_email: self.performer_users_email.into_iter().collect(),
            performer_user_names: self.performer_user_names.into_iter().collect(),
            signer_users: self.signer_users.into_iter().collect(),
            only_for_heads: self.only_for_heads,
        }
    }
}

fn insert_unit_ids(set: &mut IndexSet<i64>, ids: impl IntoIterator<Item = i64>) {
    for id in ids {
        if id != 0 {
            set.insert(id);
        }
    }
}

fn insert_strings(set: &mut IndexSet<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !item.is_empty() {
            set.insert(item);
        }
    }
}
