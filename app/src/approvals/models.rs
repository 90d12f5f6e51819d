use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta, Version};
use infra::ids::{Entity, Id};

use super::patch::{InventoryPatch, WastePatch};
use crate::inventory::InventoryBatch;
use crate::tenancy::{Scope, Scoped};
use crate::waste::WasteLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    UpdateInventory,
    DeleteInventory,
    UpdateWasteLog,
    DeleteWasteLog,
}

/// A mutation held back until someone signs it off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    UpdateInventory {
        item: Id<InventoryBatch>,
        patch: InventoryPatch,
    },
    DeleteInventory {
        item: Id<InventoryBatch>,
    },
    UpdateWasteLog {
        log: Id<WasteLog>,
        patch: WastePatch,
    },
    DeleteWasteLog {
        log: Id<WasteLog>,
    },
}

/// The target as it stood when the request was submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum OriginalData {
    Inventory(InventoryBatch),
    WasteLog(WasteLog),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<ApprovalRequest>,
    pub scope: Scope,
    /// Copied out of `action` so that requests can be filtered by it.
    pub action_type: ActionType,
    pub action: ApprovalAction,
    pub original_data: OriginalData,
    pub reason: String,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub review_status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub review_comment: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl ApprovalAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            ApprovalAction::UpdateInventory { .. } => ActionType::UpdateInventory,
            ApprovalAction::DeleteInventory { .. } => ActionType::DeleteInventory,
            ApprovalAction::UpdateWasteLog { .. } => ActionType::UpdateWasteLog,
            ApprovalAction::DeleteWasteLog { .. } => ActionType::DeleteWasteLog,
        }
    }
}

impl OriginalData {
    pub fn version(&self) -> &Version {
        match self {
            OriginalData::Inventory(batch) => &batch.meta().version,
            OriginalData::WasteLog(log) => &log.meta().version,
        }
    }
}

impl ApprovalRequest {
    pub fn id(&self) -> Id<ApprovalRequest> {
        self.meta.id
    }

    pub fn is_pending(&self) -> bool {
        self.review_status == ReviewStatus::Pending
    }
}

impl StatusCounts {
    pub(crate) fn count(&mut self, status: ReviewStatus) {
        match status {
            ReviewStatus::Pending => self.pending += 1,
            ReviewStatus::Approved => self.approved += 1,
            ReviewStatus::Rejected => self.rejected += 1,
        }
    }
}

impl Entity for ApprovalRequest {
    const PREFIX: &'static str = "approval";
}

impl HasMeta for ApprovalRequest {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Scoped for ApprovalRequest {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}
