//! Sign-off for edits to stock and waste records.
//!
//! Changes to inventory batches and waste logs are submitted as approval
//! requests and only happen once a reviewer approves them. Approving runs
//! the change in the same transaction that marks the request approved, so
//! a change that can no longer be made leaves the request pending.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use log::*;
use r2d2::{ManageConnection, Pool};
use serde_json::json;

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Id, IdGen};
use infra::persistence::{ConcurrencyError, Session, Storage};

use crate::error::{ensure, ServiceError};
use crate::inventory::InventoryBatch;
use crate::services::{transact, Commandable, Page, Queryable, Request};
use crate::tenancy::{load_in_scope, load_in_tenant, tenant_filter, Branch, Scope, Tenant};
use crate::waste::WasteLog;

mod models;
pub mod patch;

pub use self::models::{
    ActionType, ApprovalAction, ApprovalRequest, Decision, OriginalData, ReviewStatus,
    StatusCounts,
};
pub use self::patch::{parse_flexible_date, InventoryPatch, WastePatch};

#[derive(Debug)]
pub struct Approvals<M: ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submit {
    pub scope: Scope,
    pub action: ApprovalAction,
    pub reason: String,
    pub submitted_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub tenant: Id<Tenant>,
    pub id: Id<ApprovalRequest>,
    pub decision: Decision,
    pub comment: Option<String>,
    pub reviewed_by: String,
}

/// Newest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListApprovals {
    pub tenant: Id<Tenant>,
    pub branch: Option<Id<Branch>>,
    pub status: Option<ReviewStatus>,
    pub action_type: Option<ActionType>,
    pub submitted_by: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetApproval {
    pub tenant: Id<Tenant>,
    pub id: Id<ApprovalRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCount {
    pub tenant: Id<Tenant>,
    pub branch: Option<Id<Branch>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalStats {
    pub tenant: Id<Tenant>,
    pub branch: Option<Id<Branch>>,
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Approvals<M> {
    pub fn new(db: Pool<M>, idgen: IdGen) -> Self {
        Approvals { db, idgen }
    }

    /// A review that collided with another one reports `AlreadyReviewed`
    /// once the other has settled the request.
    fn settle_collision(&self, req: &Review, err: anyhow::Error) -> anyhow::Error {
        let current = transact(&self.db, |session| {
            load_in_tenant::<ApprovalRequest>(session, req.tenant, &req.id)
        });
        match current {
            Ok(current) if !current.is_pending() => {
                warn!(
                    "Review of {} by {} lost to {:?}: {}",
                    current.id(),
                    req.reviewed_by,
                    current.reviewed_by,
                    err
                );
                ServiceError::AlreadyReviewed(current.id().to_string()).into()
            }
            _ => err,
        }
    }
}

impl ApprovalAction {
    fn validate(&self) -> Result<(), ServiceError> {
        match self {
            ApprovalAction::UpdateInventory { patch, .. } => patch.validate(),
            ApprovalAction::UpdateWasteLog { patch, .. } => patch.validate(),
            ApprovalAction::DeleteInventory { .. } | ApprovalAction::DeleteWasteLog { .. } => {
                Ok(())
            }
        }
    }

    /// Loads the target and checks the change against it without saving.
    fn snapshot(&self, session: &Session<'_>, scope: &Scope) -> Result<OriginalData> {
        let original = match self {
            ApprovalAction::UpdateInventory { item, patch } => {
                let batch: InventoryBatch = load_in_scope(session, scope, item)?;
                patch.apply_to(&mut batch.clone())?;
                OriginalData::Inventory(batch)
            }
            ApprovalAction::DeleteInventory { item } => {
                OriginalData::Inventory(load_in_scope(session, scope, item)?)
            }
            ApprovalAction::UpdateWasteLog { log, patch } => {
                let waste: WasteLog = load_in_scope(session, scope, log)?;
                patch.apply_to(&mut waste.clone())?;
                OriginalData::WasteLog(waste)
            }
            ApprovalAction::DeleteWasteLog { log } => {
                OriginalData::WasteLog(load_in_scope(session, scope, log)?)
            }
        };
        Ok(original)
    }
}

fn note_drift<D: HasMeta>(request: &ApprovalRequest, current: &D) {
    if &current.meta().version != request.original_data.version() {
        warn!(
            "Applying {} to an entity changed since submission ({} -> {})",
            request.id(),
            request.original_data.version(),
            current.meta().version
        );
    }
}

/// Carries out an approved request's change against the live entity.
fn apply(session: &Session<'_>, request: &ApprovalRequest) -> Result<()> {
    let scope = &request.scope;
    match &request.action {
        ApprovalAction::UpdateInventory { item, patch } => {
            let mut batch: InventoryBatch = load_in_scope(session, scope, item)?;
            note_drift(request, &batch);
            patch.apply_to(&mut batch)?;
            session.save(&mut batch)?;
        }
        ApprovalAction::DeleteInventory { item } => {
            let batch: InventoryBatch = load_in_scope(session, scope, item)?;
            note_drift(request, &batch);
            session.delete(&batch)?;
        }
        ApprovalAction::UpdateWasteLog { log, patch } => {
            let mut waste: WasteLog = load_in_scope(session, scope, log)?;
            note_drift(request, &waste);
            patch.apply_to(&mut waste)?;
            session.save(&mut waste)?;
        }
        ApprovalAction::DeleteWasteLog { log } => {
            let waste: WasteLog = load_in_scope(session, scope, log)?;
            note_drift(request, &waste);
            session.delete(&waste)?;
        }
    }
    debug!("Applied {:?} for {}", request.action_type, request.id());
    Ok(())
}

impl Request for Submit {
    type Resp = ApprovalRequest;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<Submit>
    for Approvals<M>
{
    fn execute(&self, req: Submit) -> Result<ApprovalRequest> {
        req.action.validate()?;
        ensure(
            !req.submitted_by.trim().is_empty(),
            "submitted_by is required",
        )?;

        let request = transact(&self.db, |session| {
            let original_data = req.action.snapshot(session, &req.scope)?;
            let mut request = ApprovalRequest {
                meta: DocMeta::new_with_id(self.idgen.generate()),
                scope: req.scope,
                action_type: req.action.action_type(),
                action: req.action.clone(),
                original_data,
                reason: req.reason.clone(),
                submitted_by: req.submitted_by.clone(),
                submitted_at: Utc::now(),
                review_status: ReviewStatus::Pending,
                reviewed_by: None,
                review_comment: None,
                reviewed_at: None,
            };
            session.save(&mut request)?;
            Ok(request)
        })?;

        info!(
            "{} submitted {:?} as {}",
            request.submitted_by,
            request.action_type,
            request.id()
        );
        Ok(request)
    }
}

impl Request for Review {
    type Resp = ApprovalRequest;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<Review>
    for Approvals<M>
{
    fn execute(&self, req: Review) -> Result<ApprovalRequest> {
        ensure(
            !req.reviewed_by.trim().is_empty(),
            "reviewed_by is required",
        )?;

        let reviewed = transact(&self.db, |session| {
            let mut request: ApprovalRequest = load_in_tenant(session, req.tenant, &req.id)?;
            if !request.is_pending() {
                return Err(ServiceError::AlreadyReviewed(request.id().to_string()).into());
            }

            request.review_status = match req.decision {
                Decision::Approve => {
                    apply(session, &request)?;
                    ReviewStatus::Approved
                }
                Decision::Reject => ReviewStatus::Rejected,
            };
            request.reviewed_by = Some(req.reviewed_by.clone());
            request.review_comment = req.comment.clone();
            request.reviewed_at = Some(Utc::now());
            session.save(&mut request)?;
            Ok(request)
        });
        let request = match reviewed {
            Ok(request) => request,
            Err(err) if err.downcast_ref::<ConcurrencyError>().is_some() => {
                return Err(self.settle_collision(&req, err))
            }
            Err(err) => return Err(err),
        };

        info!(
            "{} {:?} {}",
            req.reviewed_by,
            request.review_status,
            request.id()
        );
        Ok(request)
    }
}

impl Request for ListApprovals {
    type Resp = Page<ApprovalRequest>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListApprovals>
    for Approvals<M>
{
    fn query(&self, req: ListApprovals) -> Result<Page<ApprovalRequest>> {
        let mut filter = tenant_filter(req.tenant, req.branch);
        if let Some(status) = req.status {
            filter["review_status"] = json!(status);
        }
        if let Some(action_type) = req.action_type {
            filter["action_type"] = json!(action_type);
        }
        if let Some(submitted_by) = req.submitted_by.as_ref() {
            filter["submitted_by"] = json!(submitted_by);
        }

        let mut requests =
            transact(&self.db, |session| session.scan::<ApprovalRequest>(&filter))?;
        requests.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(Page::of(requests, req.offset, req.limit))
    }
}

impl Request for GetApproval {
    type Resp = ApprovalRequest;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<GetApproval>
    for Approvals<M>
{
    fn query(&self, req: GetApproval) -> Result<ApprovalRequest> {
        transact(&self.db, |session| load_in_tenant(session, req.tenant, &req.id))
    }
}

impl Request for PendingCount {
    type Resp = usize;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<PendingCount>
    for Approvals<M>
{
    fn query(&self, req: PendingCount) -> Result<usize> {
        let mut filter = tenant_filter(req.tenant, req.branch);
        filter["review_status"] = json!(ReviewStatus::Pending);
        let pending = transact(&self.db, |session| session.scan::<ApprovalRequest>(&filter))?;
        Ok(pending.len())
    }
}

impl Request for ApprovalStats {
    type Resp = BTreeMap<ActionType, StatusCounts>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ApprovalStats>
    for Approvals<M>
{
    fn query(&self, req: ApprovalStats) -> Result<BTreeMap<ActionType, StatusCounts>> {
        let filter = tenant_filter(req.tenant, req.branch);
        let requests = transact(&self.db, |session| session.scan::<ApprovalRequest>(&filter))?;
        let mut stats = BTreeMap::<ActionType, StatusCounts>::new();
        for request in requests {
            stats
                .entry(request.action_type)
                .or_default()
                .count(request.review_status);
        }
        Ok(stats)
    }
}
