use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use log::*;
use r2d2::{ManageConnection, Pool};

use infra::documents::DocMeta;
use infra::ids::{Id, IdGen};
use infra::persistence::Storage;

use crate::error::{ensure, ServiceError};
use crate::inventory::fifo;
use crate::inventory::{InventoryBatch, StockUsage, UsageSource};
use crate::services::{transact, Commandable, Queryable, Request};
use crate::tenancy::{load_in_scope, Scope};

mod models;

pub use self::models::{ReasonTotals, WasteLog};

#[derive(Debug)]
pub struct WasteLogs<M: ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

/// Writes off part of one specific batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LogWaste {
    pub scope: Scope,
    pub inventory_item_id: Id<InventoryBatch>,
    pub quantity: f64,
    pub reason: String,
    pub notes: Option<String>,
    pub logged_by: String,
    /// Defaults to today (UTC).
    pub waste_date: Option<NaiveDate>,
}

/// Both bounds inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ListWaste {
    pub scope: Scope,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetWasteLog {
    pub scope: Scope,
    pub id: Id<WasteLog>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WasteSummary {
    pub scope: Scope,
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> WasteLogs<M> {
    pub fn new(db: Pool<M>, idgen: IdGen) -> Self {
        WasteLogs { db, idgen }
    }
}

impl LogWaste {
    fn validate(&self) -> Result<(), ServiceError> {
        ensure(
            self.quantity.is_finite() && self.quantity > 0.0,
            "waste quantity must be positive",
        )?;
        ensure(!self.reason.trim().is_empty(), "waste reason is required")?;
        ensure(!self.logged_by.trim().is_empty(), "logged_by is required")?;
        Ok(())
    }
}

impl Request for LogWaste {
    type Resp = WasteLog;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<LogWaste>
    for WasteLogs<M>
{
    fn execute(&self, req: LogWaste) -> Result<WasteLog> {
        req.validate()?;
        let now = Utc::now();
        let log = transact(&self.db, |session| {
            let mut batch: InventoryBatch =
                load_in_scope(session, &req.scope, &req.inventory_item_id)?;
            if !fifo::covers(batch.quantity, req.quantity) {
                return Err(ServiceError::InsufficientInventory {
                    item: batch.item_name.clone(),
                    shortfall: req.quantity - batch.quantity,
                }
                .into());
            }

            let before = batch.quantity;
            batch.quantity = (batch.quantity - req.quantity).max(0.0);
            session.save(&mut batch)?;

            let mut log = WasteLog {
                meta: DocMeta::new_with_id(self.idgen.generate()),
                scope: req.scope,
                inventory_item_id: batch.id(),
                item_name: batch.item_name.clone(),
                category: batch.category.clone(),
                quantity: req.quantity,
                unit: batch.unit.clone(),
                cost: req.quantity * batch.cost,
                reason: req.reason.clone(),
                notes: req.notes.clone(),
                logged_by: req.logged_by.clone(),
                waste_date: req.waste_date.unwrap_or_else(|| now.date_naive()),
                created_at: now,
            };
            session.save(&mut log)?;

            let mut usage = StockUsage {
                meta: DocMeta::new_with_id(self.idgen.generate()),
                scope: req.scope,
                item_name: batch.item_name.clone(),
                category: batch.category.clone(),
                quantity_used: req.quantity,
                quantity_before: before,
                quantity_after: batch.quantity,
                source: UsageSource::Waste(log.id()),
                recorded_at: now,
            };
            session.save(&mut usage)?;
            Ok(log)
        })?;

        info!(
            "Wasted {} {} of {} ({}): {}",
            log.quantity,
            log.unit,
            log.item_name,
            log.reason,
            log.id()
        );
        Ok(log)
    }
}

impl Request for ListWaste {
    type Resp = Vec<WasteLog>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListWaste>
    for WasteLogs<M>
{
    fn query(&self, req: ListWaste) -> Result<Vec<WasteLog>> {
        if let (Some(from), Some(to)) = (req.from, req.to) {
            ensure(from <= to, "date range is reversed")?;
        }
        let mut logs = transact(&self.db, |session| {
            session.scan::<WasteLog>(&req.scope.filter())
        })?;
        logs.retain(|l| {
            req.from.map_or(true, |from| l.waste_date >= from)
                && req.to.map_or(true, |to| l.waste_date <= to)
        });
        logs.sort_by(|a, b| {
            b.waste_date
                .cmp(&a.waste_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(logs)
    }
}

impl Request for GetWasteLog {
    type Resp = WasteLog;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<GetWasteLog>
    for WasteLogs<M>
{
    fn query(&self, req: GetWasteLog) -> Result<WasteLog> {
        transact(&self.db, |session| load_in_scope(session, &req.scope, &req.id))
    }
}

impl Request for WasteSummary {
    type Resp = BTreeMap<String, ReasonTotals>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<WasteSummary>
    for WasteLogs<M>
{
    fn query(&self, req: WasteSummary) -> Result<BTreeMap<String, ReasonTotals>> {
        let logs = transact(&self.db, |session| {
            session.scan::<WasteLog>(&req.scope.filter())
        })?;
        let mut totals = BTreeMap::<String, ReasonTotals>::new();
        for log in logs {
            let entry = totals.entry(log.reason).or_default();
            entry.entries += 1;
            entry.quantity += log.quantity;
            entry.cost += log.cost;
        }
        Ok(totals)
    }
}
