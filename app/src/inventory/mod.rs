use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use log::*;
use r2d2::{ManageConnection, Pool};
use serde_json::json;

use infra::documents::DocMeta;
use infra::ids::{Id, IdGen};
use infra::persistence::Storage;

use crate::error::{ensure, ServiceError};
use crate::services::{transact, Commandable, Queryable, Request};
use crate::tenancy::{load_in_scope, Scope};

pub mod fifo;
mod models;

pub use self::models::{InventoryBatch, StockSummary, StockUsage, UsageSource};

#[derive(Debug)]
pub struct Inventory<M: ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveStock {
    pub scope: Scope,
    pub item_name: String,
    pub category: String,
    pub quantity: f64,
    pub unit: String,
    pub cost: f64,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListInventory {
    pub scope: Scope,
    pub item_name: Option<String>,
    pub category: Option<String>,
    pub in_stock_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetInventoryItem {
    pub scope: Scope,
    pub id: Id<InventoryBatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockLevel {
    pub scope: Scope,
    pub item_name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LowStock {
    pub scope: Scope,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageHistory {
    pub scope: Scope,
    pub item_name: Option<String>,
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Inventory<M> {
    pub fn new(db: Pool<M>, idgen: IdGen) -> Self {
        Inventory { db, idgen }
    }
}

impl Request for ReceiveStock {
    type Resp = InventoryBatch;
}

impl ReceiveStock {
    fn validate(&self) -> Result<(), ServiceError> {
        ensure(!self.item_name.trim().is_empty(), "item name is required")?;
        ensure(!self.category.trim().is_empty(), "category is required")?;
        ensure(
            self.quantity.is_finite() && self.quantity >= 0.0,
            "quantity must not be negative",
        )?;
        ensure(
            self.cost.is_finite() && self.cost >= 0.0,
            "cost must not be negative",
        )?;
        Ok(())
    }
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<ReceiveStock>
    for Inventory<M>
{
    fn execute(&self, req: ReceiveStock) -> Result<InventoryBatch> {
        req.validate()?;
        let ReceiveStock {
            scope,
            item_name,
            category,
            quantity,
            unit,
            cost,
            expiry_date,
        } = req;
        let mut batch = InventoryBatch {
            meta: DocMeta::new_with_id(self.idgen.generate()),
            scope,
            item_name,
            category,
            quantity,
            unit,
            cost,
            expiry_date,
            created_at: Utc::now(),
        };
        transact(&self.db, |session| session.save(&mut batch))?;
        info!(
            "Received {} {} of {} as {}",
            batch.quantity,
            batch.unit,
            batch.item_name,
            batch.id()
        );
        Ok(batch)
    }
}

impl Request for ListInventory {
    type Resp = Vec<InventoryBatch>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListInventory>
    for Inventory<M>
{
    fn query(&self, req: ListInventory) -> Result<Vec<InventoryBatch>> {
        let mut filter = req.scope.filter();
        if let Some(name) = req.item_name.as_ref() {
            filter["item_name"] = json!(name);
        }
        if let Some(category) = req.category.as_ref() {
            filter["category"] = json!(category);
        }
        let mut batches = transact(&self.db, |session| session.scan::<InventoryBatch>(&filter))?;
        if req.in_stock_only {
            batches.retain(|b| b.quantity > 0.0);
        }
        batches.sort_by(InventoryBatch::fifo_order);
        Ok(batches)
    }
}

impl Request for GetInventoryItem {
    type Resp = InventoryBatch;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<GetInventoryItem> for Inventory<M>
{
    fn query(&self, req: GetInventoryItem) -> Result<InventoryBatch> {
        transact(&self.db, |session| load_in_scope(session, &req.scope, &req.id))
    }
}

impl Request for StockLevel {
    type Resp = f64;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<StockLevel>
    for Inventory<M>
{
    fn query(&self, req: StockLevel) -> Result<f64> {
        transact(&self.db, |session| {
            fifo::available(session, &req.scope, &req.item_name, &req.category)
        })
    }
}

impl Request for LowStock {
    type Resp = Vec<StockSummary>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<LowStock>
    for Inventory<M>
{
    fn query(&self, req: LowStock) -> Result<Vec<StockSummary>> {
        ensure(
            req.threshold.is_finite() && req.threshold >= 0.0,
            "threshold must not be negative",
        )?;
        let batches = transact(&self.db, |session| {
            session.scan::<InventoryBatch>(&req.scope.filter())
        })?;

        let mut totals = BTreeMap::new();
        for batch in batches {
            let summary = totals
                .entry((batch.item_name.clone(), batch.category.clone()))
                .or_insert_with(|| StockSummary {
                    item_name: batch.item_name.clone(),
                    category: batch.category.clone(),
                    unit: batch.unit.clone(),
                    total_quantity: 0.0,
                    batches: 0,
                });
            summary.total_quantity += batch.quantity;
            summary.batches += 1;
        }

        Ok(totals
            .into_iter()
            .map(|(_, summary)| summary)
            .filter(|s| s.total_quantity < req.threshold)
            .collect())
    }
}

impl Request for UsageHistory {
    type Resp = Vec<StockUsage>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<UsageHistory>
    for Inventory<M>
{
    fn query(&self, req: UsageHistory) -> Result<Vec<StockUsage>> {
        let mut filter = req.scope.filter();
        if let Some(name) = req.item_name.as_ref() {
            filter["item_name"] = json!(name);
        }
        let mut usage = transact(&self.db, |session| session.scan::<StockUsage>(&filter))?;
        usage.sort_by(|a, b| {
            b.recorded_at
                .cmp(&a.recorded_at)
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(usage)
    }
}
