use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::production::Production;
use crate::tenancy::{Scope, Scoped};
use crate::waste::WasteLog;

/// One receipt of one ingredient. `cost` is per unit and never changes;
/// `quantity` only ever goes down, and the batch is kept at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryBatch {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<InventoryBatch>,
    pub scope: Scope,
    pub item_name: String,
    pub category: String,
    pub quantity: f64,
    pub unit: String,
    pub cost: f64,
    pub expiry_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum UsageSource {
    Production(Id<Production>),
    Waste(Id<WasteLog>),
}

/// Audit trail of stock leaving the shelves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUsage {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<StockUsage>,
    pub scope: Scope,
    pub item_name: String,
    pub category: String,
    pub quantity_used: f64,
    pub quantity_before: f64,
    pub quantity_after: f64,
    pub source: UsageSource,
    pub recorded_at: DateTime<Utc>,
}

/// Total stock of one ingredient across its batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockSummary {
    pub item_name: String,
    pub category: String,
    pub unit: String,
    pub total_quantity: f64,
    pub batches: usize,
}

impl InventoryBatch {
    pub fn id(&self) -> Id<InventoryBatch> {
        self.meta.id
    }

    /// Consumption order: earliest expiry first, undated stock last, then by
    /// age.
    pub fn fifo_order(a: &InventoryBatch, b: &InventoryBatch) -> Ordering {
        let expiry = match (a.expiry_date, b.expiry_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        expiry
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.meta.id.cmp(&b.meta.id))
    }
}

impl StockUsage {
    pub fn id(&self) -> Id<StockUsage> {
        self.meta.id
    }
}

impl Entity for InventoryBatch {
    const PREFIX: &'static str = "inventory";
}

impl HasMeta for InventoryBatch {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Scoped for InventoryBatch {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl Entity for StockUsage {
    const PREFIX: &'static str = "stock_usage";
}

impl HasMeta for StockUsage {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Scoped for StockUsage {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}
