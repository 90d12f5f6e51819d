use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::inventory::InventoryBatch;
use crate::tenancy::{Scope, Scoped};

/// Stock written off from one batch. `cost` is the quantity at the batch's
/// unit cost when it was logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteLog {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<WasteLog>,
    pub scope: Scope,
    pub inventory_item_id: Id<InventoryBatch>,
    pub item_name: String,
    pub category: String,
    pub quantity: f64,
    pub unit: String,
    pub cost: f64,
    pub reason: String,
    pub notes: Option<String>,
    pub logged_by: String,
    pub waste_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReasonTotals {
    pub entries: usize,
    pub quantity: f64,
    pub cost: f64,
}

impl WasteLog {
    pub fn id(&self) -> Id<WasteLog> {
        self.meta.id
    }
}

impl Entity for WasteLog {
    const PREFIX: &'static str = "waste_log";
}

impl HasMeta for WasteLog {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Scoped for WasteLog {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}
