use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::error::Shortage;
use crate::inventory::fifo;
use crate::inventory::InventoryBatch;
use crate::recipes::Recipe;
use crate::tenancy::{Scope, Scoped};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductionStatus {
    Planned,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Production {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<Production>,
    pub scope: Scope,
    pub recipe_id: Id<Recipe>,
    pub planned_quantity: f64,
    pub quantity_produced: f64,
    pub batch_number: String,
    pub total_cost: f64,
    pub unit_cost: f64,
    pub status: ProductionStatus,
    pub ingredient_usage: Vec<ProductionIngredient>,
    pub notes: Option<String>,
    pub produced_at: DateTime<Utc>,
}

/// What one ingredient contributed to a run, and which batches it came
/// from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionIngredient {
    pub ingredient_name: String,
    pub category: String,
    pub quantity_used: f64,
    pub cost_used: f64,
    pub inventory_item_ids: Vec<Id<InventoryBatch>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Requirement {
    pub ingredient_name: String,
    pub category: String,
    pub unit: String,
    pub required: f64,
    pub available: f64,
}

/// Outcome of checking a recipe against stock on hand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub can_produce: bool,
    pub multiplier: f64,
    pub requirements: Vec<Requirement>,
    pub missing: Vec<Shortage>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProductionSummary {
    pub runs: usize,
    pub total_quantity: f64,
    pub total_cost: f64,
    pub average_unit_cost: f64,
}

impl Production {
    pub fn id(&self) -> Id<Production> {
        self.meta.id
    }
}

impl Requirement {
    pub fn shortage(&self) -> Option<Shortage> {
        if fifo::covers(self.available, self.required) {
            return None;
        }
        Some(Shortage {
            ingredient_name: self.ingredient_name.clone(),
            category: self.category.clone(),
            unit: self.unit.clone(),
            required: self.required,
            available: self.available,
            shortage: self.required - self.available,
        })
    }
}

impl Entity for Production {
    const PREFIX: &'static str = "production";
}

impl HasMeta for Production {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Scoped for Production {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}
