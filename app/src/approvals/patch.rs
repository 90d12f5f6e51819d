//! Field-level edits carried by approval requests.
//!
//! Each patch is checked once when submitted and again, against the entity
//! as it is then, when applied.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ensure, ServiceError};
use crate::inventory::InventoryBatch;
use crate::waste::WasteLog;

/// Changes to an inventory batch. A batch's unit cost is fixed at receipt
/// and cannot be patched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "flexible_date"
    )]
    pub expiry_date: Option<NaiveDate>,
}

/// Changes to a waste log. The batch is not restocked or charged again;
/// the logged cost follows the quantity at the original unit cost.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WastePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "flexible_date"
    )]
    pub waste_date: Option<NaiveDate>,
}

/// Accepts `2024-01-31`, an RFC 3339 timestamp, or a naive
/// `2024-01-31T10:00:00`; timestamps keep only their UTC calendar date.
pub fn parse_flexible_date(input: &str) -> Result<NaiveDate, ServiceError> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(input) {
        return Ok(stamp.naive_utc().date());
    }
    if let Ok(stamp) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(stamp.date());
    }
    Err(ServiceError::invalid(format!("unrecognised date: {:?}", input)))
}

fn flexible_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_flexible_date(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn non_blank(value: &Option<String>, what: &str) -> Result<(), ServiceError> {
    match value {
        Some(s) => ensure(!s.trim().is_empty(), &format!("{} must not be blank", what)),
        None => Ok(()),
    }
}

impl InventoryPatch {
    pub fn is_empty(&self) -> bool {
        self == &InventoryPatch::default()
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        ensure(!self.is_empty(), "inventory patch changes nothing")?;
        non_blank(&self.item_name, "item name")?;
        non_blank(&self.category, "category")?;
        non_blank(&self.unit, "unit")?;
        if let Some(quantity) = self.quantity {
            ensure(
                quantity.is_finite() && quantity >= 0.0,
                "quantity must not be negative",
            )?;
        }
        Ok(())
    }

    pub fn apply_to(&self, batch: &mut InventoryBatch) -> Result<(), ServiceError> {
        self.validate()?;
        if let Some(item_name) = self.item_name.as_ref() {
            batch.item_name = item_name.clone();
        }
        if let Some(category) = self.category.as_ref() {
            batch.category = category.clone();
        }
        if let Some(quantity) = self.quantity {
            batch.quantity = quantity;
        }
        if let Some(unit) = self.unit.as_ref() {
            batch.unit = unit.clone();
        }
        if let Some(expiry_date) = self.expiry_date {
            batch.expiry_date = Some(expiry_date);
        }
        Ok(())
    }
}

impl WastePatch {
    pub fn is_empty(&self) -> bool {
        self == &WastePatch::default()
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        ensure(!self.is_empty(), "waste patch changes nothing")?;
        non_blank(&self.reason, "reason")?;
        if let Some(quantity) = self.quantity {
            ensure(
                quantity.is_finite() && quantity > 0.0,
                "waste quantity must be positive",
            )?;
        }
        Ok(())
    }

    pub fn apply_to(&self, log: &mut WasteLog) -> Result<(), ServiceError> {
        self.validate()?;
        if let Some(quantity) = self.quantity {
            let unit_cost = if log.quantity > 0.0 {
                log.cost / log.quantity
            } else {
                0.0
            };
            log.quantity = quantity;
            log.cost = quantity * unit_cost;
        }
        if let Some(reason) = self.reason.as_ref() {
            log.reason = reason.clone();
        }
        if let Some(notes) = self.notes.as_ref() {
            log.notes = Some(notes.clone());
        }
        if let Some(waste_date) = self.waste_date {
            log.waste_date = waste_date;
        }
        Ok(())
    }
}
