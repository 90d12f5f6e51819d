//! First-expiring-first-out consumption of inventory batches.
//!
//! Everything here works inside the caller's [`Session`], so a deduction is
//! only ever visible together with whatever the caller records about it.

use anyhow::Result;
use log::*;
use serde::Serialize;
use serde_json::json;

use infra::ids::Id;
use infra::persistence::Session;

use super::models::InventoryBatch;
use crate::error::ServiceError;
use crate::tenancy::Scope;

/// Relative precision of stock quantities.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// How far apart two quantities near `quantity` may be and still count as
/// equal.
pub fn tolerance(quantity: f64) -> f64 {
    QUANTITY_EPSILON * quantity.abs().max(1.0)
}

/// Whether `available` satisfies `required`, within [`tolerance`].
pub fn covers(available: f64, required: f64) -> bool {
    available + tolerance(required) >= required
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchUse {
    pub batch_id: Id<InventoryBatch>,
    pub quantity_used: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Allocation {
    pub used_batches: Vec<BatchUse>,
    pub total_cost: f64,
}

impl Allocation {
    pub fn quantity(&self) -> f64 {
        self.used_batches.iter().map(|u| u.quantity_used).sum()
    }

    pub fn batch_ids(&self) -> Vec<Id<InventoryBatch>> {
        self.used_batches.iter().map(|u| u.batch_id).collect()
    }
}

/// Every batch of the ingredient in `scope`, empty ones included.
pub fn matching_batches(
    session: &Session<'_>,
    scope: &Scope,
    item_name: &str,
    category: &str,
) -> Result<Vec<InventoryBatch>> {
    session.scan(&json!({
        "scope": scope,
        "item_name": item_name,
        "category": category,
    }))
}

/// Total on hand, summed in allocation order so that [`allocate`] agrees
/// with it about what [`covers`] a requirement.
pub fn available(
    session: &Session<'_>,
    scope: &Scope,
    item_name: &str,
    category: &str,
) -> Result<f64> {
    let mut batches = matching_batches(session, scope, item_name, category)?;
    batches.sort_by(InventoryBatch::fifo_order);
    Ok(batches.iter().map(|b| b.quantity).sum())
}

/// Deducts `quantity_needed` from the ingredient's batches, earliest expiry
/// first, saving each touched batch.
///
/// Fails with `InsufficientInventory` when the batches run dry; the batches
/// already touched are only rolled back if the caller's transaction is, so
/// callers check [`available`] first.
pub fn allocate(
    session: &Session<'_>,
    scope: &Scope,
    item_name: &str,
    category: &str,
    quantity_needed: f64,
) -> Result<Allocation> {
    if !(quantity_needed > 0.0) {
        return Err(ServiceError::invalid(format!(
            "allocation of {} must be positive, got {}",
            item_name, quantity_needed
        ))
        .into());
    }

    let mut batches = matching_batches(session, scope, item_name, category)?
        .into_iter()
        .filter(|b| b.quantity > 0.0)
        .collect::<Vec<_>>();
    batches.sort_by(InventoryBatch::fifo_order);

    let slack = tolerance(quantity_needed);
    let mut allocation = Allocation::default();
    let mut remaining = quantity_needed;
    let mut taken = 0.0;
    for mut batch in batches {
        if remaining <= slack {
            break;
        }
        // A batch within tolerance of what is left is emptied outright.
        let used = if batch.quantity <= remaining + slack {
            batch.quantity
        } else {
            remaining
        };
        batch.quantity -= used;
        session.save(&mut batch)?;
        remaining -= used;
        taken += used;

        let cost = batch.cost * used;
        debug!(
            "Took {} {} of {} from {} at {}",
            used,
            batch.unit,
            item_name,
            batch.id(),
            batch.cost
        );
        allocation.used_batches.push(BatchUse {
            batch_id: batch.id(),
            quantity_used: used,
            cost,
        });
        allocation.total_cost += cost;
    }

    if remaining > slack && !covers(taken, quantity_needed) {
        warn!("Short of {} by {}", item_name, quantity_needed - taken);
        return Err(ServiceError::InsufficientInventory {
            item: item_name.to_string(),
            shortfall: quantity_needed - taken,
        }
        .into());
    }

    Ok(allocation)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::junk_drawer::{self, Fixture};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn consumes_earliest_expiry_first() -> Result<()> {
        let fx = Fixture::new();
        // Inserted out of expiry order on purpose.
        let b3 = fx.receive("Flour", "Dry", 5.0, 1.0, date(2024, 3, 1))?;
        let b1 = fx.receive("Flour", "Dry", 2.0, 3.0, date(2024, 1, 1))?;
        let b2 = fx.receive("Flour", "Dry", 4.0, 2.0, date(2024, 2, 1))?;

        let allocation = fx.transact(|s| allocate(s, &fx.scope, "Flour", "Dry", 3.0))?;

        assert_eq!(allocation.batch_ids(), vec![b1.id(), b2.id()]);
        assert_eq!(allocation.used_batches[0].quantity_used, 2.0);
        assert_eq!(allocation.used_batches[1].quantity_used, 1.0);
        assert_eq!(allocation.total_cost, 2.0 * 3.0 + 1.0 * 2.0);

        assert_eq!(fx.batch(b1.id())?.quantity, 0.0);
        assert_eq!(fx.batch(b2.id())?.quantity, 3.0);
        assert_eq!(fx.batch(b3.id())?.quantity, 5.0);
        Ok(())
    }

    #[test]
    fn undated_batches_go_last() -> Result<()> {
        let fx = Fixture::new();
        let undated = fx.receive("Salt", "Dry", 10.0, 0.5, None)?;
        let dated = fx.receive("Salt", "Dry", 1.0, 0.7, date(2030, 1, 1))?;

        let allocation = fx.transact(|s| allocate(s, &fx.scope, "Salt", "Dry", 2.0))?;

        assert_eq!(allocation.batch_ids(), vec![dated.id(), undated.id()]);
        Ok(())
    }

    #[test]
    fn skips_empty_batches_and_other_categories() -> Result<()> {
        let fx = Fixture::new();
        let empty = fx.receive("Milk", "Dairy", 0.0, 1.0, date(2024, 1, 1))?;
        let other = fx.receive("Milk", "Plant", 5.0, 1.0, date(2024, 1, 2))?;
        let used = fx.receive("Milk", "Dairy", 5.0, 1.0, date(2024, 1, 3))?;

        let allocation = fx.transact(|s| allocate(s, &fx.scope, "Milk", "Dairy", 1.0))?;

        assert_eq!(allocation.batch_ids(), vec![used.id()]);
        assert_eq!(fx.batch(empty.id())?.quantity, 0.0);
        assert_eq!(fx.batch(other.id())?.quantity, 5.0);
        Ok(())
    }

    #[test]
    fn reports_shortfall_and_leaves_stock_alone() -> Result<()> {
        let fx = Fixture::new();
        let batch = fx.receive("Eggs", "Dairy", 6.0, 0.2, date(2024, 1, 1))?;

        let err = fx
            .transact(|s| allocate(s, &fx.scope, "Eggs", "Dairy", 10.0))
            .expect_err("should be short");

        assert_eq!(
            err.downcast_ref::<ServiceError>(),
            Some(&ServiceError::InsufficientInventory {
                item: "Eggs".into(),
                shortfall: 4.0
            })
        );
        assert_eq!(fx.batch(batch.id())?.quantity, 6.0);
        Ok(())
    }

    #[test]
    fn ignores_other_branches() -> Result<()> {
        let fx = Fixture::new();
        let elsewhere = fx.other_branch();
        fx.receive_in(&elsewhere, "Rice", "Dry", 10.0, 1.0, None)?;

        let available = fx.transact(|s| available(s, &fx.scope, "Rice", "Dry"))?;
        let err = fx
            .transact(|s| allocate(s, &fx.scope, "Rice", "Dry", 1.0))
            .expect_err("nothing in this branch");

        assert_eq!(available, 0.0);
        assert!(
            junk_drawer::is_service_error(&err, |e| matches!(
                e,
                ServiceError::InsufficientInventory { .. }
            )),
            "{:?}",
            err
        );
        Ok(())
    }

    #[test]
    fn whatever_availability_covers_can_be_allocated() -> Result<()> {
        let fx = Fixture::new();
        // Gram-scale batches, received latest expiry first.
        let quantities = [2487250.1, 8940347.3, 7879572.2];
        let mut batches = Vec::new();
        for (i, &quantity) in quantities.iter().enumerate() {
            let expiry = date(2024, 3, 3 - i as u32);
            batches.push(fx.receive("Flour", "Dry", quantity, 0.001, expiry)?);
        }
        let needed = quantities.iter().sum::<f64>();

        let on_hand = fx.transact(|s| available(s, &fx.scope, "Flour", "Dry"))?;
        assert!(covers(on_hand, needed), "{} for {}", on_hand, needed);
        let allocation = fx.transact(|s| allocate(s, &fx.scope, "Flour", "Dry", needed))?;

        assert_eq!(
            allocation.batch_ids(),
            batches.iter().rev().map(|b| b.id()).collect::<Vec<_>>()
        );
        for batch in batches {
            assert_eq!(fx.batch(batch.id())?.quantity, 0.0);
        }
        Ok(())
    }

    #[test]
    fn tolerance_grows_with_quantity() {
        assert_eq!(tolerance(0.5), QUANTITY_EPSILON);
        assert_eq!(tolerance(-2.0), 2.0 * QUANTITY_EPSILON);
        assert!(covers(1e7 - 1e-3, 1e7));
        assert!(!covers(1e7 - 1.0, 1e7));
        assert!(!covers(0.0, 1e-6));
    }

    #[test]
    fn rejects_non_positive_requests() {
        let fx = Fixture::new();
        let err = fx
            .transact(|s| allocate(s, &fx.scope, "Rice", "Dry", 0.0))
            .expect_err("zero allocation");
        assert!(
            junk_drawer::is_service_error(&err, |e| matches!(e, ServiceError::Validation(_))),
            "{:?}",
            err
        );
    }
}
