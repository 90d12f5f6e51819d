//! Guarded with `#[cfg(test)]` from `lib.rs`

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use chrono::NaiveDate;

use crate::approvals::{ApprovalAction, Decision, InventoryPatch, Review, Submit};
use crate::error::ServiceError;
use crate::inventory::{ListInventory, StockLevel, UsageHistory};
use crate::production::{CreateProduction, ProductionStats};
use crate::recipes::{CreateRecipe, Recipe, RecipeIngredient};
use crate::services::{Commandable, Queryable};
use crate::waste::{LogWaste, WasteSummary};


use self::junk_drawer::{is_service_error, Fixture};

fn bolognese(fx: &Fixture) -> Result<Recipe> {
    fx.app.recipes().execute(CreateRecipe {
        scope: fx.scope,
        name: "Bolognese".into(),
        yield_quantity: 8.0,
        yield_unit: "portion".into(),
        ingredients: vec![
            RecipeIngredient::new("Mince", "Meat", 1.0, "kg"),
            RecipeIngredient::new("Tomatoes", "Produce", 0.8, "kg"),
            RecipeIngredient::new("Parmesan", "Dairy", 0.1, "kg").optional(),
        ],
    })
}

fn cook(fx: &Fixture, recipe: &Recipe, portions: f64) -> CreateProduction {
    CreateProduction {
        scope: fx.scope,
        recipe_id: recipe.id(),
        planned_quantity: portions,
        quantity_produced: None,
        batch_number: None,
        notes: None,
    }
}

#[test]
fn a_day_in_the_kitchen() -> Result<()> {
    let fx = Fixture::new();
    let mince = fx.receive("Mince", "Meat", 3.0, 9.0, NaiveDate::from_ymd_opt(2024, 5, 3))?;
    fx.receive("Tomatoes", "Produce", 4.0, 2.0, NaiveDate::from_ymd_opt(2024, 5, 10))?;
    let recipe = bolognese(&fx)?;
    assert_eq!(recipe.cost_per_unit, 9.0 + 0.8 * 2.0);

    let first = fx.app.production().execute(cook(&fx, &recipe, 16.0))?;
    assert_eq!(first.total_cost, 2.0 * 9.0 + 1.6 * 2.0);

    fx.app.waste().execute(LogWaste {
        scope: fx.scope,
        inventory_item_id: mince.id(),
        quantity: 0.5,
        reason: "dropped".into(),
        notes: Some("floor".into()),
        logged_by: "commis".into(),
        waste_date: None,
    })?;

    // Only half a kilo of mince left; a full batch needs one.
    let err = fx
        .app
        .production()
        .execute(cook(&fx, &recipe, 8.0))
        .expect_err("not enough mince");
    match err.downcast_ref::<ServiceError>() {
        Some(ServiceError::CannotProduce(shortages)) => {
            assert_eq!(shortages.0.len(), 1);
            assert_eq!(shortages.0[0].ingredient_name, "Mince");
            assert_eq!(shortages.0[0].shortage, 0.5);
        }
        other => panic!("Expected CannotProduce, got {:?}", other),
    }

    let mince_left = fx.app.inventory().query(StockLevel {
        scope: fx.scope,
        item_name: "Mince".into(),
        category: "Meat".into(),
    })?;
    assert_eq!(mince_left, 0.5);

    let usage = fx.app.inventory().query(UsageHistory {
        scope: fx.scope,
        item_name: None,
    })?;
    assert_eq!(usage.len(), 3);

    let waste = fx.app.waste().query(WasteSummary { scope: fx.scope })?;
    assert_eq!(waste["dropped"].cost, 4.5);

    let stats = fx.app.production().query(ProductionStats { scope: fx.scope })?;
    assert_eq!(stats.runs, 1);
    Ok(())
}

#[test]
fn stock_corrections_go_through_review() -> Result<()> {
    let fx = Fixture::new();
    let mince = fx.receive("Mince", "Meat", 1.0, 9.0, None)?;
    let recipe = bolognese(&fx)?;
    fx.receive("Tomatoes", "Produce", 5.0, 2.0, None)?;

    let request = fx.app.approvals().execute(Submit {
        scope: fx.scope,
        action: ApprovalAction::UpdateInventory {
            item: mince.id(),
            patch: InventoryPatch {
                quantity: Some(2.0),
                ..Default::default()
            },
        },
        reason: "miscounted delivery".into(),
        submitted_by: "commis".into(),
    })?;

    // Pending requests change nothing.
    let err = fx
        .app
        .production()
        .execute(cook(&fx, &recipe, 16.0))
        .expect_err("still one kilo");
    assert!(
        is_service_error(&err, |e| matches!(e, ServiceError::CannotProduce(_))),
        "{:?}",
        err
    );

    fx.app.approvals().execute(Review {
        tenant: fx.scope.tenant,
        id: request.id(),
        decision: Decision::Approve,
        comment: None,
        reviewed_by: "chef".into(),
    })?;

    let production = fx.app.production().execute(cook(&fx, &recipe, 16.0))?;
    assert_eq!(production.ingredient_usage[0].inventory_item_ids, vec![mince.id()]);
    Ok(())
}

#[test]
fn competing_productions_never_overdraw_a_batch() -> Result<()> {
    let fx = Arc::new(Fixture::new());
    fx.receive("Mince", "Meat", 1.0, 9.0, None)?;
    fx.receive("Tomatoes", "Produce", 10.0, 2.0, None)?;
    let recipe = bolognese(&fx)?;

    let handles = (0..4)
        .map(|_| {
            let fx = fx.clone();
            let req = cook(&fx, &recipe, 8.0);
            thread::spawn(move || fx.app.production().execute(req))
        })
        .collect::<Vec<_>>();
    let outcomes = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect::<Vec<_>>();

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    let batches = fx.app.inventory().query(ListInventory {
        scope: fx.scope,
        item_name: Some("Mince".into()),
        category: None,
        in_stock_only: false,
    })?;
    assert_eq!(batches[0].quantity, 0.0);
    Ok(())
}

#[test]
fn concurrent_reviews_settle_a_request_once() -> Result<()> {
    let fx = Arc::new(Fixture::new());
    let mince = fx.receive("Mince", "Meat", 1.0, 9.0, None)?;
    let request = fx.app.approvals().execute(Submit {
        scope: fx.scope,
        action: ApprovalAction::DeleteInventory { item: mince.id() },
        reason: "off smell".into(),
        submitted_by: "commis".into(),
    })?;

    let handles = vec![Decision::Approve, Decision::Reject, Decision::Approve]
        .into_iter()
        .map(|decision| {
            let fx = fx.clone();
            let req = Review {
                tenant: fx.scope.tenant,
                id: request.id(),
                decision,
                comment: None,
                reviewed_by: "chef".into(),
            };
            thread::spawn(move || fx.app.approvals().execute(req))
        })
        .collect::<Vec<_>>();
    let outcomes = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect::<Vec<_>>();

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    for err in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        assert!(
            is_service_error(err, |e| matches!(e, ServiceError::AlreadyReviewed(_))),
            "{:?}",
            err
        );
    }
    Ok(())
}
