//! Recipe pricing from recent purchase history.
//!
//! The price of an ingredient is the mean unit cost of its most recently
//! received batches, whether or not any of that stock is left.

use anyhow::Result;
use log::*;

use infra::persistence::Session;

use super::models::RecipeIngredient;
use crate::inventory::InventoryBatch;
use crate::tenancy::{tenant_filter, Branch, Tenant};
use infra::ids::Id;

/// How many of the newest batches feed an ingredient's price.
pub const PRICE_HISTORY: usize = 5;

/// Cost of one recipe yield. Ingredients with no purchase history add
/// nothing.
pub fn compute_cost(
    session: &Session<'_>,
    ingredients: &[RecipeIngredient],
    tenant: Id<Tenant>,
    branch: Option<Id<Branch>>,
) -> Result<f64> {
    let mut total = 0.0;
    for ingredient in ingredients {
        match recent_unit_cost(
            session,
            tenant,
            branch,
            &ingredient.ingredient_name,
            &ingredient.category,
        )? {
            Some(unit_cost) => total += unit_cost * ingredient.quantity,
            None => debug!(
                "No purchase history for {} ({}); costed at zero",
                ingredient.ingredient_name, ingredient.category
            ),
        }
    }
    Ok(total)
}

pub fn recent_unit_cost(
    session: &Session<'_>,
    tenant: Id<Tenant>,
    branch: Option<Id<Branch>>,
    item_name: &str,
    category: &str,
) -> Result<Option<f64>> {
    let mut filter = tenant_filter(tenant, branch);
    filter["item_name"] = item_name.into();
    filter["category"] = category.into();

    let mut batches = session.scan::<InventoryBatch>(&filter)?;
    batches.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id().cmp(&a.id()))
    });
    batches.truncate(PRICE_HISTORY);

    if batches.is_empty() {
        return Ok(None);
    }
    let sum = batches.iter().map(|b| b.cost).sum::<f64>();
    Ok(Some(sum / batches.len() as f64))
}
