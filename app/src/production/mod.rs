//! Turning recipes into finished goods.
//!
//! A run is checked against stock on hand first and refused outright if
//! any required ingredient is short, so a failed run never touches the
//! shelves. Only completed runs are recorded.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::*;
use r2d2::{ManageConnection, Pool};
use serde_json::json;

use infra::documents::DocMeta;
use infra::ids::{Id, IdGen};
use infra::persistence::{Session, Storage};

use crate::error::{ensure, ServiceError, Shortages};
use crate::inventory::fifo::{self, QUANTITY_EPSILON};
use crate::inventory::{StockUsage, UsageSource};
use crate::recipes::Recipe;
use crate::services::{transact, Commandable, Queryable, Request};
use crate::tenancy::{load_in_scope, Scope};

mod models;

pub use self::models::{
    Availability, Production, ProductionIngredient, ProductionStatus, ProductionSummary,
    Requirement,
};

#[derive(Debug)]
pub struct ProductionEngine<M: ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateProduction {
    pub scope: Scope,
    pub recipe_id: Id<Recipe>,
    pub planned_quantity: f64,
    /// Defaults to `planned_quantity`.
    pub quantity_produced: Option<f64>,
    pub batch_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckIngredients {
    pub scope: Scope,
    pub recipe_id: Id<Recipe>,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetProduction {
    pub scope: Scope,
    pub id: Id<Production>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListProductions {
    pub scope: Scope,
    pub recipe_id: Option<Id<Recipe>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductionStats {
    pub scope: Scope,
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> ProductionEngine<M> {
    pub fn new(db: Pool<M>, idgen: IdGen) -> Self {
        ProductionEngine { db, idgen }
    }
}

impl CreateProduction {
    fn validate(&self) -> Result<(), ServiceError> {
        ensure(
            self.planned_quantity.is_finite() && self.planned_quantity >= 0.0,
            "planned quantity must not be negative",
        )?;
        if let Some(produced) = self.quantity_produced {
            ensure(
                produced.is_finite() && produced >= 0.0,
                "quantity produced must not be negative",
            )?;
        }
        if let Some(batch_number) = self.batch_number.as_ref() {
            ensure(
                !batch_number.trim().is_empty(),
                "batch number must not be blank",
            )?;
        }
        Ok(())
    }

    fn actual_quantity(&self) -> f64 {
        self.quantity_produced.unwrap_or(self.planned_quantity)
    }
}

/// `{first three letters of the recipe, uppercased}-{YYYYMMDD}-{HHMM}`.
pub fn default_batch_number(recipe_name: &str, at: DateTime<Utc>) -> String {
    let prefix = recipe_name
        .trim()
        .chars()
        .take(3)
        .collect::<String>()
        .to_uppercase();
    format!("{}-{}", prefix, at.format("%Y%m%d-%H%M"))
}

fn batch_number_taken(session: &Session<'_>, scope: &Scope, candidate: &str) -> Result<bool> {
    let clashes = session.scan::<Production>(&json!({
        "scope": { "tenant": scope.tenant },
        "batch_number": candidate,
    }))?;
    Ok(!clashes.is_empty())
}

/// `wanted` itself if no run of the tenant uses it yet, otherwise the first
/// free `wanted-N` from 2 up.
fn unique_batch_number(session: &Session<'_>, scope: &Scope, wanted: &str) -> Result<String> {
    if !batch_number_taken(session, scope, wanted)? {
        return Ok(wanted.to_string());
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", wanted, n);
        if !batch_number_taken(session, scope, &candidate)? {
            debug!("Batch number {} in use; using {}", wanted, candidate);
            return Ok(candidate);
        }
        n += 1;
    }
}

fn multiplier(recipe: &Recipe, quantity: f64) -> Result<f64, ServiceError> {
    ensure(
        recipe.yield_quantity > 0.0,
        "recipe yield must be positive",
    )?;
    Ok(quantity / recipe.yield_quantity)
}

/// Stock needed for every required ingredient at `multiplier`, next to what
/// is on hand. An ingredient listed twice is needed twice over.
pub fn requirements(
    session: &Session<'_>,
    scope: &Scope,
    recipe: &Recipe,
    multiplier: f64,
) -> Result<Vec<Requirement>> {
    let mut requirements: Vec<Requirement> = Vec::new();
    for ingredient in recipe.ingredients.iter().filter(|i| !i.is_optional) {
        let required = ingredient.quantity * multiplier;
        let existing = requirements.iter_mut().find(|r| {
            r.ingredient_name == ingredient.ingredient_name && r.category == ingredient.category
        });
        match existing {
            Some(requirement) => requirement.required += required,
            None => {
                let available = fifo::available(
                    session,
                    scope,
                    &ingredient.ingredient_name,
                    &ingredient.category,
                )?;
                requirements.push(Requirement {
                    ingredient_name: ingredient.ingredient_name.clone(),
                    category: ingredient.category.clone(),
                    unit: ingredient.unit.clone(),
                    required,
                    available,
                })
            }
        }
    }
    Ok(requirements)
}

pub fn check(
    session: &Session<'_>,
    scope: &Scope,
    recipe: &Recipe,
    quantity: f64,
) -> Result<Availability> {
    let multiplier = multiplier(recipe, quantity)?;
    let requirements = requirements(session, scope, recipe, multiplier)?;
    let missing = requirements
        .iter()
        .filter_map(Requirement::shortage)
        .collect::<Vec<_>>();
    Ok(Availability {
        can_produce: missing.is_empty(),
        multiplier,
        requirements,
        missing,
    })
}

/// Runs one production inside `session`: checks stock, records the run and
/// consumes ingredients first-expiring-first.
pub fn produce(
    session: &Session<'_>,
    idgen: &IdGen,
    req: &CreateProduction,
    now: DateTime<Utc>,
) -> Result<Production> {
    req.validate()?;
    let scope = req.scope;
    let recipe: Recipe = load_in_scope(session, &scope, &req.recipe_id)?;
    let actual = req.actual_quantity();

    let availability = check(session, &scope, &recipe, actual)?;
    if !availability.can_produce {
        warn!(
            "Cannot produce {} of {}: {}",
            actual,
            recipe.name,
            Shortages(availability.missing.clone())
        );
        return Err(ServiceError::CannotProduce(Shortages(availability.missing)).into());
    }

    let wanted = match req.batch_number.as_ref() {
        Some(number) => number.trim().to_string(),
        None => default_batch_number(&recipe.name, now),
    };
    let batch_number = unique_batch_number(session, &scope, &wanted)?;

    let mut production = Production {
        meta: DocMeta::new_with_id(idgen.generate()),
        scope,
        recipe_id: recipe.id(),
        planned_quantity: req.planned_quantity,
        quantity_produced: actual,
        batch_number,
        total_cost: 0.0,
        unit_cost: 0.0,
        status: ProductionStatus::Completed,
        ingredient_usage: Vec::new(),
        notes: req.notes.clone(),
        produced_at: now,
    };
    session.save(&mut production)?;

    for requirement in availability.requirements {
        if requirement.required <= QUANTITY_EPSILON {
            continue;
        }
        let allocation = fifo::allocate(
            session,
            &scope,
            &requirement.ingredient_name,
            &requirement.category,
            requirement.required,
        )?;
        let used = allocation.quantity();

        let mut usage = StockUsage {
            meta: DocMeta::new_with_id(idgen.generate()),
            scope,
            item_name: requirement.ingredient_name.clone(),
            category: requirement.category.clone(),
            quantity_used: used,
            quantity_before: requirement.available,
            quantity_after: (requirement.available - used).max(0.0),
            source: UsageSource::Production(production.id()),
            recorded_at: now,
        };
        session.save(&mut usage)?;

        production.total_cost += allocation.total_cost;
        production.ingredient_usage.push(ProductionIngredient {
            ingredient_name: requirement.ingredient_name,
            category: requirement.category,
            quantity_used: used,
            cost_used: allocation.total_cost,
            inventory_item_ids: allocation.batch_ids(),
        });
    }

    production.unit_cost = if actual > 0.0 {
        production.total_cost / actual
    } else {
        0.0
    };
    session.save(&mut production)?;
    Ok(production)
}

impl Request for CreateProduction {
    type Resp = Production;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<CreateProduction> for ProductionEngine<M>
{
    fn execute(&self, req: CreateProduction) -> Result<Production> {
        req.validate()?;
        let production = transact(&self.db, |session| {
            produce(session, &self.idgen, &req, Utc::now())
        })?;
        info!(
            "Produced {} of {} as {} for {}",
            production.quantity_produced,
            production.recipe_id,
            production.batch_number,
            production.total_cost
        );
        Ok(production)
    }
}

impl Request for CheckIngredients {
    type Resp = Availability;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<CheckIngredients> for ProductionEngine<M>
{
    fn query(&self, req: CheckIngredients) -> Result<Availability> {
        ensure(
            req.quantity.is_finite() && req.quantity >= 0.0,
            "quantity must not be negative",
        )?;
        transact(&self.db, |session| {
            let recipe: Recipe = load_in_scope(session, &req.scope, &req.recipe_id)?;
            check(session, &req.scope, &recipe, req.quantity)
        })
    }
}

impl Request for GetProduction {
    type Resp = Production;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<GetProduction>
    for ProductionEngine<M>
{
    fn query(&self, req: GetProduction) -> Result<Production> {
        transact(&self.db, |session| load_in_scope(session, &req.scope, &req.id))
    }
}

impl Request for ListProductions {
    type Resp = Vec<Production>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ListProductions> for ProductionEngine<M>
{
    fn query(&self, req: ListProductions) -> Result<Vec<Production>> {
        let mut filter = req.scope.filter();
        if let Some(recipe_id) = req.recipe_id {
            filter["recipe_id"] = json!(recipe_id);
        }
        let mut runs = transact(&self.db, |session| session.scan::<Production>(&filter))?;
        runs.sort_by(|a, b| {
            b.produced_at
                .cmp(&a.produced_at)
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(runs)
    }
}

impl Request for ProductionStats {
    type Resp = ProductionSummary;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ProductionStats> for ProductionEngine<M>
{
    fn query(&self, req: ProductionStats) -> Result<ProductionSummary> {
        let runs = transact(&self.db, |session| {
            session.scan::<Production>(&req.scope.filter())
        })?;
        let mut summary = runs
            .iter()
            .filter(|p| p.status == ProductionStatus::Completed)
            .fold(ProductionSummary::default(), |mut acc, p| {
                acc.runs += 1;
                acc.total_quantity += p.quantity_produced;
                acc.total_cost += p.total_cost;
                acc
            });
        if summary.total_quantity > 0.0 {
            summary.average_unit_cost = summary.total_cost / summary.total_quantity;
        }
        Ok(summary)
    }
}
