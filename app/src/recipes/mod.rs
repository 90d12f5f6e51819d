use anyhow::Result;
use chrono::Utc;
use log::*;
use r2d2::{ManageConnection, Pool};

use infra::documents::DocMeta;
use infra::ids::{Id, IdGen};
use infra::persistence::Storage;

use crate::services::{transact, Commandable, Queryable, Request};
use crate::tenancy::{load_in_scope, load_in_tenant, Scope};

pub mod costing;
mod models;

pub use self::models::{Recipe, RecipeIngredient};

#[derive(Debug)]
pub struct Recipes<M: ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRecipe {
    pub scope: Scope,
    pub name: String,
    pub yield_quantity: f64,
    pub yield_unit: String,
    pub ingredients: Vec<RecipeIngredient>,
}

/// Changes the given fields and re-prices the recipe. `ingredients`, when
/// present, replaces the whole list.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecipe {
    pub scope: Scope,
    pub id: Id<Recipe>,
    pub name: Option<String>,
    pub yield_quantity: Option<f64>,
    pub yield_unit: Option<String>,
    pub ingredients: Option<Vec<RecipeIngredient>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetRecipe {
    pub scope: Scope,
    pub id: Id<Recipe>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListRecipes {
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRecipe {
    pub scope: Scope,
    pub id: Id<Recipe>,
}

/// Current cost per yield unit, without saving it. With `tenant_wide`, any
/// branch of the tenant may supply the recipe and the purchase history.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecipe {
    pub scope: Scope,
    pub id: Id<Recipe>,
    pub tenant_wide: bool,
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Recipes<M> {
    pub fn new(db: Pool<M>, idgen: IdGen) -> Self {
        Recipes { db, idgen }
    }
}

impl Request for CreateRecipe {
    type Resp = Recipe;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<CreateRecipe>
    for Recipes<M>
{
    fn execute(&self, req: CreateRecipe) -> Result<Recipe> {
        models::validate_definition(&req.name, req.yield_quantity, &req.ingredients)?;
        let now = Utc::now();
        let mut recipe = Recipe {
            meta: DocMeta::new_with_id(self.idgen.generate()),
            scope: req.scope,
            name: req.name,
            yield_quantity: req.yield_quantity,
            yield_unit: req.yield_unit,
            cost_per_unit: 0.0,
            ingredients: req.ingredients,
            created_at: now,
            updated_at: now,
        };

        transact(&self.db, |session| {
            recipe.cost_per_unit = costing::compute_cost(
                session,
                &recipe.ingredients,
                recipe.scope.tenant,
                Some(recipe.scope.branch),
            )?;
            session.save(&mut recipe)
        })?;

        info!(
            "Created recipe {} ({}) at {} per {}",
            recipe.name,
            recipe.id(),
            recipe.cost_per_unit,
            recipe.yield_unit
        );
        Ok(recipe)
    }
}

impl Request for UpdateRecipe {
    type Resp = Recipe;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<UpdateRecipe>
    for Recipes<M>
{
    fn execute(&self, req: UpdateRecipe) -> Result<Recipe> {
        let UpdateRecipe {
            scope,
            id,
            name,
            yield_quantity,
            yield_unit,
            ingredients,
        } = req;
        let recipe = transact(&self.db, |session| {
            let mut recipe: Recipe = load_in_scope(session, &scope, &id)?;
            if let Some(name) = name {
                recipe.name = name;
            }
            if let Some(yield_quantity) = yield_quantity {
                recipe.yield_quantity = yield_quantity;
            }
            if let Some(yield_unit) = yield_unit {
                recipe.yield_unit = yield_unit;
            }
            if let Some(ingredients) = ingredients {
                recipe.ingredients = ingredients;
            }
            models::validate_definition(
                &recipe.name,
                recipe.yield_quantity,
                &recipe.ingredients,
            )?;
            recipe.cost_per_unit = costing::compute_cost(
                session,
                &recipe.ingredients,
                recipe.scope.tenant,
                Some(recipe.scope.branch),
            )?;
            recipe.updated_at = Utc::now();
            session.save(&mut recipe)?;
            Ok(recipe)
        })?;
        info!("Updated recipe {}", recipe.id());
        Ok(recipe)
    }
}

impl Request for GetRecipe {
    type Resp = Recipe;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<GetRecipe>
    for Recipes<M>
{
    fn query(&self, req: GetRecipe) -> Result<Recipe> {
        transact(&self.db, |session| load_in_scope(session, &req.scope, &req.id))
    }
}

impl Request for ListRecipes {
    type Resp = Vec<Recipe>;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListRecipes>
    for Recipes<M>
{
    fn query(&self, req: ListRecipes) -> Result<Vec<Recipe>> {
        let mut recipes =
            transact(&self.db, |session| session.scan::<Recipe>(&req.scope.filter()))?;
        recipes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id().cmp(&b.id())));
        Ok(recipes)
    }
}

impl Request for DeleteRecipe {
    type Resp = ();
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<DeleteRecipe>
    for Recipes<M>
{
    fn execute(&self, req: DeleteRecipe) -> Result<()> {
        transact(&self.db, |session| {
            let recipe: Recipe = load_in_scope(session, &req.scope, &req.id)?;
            session.delete(&recipe)
        })?;
        info!("Deleted recipe {}", req.id);
        Ok(())
    }
}

impl Request for PriceRecipe {
    type Resp = f64;
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<PriceRecipe>
    for Recipes<M>
{
    fn query(&self, req: PriceRecipe) -> Result<f64> {
        transact(&self.db, |session| {
            let (recipe, branch): (Recipe, _) = if req.tenant_wide {
                (load_in_tenant(session, req.scope.tenant, &req.id)?, None)
            } else {
                (
                    load_in_scope(session, &req.scope, &req.id)?,
                    Some(req.scope.branch),
                )
            };
            costing::compute_cost(session, &recipe.ingredients, req.scope.tenant, branch)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ServiceError;
    use crate::test::junk_drawer::{is_service_error, Fixture};

    fn soup(fx: &Fixture) -> CreateRecipe {
        CreateRecipe {
            scope: fx.scope,
            name: "Tomato Soup".into(),
            yield_quantity: 4.0,
            yield_unit: "portion".into(),
            ingredients: vec![
                RecipeIngredient::new("Tomatoes", "Produce", 2.0, "kg"),
                RecipeIngredient::new("Basil", "Herbs", 10.0, "g").optional(),
            ],
        }
    }

    #[test]
    fn create_prices_from_stock_on_hand() -> Result<()> {
        let fx = Fixture::new();
        fx.receive("Tomatoes", "Produce", 10.0, 3.0, None)?;

        let recipe = fx.app.recipes().execute(soup(&fx))?;

        assert_eq!(recipe.cost_per_unit, 6.0);
        let loaded = fx.app.recipes().query(GetRecipe {
            scope: fx.scope,
            id: recipe.id(),
        })?;
        assert_eq!(loaded, recipe);
        Ok(())
    }

    #[test]
    fn update_recomputes_cost() -> Result<()> {
        let fx = Fixture::new();
        fx.receive("Tomatoes", "Produce", 10.0, 3.0, None)?;
        let recipe = fx.app.recipes().execute(soup(&fx))?;
        fx.receive("Tomatoes", "Produce", 10.0, 5.0, None)?;

        let updated = fx.app.recipes().execute(UpdateRecipe {
            scope: fx.scope,
            id: recipe.id(),
            name: Some("Roast Tomato Soup".into()),
            yield_quantity: None,
            yield_unit: None,
            ingredients: None,
        })?;

        assert_eq!(updated.name, "Roast Tomato Soup");
        assert_eq!(updated.yield_quantity, 4.0);
        assert_eq!(updated.ingredients, recipe.ingredients);
        assert_eq!(updated.cost_per_unit, 8.0);
        assert_eq!(updated.created_at, recipe.created_at);
        Ok(())
    }

    #[test]
    fn update_validates_the_merged_recipe() -> Result<()> {
        let fx = Fixture::new();
        let recipe = fx.app.recipes().execute(soup(&fx))?;

        let err = fx
            .app
            .recipes()
            .execute(UpdateRecipe {
                scope: fx.scope,
                id: recipe.id(),
                name: Some("  ".into()),
                yield_quantity: None,
                yield_unit: None,
                ingredients: None,
            })
            .expect_err("blank name");

        assert!(
            is_service_error(&err, |e| matches!(e, ServiceError::Validation(_))),
            "{:?}",
            err
        );
        let stored = fx.app.recipes().query(GetRecipe {
            scope: fx.scope,
            id: recipe.id(),
        })?;
        assert_eq!(stored.name, "Tomato Soup");
        Ok(())
    }

    #[test]
    fn rejects_zero_yield() {
        let fx = Fixture::new();
        let req = CreateRecipe {
            yield_quantity: 0.0,
            ..soup(&fx)
        };

        let err = fx.app.recipes().execute(req).expect_err("zero yield");

        assert!(
            is_service_error(&err, |e| matches!(e, ServiceError::Validation(_))),
            "{:?}",
            err
        );
    }

    #[test]
    fn list_is_sorted_by_name_and_scoped() -> Result<()> {
        let fx = Fixture::new();
        fx.app.recipes().execute(CreateRecipe {
            name: "Zucchini Fritters".into(),
            ..soup(&fx)
        })?;
        fx.app.recipes().execute(soup(&fx))?;
        fx.app.recipes().execute(CreateRecipe {
            scope: fx.other_branch(),
            name: "Apple Pie".into(),
            ..soup(&fx)
        })?;

        let names = fx
            .app
            .recipes()
            .query(ListRecipes { scope: fx.scope })?
            .into_iter()
            .map(|r| r.name)
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["Tomato Soup", "Zucchini Fritters"]);
        Ok(())
    }

    #[test]
    fn delete_then_get_is_not_found() -> Result<()> {
        let fx = Fixture::new();
        let recipe = fx.app.recipes().execute(soup(&fx))?;

        fx.app.recipes().execute(DeleteRecipe {
            scope: fx.scope,
            id: recipe.id(),
        })?;
        let err = fx
            .app
            .recipes()
            .query(GetRecipe {
                scope: fx.scope,
                id: recipe.id(),
            })
            .expect_err("deleted");

        assert!(
            is_service_error(&err, |e| matches!(e, ServiceError::NotFound { .. })),
            "{:?}",
            err
        );
        Ok(())
    }

    #[test]
    fn price_tracks_new_purchases_without_saving() -> Result<()> {
        let fx = Fixture::new();
        fx.receive("Tomatoes", "Produce", 10.0, 2.0, None)?;
        let recipe = fx.app.recipes().execute(soup(&fx))?;
        fx.receive("Tomatoes", "Produce", 10.0, 4.0, None)?;

        let price = fx.app.recipes().query(PriceRecipe {
            scope: fx.scope,
            id: recipe.id(),
            tenant_wide: false,
        })?;
        let stored = fx.app.recipes().query(GetRecipe {
            scope: fx.scope,
            id: recipe.id(),
        })?;

        assert_eq!(price, 6.0);
        assert_eq!(stored.cost_per_unit, 4.0);
        Ok(())
    }

    #[test]
    fn tenant_wide_price_finds_recipe_in_another_branch() -> Result<()> {
        let fx = Fixture::new();
        let elsewhere = fx.other_branch();
        fx.receive_in(&elsewhere, "Tomatoes", "Produce", 1.0, 1.0, None)?;
        let recipe = fx.app.recipes().execute(CreateRecipe {
            scope: elsewhere,
            ..soup(&fx)
        })?;

        let price = fx.app.recipes().query(PriceRecipe {
            scope: fx.scope,
            id: recipe.id(),
            tenant_wide: true,
        })?;

        assert_eq!(price, 2.0);
        Ok(())
    }
}
