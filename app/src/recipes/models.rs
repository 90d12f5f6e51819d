use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::error::{ensure, ServiceError};
use crate::tenancy::{Scope, Scoped};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<Recipe>,
    pub scope: Scope,
    pub name: String,
    #[serde(rename = "yield")]
    pub yield_quantity: f64,
    pub yield_unit: String,
    /// Derived from recent purchase prices whenever the recipe is saved.
    pub cost_per_unit: f64,
    pub ingredients: Vec<RecipeIngredient>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `quantity` is per recipe yield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub ingredient_name: String,
    pub category: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub is_optional: bool,
}

impl Recipe {
    pub fn id(&self) -> Id<Recipe> {
        self.meta.id
    }
}

impl RecipeIngredient {
    pub fn new(name: &str, category: &str, quantity: f64, unit: &str) -> Self {
        RecipeIngredient {
            ingredient_name: name.to_string(),
            category: category.to_string(),
            quantity,
            unit: unit.to_string(),
            is_optional: false,
        }
    }

    pub fn optional(self) -> Self {
        RecipeIngredient {
            is_optional: true,
            ..self
        }
    }
}

pub(crate) fn validate_definition(
    name: &str,
    yield_quantity: f64,
    ingredients: &[RecipeIngredient],
) -> Result<(), ServiceError> {
    ensure(!name.trim().is_empty(), "recipe name is required")?;
    ensure(
        yield_quantity.is_finite() && yield_quantity > 0.0,
        "recipe yield must be positive",
    )?;
    for ingredient in ingredients {
        ensure(
            !ingredient.ingredient_name.trim().is_empty(),
            "ingredient name is required",
        )?;
        ensure(
            ingredient.quantity.is_finite() && ingredient.quantity >= 0.0,
            "ingredient quantity must not be negative",
        )?;
    }
    Ok(())
}

impl Entity for Recipe {
    const PREFIX: &'static str = "recipe";
}

impl HasMeta for Recipe {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Scoped for Recipe {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}
