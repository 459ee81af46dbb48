//! Read-only view of meals and recipes.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A meal: an ordered list of recipes served together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub recipe_ids: Vec<String>,
}

/// A recipe is a DAG of steps. Edges are the `depends_on` step ids; the
/// core assumes they are acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<RecipeStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// How long before the meal this step may be done. Steps without a
    /// window are done at cooking time and produce no prep task.
    #[serde(default)]
    pub prep_window: Option<PrepWindow>,
    /// Steps whose products this step consumes.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<StepIngredient>,
}

/// Bounds, in seconds before the meal, of when a prep step can be done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepWindow {
    pub min_buffer_secs: i64,
    pub max_buffer_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepIngredient {
    pub ingredient_id: String,
    pub unit_id: String,
    pub min_qty: f64,
    #[serde(default)]
    pub max_qty: Option<f64>,
}

/// Lookup of meals and recipes by id. `Ok(None)` (or an id missing from a
/// batch) means the reference does not exist.
#[async_trait]
pub trait RecipeReader: Send + Sync {
    async fn get_meal(&self, meal_id: &str) -> Result<Option<Meal>>;

    async fn get_recipe(&self, recipe_id: &str) -> Result<Option<Recipe>>;

    /// Fetch several recipes at once. Missing ids are omitted; order is not
    /// significant.
    async fn get_recipes_with_ids(&self, recipe_ids: &[String]) -> Result<Vec<Recipe>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn RecipeReader) {}
};

/// An in-memory catalog of meals and recipes.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipes {
    meals: HashMap<String, Meal>,
    recipes: HashMap<String, Recipe>,
}

impl StaticRecipes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meal(mut self, meal: Meal) -> Self {
        self.meals.insert(meal.id.clone(), meal);
        self
    }

    pub fn with_recipe(mut self, recipe: Recipe) -> Self {
        self.recipes.insert(recipe.id.clone(), recipe);
        self
    }

    pub fn meal_count(&self) -> usize {
        self.meals.len()
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }
}

#[async_trait]
impl RecipeReader for StaticRecipes {
    async fn get_meal(&self, meal_id: &str) -> Result<Option<Meal>> {
        Ok(self.meals.get(meal_id).cloned())
    }

    async fn get_recipe(&self, recipe_id: &str) -> Result<Option<Recipe>> {
        Ok(self.recipes.get(recipe_id).cloned())
    }

    async fn get_recipes_with_ids(&self, recipe_ids: &[String]) -> Result<Vec<Recipe>> {
        Ok(recipe_ids
            .iter()
            .filter_map(|id| self.recipes.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(id: &str) -> Recipe {
        Recipe {
            id: id.to_owned(),
            name: String::new(),
            steps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn batch_lookup_omits_missing_recipes() {
        let catalog = StaticRecipes::new()
            .with_recipe(recipe("r1"))
            .with_recipe(recipe("r2"));

        let found = catalog
            .get_recipes_with_ids(&["r2".to_owned(), "nope".to_owned()])
            .await
            .unwrap();
        assert_eq!(found, vec![recipe("r2")]);
        assert!(catalog.get_recipe("nope").await.unwrap().is_none());
        assert!(catalog.get_meal("m1").await.unwrap().is_none());
    }
}
