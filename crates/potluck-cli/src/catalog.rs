//! File-backed catalog of the collaborators the core consumes: households,
//! meals, recipes and unit conversions.
//!
//! ```toml
//! [[household]]
//! id = "house-1"
//! members = ["ana", "bo"]
//!
//! [[meal]]
//! id = "pizza-night"
//! recipes = ["dough", "sauce"]
//!
//! [[recipe]]
//! id = "dough"
//!
//! [[recipe.step]]
//! id = "mix"
//! min_buffer_secs = 3600
//! max_buffer_secs = 86400
//! ingredients = [{ ingredient = "flour", unit = "g", min_qty = 500.0 }]
//!
//! [[conversion]]
//! from = "kg"
//! to = "g"
//! factor = 1000.0
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use potluck_core::ports::{
    Meal, PrepWindow, Recipe, RecipeStep, StaticHouseholds, StaticRecipes, StaticUnits,
    StepIngredient,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("duplicate {kind} id: {id:?}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("meal {meal:?} references unknown recipe {recipe:?}")]
    UnknownRecipe { meal: String, recipe: String },

    #[error("step {step:?} of recipe {recipe:?} depends on unknown step {dependency:?}")]
    UnknownStep {
        recipe: String,
        step: String,
        dependency: String,
    },

    #[error("recipe {recipe:?} has a step dependency cycle involving: {steps}")]
    CycleDetected { recipe: String, steps: String },

    #[error("step {step:?} of recipe {recipe:?} needs 0 <= min_buffer_secs <= max_buffer_secs")]
    InvalidWindow { recipe: String, step: String },

    #[error("conversion {from:?} -> {to:?} needs a positive factor, got {factor}")]
    InvalidFactor { from: String, to: String, factor: f64 },
}

// -----------------------------------------------------------------------
// File format
// -----------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct FileCatalog {
    #[serde(default, rename = "household")]
    pub households: Vec<HouseholdToml>,
    #[serde(default, rename = "meal")]
    pub meals: Vec<MealToml>,
    #[serde(default, rename = "recipe")]
    pub recipes: Vec<RecipeToml>,
    #[serde(default, rename = "conversion")]
    pub conversions: Vec<ConversionToml>,
}

#[derive(Debug, Deserialize)]
pub struct HouseholdToml {
    pub id: String,
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MealToml {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub recipes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecipeToml {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepToml>,
}

#[derive(Debug, Deserialize)]
pub struct StepToml {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub min_buffer_secs: Option<i64>,
    pub max_buffer_secs: Option<i64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<IngredientToml>,
}

#[derive(Debug, Deserialize)]
pub struct IngredientToml {
    pub ingredient: String,
    pub unit: String,
    pub min_qty: f64,
    pub max_qty: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ConversionToml {
    pub from: String,
    pub to: String,
    pub factor: f64,
}

/// The three ports built from one catalog file.
#[derive(Debug)]
pub struct Collaborators {
    pub households: StaticHouseholds,
    pub recipes: StaticRecipes,
    pub units: StaticUnits,
}

// -----------------------------------------------------------------------
// Loading
// -----------------------------------------------------------------------

impl FileCatalog {
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let catalog: FileCatalog = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        unique("household", self.households.iter().map(|h| h.id.as_str()))?;
        unique("meal", self.meals.iter().map(|m| m.id.as_str()))?;
        unique("recipe", self.recipes.iter().map(|r| r.id.as_str()))?;

        let recipe_ids: HashSet<&str> = self.recipes.iter().map(|r| r.id.as_str()).collect();
        for meal in &self.meals {
            if let Some(missing) = meal
                .recipes
                .iter()
                .find(|r| !recipe_ids.contains(r.as_str()))
            {
                return Err(CatalogError::UnknownRecipe {
                    meal: meal.id.clone(),
                    recipe: missing.clone(),
                });
            }
        }

        for recipe in &self.recipes {
            unique("step", recipe.steps.iter().map(|s| s.id.as_str()))?;
            for step in &recipe.steps {
                window(recipe, step)?;
            }
            check_for_cycles(recipe)?;
        }

        for conversion in &self.conversions {
            if !(conversion.factor > 0.0 && conversion.factor.is_finite()) {
                return Err(CatalogError::InvalidFactor {
                    from: conversion.from.clone(),
                    to: conversion.to.clone(),
                    factor: conversion.factor,
                });
            }
        }
        Ok(())
    }

    pub fn into_collaborators(self) -> Collaborators {
        let households = self
            .households
            .into_iter()
            .fold(StaticHouseholds::new(), |acc, h| {
                acc.with_household(h.id, h.members)
            });

        let mut recipes = StaticRecipes::new();
        for meal in self.meals {
            recipes = recipes.with_meal(Meal {
                id: meal.id,
                name: meal.name,
                recipe_ids: meal.recipes,
            });
        }
        for recipe in self.recipes {
            let steps = recipe
                .steps
                .iter()
                .map(|step| RecipeStep {
                    id: step.id.clone(),
                    name: step.name.clone(),
                    // Validated in `parse`.
                    prep_window: window(&recipe, step).ok().flatten(),
                    depends_on: step.depends_on.clone(),
                    ingredients: step
                        .ingredients
                        .iter()
                        .map(|i| StepIngredient {
                            ingredient_id: i.ingredient.clone(),
                            unit_id: i.unit.clone(),
                            min_qty: i.min_qty,
                            max_qty: i.max_qty,
                        })
                        .collect(),
                })
                .collect();
            recipes = recipes.with_recipe(Recipe {
                id: recipe.id,
                name: recipe.name,
                steps,
            });
        }

        let units = self
            .conversions
            .into_iter()
            .fold(StaticUnits::new(), |acc, c| {
                acc.with_factor(c.from, c.to, c.factor)
            });

        Collaborators {
            households,
            recipes,
            units,
        }
    }
}

fn unique<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(CatalogError::DuplicateId {
                kind,
                id: id.to_owned(),
            });
        }
    }
    Ok(())
}

fn window(recipe: &RecipeToml, step: &StepToml) -> Result<Option<PrepWindow>, CatalogError> {
    match (step.min_buffer_secs, step.max_buffer_secs) {
        (None, None) => Ok(None),
        (Some(min), Some(max)) if min >= 0 && max >= min => Ok(Some(PrepWindow {
            min_buffer_secs: min,
            max_buffer_secs: max,
        })),
        _ => Err(CatalogError::InvalidWindow {
            recipe: recipe.id.clone(),
            step: step.id.clone(),
        }),
    }
}

/// Reject step graphs that are not DAGs (Kahn's algorithm).
fn check_for_cycles(recipe: &RecipeToml) -> Result<(), CatalogError> {
    let step_ids: Vec<&str> = recipe.steps.iter().map(|s| s.id.as_str()).collect();
    let id_to_idx: HashMap<&str, usize> = step_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();

    let n = step_ids.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for (step_idx, step) in recipe.steps.iter().enumerate() {
        for dep in &step.depends_on {
            let Some(&dep_idx) = id_to_idx.get(dep.as_str()) else {
                return Err(CatalogError::UnknownStep {
                    recipe: recipe.id.clone(),
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            };
            // Edge: dep -> step.
            adj[dep_idx].push(step_idx);
            in_degree[step_idx] += 1;
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut sorted_count = 0usize;
    while let Some(node) = queue.pop_front() {
        sorted_count += 1;
        for &next in &adj[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if sorted_count != n {
        let cycle: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| step_ids[i])
            .collect();
        return Err(CatalogError::CycleDetected {
            recipe: recipe.id.clone(),
            steps: cycle.join(", "),
        });
    }
    Ok(())
}
