//! Derivation Engine: prep tasks and a consolidated grocery list for a
//! finalized plan.
//!
//! Derivation is a pure function of the plan aggregate, the recipe catalog
//! and the unit converter. Ids come from a generator seeded with the plan
//! id, so deriving the same plan twice produces identical rows.

pub mod grocery;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use potluck_db::models::{
    EventStatus, MealPlanEvent, MealPlanGroceryListItem, MealPlanOption, MealPlanTask, TaskStatus,
};

use crate::error::PlanError;
use crate::ports::{
    IdGenerator, Meal, PrepWindow, Recipe, RecipeReader, RecipeStep, SeededIdGenerator,
    UnitConverter,
};
use crate::store::PlanAggregate;

/// Rows derived from a finalized plan: tasks first, then grocery items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    pub tasks: Vec<MealPlanTask>,
    pub grocery_items: Vec<MealPlanGroceryListItem>,
}

impl Derivation {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.grocery_items.is_empty()
    }
}

#[derive(Clone)]
pub struct DerivationEngine {
    recipes: Arc<dyn RecipeReader>,
    units: Arc<dyn UnitConverter>,
}

impl std::fmt::Debug for DerivationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivationEngine").finish_non_exhaustive()
    }
}

impl DerivationEngine {
    pub fn new(recipes: Arc<dyn RecipeReader>, units: Arc<dyn UnitConverter>) -> Self {
        Self { recipes, units }
    }

    /// Derive tasks and grocery items from every event's chosen option.
    ///
    /// Missing meals or recipes are `InconsistentPlan`; reader failures are
    /// `Transient`. Unit conversion failures only keep grocery lines apart.
    pub async fn derive(
        &self,
        aggregate: &PlanAggregate,
        now: DateTime<Utc>,
    ) -> Result<Derivation, PlanError> {
        let plan_id = aggregate.plan.id.as_str();
        let chosen = chosen_options(aggregate)?;

        let mut lookup = RecipeLookup::new(self.recipes.as_ref());
        let mut meals = Vec::with_capacity(chosen.len());
        for (event, option) in chosen {
            let meal = lookup.meal(&option.meal_id, &option.id).await?;
            meals.push((event, option, meal));
        }
        let recipe_ids: Vec<String> = meals
            .iter()
            .flat_map(|(_, _, meal)| meal.recipe_ids.iter().cloned())
            .collect();
        lookup.prefetch(&recipe_ids).await?;

        let ids = SeededIdGenerator::new(plan_id);
        let mut tasks = Vec::new();
        let mut ingredients = Vec::new();
        for (event, option, meal) in &meals {
            for recipe_id in &meal.recipe_ids {
                let recipe = lookup.recipe(recipe_id, &meal.id).await?;
                for step in &recipe.steps {
                    if let Some(window) = step.prep_window {
                        let task = PrepTask {
                            plan_id,
                            event,
                            option,
                            recipe: &recipe,
                            step,
                            window,
                        };
                        tasks.push(task.into_row(ids.new_id(), now)?);
                    }
                    ingredients.extend(step.ingredients.iter().cloned());
                }
            }
        }

        let grocery_items: Vec<MealPlanGroceryListItem> =
            grocery::consolidate(&ingredients, self.units.as_ref())
                .await
                .into_iter()
                .map(|line| line.into_item(ids.new_id(), plan_id, now))
                .collect();

        debug!(
            %plan_id,
            tasks = tasks.len(),
            grocery_items = grocery_items.len(),
            recipes_fetched = lookup.recipes.len(),
            "derivation computed"
        );
        Ok(Derivation {
            tasks,
            grocery_items,
        })
    }
}

/// Chosen options in event schedule order.
fn chosen_options(
    aggregate: &PlanAggregate,
) -> Result<Vec<(&MealPlanEvent, &MealPlanOption)>, PlanError> {
    let mut events: Vec<_> = aggregate.events.iter().collect();
    events.sort_by(|a, b| {
        a.event
            .scheduled_at
            .cmp(&b.event.scheduled_at)
            .then_with(|| a.event.id.cmp(&b.event.id))
    });

    events
        .into_iter()
        .map(|e| {
            if e.event.status != EventStatus::Decided {
                return Err(PlanError::InconsistentPlan(format!(
                    "event {} is not decided",
                    e.event.id
                )));
            }
            let option = e.chosen_option().ok_or_else(|| {
                PlanError::InconsistentPlan(format!(
                    "chosen option of event {} is missing",
                    e.event.id
                ))
            })?;
            Ok((&e.event, option))
        })
        .collect()
}

struct PrepTask<'a> {
    plan_id: &'a str,
    event: &'a MealPlanEvent,
    option: &'a MealPlanOption,
    recipe: &'a Recipe,
    step: &'a RecipeStep,
    window: PrepWindow,
}

impl PrepTask<'_> {
    fn into_row(self, id: String, now: DateTime<Utc>) -> Result<MealPlanTask, PlanError> {
        let PrepWindow {
            min_buffer_secs,
            max_buffer_secs,
        } = self.window;
        if min_buffer_secs < 0 || max_buffer_secs < min_buffer_secs {
            return Err(PlanError::InconsistentPlan(format!(
                "step {} of recipe {} has prep window {min_buffer_secs}..{max_buffer_secs}",
                self.step.id, self.recipe.id
            )));
        }

        let scheduled = self.event.scheduled_at;
        Ok(MealPlanTask {
            id,
            plan_id: self.plan_id.to_owned(),
            event_id: self.event.id.clone(),
            option_id: self.option.id.clone(),
            recipe_id: self.recipe.id.clone(),
            recipe_step_id: self.step.id.clone(),
            depends_on_steps: self.step.depends_on.clone(),
            status: TaskStatus::Unfinished,
            status_explanation: explanation(self.recipe, self.step),
            cannot_complete_before: scheduled - Duration::seconds(max_buffer_secs),
            cannot_complete_after: scheduled - Duration::seconds(min_buffer_secs),
            completed_at: None,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        })
    }
}

fn explanation(recipe: &Recipe, step: &RecipeStep) -> String {
    let step_name = if step.name.is_empty() { &step.id } else { &step.name };
    let recipe_name = if recipe.name.is_empty() {
        &recipe.id
    } else {
        &recipe.name
    };
    format!("{step_name} for {recipe_name}")
}

/// Meal and recipe lookups memoized for one derivation.
struct RecipeLookup<'a> {
    reader: &'a dyn RecipeReader,
    meals: HashMap<String, Meal>,
    recipes: HashMap<String, Recipe>,
}

impl<'a> RecipeLookup<'a> {
    fn new(reader: &'a dyn RecipeReader) -> Self {
        Self {
            reader,
            meals: HashMap::new(),
            recipes: HashMap::new(),
        }
    }

    async fn meal(&mut self, meal_id: &str, option_id: &str) -> Result<Meal, PlanError> {
        if let Some(meal) = self.meals.get(meal_id) {
            return Ok(meal.clone());
        }
        let meal = self
            .reader
            .get_meal(meal_id)
            .await
            .map_err(|e| PlanError::Transient(format!("meal lookup failed: {e:#}")))?
            .ok_or_else(|| {
                PlanError::InconsistentPlan(format!(
                    "meal {meal_id} of option {option_id} does not exist"
                ))
            })?;
        self.meals.insert(meal_id.to_owned(), meal.clone());
        Ok(meal)
    }

    /// Batch-load recipes not yet cached. Ids the batch omits are looked up
    /// one at a time by [`Self::recipe`].
    async fn prefetch(&mut self, recipe_ids: &[String]) -> Result<(), PlanError> {
        let mut wanted: Vec<String> = recipe_ids
            .iter()
            .filter(|id| !self.recipes.contains_key(*id))
            .cloned()
            .collect();
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(());
        }
        let found = self
            .reader
            .get_recipes_with_ids(&wanted)
            .await
            .map_err(|e| PlanError::Transient(format!("recipe lookup failed: {e:#}")))?;
        for recipe in found {
            self.recipes.insert(recipe.id.clone(), recipe);
        }
        Ok(())
    }

    async fn recipe(&mut self, recipe_id: &str, meal_id: &str) -> Result<Recipe, PlanError> {
        if let Some(recipe) = self.recipes.get(recipe_id) {
            return Ok(recipe.clone());
        }
        let recipe = self
            .reader
            .get_recipe(recipe_id)
            .await
            .map_err(|e| PlanError::Transient(format!("recipe lookup failed: {e:#}")))?
            .ok_or_else(|| {
                PlanError::InconsistentPlan(format!(
                    "recipe {recipe_id} of meal {meal_id} does not exist"
                ))
            })?;
        self.recipes.insert(recipe_id.to_owned(), recipe.clone());
        Ok(recipe)
    }
}
