//! Grocery consolidation: one line per (ingredient, unit).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use potluck_db::models::{GroceryItemStatus, MealPlanGroceryListItem};

use crate::ports::{StepIngredient, UnitConverter};

/// A consolidated quantity of one ingredient in one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GroceryLine {
    pub ingredient_id: String,
    pub unit_id: String,
    pub min_qty: f64,
    /// Present only when every contributing ingredient line had a maximum.
    pub max_qty: Option<f64>,
}

impl GroceryLine {
    fn absorb(&mut self, min_qty: f64, max_qty: Option<f64>) {
        self.min_qty += min_qty;
        self.max_qty = match (self.max_qty, max_qty) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
    }

    pub fn into_item(
        self,
        id: String,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> MealPlanGroceryListItem {
        MealPlanGroceryListItem {
            id,
            plan_id: plan_id.to_owned(),
            ingredient_id: self.ingredient_id,
            measurement_unit_id: self.unit_id,
            min_qty: self.min_qty,
            max_qty: self.max_qty,
            status: GroceryItemStatus::Unknown,
            status_explanation: String::new(),
            purchased_upc: None,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

/// Sum ingredient lines, in the order given, into grocery lines sorted by
/// (ingredient, unit).
///
/// The first unit seen for an ingredient is its canonical unit. Lines in
/// other units are converted to it; a line that cannot be converted keeps
/// its own unit and forms a separate grocery line.
pub async fn consolidate(lines: &[StepIngredient], units: &dyn UnitConverter) -> Vec<GroceryLine> {
    let mut canonical: HashMap<&str, &str> = HashMap::new();
    let mut groups: BTreeMap<(String, String), GroceryLine> = BTreeMap::new();

    for line in lines {
        let target = *canonical
            .entry(line.ingredient_id.as_str())
            .or_insert(line.unit_id.as_str());

        let (unit, min_qty, max_qty) = if line.unit_id == target {
            (target, line.min_qty, line.max_qty)
        } else {
            match convert_line(units, line, target).await {
                Some((min_qty, max_qty)) => (target, min_qty, max_qty),
                None => {
                    debug!(
                        ingredient_id = %line.ingredient_id,
                        from = %line.unit_id,
                        to = %target,
                        "unit not convertible; keeping a separate grocery line"
                    );
                    (line.unit_id.as_str(), line.min_qty, line.max_qty)
                }
            }
        };

        groups
            .entry((line.ingredient_id.clone(), unit.to_owned()))
            .and_modify(|g| g.absorb(min_qty, max_qty))
            .or_insert_with(|| GroceryLine {
                ingredient_id: line.ingredient_id.clone(),
                unit_id: unit.to_owned(),
                min_qty,
                max_qty,
            });
    }

    groups.into_values().collect()
}

async fn convert_line(
    units: &dyn UnitConverter,
    line: &StepIngredient,
    target: &str,
) -> Option<(f64, Option<f64>)> {
    let min_qty = units.convert(line.min_qty, &line.unit_id, target).await.ok()?;
    let max_qty = match line.max_qty {
        Some(qty) => Some(units.convert(qty, &line.unit_id, target).await.ok()?),
        None => None,
    };
    Some((min_qty, max_qty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StaticUnits;

    fn line(ingredient: &str, unit: &str, min: f64, max: Option<f64>) -> StepIngredient {
        StepIngredient {
            ingredient_id: ingredient.to_owned(),
            unit_id: unit.to_owned(),
            min_qty: min,
            max_qty: max,
        }
    }

    #[tokio::test]
    async fn same_unit_lines_sum() {
        let units = StaticUnits::new();
        let lines = [line("flour", "g", 100.0, None), line("flour", "g", 100.0, None)];

        let out = consolidate(&lines, &units).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].min_qty, 200.0);
        assert_eq!(out[0].max_qty, None);
    }

    #[tokio::test]
    async fn max_is_summed_only_when_every_line_has_one() {
        let units = StaticUnits::new();
        let all = [
            line("salt", "g", 1.0, Some(2.0)),
            line("salt", "g", 3.0, Some(4.0)),
        ];
        let partial = [line("salt", "g", 1.0, Some(2.0)), line("salt", "g", 3.0, None)];

        assert_eq!(consolidate(&all, &units).await[0].max_qty, Some(6.0));
        assert_eq!(consolidate(&partial, &units).await[0].max_qty, None);
    }

    #[tokio::test]
    async fn other_units_convert_to_the_first_seen_unit() {
        let units = StaticUnits::new().with_factor("kg", "g", 1000.0);
        let lines = [line("sugar", "g", 250.0, None), line("sugar", "kg", 0.5, None)];

        let out = consolidate(&lines, &units).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].unit_id, "g");
        assert_eq!(out[0].min_qty, 750.0);
    }

    #[tokio::test]
    async fn unconvertible_units_stay_separate_and_sorted() {
        let units = StaticUnits::new();
        let lines = [
            line("milk", "ml", 200.0, None),
            line("eggs", "each", 2.0, None),
            line("milk", "cup", 1.0, None),
        ];

        let out = consolidate(&lines, &units).await;
        let keys: Vec<(&str, &str)> = out
            .iter()
            .map(|g| (g.ingredient_id.as_str(), g.unit_id.as_str()))
            .collect();
        assert_eq!(keys, [("eggs", "each"), ("milk", "cup"), ("milk", "ml")]);
    }
}
