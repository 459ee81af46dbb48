//! Plan definition parser with validation.
//!
//! Parses a definition file and checks:
//! - The household, owner and every option's meal id are non-empty.
//! - Timestamps are RFC 3339 and events are scheduled after the deadline.
//! - Meal names and the tie-break policy are known labels.
//! - Every event has at least one option and no meal twice.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

use potluck_db::models::{MealName, TieBreakPolicy};

use super::toml_format::PlanDefinition;
use crate::store::{NewEvent, NewOption, NewPlan, rules::MAX_OPTIONS_PER_EVENT};

/// Errors that can occur while reading a plan definition.
#[derive(Debug, Error)]
pub enum PlanDefinitionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("invalid timestamp {value:?} for {field}: {reason}")]
    InvalidTimestamp {
        field: String,
        value: String,
        reason: String,
    },

    #[error("invalid tie_break {0:?} (expected owner_picks or random_seeded)")]
    InvalidTieBreak(String),

    #[error("invalid meal {value:?} on event {index} (expected breakfast, lunch, dinner, or snack)")]
    InvalidMeal { index: usize, value: String },

    #[error("event {index} is scheduled at {scheduled_at}, before voting closes")]
    ScheduledBeforeDeadline {
        index: usize,
        scheduled_at: DateTime<Utc>,
    },

    #[error("event {index} has no options")]
    NoOptions { index: usize },

    #[error("event {index} has {count} options; at most {max} are allowed", max = MAX_OPTIONS_PER_EVENT)]
    TooManyOptions { index: usize, count: usize },

    #[error("event {index} offers meal {meal_id:?} twice")]
    DuplicateOption { index: usize, meal_id: String },

    #[error("plan must contain at least one event")]
    NoEvents,
}

/// Parse and validate a plan definition into a [`NewPlan`].
pub fn parse_plan_definition(content: &str) -> Result<NewPlan, PlanDefinitionError> {
    let definition: PlanDefinition = toml::from_str(content)?;
    into_new_plan(&definition)
}

/// Read, parse and validate a plan definition file.
pub fn load_plan_definition(path: &Path) -> Result<NewPlan, PlanDefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| PlanDefinitionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_plan_definition(&content)
}

fn into_new_plan(definition: &PlanDefinition) -> Result<NewPlan, PlanDefinitionError> {
    let meta = &definition.plan;
    if meta.household.trim().is_empty() {
        return Err(PlanDefinitionError::MissingField("plan.household"));
    }
    if meta.created_by.trim().is_empty() {
        return Err(PlanDefinitionError::MissingField("plan.created_by"));
    }
    let voting_deadline = timestamp("plan.voting_deadline", &meta.voting_deadline)?;
    let tie_break_policy = meta
        .tie_break
        .parse::<TieBreakPolicy>()
        .map_err(|_| PlanDefinitionError::InvalidTieBreak(meta.tie_break.clone()))?;

    if definition.events.is_empty() {
        return Err(PlanDefinitionError::NoEvents);
    }

    let mut events = Vec::with_capacity(definition.events.len());
    for (index, event) in definition.events.iter().enumerate() {
        let meal_name = event
            .meal
            .parse::<MealName>()
            .map_err(|_| PlanDefinitionError::InvalidMeal {
                index,
                value: event.meal.clone(),
            })?;
        let field = format!("events[{index}].scheduled_at");
        let scheduled_at = timestamp(&field, &event.scheduled_at)?;
        if scheduled_at < voting_deadline {
            return Err(PlanDefinitionError::ScheduledBeforeDeadline {
                index,
                scheduled_at,
            });
        }

        if event.options.is_empty() {
            return Err(PlanDefinitionError::NoOptions { index });
        }
        if event.options.len() > MAX_OPTIONS_PER_EVENT {
            return Err(PlanDefinitionError::TooManyOptions {
                index,
                count: event.options.len(),
            });
        }
        let mut seen = HashSet::new();
        let mut options = Vec::with_capacity(event.options.len());
        for option in &event.options {
            if option.meal_id.trim().is_empty() {
                return Err(PlanDefinitionError::MissingField("events.options.meal_id"));
            }
            if !seen.insert(option.meal_id.as_str()) {
                return Err(PlanDefinitionError::DuplicateOption {
                    index,
                    meal_id: option.meal_id.clone(),
                });
            }
            options.push(NewOption {
                meal_id: option.meal_id.clone(),
                notes: option.notes.clone(),
            });
        }

        events.push(NewEvent {
            meal_name,
            scheduled_at,
            notes: event.notes.clone(),
            options,
        });
    }

    Ok(NewPlan {
        owner_household_id: meta.household.clone(),
        created_by_user: meta.created_by.clone(),
        notes: meta.notes.clone(),
        voting_deadline,
        tie_break_policy,
        events,
    })
}

fn timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, PlanDefinitionError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PlanDefinitionError::InvalidTimestamp {
            field: field.to_owned(),
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const VALID: &str = r#"
[plan]
household = "h1"
created_by = "u1"
voting_deadline = "2030-03-01T18:00:00Z"
notes = "first week"

[[events]]
meal = "dinner"
scheduled_at = "2030-03-02T19:00:00+01:00"

[[events.options]]
meal_id = "pancakes"

[[events.options]]
meal_id = "bread"
notes = "sourdough if possible"

[[events]]
meal = "breakfast"
scheduled_at = "2030-03-03T08:00:00Z"

[[events.options]]
meal_id = "porridge"
"#;

    #[test]
    fn parse_valid_definition() {
        let plan = parse_plan_definition(VALID).expect("should parse");
        assert_eq!(plan.owner_household_id, "h1");
        assert_eq!(plan.tie_break_policy, TieBreakPolicy::OwnerPicks);
        assert_eq!(
            plan.voting_deadline,
            Utc.with_ymd_and_hms(2030, 3, 1, 18, 0, 0).unwrap()
        );
        assert_eq!(plan.events.len(), 2);
        assert_eq!(plan.events[0].meal_name, MealName::Dinner);
        assert_eq!(
            plan.events[0].scheduled_at,
            Utc.with_ymd_and_hms(2030, 3, 2, 18, 0, 0).unwrap()
        );
        assert_eq!(plan.events[0].options[1].notes, "sourdough if possible");
    }

    #[test]
    fn rejects_missing_events() {
        let toml_str = r#"
[plan]
household = "h1"
created_by = "u1"
voting_deadline = "2030-03-01T18:00:00Z"
"#;
        let err = parse_plan_definition(toml_str).unwrap_err();
        assert!(
            matches!(err, PlanDefinitionError::NoEvents),
            "expected NoEvents, got: {err}"
        );
    }

    #[test]
    fn rejects_unknown_meal_name() {
        let toml_str = VALID.replacen("meal = \"breakfast\"", "meal = \"brunch\"", 1);
        let err = parse_plan_definition(&toml_str).unwrap_err();
        assert!(
            matches!(err, PlanDefinitionError::InvalidMeal { index: 1, ref value } if value == "brunch"),
            "expected InvalidMeal, got: {err}"
        );
    }

    #[test]
    fn rejects_unknown_tie_break() {
        let toml_str = VALID.replacen("notes = \"first week\"", "tie_break = \"coin_flip\"", 1);
        let err = parse_plan_definition(&toml_str).unwrap_err();
        assert!(
            matches!(err, PlanDefinitionError::InvalidTieBreak(ref v) if v == "coin_flip"),
            "expected InvalidTieBreak, got: {err}"
        );
    }

    #[test]
    fn rejects_bad_timestamp() {
        let toml_str = VALID.replacen("2030-03-01T18:00:00Z", "next tuesday", 1);
        let err = parse_plan_definition(&toml_str).unwrap_err();
        assert!(
            matches!(err, PlanDefinitionError::InvalidTimestamp { ref field, .. } if field == "plan.voting_deadline"),
            "expected InvalidTimestamp, got: {err}"
        );
    }

    #[test]
    fn rejects_event_before_deadline() {
        let toml_str = VALID.replacen("2030-03-03T08:00:00Z", "2030-03-01T08:00:00Z", 1);
        let err = parse_plan_definition(&toml_str).unwrap_err();
        assert!(
            matches!(err, PlanDefinitionError::ScheduledBeforeDeadline { index: 1, .. }),
            "expected ScheduledBeforeDeadline, got: {err}"
        );
    }

    #[test]
    fn rejects_duplicate_meal_in_event() {
        let toml_str = VALID.replacen("meal_id = \"bread\"", "meal_id = \"pancakes\"", 1);
        let err = parse_plan_definition(&toml_str).unwrap_err();
        assert!(
            matches!(err, PlanDefinitionError::DuplicateOption { index: 0, ref meal_id } if meal_id == "pancakes"),
            "expected DuplicateOption, got: {err}"
        );
    }

    #[test]
    fn rejects_event_without_options() {
        let toml_str = r#"
[plan]
household = "h1"
created_by = "u1"
voting_deadline = "2030-03-01T18:00:00Z"

[[events]]
meal = "lunch"
scheduled_at = "2030-03-02T12:00:00Z"
"#;
        let err = parse_plan_definition(toml_str).unwrap_err();
        assert!(
            matches!(err, PlanDefinitionError::NoOptions { index: 0 }),
            "expected NoOptions, got: {err}"
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_plan_definition(Path::new("/nonexistent/plan.toml")).unwrap_err();
        assert!(matches!(err, PlanDefinitionError::Io { .. }), "got: {err}");
    }
}
