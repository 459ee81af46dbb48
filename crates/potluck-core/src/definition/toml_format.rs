//! TOML format types for plan definition files.
//!
//! Timestamps are RFC 3339 strings; enum-valued fields are their
//! snake_case labels. Both are checked by the parser.

use serde::{Deserialize, Serialize};

/// Top-level structure of a plan definition file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDefinition {
    pub plan: PlanMeta,
    #[serde(default)]
    pub events: Vec<EventToml>,
}

/// Plan-level settings in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMeta {
    /// Owning household id.
    pub household: String,
    /// User id of the plan owner; must belong to the household.
    pub created_by: String,
    /// When voting closes, e.g. `"2030-03-01T18:00:00Z"`.
    pub voting_deadline: String,
    /// `owner_picks` or `random_seeded`.
    #[serde(default = "default_tie_break")]
    pub tie_break: String,
    #[serde(default)]
    pub notes: String,
}

/// A single `[[events]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventToml {
    /// `breakfast`, `lunch`, `dinner` or `snack`.
    pub meal: String,
    pub scheduled_at: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub options: Vec<OptionToml>,
}

/// A single `[[events.options]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionToml {
    pub meal_id: String,
    #[serde(default)]
    pub notes: String,
}

fn default_tie_break() -> String {
    "owner_picks".to_owned()
}
