use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Error returned when a stored or user-supplied string is not a member of
/// one of the fixed vocabularies below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Status of a meal plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    AwaitingVotes,
    Finalized,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingVotes => "awaiting_votes",
            Self::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_votes" => Ok(Self::AwaitingVotes),
            "finalized" => Ok(Self::Finalized),
            other => Err(ParseEnumError {
                kind: "plan status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// How a scoring tie that survives rank-1 counts and rank sums is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    OwnerPicks,
    RandomSeeded,
}

impl fmt::Display for TieBreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OwnerPicks => "owner_picks",
            Self::RandomSeeded => "random_seeded",
        };
        f.write_str(s)
    }
}

impl FromStr for TieBreakPolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner_picks" => Ok(Self::OwnerPicks),
            "random_seeded" => Ok(Self::RandomSeeded),
            other => Err(ParseEnumError {
                kind: "tie-break policy",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// Which meal of the day an event is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MealName {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl fmt::Display for MealName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        };
        f.write_str(s)
    }
}

impl FromStr for MealName {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "breakfast" => Ok(Self::Breakfast),
            "lunch" => Ok(Self::Lunch),
            "dinner" => Ok(Self::Dinner),
            "snack" => Ok(Self::Snack),
            other => Err(ParseEnumError {
                kind: "meal name",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// Status of a meal plan event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    AwaitingVotes,
    Decided,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingVotes => "awaiting_votes",
            Self::Decided => "decided",
        };
        f.write_str(s)
    }
}

impl FromStr for EventStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_votes" => Ok(Self::AwaitingVotes),
            "decided" => Ok(Self::Decided),
            other => Err(ParseEnumError {
                kind: "event status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// Status of a derived prep task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Unfinished,
    InProgress,
    Ignored,
    Canceled,
    Finished,
}

impl TaskStatus {
    /// Terminal statuses stamp `completed_at`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ignored | Self::Canceled | Self::Finished)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unfinished => "unfinished",
            Self::InProgress => "in_progress",
            Self::Ignored => "ignored",
            Self::Canceled => "canceled",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unfinished" => Ok(Self::Unfinished),
            "in_progress" => Ok(Self::InProgress),
            "ignored" => Ok(Self::Ignored),
            "canceled" => Ok(Self::Canceled),
            "finished" => Ok(Self::Finished),
            other => Err(ParseEnumError {
                kind: "task status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// Status of a grocery list line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GroceryItemStatus {
    Unknown,
    AlreadyHave,
    Needs,
    Unavailable,
    Acquired,
}

impl fmt::Display for GroceryItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::AlreadyHave => "already_have",
            Self::Needs => "needs",
            Self::Unavailable => "unavailable",
            Self::Acquired => "acquired",
        };
        f.write_str(s)
    }
}

impl FromStr for GroceryItemStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "already_have" => Ok(Self::AlreadyHave),
            "needs" => Ok(Self::Needs),
            "unavailable" => Ok(Self::Unavailable),
            "acquired" => Ok(Self::Acquired),
            other => Err(ParseEnumError {
                kind: "grocery item status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A meal plan -- the unit a household votes on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealPlan {
    pub id: String,
    pub owner_household_id: String,
    pub created_by_user: String,
    pub notes: String,
    pub status: PlanStatus,
    pub voting_deadline: DateTime<Utc>,
    pub tie_break_policy: TieBreakPolicy,
    pub change_sequence: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub derived_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// One slot in the plan's calendar (e.g. Tuesday dinner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealPlanEvent {
    pub id: String,
    pub plan_id: String,
    pub meal_name: MealName,
    pub scheduled_at: DateTime<Utc>,
    pub notes: String,
    pub status: EventStatus,
    pub chosen_option_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// A candidate meal for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealPlanOption {
    pub id: String,
    pub event_id: String,
    pub meal_id: String,
    pub notes: String,
    pub chosen: bool,
    pub tie_broken: bool,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// One voter's rank for one option, or their abstention marker for the
/// event (`abstain = true`, no rank).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealPlanOptionVote {
    pub id: String,
    pub option_id: String,
    pub event_id: String,
    pub voter_id: String,
    pub rank: Option<i32>,
    pub abstain: bool,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// A prep task derived from a chosen recipe step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealPlanTask {
    pub id: String,
    pub plan_id: String,
    pub event_id: String,
    pub option_id: String,
    pub recipe_id: String,
    pub recipe_step_id: String,
    pub depends_on_steps: Vec<String>,
    pub status: TaskStatus,
    pub status_explanation: String,
    pub cannot_complete_before: DateTime<Utc>,
    pub cannot_complete_after: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// A consolidated grocery list line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealPlanGroceryListItem {
    pub id: String,
    pub plan_id: String,
    pub ingredient_id: String,
    pub measurement_unit_id: String,
    pub min_qty: f64,
    pub max_qty: Option<f64>,
    pub status: GroceryItemStatus,
    pub status_explanation: String,
    pub purchased_upc: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_display_roundtrip() {
        for v in [PlanStatus::AwaitingVotes, PlanStatus::Finalized] {
            let parsed: PlanStatus = v.to_string().parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn plan_status_invalid() {
        let err = "draft".parse::<PlanStatus>().unwrap_err();
        assert_eq!(err.kind, "plan status");
        assert_eq!(err.to_string(), "invalid plan status: \"draft\"");
    }

    #[test]
    fn tie_break_policy_parses_snake_case() {
        assert_eq!(
            "random_seeded".parse::<TieBreakPolicy>().unwrap(),
            TieBreakPolicy::RandomSeeded
        );
        assert!("coin_flip".parse::<TieBreakPolicy>().is_err());
    }

    #[test]
    fn meal_name_display_roundtrip() {
        for v in [
            MealName::Breakfast,
            MealName::Lunch,
            MealName::Dinner,
            MealName::Snack,
        ] {
            let parsed: MealName = v.to_string().parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn meal_name_invalid() {
        assert!("brunch".parse::<MealName>().is_err());
    }

    #[test]
    fn task_status_terminal_states() {
        assert!(!TaskStatus::Unfinished.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Ignored.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(TaskStatus::Finished.is_terminal());
    }

    #[test]
    fn task_status_uses_snake_case() {
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            "in_progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
    }

    #[test]
    fn grocery_status_display_roundtrip() {
        for v in [
            GroceryItemStatus::Unknown,
            GroceryItemStatus::AlreadyHave,
            GroceryItemStatus::Needs,
            GroceryItemStatus::Unavailable,
            GroceryItemStatus::Acquired,
        ] {
            let parsed: GroceryItemStatus = v.to_string().parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn enums_serialize_like_display() {
        let json = serde_json::to_string(&EventStatus::AwaitingVotes).unwrap();
        assert_eq!(json, "\"awaiting_votes\"");
        let json = serde_json::to_string(&GroceryItemStatus::AlreadyHave).unwrap();
        assert_eq!(json, "\"already_have\"");
    }
}
