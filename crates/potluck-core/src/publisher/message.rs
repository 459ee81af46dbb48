//! Change message vocabulary.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every label a change message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MealPlanCreated,
    MealPlanUpdated,
    MealPlanArchived,
    MealPlanFinalized,
    MealPlanEventCreated,
    MealPlanEventArchived,
    MealPlanEventDecided,
    MealPlanOptionCreated,
    MealPlanOptionArchived,
    MealPlanOptionVoteCreated,
    MealPlanOptionVoteArchived,
    MealPlanTaskCreated,
    MealPlanTaskStatusChanged,
    MealPlanTaskArchived,
    MealPlanGroceryListItemCreated,
    MealPlanGroceryListItemUpdated,
    MealPlanGroceryListItemArchived,
}

impl EventType {
    pub const ALL: &'static [EventType] = &[
        Self::MealPlanCreated,
        Self::MealPlanUpdated,
        Self::MealPlanArchived,
        Self::MealPlanFinalized,
        Self::MealPlanEventCreated,
        Self::MealPlanEventArchived,
        Self::MealPlanEventDecided,
        Self::MealPlanOptionCreated,
        Self::MealPlanOptionArchived,
        Self::MealPlanOptionVoteCreated,
        Self::MealPlanOptionVoteArchived,
        Self::MealPlanTaskCreated,
        Self::MealPlanTaskStatusChanged,
        Self::MealPlanTaskArchived,
        Self::MealPlanGroceryListItemCreated,
        Self::MealPlanGroceryListItemUpdated,
        Self::MealPlanGroceryListItemArchived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MealPlanCreated => "meal_plan_created",
            Self::MealPlanUpdated => "meal_plan_updated",
            Self::MealPlanArchived => "meal_plan_archived",
            Self::MealPlanFinalized => "meal_plan_finalized",
            Self::MealPlanEventCreated => "meal_plan_event_created",
            Self::MealPlanEventArchived => "meal_plan_event_archived",
            Self::MealPlanEventDecided => "meal_plan_event_decided",
            Self::MealPlanOptionCreated => "meal_plan_option_created",
            Self::MealPlanOptionArchived => "meal_plan_option_archived",
            Self::MealPlanOptionVoteCreated => "meal_plan_option_vote_created",
            Self::MealPlanOptionVoteArchived => "meal_plan_option_vote_archived",
            Self::MealPlanTaskCreated => "meal_plan_task_created",
            Self::MealPlanTaskStatusChanged => "meal_plan_task_status_changed",
            Self::MealPlanTaskArchived => "meal_plan_task_archived",
            Self::MealPlanGroceryListItemCreated => "meal_plan_grocery_list_item_created",
            Self::MealPlanGroceryListItemUpdated => "meal_plan_grocery_list_item_updated",
            Self::MealPlanGroceryListItemArchived => "meal_plan_grocery_list_item_archived",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s:?}"))
    }
}

/// Keys allowed in a change message's context map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    MealPlanId,
    MealPlanEventId,
    MealPlanOptionId,
    MealPlanOptionVoteIds,
    MealPlanTaskId,
    MealPlanGroceryListItemId,
    VoterId,
    Abstained,
    TieBroken,
    Status,
}

/// A change produced by one committed store transaction.
///
/// `sequence` is drawn from the plan's durable counter inside that
/// transaction, so it increases in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub plan_id: String,
    pub event_type: EventType,
    pub context: BTreeMap<ContextKey, Value>,
    pub sequence: i64,
}

/// A change as delivered to sinks: the store's change plus the acting
/// identity from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub event_type: EventType,
    pub plan_id: String,
    pub context: BTreeMap<ContextKey, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
    pub sequence: i64,
}

/// Collects the changes of one transaction until sequence numbers are
/// reserved for them.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    plan_id: String,
    pending: Vec<(EventType, BTreeMap<ContextKey, Value>)>,
}

impl ChangeSet {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            pending: Vec::new(),
        }
    }

    /// Queue a change. `meal_plan_id` is always added to the context.
    pub fn push<I>(&mut self, event_type: EventType, context: I)
    where
        I: IntoIterator<Item = (ContextKey, Value)>,
    {
        let mut map: BTreeMap<ContextKey, Value> = context.into_iter().collect();
        map.insert(ContextKey::MealPlanId, Value::from(self.plan_id.clone()));
        self.pending.push((event_type, map));
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number the queued changes `first_sequence`, `first_sequence + 1`, ...
    pub fn seal(self, first_sequence: i64) -> Vec<Change> {
        let plan_id = self.plan_id;
        self.pending
            .into_iter()
            .zip(first_sequence..)
            .map(|((event_type, context), sequence)| Change {
                plan_id: plan_id.clone(),
                event_type,
                context,
                sequence,
            })
            .collect()
    }
}
