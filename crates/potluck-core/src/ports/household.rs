use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// Who belongs to a household. Used for voter eligibility and quorum.
#[async_trait]
pub trait HouseholdMembership: Send + Sync {
    /// Member user ids. An unknown household has no members.
    async fn members_of(&self, household_id: &str) -> Result<Vec<String>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn HouseholdMembership) {}
};

/// A fixed membership table.
#[derive(Debug, Clone, Default)]
pub struct StaticHouseholds {
    members: HashMap<String, Vec<String>>,
}

impl StaticHouseholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_household<I, S>(mut self, household_id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members.insert(
            household_id.into(),
            members.into_iter().map(Into::into).collect(),
        );
        self
    }
}

#[async_trait]
impl HouseholdMembership for StaticHouseholds {
    async fn members_of(&self, household_id: &str) -> Result<Vec<String>> {
        Ok(self.members.get(household_id).cloned().unwrap_or_default())
    }
}
