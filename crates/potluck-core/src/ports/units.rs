use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// The converter has no path between two units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert {from} to {to}")]
pub struct NotConvertible {
    pub from: String,
    pub to: String,
}

/// Converts quantities between measurement units.
#[async_trait]
pub trait UnitConverter: Send + Sync {
    async fn convert(&self, qty: f64, from: &str, to: &str) -> Result<f64, NotConvertible>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn UnitConverter) {}
};

/// Fixed conversion factors. Each registered factor also serves the
/// inverse direction; converting a unit to itself always succeeds.
#[derive(Debug, Clone, Default)]
pub struct StaticUnits {
    factors: HashMap<(String, String), f64>,
}

impl StaticUnits {
    pub fn new() -> Self {
        Self::default()
    }

    /// `1 from = factor to`.
    pub fn with_factor(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        factor: f64,
    ) -> Self {
        let (from, to) = (from.into(), to.into());
        if factor > 0.0 {
            self.factors.insert((to.clone(), from.clone()), 1.0 / factor);
        }
        self.factors.insert((from, to), factor);
        self
    }
}

#[async_trait]
impl UnitConverter for StaticUnits {
    async fn convert(&self, qty: f64, from: &str, to: &str) -> Result<f64, NotConvertible> {
        if from == to {
            return Ok(qty);
        }
        self.factors
            .get(&(from.to_owned(), to.to_owned()))
            .map(|factor| qty * factor)
            .ok_or_else(|| NotConvertible {
                from: from.to_owned(),
                to: to.to_owned(),
            })
    }
}
