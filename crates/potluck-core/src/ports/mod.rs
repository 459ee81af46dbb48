//! Interfaces to the collaborators the core consumes.
//!
//! Recipes, unit conversions and household membership live outside this
//! workspace; the core only sees them through these traits. All traits are
//! object-safe and are held as `Arc<dyn Trait>`.

pub mod clock;
pub mod household;
pub mod ids;
pub mod recipes;
pub mod units;

pub use clock::{Clock, ManualClock, SystemClock};
pub use household::{HouseholdMembership, StaticHouseholds};
pub use ids::{IdGenerator, SeededIdGenerator, UuidIdGenerator};
pub use recipes::{
    Meal, PrepWindow, Recipe, RecipeReader, RecipeStep, StaticRecipes, StepIngredient,
};
pub use units::{NotConvertible, StaticUnits, UnitConverter};
