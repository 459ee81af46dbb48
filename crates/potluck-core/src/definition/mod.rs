//! Plan definition files: TOML format and validated conversion into a
//! [`NewPlan`](crate::store::NewPlan).

pub mod parser;
pub mod toml_format;

pub use parser::{PlanDefinitionError, load_plan_definition, parse_plan_definition};
pub use toml_format::{EventToml, OptionToml, PlanDefinition, PlanMeta};
