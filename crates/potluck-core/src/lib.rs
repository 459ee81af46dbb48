//! Household meal-plan voting: the plan store, voting coordinator,
//! derivation engine and change publisher.
//!
//! ```text
//! PlanService
//!     |
//!     v
//! VotingCoordinator --ballot/decide/finalize--> PlanStore (Pg | Memory)
//!     |        |                                   |
//!     |        +--finalized--> DerivationEngine     | Outcome { value, changes }
//!     |                          (RecipeReader,     v
//!     |                           UnitConverter)  Publisher --> ChangeSink*
//!     v
//! ExpirySweep (periodic CloseExpiredEvents)
//! ```

pub mod context;
pub mod definition;
pub mod derivation;
pub mod error;
pub mod ports;
pub mod publisher;
pub mod service;
pub mod store;
pub mod sweep;
pub mod voting;

pub use context::RequestContext;
pub use error::PlanError;
pub use service::PlanService;
