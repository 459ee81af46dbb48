//! Voting Coordinator: ballot intake, decision, finalization and the
//! hand-off to derivation.

pub mod coordinator;
pub mod tally;

pub use coordinator::{
    MissingVote, SweepFailure, SweepReport, VotingCoordinator, VotingOutcome,
};
pub use tally::{OptionScore, TallyResult, tally};
