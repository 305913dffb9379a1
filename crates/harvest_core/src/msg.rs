use crate::{UnitCategory, UnitOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Credential and planner are ready.
    Start,
    /// A unit reached a terminal outcome.
    UnitFinished {
        category: UnitCategory,
        outcome: UnitOutcome,
    },
    /// The platform rejected the session.
    AuthExpired { detail: String },
    /// Run-wide cancellation signal.
    CancelRequested,
    /// Planner and workers are drained.
    SequenceExhausted,
}
