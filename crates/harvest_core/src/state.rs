use std::fmt;

use crate::RunSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    AuthExpired { detail: String },
    Cancelled,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::AuthExpired { detail } => write!(
                f,
                "session credential expired or was rejected ({detail}); \
                 re-authenticate in the browser, save a fresh cookies file and resume"
            ),
            HaltReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Halted(HaltReason),
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Halted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunState {
    phase: RunPhase,
    summary: RunSummary,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// New units may be handed to workers.
    pub fn is_dispatching(&self) -> bool {
        self.phase == RunPhase::Running
    }

    pub(crate) fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
    }

    pub(crate) fn summary_mut(&mut self) -> &mut RunSummary {
        &mut self.summary
    }
}
