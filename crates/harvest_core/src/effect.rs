use crate::HaltReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Stop handing out new units; in-flight units may finish.
    StopDispatch { reason: HaltReason },
    ReportSummary,
}
