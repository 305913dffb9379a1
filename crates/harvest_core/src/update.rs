use crate::{Effect, HaltReason, Msg, RunPhase, RunState};

/// Pure update function: applies a message to run state and returns any effects.
pub fn update(mut state: RunState, msg: Msg) -> (RunState, Vec<Effect>) {
    let effects = match msg {
        Msg::Start => {
            if *state.phase() == RunPhase::Idle {
                state.set_phase(RunPhase::Running);
            }
            Vec::new()
        }
        Msg::UnitFinished { category, outcome } => {
            // Units in flight at halt time still land in the summary.
            if *state.phase() != RunPhase::Idle {
                state.summary_mut().record(category, outcome);
            }
            Vec::new()
        }
        Msg::AuthExpired { detail } => halt(&mut state, HaltReason::AuthExpired { detail }),
        Msg::CancelRequested => halt(&mut state, HaltReason::Cancelled),
        Msg::SequenceExhausted => {
            if *state.phase() == RunPhase::Running {
                state.set_phase(RunPhase::Completed);
            }
            if state.phase().is_terminal() {
                vec![Effect::ReportSummary]
            } else {
                Vec::new()
            }
        }
    };

    (state, effects)
}

fn halt(state: &mut RunState, reason: HaltReason) -> Vec<Effect> {
    if *state.phase() != RunPhase::Running {
        return Vec::new();
    }
    state.set_phase(RunPhase::Halted(reason.clone()));
    vec![Effect::StopDispatch { reason }]
}
