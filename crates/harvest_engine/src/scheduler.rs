use std::sync::Arc;

use harvest_core::{
    update, Effect, HaltReason, Msg, RunPhase, RunState, RunSummary, UnitCategory, UnitOutcome,
    WorkUnit,
};
use harvest_log::{harvest_error, harvest_info, harvest_warn};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::config::HarvestConfig;
use crate::credential::Credential;
use crate::executor::RunContext;
use crate::gateway::ApiGateway;
use crate::persist::ArtifactStore;
use crate::planner::{certificate_units, halt_message, produce, PlanError, Traversal};
use crate::types::SearchPage;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),
    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("harvest task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub phase: RunPhase,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.phase == RunPhase::Completed
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        match &self.phase {
            RunPhase::Halted(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Drives a traversal through a pool of workers against one gateway.
pub struct Harvester {
    gateway: Arc<dyn ApiGateway>,
    credential: Credential,
    checkpoints: Arc<CheckpointStore>,
    config: HarvestConfig,
    shutdown: CancellationToken,
}

impl Harvester {
    pub fn new(
        gateway: Arc<dyn ApiGateway>,
        credential: Credential,
        config: HarvestConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, HarvestError> {
        let checkpoints = Arc::new(CheckpointStore::open(&config.data_dir)?);
        Ok(Self {
            gateway,
            credential,
            checkpoints,
            config,
            shutdown,
        })
    }

    pub async fn run(&self, traversal: Traversal) -> Result<RunReport, HarvestError> {
        let dispatch = self.shutdown.child_token();
        let ctx = Arc::new(RunContext {
            gateway: Arc::clone(&self.gateway),
            credential: self.credential.clone(),
            artifacts: ArtifactStore::new(self.config.data_dir.clone()),
            checkpoints: Arc::clone(&self.checkpoints),
            config: self.config.clone(),
            dispatch: dispatch.clone(),
        });
        let workers = self.config.workers.max(1);
        harvest_info!("Starting {} with {} worker(s)", traversal_label(&traversal), workers);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (unit_tx, unit_rx) = mpsc::channel::<WorkUnit>(workers * 2);
        let unit_rx = Arc::new(Mutex::new(unit_rx));

        let mut state = apply(RunState::new(), Msg::Start, &dispatch);

        let producer = {
            let ctx = Arc::clone(&ctx);
            let events = event_tx.clone();
            tokio::spawn(async move { produce(&ctx, traversal, unit_tx, events).await })
        };
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                tokio::spawn(worker(
                    Arc::clone(&ctx),
                    Arc::clone(&unit_rx),
                    event_tx.clone(),
                ))
            })
            .collect();
        drop(event_tx);

        while let Some(msg) = event_rx.recv().await {
            state = apply(state, msg, &dispatch);
        }

        for handle in handles {
            handle
                .await
                .map_err(|err| HarvestError::Task(err.to_string()))?;
        }
        let planned = producer
            .await
            .map_err(|err| HarvestError::Task(err.to_string()))?;

        if self.shutdown.is_cancelled() {
            state = apply(state, Msg::CancelRequested, &dispatch);
        }
        if let Err(err) = planned {
            harvest_error!("Traversal aborted: {}", err);
            return Err(err.into());
        }
        state = apply(state, Msg::SequenceExhausted, &dispatch);

        Ok(RunReport {
            phase: state.phase().clone(),
            summary: state.summary().clone(),
        })
    }
}

fn traversal_label(traversal: &Traversal) -> &'static str {
    match traversal {
        Traversal::Hierarchy { .. } => "hierarchical harvest",
        Traversal::Cases { .. } => "case harvest",
        Traversal::Exports { .. } => "csv export download",
    }
}

fn apply(state: RunState, msg: Msg, dispatch: &CancellationToken) -> RunState {
    let (state, effects) = update(state, msg);
    for effect in effects {
        match effect {
            Effect::StopDispatch { reason } => {
                harvest_warn!("Halting: {}", reason);
                dispatch.cancel();
            }
            Effect::ReportSummary => {
                harvest_info!("Run {:?}; summary:\n{}", state.phase(), state.summary());
            }
        }
    }
    state
}

async fn worker(
    ctx: Arc<RunContext>,
    units: Arc<Mutex<mpsc::Receiver<WorkUnit>>>,
    events: mpsc::UnboundedSender<Msg>,
) {
    loop {
        let next = {
            let mut units = units.lock().await;
            tokio::select! {
                biased;
                _ = ctx.dispatch.cancelled() => None,
                unit = units.recv() => unit,
            }
        };
        let Some(unit) = next else {
            break;
        };
        if let Err(reason) = run_unit(&ctx, &unit, &events).await {
            let _ = events.send(halt_message(reason));
            break;
        }
    }
}

/// Execute `unit` and any units its result reveals.
async fn run_unit(
    ctx: &RunContext,
    unit: &WorkUnit,
    events: &mpsc::UnboundedSender<Msg>,
) -> Result<(), HaltReason> {
    let follow_ups = match unit {
        WorkUnit::PagedQuery { .. } => ctx.config.download_certificates,
        _ => unit.has_follow_ups(),
    };
    let executed = ctx.execute(unit, follow_ups).await?;
    finished(events, unit.category(), executed.outcome);

    let Some(payload) = executed.payload else {
        return Ok(());
    };
    let page = match SearchPage::from_json_bytes(&payload) {
        Ok(page) => page,
        Err(err) => {
            harvest_warn!("{}: stored result unreadable: {}", unit.idempotency_key(), err);
            return Ok(());
        }
    };
    let (certificates, malformed) = certificate_units(&page);
    if malformed > 0 {
        harvest_warn!(
            "{}: {} results without certificate ids",
            unit.idempotency_key(),
            malformed
        );
    }
    for _ in 0..malformed {
        finished(events, UnitCategory::Certificate, UnitOutcome::Malformed);
    }
    for certificate in &certificates {
        let executed = ctx.execute(certificate, false).await?;
        finished(events, certificate.category(), executed.outcome);
    }
    Ok(())
}

fn finished(events: &mpsc::UnboundedSender<Msg>, category: UnitCategory, outcome: UnitOutcome) {
    let _ = events.send(Msg::UnitFinished { category, outcome });
}
