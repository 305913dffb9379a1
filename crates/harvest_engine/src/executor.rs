use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use harvest_core::{process_number, Decision, HaltReason, UnitOutcome, WorkUnit};
use harvest_log::{harvest_debug, harvest_error, harvest_info, harvest_warn};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointError, CheckpointStore, CompletionRecord};
use crate::config::HarvestConfig;
use crate::credential::Credential;
use crate::gateway::{ApiGateway, Pacer};
use crate::persist::{ArtifactStore, PersistError};
use crate::types::{ApiError, ApiErrorKind};

/// Everything a worker needs for one run. Shared read-only across workers.
pub(crate) struct RunContext {
    pub(crate) gateway: Arc<dyn ApiGateway>,
    pub(crate) credential: Credential,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) checkpoints: Arc<CheckpointStore>,
    pub(crate) config: HarvestConfig,
    /// Cancelled when dispatching must stop, either on halt or shutdown.
    pub(crate) dispatch: CancellationToken,
}

/// Result of a retried call once the retry policy has reached a verdict.
pub(crate) enum Attempt<T> {
    Done(T),
    Permanent(ApiError),
    Exhausted(ApiError),
    Malformed(ApiError),
}

impl<T> Attempt<T> {
    pub(crate) fn outcome(&self) -> UnitOutcome {
        match self {
            Attempt::Done(_) => UnitOutcome::Succeeded,
            Attempt::Permanent(_) => UnitOutcome::PermanentError,
            Attempt::Exhausted(_) => UnitOutcome::Failed,
            Attempt::Malformed(_) => UnitOutcome::Malformed,
        }
    }
}

pub(crate) struct Executed {
    pub(crate) outcome: UnitOutcome,
    /// Artifact bytes, when requested and available.
    pub(crate) payload: Option<Vec<u8>>,
}

impl RunContext {
    pub(crate) fn stopped(&self) -> bool {
        self.dispatch.is_cancelled()
    }

    /// Drive one unit to a terminal outcome. `Err` means the run must halt.
    pub(crate) async fn execute(
        &self,
        unit: &WorkUnit,
        want_payload: bool,
    ) -> Result<Executed, HaltReason> {
        let key = unit.idempotency_key();
        let relative = unit.artifact_path();

        if let Some(record) = self.checkpoints.get(&key) {
            harvest_debug!("{} already recorded ({:?}); skipping", key, record.outcome);
            let payload = if want_payload && record.is_success() {
                self.read_artifact(&relative)
            } else {
                None
            };
            return Ok(Executed {
                outcome: UnitOutcome::Skipped,
                payload,
            });
        }

        if self.artifacts.exists(&relative) {
            harvest_info!("{} found on disk without a record; backfilling", key);
            if let Err(err) = self.mark(CompletionRecord::success(key.as_str())).await {
                harvest_error!("Failed to backfill record for {}: {}", key, err);
            }
            let payload = if want_payload {
                self.read_artifact(&relative)
            } else {
                None
            };
            return Ok(Executed {
                outcome: UnitOutcome::Skipped,
                payload,
            });
        }

        let attempt = self.attempt(&key, move || self.fetch_payload(unit)).await?;
        let outcome = attempt.outcome();
        match attempt {
            Attempt::Done(bytes) => Ok(self.complete(&key, &relative, bytes, want_payload).await),
            Attempt::Permanent(err) => {
                let record = CompletionRecord::permanent_error(key.as_str(), err.to_string());
                match self.mark(record).await {
                    Ok(_) => Ok(Executed {
                        outcome,
                        payload: None,
                    }),
                    Err(store_err) => {
                        harvest_error!("Failed to record permanent error for {}: {}", key, store_err);
                        Ok(Executed {
                            outcome: UnitOutcome::Failed,
                            payload: None,
                        })
                    }
                }
            }
            Attempt::Exhausted(_) | Attempt::Malformed(_) => Ok(Executed {
                outcome,
                payload: None,
            }),
        }
    }

    /// Retry `call` under the configured policy, pausing before every attempt.
    pub(crate) async fn attempt<T, F, Fut>(
        &self,
        key: &str,
        mut call: F,
    ) -> Result<Attempt<T>, HaltReason>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let policy = &self.config.retry;
        let mut wait = self.config.request_delay;
        let mut attempt = 1;
        loop {
            self.wait(wait).await?;
            let err = match call().await {
                Ok(value) => return Ok(Attempt::Done(value)),
                Err(err) if err.kind == ApiErrorKind::Cancelled => {
                    return Err(HaltReason::Cancelled);
                }
                Err(err) => err,
            };

            match policy.decide(err.class(), attempt) {
                Decision::Halt => {
                    harvest_error!("{}: session rejected on attempt {}: {}", key, attempt, err);
                    return Err(HaltReason::AuthExpired {
                        detail: err.to_string(),
                    });
                }
                Decision::RetryAfter(backoff) => {
                    harvest_warn!(
                        "{}: attempt {}/{} failed: {}; retrying in {:?}",
                        key,
                        attempt,
                        policy.max_attempts,
                        err,
                        backoff
                    );
                    wait = backoff;
                    attempt += 1;
                }
                Decision::GiveUp => {
                    harvest_error!("{}: giving up after {} attempts: {}", key, attempt, err);
                    return Ok(Attempt::Exhausted(err));
                }
                Decision::RecordPermanent => {
                    harvest_warn!("{}: permanent failure on attempt {}: {}", key, attempt, err);
                    return Ok(Attempt::Permanent(err));
                }
                Decision::SkipMalformed => {
                    harvest_warn!("{}: malformed response on attempt {}: {}", key, attempt, err);
                    return Ok(Attempt::Malformed(err));
                }
            }
        }
    }

    async fn wait(&self, duration: Duration) -> Result<(), HaltReason> {
        if self.stopped() {
            return Err(HaltReason::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.dispatch.cancelled() => Err(HaltReason::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn fetch_payload(&self, unit: &WorkUnit) -> Result<Vec<u8>, ApiError> {
        let credential = &self.credential;
        match unit {
            WorkUnit::PagedQuery {
                region,
                page,
                page_size,
            } => self
                .gateway
                .fetch_page(credential, *region, *page, *page_size, self)
                .await?
                .to_json_bytes(),
            WorkUnit::CaseLookup { case_id } => {
                let number = process_number(case_id).ok_or_else(|| {
                    ApiError::new(
                        ApiErrorKind::Malformed,
                        format!("case id {case_id:?} is not a process number"),
                    )
                })?;
                self.gateway
                    .fetch_case_json(credential, number, self)
                    .await?
                    .to_json_bytes()
            }
            WorkUnit::CertificateDownload {
                certificate_id,
                piece_type_id,
                ..
            } => {
                self.gateway
                    .fetch_certificate(credential, *certificate_id, *piece_type_id)
                    .await
            }
            WorkUnit::CsvExport { state_id, .. } => {
                let bytes = self.gateway.fetch_csv_export(credential, *state_id).await?;
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    return Err(ApiError::new(
                        ApiErrorKind::Malformed,
                        format!("empty csv export for state {state_id}"),
                    ));
                }
                Ok(bytes)
            }
        }
    }

    /// Payload first, record second: a crash in between leaves an artifact
    /// that the next run backfills.
    async fn complete(
        &self,
        key: &str,
        relative: &Path,
        bytes: Vec<u8>,
        want_payload: bool,
    ) -> Executed {
        let failed = Executed {
            outcome: UnitOutcome::Failed,
            payload: None,
        };
        let (target, bytes) = match self.store(relative, bytes).await {
            Ok(stored) => stored,
            Err(err) => {
                harvest_error!("{}: failed to write {:?}: {}", key, relative, err);
                return failed;
            }
        };
        if let Err(err) = self.mark(CompletionRecord::success(key)).await {
            harvest_error!("{}: payload saved but record failed: {}", key, err);
            return failed;
        }
        harvest_info!("{} saved to {:?} ({} bytes)", key, target, bytes.len());
        Executed {
            outcome: UnitOutcome::Succeeded,
            payload: want_payload.then_some(bytes),
        }
    }

    /// Atomic artifact write on the blocking pool; hands the bytes back.
    async fn store(&self, relative: &Path, bytes: Vec<u8>) -> Result<(PathBuf, Vec<u8>), PersistError> {
        let artifacts = self.artifacts.clone();
        let relative = relative.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<(PathBuf, Vec<u8>), PersistError> {
            let target = artifacts.write(&relative, &bytes)?;
            Ok((target, bytes))
        })
        .await
        .map_err(|err| PersistError::Io(io::Error::other(err.to_string())))?
    }

    /// Checkpoint write on the blocking pool.
    async fn mark(&self, record: CompletionRecord) -> Result<CompletionRecord, CheckpointError> {
        let checkpoints = Arc::clone(&self.checkpoints);
        tokio::task::spawn_blocking(move || checkpoints.mark(record))
            .await
            .map_err(|err| CheckpointError::Interrupted(err.to_string()))?
    }

    fn read_artifact(&self, relative: &Path) -> Option<Vec<u8>> {
        match self.artifacts.read(relative) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                harvest_warn!("Failed to read stored artifact {:?}: {}", relative, err);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Pacer for RunContext {
    async fn pause(&self) -> Result<(), ApiError> {
        self.wait(self.config.request_delay)
            .await
            .map_err(|reason| ApiError::new(ApiErrorKind::Cancelled, reason.to_string()))
    }
}
