use std::collections::HashSet;
use std::path::Path;

use harvest_core::{
    effective_page_size, municipalities_metadata_path, normalize_case_id, plan_municipality,
    plan_state, process_number, resume_index, states_metadata_path, HaltReason, Msg,
    PartitionPlan, Region, RegionId, RegionPath, RegionResultCount, UnitCategory, UnitOutcome,
    WorkUnit,
};
use harvest_log::{harvest_debug, harvest_info, harvest_warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::executor::{Attempt, RunContext};
use crate::merge::CaseRow;
use crate::types::SearchPage;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("start state {0} is not in the state list")]
    UnknownStartState(RegionId),
    #[error("start municipality {municipality_id} is not in state {state_id}")]
    UnknownStartMunicipality {
        state_id: RegionId,
        municipality_id: RegionId,
    },
    #[error("start row {start_row} is past the end of the case list ({rows} rows)")]
    StartRowOutOfRange { start_row: usize, rows: usize },
    #[error("state list unavailable: {0}")]
    RegionsUnavailable(String),
}

/// Which work-unit sequence a run walks.
#[derive(Debug, Clone)]
pub enum Traversal {
    /// State then municipality buckets of the search endpoint.
    Hierarchy {
        start_state: Option<RegionId>,
        /// Honoured only inside `start_state`.
        start_municipality: Option<RegionId>,
    },
    /// One case lookup per merged CSV row.
    Cases {
        rows: Vec<CaseRow>,
        start_row: usize,
        max_rows: Option<usize>,
    },
    /// One CSV export per state with id >= `start_state`.
    Exports { start_state: Option<RegionId> },
}

/// Certificate downloads listed in a case search result, plus the number of
/// entries that lack usable ids.
pub fn certificate_units(page: &SearchPage) -> (Vec<WorkUnit>, usize) {
    let mut seen = HashSet::new();
    let mut units = Vec::new();
    let mut malformed = 0;
    for item in &page.content {
        let certificate_id = item.get("id").and_then(positive_id);
        let piece_type_id = item.get("idTipoPeca").and_then(positive_id);
        let (Some(certificate_id), Some(piece_type_id)) = (certificate_id, piece_type_id) else {
            malformed += 1;
            continue;
        };
        if !seen.insert((certificate_id, piece_type_id)) {
            continue;
        }
        let owner_name = item
            .get("nomePessoa")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        units.push(WorkUnit::CertificateDownload {
            certificate_id,
            piece_type_id,
            owner_name,
        });
    }
    (units, malformed)
}

fn positive_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionEntry {
    id: RegionId,
    #[serde(default)]
    nome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sigla: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatesSnapshot {
    estados: Vec<RegionEntry>,
    total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct MunicipalitiesSnapshot {
    uf_id: RegionId,
    uf_name: String,
    municipios: Vec<RegionEntry>,
    total: usize,
}

fn entry(region: &Region) -> RegionEntry {
    RegionEntry {
        id: region.id,
        nome: region.name.clone(),
        sigla: region.abbrev.clone(),
    }
}

enum Interrupt {
    /// The run halted or was cancelled; the collector already knows.
    Halted,
    Failed(PlanError),
}

impl From<PlanError> for Interrupt {
    fn from(err: PlanError) -> Self {
        Interrupt::Failed(err)
    }
}

/// Halt reasons as run messages.
pub(crate) fn halt_message(reason: HaltReason) -> Msg {
    match reason {
        HaltReason::AuthExpired { detail } => Msg::AuthExpired { detail },
        HaltReason::Cancelled => Msg::CancelRequested,
    }
}

/// Walk `traversal`, feeding units to the workers. First pages and listings run
/// here, interleaved with the workers draining earlier units.
pub(crate) async fn produce(
    ctx: &RunContext,
    traversal: Traversal,
    units: mpsc::Sender<WorkUnit>,
    events: mpsc::UnboundedSender<Msg>,
) -> Result<(), PlanError> {
    let planner = Planner { ctx, units, events };
    let result = match traversal {
        Traversal::Hierarchy {
            start_state,
            start_municipality,
        } => planner.hierarchy(start_state, start_municipality).await,
        Traversal::Cases {
            rows,
            start_row,
            max_rows,
        } => planner.cases(&rows, start_row, max_rows).await,
        Traversal::Exports { start_state } => planner.exports(start_state).await,
    };
    match result {
        Ok(()) | Err(Interrupt::Halted) => Ok(()),
        Err(Interrupt::Failed(err)) => Err(err),
    }
}

struct Planner<'a> {
    ctx: &'a RunContext,
    units: mpsc::Sender<WorkUnit>,
    events: mpsc::UnboundedSender<Msg>,
}

impl Planner<'_> {
    async fn hierarchy(
        &self,
        start_state: Option<RegionId>,
        start_municipality: Option<RegionId>,
    ) -> Result<(), Interrupt> {
        let states = self.states().await?;
        let first = resume_index(states.iter().map(|state| state.id), start_state)
            .ok_or(PlanError::UnknownStartState(start_state.unwrap_or_default()))?;

        for state in &states[first..] {
            if self.ctx.stopped() {
                return Err(Interrupt::Halted);
            }
            let resume_at = start_municipality.filter(|_| Some(state.id) == start_state);
            self.partition_state(state, resume_at).await?;
        }
        Ok(())
    }

    async fn partition_state(
        &self,
        state: &Region,
        start_municipality: Option<RegionId>,
    ) -> Result<(), Interrupt> {
        // Resuming inside a state means it was already being descended.
        if start_municipality.is_none() {
            let requested = self.ctx.config.page_size;
            let region = RegionPath::state(state.id);
            let Some(first_page) = self.first_page(region, requested).await? else {
                return Ok(());
            };
            let page_size = effective_page_size(requested, first_page.size);
            let count = RegionResultCount {
                region,
                total_elements: first_page.total_elements,
            };
            harvest_info!(
                "State {} ({}): {} results",
                state.label(),
                state.id,
                count.total_elements
            );
            match plan_state(&count, page_size, &self.ctx.config.partition_policy()) {
                PartitionPlan::Pages(units) => {
                    let reused = (page_size == requested).then_some(&first_page);
                    return self.dispatch_pages(units, reused).await;
                }
                PartitionPlan::Descend => {
                    harvest_info!("Descending into the municipalities of {}", state.label());
                }
            }
        }
        self.descend(state, start_municipality).await
    }

    async fn descend(
        &self,
        state: &Region,
        start_municipality: Option<RegionId>,
    ) -> Result<(), Interrupt> {
        let Some(municipalities) = self.municipalities(state).await? else {
            return Ok(());
        };
        let first = resume_index(municipalities.iter().map(|m| m.id), start_municipality).ok_or(
            PlanError::UnknownStartMunicipality {
                state_id: state.id,
                municipality_id: start_municipality.unwrap_or_default(),
            },
        )?;

        let requested = self.ctx.config.page_size;
        let policy = self.ctx.config.partition_policy();
        for municipality in &municipalities[first..] {
            if self.ctx.stopped() {
                return Err(Interrupt::Halted);
            }
            let region = RegionPath::municipality(state.id, municipality.id);
            let Some(first_page) = self.first_page(region, requested).await? else {
                continue;
            };
            let page_size = effective_page_size(requested, first_page.size);
            let count = RegionResultCount {
                region,
                total_elements: first_page.total_elements,
            };
            if count.total_elements > policy.max_results_per_combination {
                harvest_warn!(
                    "{} ({}) has {} results; only the first {} are reachable",
                    municipality.name,
                    region,
                    count.total_elements,
                    policy.max_results_per_combination
                );
            } else {
                harvest_debug!("{} ({}): {} results", municipality.name, region, count.total_elements);
            }
            let units = plan_municipality(&count, page_size, &policy);
            let reused = (page_size == requested).then_some(&first_page);
            self.dispatch_pages(units, reused).await?;
        }
        Ok(())
    }

    async fn cases(
        &self,
        rows: &[CaseRow],
        start_row: usize,
        max_rows: Option<usize>,
    ) -> Result<(), Interrupt> {
        if start_row > rows.len() {
            return Err(PlanError::StartRowOutOfRange {
                start_row,
                rows: rows.len(),
            }
            .into());
        }
        let window = &rows[start_row..];
        let window = &window[..max_rows.unwrap_or(window.len()).min(window.len())];
        harvest_info!(
            "Planning {} case rows starting at row {}",
            window.len(),
            start_row
        );

        let mut seen = HashSet::new();
        for (offset, row) in window.iter().enumerate() {
            if self.ctx.stopped() {
                return Err(Interrupt::Halted);
            }
            let case_id = normalize_case_id(&row.case_number);
            if process_number(&case_id).is_none() {
                harvest_warn!(
                    "Row {}: {:?} is not a process number; skipping",
                    start_row + offset,
                    row.case_number
                );
                self.report(UnitCategory::Case, UnitOutcome::Malformed);
                continue;
            }
            if !seen.insert(case_id.clone()) {
                self.report(UnitCategory::Case, UnitOutcome::Skipped);
                continue;
            }
            self.dispatch(WorkUnit::CaseLookup { case_id }).await?;
        }
        Ok(())
    }

    async fn exports(&self, start_state: Option<RegionId>) -> Result<(), Interrupt> {
        let states = self.states().await?;
        let selected: Vec<&Region> = states
            .iter()
            .filter(|state| start_state.is_none_or(|start| state.id >= start))
            .collect();
        if selected.is_empty() {
            harvest_warn!("No state with id >= {:?}; nothing to export", start_state);
        }
        for state in selected {
            self.dispatch(WorkUnit::CsvExport {
                state_id: state.id,
                state_abbrev: state.abbrev.clone().unwrap_or_default(),
            })
            .await?;
        }
        Ok(())
    }

    /// The state list, from the metadata snapshot when one exists.
    async fn states(&self) -> Result<Vec<Region>, Interrupt> {
        let relative = states_metadata_path();
        if let Some(snapshot) = self.read_snapshot::<StatesSnapshot>(&relative) {
            if !snapshot.estados.is_empty() {
                self.report(UnitCategory::Metadata, UnitOutcome::Skipped);
                return Ok(snapshot
                    .estados
                    .into_iter()
                    .map(|entry| Region::state(entry.id, entry.nome, entry.sigla))
                    .collect());
            }
        }

        let gateway = &self.ctx.gateway;
        let credential = &self.ctx.credential;
        let attempt = self
            .ctx
            .attempt("metadata:states", move || gateway.list_states(credential))
            .await
            .map_err(|reason| self.halt(reason))?;
        self.report(UnitCategory::Metadata, attempt.outcome());
        let states = match attempt {
            Attempt::Done(states) if !states.is_empty() => states,
            Attempt::Done(_) => {
                return Err(PlanError::RegionsUnavailable("empty state list".to_string()).into())
            }
            Attempt::Permanent(err) | Attempt::Exhausted(err) | Attempt::Malformed(err) => {
                return Err(PlanError::RegionsUnavailable(err.to_string()).into())
            }
        };

        let snapshot = StatesSnapshot {
            estados: states.iter().map(entry).collect(),
            total: states.len(),
        };
        self.write_snapshot(&relative, &snapshot);
        harvest_info!("Fetched {} states", states.len());
        Ok(states)
    }

    /// Municipalities of `state`, or `None` when they cannot be listed.
    async fn municipalities(&self, state: &Region) -> Result<Option<Vec<Region>>, Interrupt> {
        let relative = municipalities_metadata_path(state.id);
        if let Some(snapshot) = self.read_snapshot::<MunicipalitiesSnapshot>(&relative) {
            self.report(UnitCategory::Metadata, UnitOutcome::Skipped);
            return Ok(Some(
                snapshot
                    .municipios
                    .into_iter()
                    .map(|entry| Region::municipality(entry.id, entry.nome, state.id))
                    .collect(),
            ));
        }

        let gateway = &self.ctx.gateway;
        let credential = &self.ctx.credential;
        let key = format!("metadata:municipalities:{}", state.id);
        let state_id = state.id;
        let attempt = self
            .ctx
            .attempt(&key, move || gateway.list_municipalities(credential, state_id))
            .await
            .map_err(|reason| self.halt(reason))?;
        self.report(UnitCategory::Metadata, attempt.outcome());
        let Attempt::Done(municipalities) = attempt else {
            harvest_warn!("Skipping state {}: municipalities unavailable", state.label());
            return Ok(None);
        };
        if municipalities.is_empty() {
            harvest_warn!("State {} lists no municipalities", state.label());
        }

        let snapshot = MunicipalitiesSnapshot {
            uf_id: state.id,
            uf_name: state.name.clone(),
            municipios: municipalities.iter().map(entry).collect(),
            total: municipalities.len(),
        };
        self.write_snapshot(&relative, &snapshot);
        Ok(Some(municipalities))
    }

    /// Page 0 of a bucket, executed in place so its total is known before
    /// the rest of the partition is planned.
    async fn first_page(&self, region: RegionPath, page_size: u32) -> Result<Option<SearchPage>, Interrupt> {
        let unit = WorkUnit::PagedQuery {
            region,
            page: 0,
            page_size,
        };
        let executed = self
            .ctx
            .execute(&unit, true)
            .await
            .map_err(|reason| self.halt(reason))?;
        self.report(UnitCategory::Page, executed.outcome);

        let Some(bytes) = executed.payload else {
            harvest_warn!("No first page for {}; skipping its partition", region);
            return Ok(None);
        };
        match SearchPage::from_json_bytes(&bytes) {
            Ok(page) => Ok(Some(page)),
            Err(err) => {
                harvest_warn!("Unreadable first page for {}: {}", region, err);
                Ok(None)
            }
        }
    }

    /// Queue a partition's pages. When page 0 was already fetched at the same
    /// size it is not queued again; the certificates it lists are instead.
    async fn dispatch_pages(
        &self,
        units: Vec<WorkUnit>,
        first_page: Option<&SearchPage>,
    ) -> Result<(), Interrupt> {
        if let Some(page) = first_page {
            self.dispatch_certificates(page).await?;
        }
        for unit in units.into_iter().skip(usize::from(first_page.is_some())) {
            self.dispatch(unit).await?;
        }
        Ok(())
    }

    async fn dispatch_certificates(&self, page: &SearchPage) -> Result<(), Interrupt> {
        if !self.ctx.config.download_certificates {
            return Ok(());
        }
        let (units, malformed) = certificate_units(page);
        if malformed > 0 {
            harvest_warn!("Page 0 of a partition lists {} results without certificate ids", malformed);
        }
        for _ in 0..malformed {
            self.report(UnitCategory::Certificate, UnitOutcome::Malformed);
        }
        for unit in units {
            self.dispatch(unit).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, unit: WorkUnit) -> Result<(), Interrupt> {
        tokio::select! {
            biased;
            _ = self.ctx.dispatch.cancelled() => Err(Interrupt::Halted),
            sent = self.units.send(unit) => sent.map_err(|_| Interrupt::Halted),
        }
    }

    fn report(&self, category: UnitCategory, outcome: UnitOutcome) {
        let _ = self.events.send(Msg::UnitFinished { category, outcome });
    }

    fn halt(&self, reason: HaltReason) -> Interrupt {
        let _ = self.events.send(halt_message(reason));
        Interrupt::Halted
    }

    fn read_snapshot<T: DeserializeOwned>(&self, relative: &Path) -> Option<T> {
        if !self.ctx.artifacts.exists(relative) {
            return None;
        }
        let bytes = self.ctx.artifacts.read(relative).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                harvest_warn!("Ignoring unreadable snapshot {:?}: {}", relative, err);
                None
            }
        }
    }

    fn write_snapshot<T: Serialize>(&self, relative: &Path, snapshot: &T) {
        let written = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| err.to_string())
            .and_then(|bytes| {
                self.ctx
                    .artifacts
                    .write(relative, &bytes)
                    .map_err(|err| err.to_string())
            });
        if let Err(err) = written {
            harvest_warn!("Failed to write snapshot {:?}: {}", relative, err);
        }
    }
}
