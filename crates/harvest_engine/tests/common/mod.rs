#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use harvest_core::{page_count, Region, RegionId, RegionPath, RetryPolicy};
use harvest_engine::{
    ApiError, ApiErrorKind, ApiGateway, CookieRecord, Credential, HarvestConfig, Harvester,
    SearchFilter, SearchPage,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// In-process platform double. Every call is recorded under a label such as
/// `search:uf_1:0:30`, `case:{number}:{page}`, `certificate:5:1`, `csv:2`,
/// `states` or `municipalities:1`; failures are scripted per label.
/// Region results carry certificate ids only when asked to.
#[derive(Default)]
pub struct FakeGateway {
    states: Vec<Region>,
    municipalities: HashMap<RegionId, Vec<Region>>,
    totals: HashMap<RegionPath, u64>,
    cases: HashMap<String, Vec<Value>>,
    exports: HashMap<RegionId, Vec<u8>>,
    clamp: Option<u32>,
    certificates: bool,
    cancel_on: Option<(String, CancellationToken)>,
    failures: Mutex<HashMap<String, (ApiErrorKind, Option<u32>)>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, id: RegionId, abbrev: &str, total: u64) -> Self {
        self.states
            .push(Region::state(id, format!("State {abbrev}"), Some(abbrev.to_string())));
        self.totals.insert(RegionPath::state(id), total);
        self
    }

    pub fn with_municipality(mut self, state_id: RegionId, id: RegionId, total: u64) -> Self {
        self.municipalities
            .entry(state_id)
            .or_default()
            .push(Region::municipality(id, format!("Municipality {id}"), state_id));
        self.totals.insert(RegionPath::municipality(state_id, id), total);
        self
    }

    pub fn with_case(mut self, process_number: &str, content: Vec<Value>) -> Self {
        self.cases.insert(process_number.to_string(), content);
        self
    }

    pub fn with_export(mut self, state_id: RegionId, body: &str) -> Self {
        self.exports.insert(state_id, body.as_bytes().to_vec());
        self
    }

    /// Serve at most `max` results per page, reporting the clamped size.
    pub fn clamping_page_size(mut self, max: u32) -> Self {
        self.clamp = Some(max);
        self
    }

    /// List a certificate in every region result. Its piece type is the
    /// municipality id, or the state id for state buckets.
    pub fn listing_certificates(mut self) -> Self {
        self.certificates = true;
        self
    }

    /// Cancel `token` while serving the call labelled `label`.
    pub fn cancelling_on(mut self, label: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((label.to_string(), token));
        self
    }

    pub fn fail(&self, label: &str, kind: ApiErrorKind, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(label.to_string(), (kind, Some(times)));
    }

    pub fn fail_always(&self, label: &str, kind: ApiErrorKind) {
        self.failures
            .lock()
            .unwrap()
            .insert(label.to_string(), (kind, None));
    }

    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.timed_calls().into_iter().map(|(label, _)| label).collect()
    }

    pub fn timed_calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .drain(..)
            .map(|(label, _)| label)
            .collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls().iter().filter(|call| *call == label).count()
    }

    fn record(&self, label: String) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push((label.clone(), Instant::now()));
        if let Some((trigger, token)) = &self.cancel_on {
            if *trigger == label {
                token.cancel();
            }
        }
        let mut failures = self.failures.lock().unwrap();
        let Some((kind, remaining)) = failures.get_mut(&label) else {
            return Ok(());
        };
        let kind = *kind;
        match remaining {
            None => {}
            Some(0) => return Ok(()),
            Some(left) => *left -= 1,
        }
        Err(ApiError::new(kind, format!("scripted failure for {label}")))
    }
}

#[async_trait::async_trait]
impl ApiGateway for FakeGateway {
    async fn list_states(&self, _credential: &Credential) -> Result<Vec<Region>, ApiError> {
        self.record("states".to_string())?;
        Ok(self.states.clone())
    }

    async fn list_municipalities(
        &self,
        _credential: &Credential,
        state_id: RegionId,
    ) -> Result<Vec<Region>, ApiError> {
        self.record(format!("municipalities:{state_id}"))?;
        Ok(self.municipalities.get(&state_id).cloned().unwrap_or_default())
    }

    async fn search(
        &self,
        _credential: &Credential,
        filter: &SearchFilter,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, ApiError> {
        match filter {
            SearchFilter::Region(region) => {
                self.record(format!("search:{}:{}:{}", region.file_prefix(), page, page_size))?;
                let size = self.clamp.map_or(page_size, |max| page_size.min(max));
                let total = self.totals.get(region).copied().unwrap_or(0);
                let start = u64::from(page) * u64::from(size);
                let end = (start + u64::from(size)).min(total);
                let piece_type = region.municipality_id.unwrap_or(region.state_id);
                let content = (start..end)
                    .map(|n| {
                        if self.certificates {
                            json!({ "id": n + 1, "idTipoPeca": piece_type })
                        } else {
                            json!({ "id": n + 1 })
                        }
                    })
                    .collect();
                Ok(SearchPage {
                    content,
                    total_elements: total,
                    total_pages: page_count(total, size),
                    size,
                    number: page,
                })
            }
            SearchFilter::ProcessNumber(number) => {
                self.record(format!("case:{number}:{page}"))?;
                let items = self.cases.get(number).cloned().unwrap_or_default();
                let total = items.len() as u64;
                let content = items
                    .into_iter()
                    .skip((page * page_size) as usize)
                    .take(page_size as usize)
                    .collect();
                Ok(SearchPage {
                    content,
                    total_elements: total,
                    total_pages: page_count(total, page_size),
                    size: page_size,
                    number: page,
                })
            }
        }
    }

    async fn fetch_csv_export(
        &self,
        _credential: &Credential,
        state_id: RegionId,
    ) -> Result<Vec<u8>, ApiError> {
        self.record(format!("csv:{state_id}"))?;
        Ok(self.exports.get(&state_id).cloned().unwrap_or_default())
    }

    async fn fetch_certificate(
        &self,
        _credential: &Credential,
        certificate_id: u64,
        piece_type_id: u64,
    ) -> Result<Vec<u8>, ApiError> {
        self.record(format!("certificate:{certificate_id}:{piece_type_id}"))?;
        Ok(format!("%PDF-1.4 certificate {certificate_id}").into_bytes())
    }
}

pub fn credential() -> Credential {
    Credential::new(
        vec![CookieRecord::new("portalbnmp", "token")],
        Some("fingerprint".to_string()),
    )
}

/// Config without delays or certificate downloads so tests run at full
/// speed and see only the calls they script.
pub fn config(data_dir: &Path) -> HarvestConfig {
    let mut config = HarvestConfig::default_with_data_dir(data_dir.to_path_buf());
    config.request_delay = Duration::ZERO;
    config.download_certificates = false;
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
        min_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    };
    config
}

/// Gaps between consecutive calls whose labels start with `prefix`.
pub fn gaps_between(gateway: &FakeGateway, prefix: &str) -> Vec<Duration> {
    let times: Vec<Instant> = gateway
        .timed_calls()
        .into_iter()
        .filter(|(label, _)| label.starts_with(prefix))
        .map(|(_, at)| at)
        .collect();
    times.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

pub fn harvester(gateway: &Arc<FakeGateway>, config: HarvestConfig) -> Harvester {
    harvester_with_token(gateway, config, CancellationToken::new())
}

pub fn harvester_with_token(
    gateway: &Arc<FakeGateway>,
    config: HarvestConfig,
    token: CancellationToken,
) -> Harvester {
    let gateway: Arc<dyn ApiGateway> = gateway.clone();
    Harvester::new(gateway, credential(), config, token).unwrap()
}
