use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use harvest_core::{
    degraded_page_size, page_count, sub_pages, Region, RegionId, RegionPath,
    DEFAULT_MIN_PAGE_SIZE,
};
use harvest_log::{harvest_debug, harvest_warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::credential::Credential;
use crate::types::{ApiError, ApiErrorKind, SearchPage};

const STATES_PATH: &str = "/bnmpportal/api/dominio/estados";
const MUNICIPALITIES_PATH: &str = "/bnmpportal/api/dominio/por-uf";
const SEARCH_PATH: &str = "/bnmpportal/api/pesquisa-pecas/filter";
const CERTIFICATE_PATH: &str = "/bnmpportal/api/certidaos/relatorio";

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub csv_export_path: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
    pub min_page_size: u32,
    pub case_page_size: u32,
    pub user_agent: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "https://portalbnmp.cnj.jus.br".to_string(),
            csv_export_path: "/bnmpportal/api/pesquisa-pecas/csv".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_bytes: 256 * 1024 * 1024,
            min_page_size: DEFAULT_MIN_PAGE_SIZE,
            case_page_size: 10,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Filter body of the search and export endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    Region(RegionPath),
    ProcessNumber(String),
}

impl SearchFilter {
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "buscaOrgaoRecursivo": false,
            "orgaoExpeditor": {},
        });
        match self {
            SearchFilter::Region(region) => {
                body["idEstado"] = json!(region.state_id);
                if let Some(municipality_id) = region.municipality_id {
                    body["idMunicipio"] = json!(municipality_id);
                }
            }
            SearchFilter::ProcessNumber(number) => {
                body["numeroProcesso"] = json!(number);
            }
        }
        body
    }
}

/// Paces the follow-up requests of operations that need more than one.
#[async_trait::async_trait]
pub trait Pacer: Send + Sync {
    /// Waits before the next request; an error aborts the operation.
    async fn pause(&self) -> Result<(), ApiError>;
}

/// Sends follow-up requests back to back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unpaced;

#[async_trait::async_trait]
impl Pacer for Unpaced {
    async fn pause(&self) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Typed operations over the external platform. Implementors classify every
/// failure into an [`ApiErrorKind`]; retrying is left to the caller.
#[async_trait::async_trait]
pub trait ApiGateway: Send + Sync {
    async fn list_states(&self, credential: &Credential) -> Result<Vec<Region>, ApiError>;

    async fn list_municipalities(
        &self,
        credential: &Credential,
        state_id: RegionId,
    ) -> Result<Vec<Region>, ApiError>;

    /// One raw page of the search endpoint.
    async fn search(
        &self,
        credential: &Credential,
        filter: &SearchFilter,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, ApiError>;

    async fn fetch_csv_export(
        &self,
        credential: &Credential,
        state_id: RegionId,
    ) -> Result<Vec<u8>, ApiError>;

    async fn fetch_certificate(
        &self,
        credential: &Credential,
        certificate_id: u64,
        piece_type_id: u64,
    ) -> Result<Vec<u8>, ApiError>;

    fn min_page_size(&self) -> u32 {
        DEFAULT_MIN_PAGE_SIZE
    }

    fn case_page_size(&self) -> u32 {
        10
    }

    /// One logical page of a region bucket. A size-related rejection is
    /// retried as smaller covering sub-pages merged back into the logical page;
    /// `pacer` runs before every sub-page request.
    async fn fetch_page(
        &self,
        credential: &Credential,
        region: RegionPath,
        page: u32,
        page_size: u32,
        pacer: &dyn Pacer,
    ) -> Result<SearchPage, ApiError> {
        let filter = SearchFilter::Region(region);
        let err = match self.search(credential, &filter, page, page_size).await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_size_related() => err,
            Err(err) => return Err(err),
        };
        let Some(smaller) = degraded_page_size(page_size, self.min_page_size()) else {
            return Err(err);
        };
        harvest_warn!(
            "Page {} of {} at size {} failed ({}); retrying at size {}",
            page,
            region,
            page_size,
            err,
            smaller
        );

        let mut parts = Vec::new();
        for sub_page in sub_pages(page, page_size, smaller) {
            pacer.pause().await?;
            let part = self
                .fetch_page(credential, region, sub_page, smaller, pacer)
                .await?;
            let exhausted = part.content.len() < smaller as usize;
            parts.push(part);
            if exhausted {
                break;
            }
        }
        Ok(SearchPage::merge_as(parts, page, page_size))
    }

    /// Every search result of one case, across as many pages as it spans.
    /// `pacer` runs before every page after the first.
    async fn fetch_case_json(
        &self,
        credential: &Credential,
        process_number: &str,
        pacer: &dyn Pacer,
    ) -> Result<SearchPage, ApiError> {
        let filter = SearchFilter::ProcessNumber(process_number.to_string());
        let size = self.case_page_size().max(1);
        let first = self.search(credential, &filter, 0, size).await?;
        let pages = page_count(first.total_elements, size);
        if pages <= 1 || first.content.len() as u64 >= first.total_elements {
            return Ok(first);
        }

        let mut parts = vec![first];
        for page in 1..pages {
            pacer.pause().await?;
            parts.push(self.search(credential, &filter, page, size).await?);
        }
        let mut merged = SearchPage::merge_as(parts, 0, size);
        merged.size = merged.content.len() as u32;
        merged.total_pages = 1;
        Ok(merged)
    }
}

#[derive(Debug, Deserialize)]
struct StateDto {
    id: RegionId,
    #[serde(default)]
    nome: String,
    #[serde(default)]
    sigla: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MunicipalityDto {
    id: RegionId,
    #[serde(default)]
    nome: String,
}

#[derive(Debug, Clone)]
pub struct ReqwestGateway {
    settings: GatewaySettings,
    base: Url,
    client: reqwest::Client,
}

impl ReqwestGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self, ApiError> {
        let base = Url::parse(&settings.base_url).map_err(|err| {
            ApiError::new(
                ApiErrorKind::Rejected(0),
                format!("invalid base url {}: {err}", settings.base_url),
            )
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::new(ApiErrorKind::Transient, err.to_string()))?;
        Ok(Self {
            settings,
            base,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path).map_err(|err| {
            ApiError::new(ApiErrorKind::Rejected(0), format!("invalid endpoint {path}: {err}"))
        })
    }

    /// `page_size: None` leaves the size empty, which the export endpoint
    /// reads as "everything".
    fn paged_endpoint(&self, path: &str, page: u32, page_size: Option<u32>) -> Result<Url, ApiError> {
        let mut url = self.endpoint(path)?;
        let size = page_size.map(|size| size.to_string()).unwrap_or_default();
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("size", &size)
            .append_pair("sort", "");
        Ok(url)
    }

    /// Attaches the session and returns the body of a successful response.
    async fn execute(
        &self,
        credential: &Credential,
        request: reqwest::RequestBuilder,
        expect_pdf: bool,
    ) -> Result<Vec<u8>, ApiError> {
        if let Some(expiry) = credential.expires_at() {
            if expiry <= Utc::now() {
                return Err(ApiError::new(
                    ApiErrorKind::AuthExpired,
                    format!("credential expired at {}", expiry.to_rfc3339()),
                ));
            }
        }

        let mut request = request
            .header(USER_AGENT, &self.settings.user_agent)
            .header(COOKIE, credential.cookie_header())
            .header(REFERER, format!("{}/", self.settings.base_url.trim_end_matches('/')))
            .header(ORIGIN, self.settings.base_url.trim_end_matches('/'));
        request = if expect_pdf {
            request.header(ACCEPT, "application/pdf, application/octet-stream, */*")
        } else {
            request.header(ACCEPT, "application/json, text/plain, */*")
        };
        if let Some(fingerprint) = credential.fingerprint() {
            request = request.header("fingerprint", fingerprint);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::new(
                ApiErrorKind::from_status(status.as_u16()),
                format!("http status {status}"),
            ));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_ascii_lowercase);

        let bytes = self.read_body(response).await?;
        if expect_pdf {
            let looks_like_pdf = content_type.as_deref().is_some_and(|ct| ct.contains("pdf"))
                || bytes.starts_with(b"%PDF");
            if !looks_like_pdf {
                return Err(ApiError::new(
                    ApiErrorKind::Malformed,
                    format!("expected a pdf, got {}", content_type.as_deref().unwrap_or("no content type")),
                ));
            }
        }
        Ok(bytes)
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<Vec<u8>, ApiError> {
        let max_bytes = self.settings.max_bytes;
        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(too_large(max_bytes, content_len));
            }
        }
        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(too_large(max_bytes, next_len));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        url: Url,
    ) -> Result<T, ApiError> {
        harvest_debug!("GET {}", url);
        let bytes = self
            .execute(credential, self.client.get(url), false)
            .await?;
        decode_json(&bytes)
    }

    async fn post_filter(
        &self,
        credential: &Credential,
        url: Url,
        filter: &SearchFilter,
    ) -> Result<Vec<u8>, ApiError> {
        harvest_debug!("POST {} {:?}", url, filter);
        let body = serde_json::to_vec(&filter.to_body())
            .map_err(|err| ApiError::new(ApiErrorKind::Malformed, err.to_string()))?;
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json;charset=UTF-8")
            .body(body);
        self.execute(credential, request, false).await
    }
}

#[async_trait::async_trait]
impl ApiGateway for ReqwestGateway {
    async fn list_states(&self, credential: &Credential) -> Result<Vec<Region>, ApiError> {
        let states: Vec<StateDto> = self
            .get_json(credential, self.endpoint(STATES_PATH)?)
            .await?;
        Ok(states
            .into_iter()
            .map(|dto| Region::state(dto.id, dto.nome, dto.sigla))
            .collect())
    }

    async fn list_municipalities(
        &self,
        credential: &Credential,
        state_id: RegionId,
    ) -> Result<Vec<Region>, ApiError> {
        let url = self.endpoint(&format!("{MUNICIPALITIES_PATH}/{state_id}"))?;
        let municipalities: Vec<MunicipalityDto> = self.get_json(credential, url).await?;
        Ok(municipalities
            .into_iter()
            .map(|dto| Region::municipality(dto.id, dto.nome, state_id))
            .collect())
    }

    async fn search(
        &self,
        credential: &Credential,
        filter: &SearchFilter,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, ApiError> {
        let url = self.paged_endpoint(SEARCH_PATH, page, Some(page_size))?;
        let bytes = self.post_filter(credential, url, filter).await?;
        SearchPage::from_json_bytes(&bytes)
    }

    async fn fetch_csv_export(
        &self,
        credential: &Credential,
        state_id: RegionId,
    ) -> Result<Vec<u8>, ApiError> {
        let url = self.paged_endpoint(&self.settings.csv_export_path, 0, None)?;
        let filter = SearchFilter::Region(RegionPath::state(state_id));
        self.post_filter(credential, url, &filter).await
    }

    async fn fetch_certificate(
        &self,
        credential: &Credential,
        certificate_id: u64,
        piece_type_id: u64,
    ) -> Result<Vec<u8>, ApiError> {
        let url = self.endpoint(&format!(
            "{CERTIFICATE_PATH}/{certificate_id}/{piece_type_id}"
        ))?;
        harvest_debug!("POST {}", url);
        self.execute(credential, self.client.post(url), true).await
    }

    fn min_page_size(&self) -> u32 {
        self.settings.min_page_size
    }

    fn case_page_size(&self) -> u32 {
        self.settings.case_page_size
    }
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes)
        .map_err(|err| ApiError::new(ApiErrorKind::Malformed, format!("invalid json: {err}")))
}

fn too_large(max_bytes: u64, actual: u64) -> ApiError {
    ApiError::new(
        ApiErrorKind::Malformed,
        format!("response too large (max {max_bytes}, actual {actual})"),
    )
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(ApiErrorKind::Timeout, err.to_string());
    }
    // The platform drops connections outright when throttling.
    if err.is_connect() {
        return ApiError::new(ApiErrorKind::RateLimited, err.to_string());
    }
    ApiError::new(ApiErrorKind::Transient, err.to_string())
}
