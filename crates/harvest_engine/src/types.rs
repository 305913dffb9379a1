use std::fmt;

use harvest_core::{page_count, FailureClass};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of the paginated search endpoint, validated at the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub content: Vec<Value>,
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub number: u32,
}

impl SearchPage {
    /// Joins consecutive sub-pages into one logical page at `page_size`.
    pub(crate) fn merge_as(parts: Vec<SearchPage>, page: u32, page_size: u32) -> SearchPage {
        let total_elements = parts
            .iter()
            .map(|part| part.total_elements)
            .max()
            .unwrap_or(0);
        let content = parts.into_iter().flat_map(|part| part.content).collect();
        SearchPage {
            content,
            total_elements,
            total_pages: page_count(total_elements, page_size),
            size: page_size,
            number: page,
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ApiError> {
        serde_json::to_vec_pretty(self)
            .map_err(|err| ApiError::new(ApiErrorKind::Malformed, err.to_string()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<SearchPage, ApiError> {
        serde_json::from_slice(bytes).map_err(|err| {
            ApiError::new(
                ApiErrorKind::Malformed,
                format!("unexpected search page shape: {err}"),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failures the filter endpoint produces when a page is too heavy to serve.
    pub fn is_size_related(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::Rejected(400) | ApiErrorKind::Rejected(413) | ApiErrorKind::Timeout
        )
    }

    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    AuthExpired,
    RateLimited,
    NotFound,
    Timeout,
    Transient,
    Malformed,
    Rejected(u16),
    /// The run stopped while an operation waited between requests.
    Cancelled,
}

impl ApiErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ApiErrorKind::AuthExpired,
            404 | 410 => ApiErrorKind::NotFound,
            429 => ApiErrorKind::RateLimited,
            408 => ApiErrorKind::Timeout,
            500..=599 => ApiErrorKind::Transient,
            other => ApiErrorKind::Rejected(other),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ApiErrorKind::AuthExpired | ApiErrorKind::Cancelled => FailureClass::Halt,
            ApiErrorKind::RateLimited => FailureClass::Throttled,
            ApiErrorKind::Timeout | ApiErrorKind::Transient => FailureClass::Transient,
            ApiErrorKind::NotFound | ApiErrorKind::Rejected(_) => FailureClass::Permanent,
            ApiErrorKind::Malformed => FailureClass::Malformed,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::AuthExpired => write!(f, "auth expired"),
            ApiErrorKind::RateLimited => write!(f, "rate limited"),
            ApiErrorKind::NotFound => write!(f, "not found"),
            ApiErrorKind::Timeout => write!(f, "timeout"),
            ApiErrorKind::Transient => write!(f, "transient error"),
            ApiErrorKind::Malformed => write!(f, "malformed payload"),
            ApiErrorKind::Rejected(code) => write!(f, "rejected with http status {code}"),
            ApiErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}
