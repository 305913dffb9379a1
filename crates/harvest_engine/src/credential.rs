use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvest_log::harvest_debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::persist::{write_atomic, PersistError};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no usable credential at {path:?}: {reason}")]
    NotFound { path: PathBuf, reason: String },
    #[error("failed to persist credential: {0}")]
    Persist(#[from] PersistError),
}

/// Browser cookie as exported after the interactive login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Seconds since the Unix epoch; `-1` or absent for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    /// Attributes we carry through untouched (httpOnly, secure, sameSite, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn root_path() -> String {
    "/".to_string()
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: root_path(),
            expires: None,
            extra: Map::new(),
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at.timestamp() as f64);
        self
    }

    fn expiry(&self) -> Option<DateTime<Utc>> {
        let secs = self.expires.filter(|secs| *secs > 0.0)?;
        DateTime::from_timestamp(secs.trunc() as i64, 0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    cookies: Vec<CookieRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PersistedCredential {
    Current(CredentialFile),
    /// Older files hold only the cookie array.
    Legacy(Vec<CookieRecord>),
}

/// Session token set plus device fingerprint. Shared read-only by every request.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    cookies: Vec<CookieRecord>,
    fingerprint: Option<String>,
}

impl Credential {
    pub fn new(cookies: Vec<CookieRecord>, fingerprint: Option<String>) -> Self {
        Self {
            cookies,
            fingerprint: fingerprint.filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn cookies(&self) -> &[CookieRecord] {
        &self.cookies
    }

    pub fn tokens(&self) -> BTreeMap<&str, &str> {
        self.cookies
            .iter()
            .map(|cookie| (cookie.name.as_str(), cookie.value.as_str()))
            .collect()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Value of the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.tokens()
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Earliest expiry among cookies that carry one. Session cookies do not
    /// bound it.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.cookies.iter().filter_map(CookieRecord::expiry).min()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expiry| expiry <= now)
    }
}

/// File-backed owner of the credential.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Credential, CredentialError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(self.not_found("file does not exist"));
            }
            Err(err) => return Err(self.not_found(err.to_string())),
        };

        let persisted: PersistedCredential = serde_json::from_str(&content)
            .map_err(|err| self.not_found(format!("invalid structure: {err}")))?;
        let (cookies, fingerprint) = match persisted {
            PersistedCredential::Current(file) => (file.cookies, file.fingerprint),
            PersistedCredential::Legacy(cookies) => (cookies, None),
        };
        if cookies.is_empty() {
            return Err(self.not_found("no cookies"));
        }
        if cookies.iter().any(|cookie| cookie.name.trim().is_empty()) {
            return Err(self.not_found("cookie without a name"));
        }

        harvest_debug!(
            "Loaded {} cookies from {:?} (fingerprint: {})",
            cookies.len(),
            self.path,
            if fingerprint.is_some() { "set" } else { "not set" }
        );
        Ok(Credential::new(cookies, fingerprint))
    }

    pub fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let file = CredentialFile {
            cookies: credential.cookies.clone(),
            fingerprint: credential.fingerprint.clone(),
        };
        let content = serde_json::to_vec_pretty(&file)
            .map_err(|err| PersistError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))?;
        write_atomic(&self.path, &content)?;
        Ok(())
    }

    fn not_found(&self, reason: impl Into<String>) -> CredentialError {
        CredentialError::NotFound {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}
