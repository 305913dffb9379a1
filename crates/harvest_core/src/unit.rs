use std::path::PathBuf;

use crate::{RegionId, RegionPath, UnitCategory};

/// Directory holding the per-state CSV exports.
pub const CSV_DIR: &str = "csvs";
/// File name of the merged case list, relative to the data directory.
pub const MERGED_CSV: &str = "csvs_merged.csv";
/// Number of leading digits of a normalized case id the search filter accepts.
pub const PROCESS_NUMBER_DIGITS: usize = 20;

/// One minimal, independently resumable fetch task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkUnit {
    PagedQuery {
        region: RegionPath,
        page: u32,
        page_size: u32,
    },
    CaseLookup {
        case_id: String,
    },
    CertificateDownload {
        certificate_id: u64,
        piece_type_id: u64,
        owner_name: String,
    },
    CsvExport {
        state_id: RegionId,
        state_abbrev: String,
    },
}

impl WorkUnit {
    pub fn category(&self) -> UnitCategory {
        match self {
            WorkUnit::PagedQuery { .. } => UnitCategory::Page,
            WorkUnit::CaseLookup { .. } => UnitCategory::Case,
            WorkUnit::CertificateDownload { .. } => UnitCategory::Certificate,
            WorkUnit::CsvExport { .. } => UnitCategory::CsvExport,
        }
    }

    /// Deterministic identity of the retrieval. The owner name of a
    /// certificate is informational and deliberately left out.
    pub fn idempotency_key(&self) -> String {
        match self {
            WorkUnit::PagedQuery {
                region,
                page,
                page_size,
            } => format!("page:{}:{}:{}", region.file_prefix(), page, page_size),
            WorkUnit::CaseLookup { case_id } => format!("case:{case_id}"),
            WorkUnit::CertificateDownload {
                certificate_id,
                piece_type_id,
                ..
            } => format!("certificate:{certificate_id}:{piece_type_id}"),
            WorkUnit::CsvExport { state_id, .. } => format!("csv:{state_id}"),
        }
    }

    /// Artifact location relative to the data directory.
    pub fn artifact_path(&self) -> PathBuf {
        match self {
            WorkUnit::PagedQuery {
                region,
                page,
                page_size,
            } => PathBuf::from("json").join(format!(
                "{}_page_{}_size_{}.json",
                region.file_prefix(),
                page,
                page_size
            )),
            WorkUnit::CaseLookup { case_id } => {
                PathBuf::from("json_ids").join(format!("{case_id}.json"))
            }
            WorkUnit::CertificateDownload {
                certificate_id,
                piece_type_id,
                ..
            } => PathBuf::from("pdfs").join(format!(
                "certidao_{certificate_id}_tipo_{piece_type_id}.pdf"
            )),
            WorkUnit::CsvExport {
                state_id,
                state_abbrev,
            } => PathBuf::from(CSV_DIR).join(format!(
                "uf_{}_{}.csv",
                state_id,
                sanitize_abbrev(state_abbrev)
            )),
        }
    }

    /// Whether completing this unit can reveal further units: both case and
    /// region results list certificates.
    pub fn has_follow_ups(&self) -> bool {
        matches!(self, WorkUnit::CaseLookup { .. } | WorkUnit::PagedQuery { .. })
    }
}

pub fn states_metadata_path() -> PathBuf {
    PathBuf::from("metadata").join("estados.json")
}

pub fn municipalities_metadata_path(state_id: RegionId) -> PathBuf {
    PathBuf::from("metadata").join(format!("municipios_uf_{state_id}.json"))
}

/// Strips every non-digit character: `0001070-63.2015.8.10` -> `0001070632015810`.
pub fn normalize_case_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Leading digits of a normalized case id used as the search filter, or
/// `None` when the id is too short to be a process number.
pub fn process_number(case_id: &str) -> Option<&str> {
    if case_id.len() < PROCESS_NUMBER_DIGITS || !case_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(&case_id[..PROCESS_NUMBER_DIGITS])
}

fn sanitize_abbrev(abbrev: &str) -> String {
    let cleaned: String = abbrev
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
