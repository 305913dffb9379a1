//! Harvest engine: credential handling, the API gateway, durable stores and
//! the traversal/scheduling pipeline.
mod checkpoint;
mod config;
mod credential;
mod executor;
mod gateway;
mod merge;
mod persist;
mod planner;
mod scheduler;
mod types;

pub use checkpoint::{CheckpointError, CheckpointStore, CompletionOutcome, CompletionRecord};
pub use config::HarvestConfig;
pub use credential::{CookieRecord, Credential, CredentialError, CredentialStore};
pub use gateway::{ApiGateway, GatewaySettings, Pacer, ReqwestGateway, SearchFilter, Unpaced};
pub use merge::{
    discover_exports, merge_exports, read_case_rows, CaseRow, MergeError, MergeReport,
    MergeWarning, SourceCsv, CASE_NUMBER_COLUMN, PERSON_NAME_COLUMN,
};
pub use persist::{ensure_output_dir, write_atomic, ArtifactStore, PersistError};
pub use planner::{certificate_units, PlanError, Traversal};
pub use scheduler::{HarvestError, Harvester, RunReport};
pub use types::{ApiError, ApiErrorKind, SearchPage};
