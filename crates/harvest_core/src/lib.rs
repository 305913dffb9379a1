//! Harvest core: pure domain types, planning arithmetic and the run state machine.
mod effect;
mod msg;
mod plan;
mod region;
mod retry;
mod state;
mod summary;
mod unit;
mod update;

pub use effect::Effect;
pub use msg::Msg;
pub use plan::{
    degraded_page_size, effective_page_size, page_count, partition_pages, plan_municipality,
    plan_state, resume_index, sub_pages, PartitionPlan, PartitionPolicy, RegionResultCount,
    DEFAULT_MAX_RESULTS_PER_COMBINATION, DEFAULT_MIN_PAGE_SIZE, DEFAULT_PAGE_SIZE,
};
pub use region::{Region, RegionId, RegionKind, RegionPath};
pub use retry::{Decision, FailureClass, RetryPolicy};
pub use state::{HaltReason, RunPhase, RunState};
pub use summary::{CategoryCounts, RunSummary, UnitCategory, UnitOutcome};
pub use unit::{
    municipalities_metadata_path, normalize_case_id, process_number, states_metadata_path,
    WorkUnit, CSV_DIR, MERGED_CSV, PROCESS_NUMBER_DIGITS,
};
pub use update::update;
