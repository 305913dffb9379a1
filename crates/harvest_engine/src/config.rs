use std::path::PathBuf;
use std::time::Duration;

use harvest_core::{
    PartitionPolicy, RetryPolicy, DEFAULT_MAX_RESULTS_PER_COMBINATION, DEFAULT_PAGE_SIZE,
};

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub data_dir: PathBuf,
    pub page_size: u32,
    pub max_results_per_combination: u64,
    /// Floor applied before every outbound request of a worker.
    pub request_delay: Duration,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub skip_small_states: bool,
    /// Fetch the certificates listed in region result pages.
    pub download_certificates: bool,
}

impl HarvestConfig {
    pub fn default_with_data_dir(data_dir: PathBuf) -> Self {
        let request_delay = Duration::from_millis(500);
        Self {
            data_dir,
            page_size: DEFAULT_PAGE_SIZE,
            max_results_per_combination: DEFAULT_MAX_RESULTS_PER_COMBINATION,
            request_delay,
            workers: 1,
            retry: RetryPolicy::default().with_base_delay(request_delay),
            skip_small_states: true,
            download_certificates: true,
        }
    }

    pub fn partition_policy(&self) -> PartitionPolicy {
        PartitionPolicy {
            max_results_per_combination: self.max_results_per_combination,
            skip_small_states: self.skip_small_states,
        }
    }
}
