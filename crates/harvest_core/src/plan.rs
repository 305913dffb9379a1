use std::ops::Range;

use crate::{RegionPath, WorkUnit};

pub const DEFAULT_PAGE_SIZE: u32 = 30;
/// The platform never returns more than this many results for one filter.
pub const DEFAULT_MAX_RESULTS_PER_COMBINATION: u64 = 10_000;
/// Smallest page size the gateway degrades to.
pub const DEFAULT_MIN_PAGE_SIZE: u32 = 10;

/// Total learned from the zero-offset page of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionResultCount {
    pub region: RegionPath,
    pub total_elements: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPolicy {
    pub max_results_per_combination: u64,
    /// Enumerate small states directly instead of descending into municipalities.
    pub skip_small_states: bool,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self {
            max_results_per_combination: DEFAULT_MAX_RESULTS_PER_COMBINATION,
            skip_small_states: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionPlan {
    /// Enumerate the state bucket itself.
    Pages(Vec<WorkUnit>),
    /// List the state's municipalities and partition each of them.
    Descend,
}

/// `ceil(total / page_size)`; zero for an empty bucket.
pub fn page_count(total: u64, page_size: u32) -> u32 {
    if page_size == 0 || total == 0 {
        return 0;
    }
    let pages = total.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Page units covering a bucket, truncated at the per-bucket cap since the
/// platform returns nothing past it.
pub fn partition_pages(region: RegionPath, total: u64, page_size: u32, cap: u64) -> Vec<WorkUnit> {
    let reachable = total.min(cap);
    (0..page_count(reachable, page_size))
        .map(|page| WorkUnit::PagedQuery {
            region,
            page,
            page_size,
        })
        .collect()
}

pub fn plan_state(count: &RegionResultCount, page_size: u32, policy: &PartitionPolicy) -> PartitionPlan {
    if policy.skip_small_states && count.total_elements <= policy.max_results_per_combination {
        PartitionPlan::Pages(partition_pages(
            count.region,
            count.total_elements,
            page_size,
            policy.max_results_per_combination,
        ))
    } else {
        PartitionPlan::Descend
    }
}

pub fn plan_municipality(
    count: &RegionResultCount,
    page_size: u32,
    policy: &PartitionPolicy,
) -> Vec<WorkUnit> {
    partition_pages(
        count.region,
        count.total_elements,
        page_size,
        policy.max_results_per_combination,
    )
}

/// Page size the rest of a partition is enumerated at. A server that clamps
/// the requested size reports the clamped value.
pub fn effective_page_size(requested: u32, reported: u32) -> u32 {
    if reported > 0 && reported < requested {
        reported
    } else {
        requested
    }
}

/// Largest divisor of `size` that is at most half of it and not below `floor`.
pub fn degraded_page_size(size: u32, floor: u32) -> Option<u32> {
    let floor = floor.max(1);
    (floor..=size / 2).rev().find(|candidate| size % candidate == 0)
}

/// Pages at `sub_size` that together cover `page` at `size`.
/// `sub_size` must divide `size`.
pub fn sub_pages(page: u32, size: u32, sub_size: u32) -> Range<u32> {
    let factor = size / sub_size;
    page * factor..(page + 1) * factor
}

/// Position of `start` in `ids`, or 0 when no start was requested.
pub fn resume_index<I>(ids: I, start: Option<u64>) -> Option<usize>
where
    I: IntoIterator<Item = u64>,
{
    match start {
        None => Some(0),
        Some(start) => ids.into_iter().position(|id| id == start),
    }
}
