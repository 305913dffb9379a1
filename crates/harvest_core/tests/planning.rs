use std::collections::BTreeSet;

use harvest_core::{
    degraded_page_size, effective_page_size, page_count, partition_pages, plan_municipality,
    plan_state, resume_index, sub_pages, PartitionPlan, PartitionPolicy, RegionPath,
    RegionResultCount, WorkUnit,
};
use pretty_assertions::assert_eq;

fn pages_of(units: &[WorkUnit]) -> Vec<u32> {
    units
        .iter()
        .map(|unit| match unit {
            WorkUnit::PagedQuery { page, .. } => *page,
            other => panic!("unexpected unit {other:?}"),
        })
        .collect()
}

#[test]
fn partition_covers_every_page_exactly_once() {
    for (total, size) in [(0u64, 30u32), (1, 30), (30, 30), (31, 30), (9999, 7), (10_000, 30)] {
        let units = partition_pages(RegionPath::state(1), total, size, u64::MAX);
        let pages = pages_of(&units);
        let expected: Vec<u32> = (0..page_count(total, size)).collect();
        assert_eq!(pages, expected);
        let unique: BTreeSet<_> = pages.iter().collect();
        assert_eq!(unique.len(), pages.len());
        assert_eq!(u64::from(page_count(total, size)), total.div_ceil(u64::from(size)));
    }
}

#[test]
fn partition_stops_at_the_bucket_cap() {
    let units = partition_pages(RegionPath::municipality(1, 2), 25_000, 30, 10_000);
    assert_eq!(units.len(), 334);
}

#[test]
fn small_state_is_enumerated_directly() {
    let count = RegionResultCount {
        region: RegionPath::state(4),
        total_elements: 10_000,
    };
    match plan_state(&count, 30, &PartitionPolicy::default()) {
        PartitionPlan::Pages(units) => {
            assert_eq!(units.len(), 334);
            assert!(units.iter().all(|unit| matches!(
                unit,
                WorkUnit::PagedQuery { region, .. } if region.is_state_level()
            )));
        }
        PartitionPlan::Descend => panic!("state under the cap should not descend"),
    }
}

#[test]
fn large_state_descends_into_municipalities() {
    let policy = PartitionPolicy::default();
    let state = RegionResultCount {
        region: RegionPath::state(9),
        total_elements: 15_000,
    };
    assert_eq!(plan_state(&state, 30, &policy), PartitionPlan::Descend);

    let first = RegionResultCount {
        region: RegionPath::municipality(9, 100),
        total_elements: 9_000,
    };
    let second = RegionResultCount {
        region: RegionPath::municipality(9, 200),
        total_elements: 6_000,
    };
    let first_units = plan_municipality(&first, 30, &policy);
    let second_units = plan_municipality(&second, 30, &policy);
    assert_eq!(first_units.len(), 300);
    assert_eq!(second_units.len(), 200);
    assert!(first_units
        .iter()
        .chain(second_units.iter())
        .all(|unit| matches!(unit, WorkUnit::PagedQuery { region, .. } if !region.is_state_level())));
}

#[test]
fn disabling_the_skip_always_descends() {
    let policy = PartitionPolicy {
        skip_small_states: false,
        ..PartitionPolicy::default()
    };
    let count = RegionResultCount {
        region: RegionPath::state(2),
        total_elements: 12,
    };
    assert_eq!(plan_state(&count, 30, &policy), PartitionPlan::Descend);
}

#[test]
fn clamped_page_size_is_honoured() {
    assert_eq!(effective_page_size(100, 50), 50);
    assert_eq!(effective_page_size(30, 30), 30);
    assert_eq!(effective_page_size(30, 0), 30);
    assert_eq!(effective_page_size(30, 60), 30);
}

#[test]
fn degraded_sizes_divide_the_requested_size() {
    assert_eq!(degraded_page_size(30, 10), Some(15));
    assert_eq!(degraded_page_size(15, 10), None);
    assert_eq!(degraded_page_size(100, 10), Some(50));
    assert_eq!(degraded_page_size(21, 5), Some(7));
    assert_eq!(degraded_page_size(10, 10), None);
}

#[test]
fn sub_pages_cover_the_logical_page() {
    assert_eq!(sub_pages(0, 30, 15), 0..2);
    assert_eq!(sub_pages(3, 30, 15), 6..8);
    assert_eq!(sub_pages(2, 21, 7), 6..9);
}

#[test]
fn resume_index_finds_the_start_region() {
    assert_eq!(resume_index([3, 5, 8], None), Some(0));
    assert_eq!(resume_index([3, 5, 8], Some(5)), Some(1));
    assert_eq!(resume_index([3, 5, 8], Some(4)), None);
}
