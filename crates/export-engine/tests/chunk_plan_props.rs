//! Property tests for chunk planning.
//!
//! Every plan must cover `[0, total_frames)` exactly: contiguous,
//! non-overlapping, index-ordered chunks whose sizes sum to the total.

use framecast_common::config::ExportPolicy;
use framecast_export_engine::chunk_plan::{build_chunk_plan, calculate_stable_chunk_size};
use proptest::prelude::*;

#[test]
fn proptest_plan_covers_every_frame() {
    proptest!(|(total in 1u64..200_000, chunk_size in 1u64..50_000, fps in 1u32..240)| {
        let plan = build_chunk_plan(total, chunk_size, fps);

        prop_assert!(plan.check_coverage().is_ok());
        prop_assert_eq!(plan.chunks.iter().map(|c| c.frame_count).sum::<u64>(), total);
        prop_assert!(plan.chunks.windows(2).all(|w| w[1].start_frame > w[0].start_frame));
        prop_assert!(plan.chunks.iter().all(|c| c.frame_count <= chunk_size.max(1).min(total)));
        // Only the last chunk may be short.
        let short = plan.chunks.iter().filter(|c| c.frame_count < chunk_size.min(total)).count();
        prop_assert!(short <= 1);
    });
}

#[test]
fn proptest_stable_size_respects_chunk_cap() {
    let policy = ExportPolicy::default();
    proptest!(|(fps in 1u32..120, duration_secs in 0.1f64..3_600.0)| {
        let total = (duration_secs * fps as f64).ceil() as u64;
        let size = calculate_stable_chunk_size(total, duration_secs, &policy);
        let plan = build_chunk_plan(total, size, fps);

        prop_assert!(plan.check_coverage().is_ok());
        prop_assert!(plan.len() <= policy.max_chunks as usize);
        prop_assert!(plan.len() >= 1);
    });
}

#[test]
fn proptest_collapsed_plan_spans_range() {
    proptest!(|(total in 1u64..100_000, chunk_size in 1u64..10_000)| {
        let plan = build_chunk_plan(total, chunk_size, 30).collapsed();
        prop_assert!(plan.is_single());
        prop_assert_eq!(plan.chunks[0].frame_count, total);
        prop_assert!(plan.check_coverage().is_ok());
    });
}
