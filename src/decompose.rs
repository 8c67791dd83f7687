// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Request decomposer: splits one [`Request`] into sub-requests by PV set (horizontal), time
//! range (vertical), or both (grid), subject to caps.

use crate::config::DecompositionConfig;
use crate::error::ErrorKind;
use crate::model::Instant;
use crate::request::{RangeBounds, Request, StreamKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Horizontal,
    Vertical,
    Grid,
}

/// One slice of the original request's domain, covering it exactly once in combination with
/// its siblings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubRequest {
    pub pvs: Vec<String>,
    pub range: RangeBounds,
    pub stream_pref: StreamKind,
    pub id: Option<String>,
}

/// Splits `request` into sub-requests per `strategy`, targeting `target_sub_request_count`,
/// then over-splits as needed to respect `caps`.
///
/// For `Strategy::Grid`, `target_sub_request_count` must be >= 4 and factorable into two
/// factors >= 2; the caller supplies the factoring via `grid_factors` (rows, cols).
pub fn decompose(
    request: &Request,
    strategy: Strategy,
    target_sub_request_count: usize,
    caps: &DecompositionConfig,
    grid_factors: Option<(usize, usize)>,
) -> crate::Result<Vec<SubRequest>> {
    let pvs: Vec<String> = request.pvs.iter().cloned().collect();

    let subs = match strategy {
        Strategy::Horizontal => split_horizontal(&pvs, target_sub_request_count.max(1))
            .into_iter()
            .map(|pv_group| SubRequest {
                pvs: pv_group,
                range: request.range,
                stream_pref: request.stream_pref,
                id: request.id.clone(),
            })
            .collect(),
        Strategy::Vertical => split_vertical(&request.range, target_sub_request_count.max(1))
            .into_iter()
            .map(|range| SubRequest {
                pvs: pvs.clone(),
                range,
                stream_pref: request.stream_pref,
                id: request.id.clone(),
            })
            .collect(),
        Strategy::Grid => {
            let (rows, cols) = grid_factors.ok_or_else(|| {
                ErrorKind::RequestMalformed
                    .with_message("grid decomposition requires caller-supplied factors")
            })?;
            if target_sub_request_count < 4 || rows < 2 || cols < 2 || rows * cols != target_sub_request_count
            {
                return Err(ErrorKind::RequestMalformed.with_message(
                    "grid decomposition target must be >= 4 and factor into rows*cols >= 2 each",
                ));
            }
            let pv_groups = split_horizontal(&pvs, rows);
            let ranges = split_vertical(&request.range, cols);
            let mut subs = Vec::with_capacity(rows * cols);
            for pv_group in &pv_groups {
                for range in &ranges {
                    subs.push(SubRequest {
                        pvs: pv_group.clone(),
                        range: *range,
                        stream_pref: request.stream_pref,
                        id: request.id.clone(),
                    });
                }
            }
            subs
        }
    };

    Ok(enforce_caps(subs, caps))
}

/// Partitions `pvs` into `count` near-equal groups; the quotient's remainder goes to the last
/// group. Never produces an empty group when `pvs` is non-empty (excess `count` is clamped).
fn split_horizontal(pvs: &[String], count: usize) -> Vec<Vec<String>> {
    let count = count.min(pvs.len().max(1)).max(1);
    let quotient = pvs.len() / count;
    let remainder = pvs.len() % count;

    let mut groups = Vec::with_capacity(count);
    let mut offset = 0;
    for i in 0..count {
        let extra = if i < remainder { 1 } else { 0 };
        let size = quotient + extra;
        groups.push(pvs[offset..offset + size].to_vec());
        offset += size;
    }
    groups
}

/// Partitions `range` into `count` contiguous, non-overlapping sub-intervals of equal length:
/// half-open for every segment but the last, which is closed. Segment boundaries still land on
/// equal nanosecond steps, but a sample at a boundary instant falls in exactly one sub-request
/// instead of both — sharing a boundary instant closed-closed would let a bucket that lands on
/// it come back from two sub-requests and surface as a spurious duplicate series.
fn split_vertical(range: &RangeBounds, count: usize) -> Vec<RangeBounds> {
    let count = count.max(1);
    let total_nanos = range.end.diff_nanos(range.begin).max(0) as u64;
    let step_nanos = total_nanos / count as u64;

    let mut ranges = Vec::with_capacity(count);
    let mut cursor = range.begin;
    for i in 0..count {
        let is_last = i == count - 1;
        let boundary = if is_last {
            range.end
        } else {
            cursor.plus_nanos(step_nanos)
        };
        let segment_end = if is_last || step_nanos == 0 {
            boundary
        } else {
            boundary.minus_nanos(1)
        };
        ranges.push(RangeBounds {
            begin: cursor,
            end: segment_end,
        });
        cursor = boundary;
    }
    ranges
}

/// Over-splits any sub-request that violates the caps, preserving coverage and disjointness.
/// Splits horizontally (by PV) first, then vertically (by time), repeating until every
/// sub-request is within caps.
fn enforce_caps(mut subs: Vec<SubRequest>, caps: &DecompositionConfig) -> Vec<SubRequest> {
    loop {
        let mut next = Vec::with_capacity(subs.len());
        let mut changed = false;

        for sub in subs {
            if sub.pvs.len() > caps.max_pvs_per_sub {
                let split_count = sub.pvs.len().div_ceil(caps.max_pvs_per_sub);
                for pv_group in split_horizontal(&sub.pvs, split_count) {
                    next.push(SubRequest {
                        pvs: pv_group,
                        range: sub.range,
                        stream_pref: sub.stream_pref,
                        id: sub.id.clone(),
                    });
                }
                changed = true;
                continue;
            }

            let span = sub.range.end.diff_nanos(sub.range.begin).max(0) as u64;
            let max_span = caps.max_range_per_sub.as_nanos() as u64;
            if max_span > 0 && span > max_span {
                let split_count = (span / max_span.max(1) + 1) as usize;
                for range in split_vertical(&sub.range, split_count) {
                    next.push(SubRequest {
                        pvs: sub.pvs.clone(),
                        range,
                        stream_pref: sub.stream_pref,
                        id: sub.id.clone(),
                    });
                }
                changed = true;
                continue;
            }

            next.push(sub);
        }

        subs = next;
        if !changed {
            break;
        }
    }

    // `max_streams` bounds the number of sub-requests that may be *concurrently open*, not
    // the total produced — the orchestrator queues the excess. No further splitting is
    // needed here for that cap.
    let _ = caps.max_streams;
    subs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;

    fn request(pvs: &[&str], begin_secs: i64, end_secs: i64) -> Request {
        let mut builder = RequestBuilder::new();
        builder
            .select_pvs(pvs.iter().copied())
            .range_between(Instant::from_secs(begin_secs), Instant::from_secs(end_secs));
        builder.build_data_request().unwrap()
    }

    fn covers_pv_range_exactly_once(subs: &[SubRequest], pvs: &[&str], begin: i64, end: i64) {
        // Every PV appears in sub-requests whose time ranges union to the full span with no gaps.
        for pv in pvs {
            let mut ranges: Vec<RangeBounds> = subs
                .iter()
                .filter(|s| s.pvs.iter().any(|p| p == pv))
                .map(|s| s.range)
                .collect();
            ranges.sort_by_key(|r| r.begin);
            assert_eq!(ranges.first().unwrap().begin, Instant::from_secs(begin));
            assert_eq!(ranges.last().unwrap().end, Instant::from_secs(end));
            for w in ranges.windows(2) {
                assert_eq!(
                    w[0].end.plus_nanos(1),
                    w[1].begin,
                    "vertical split must be contiguous (half-open-then-closed)"
                );
            }
        }
    }

    #[test]
    fn horizontal_split_covers_all_pvs_with_remainder_on_last() {
        let req = request(&["a", "b", "c", "d", "e"], 0, 100);
        let caps = DecompositionConfig::default();
        let subs = decompose(&req, Strategy::Horizontal, 2, &caps, None).unwrap();
        assert_eq!(subs.len(), 2);
        let total_pvs: usize = subs.iter().map(|s| s.pvs.len()).sum();
        assert_eq!(total_pvs, 5);
        covers_pv_range_exactly_once(&subs, &["a", "b", "c", "d", "e"], 0, 100);
    }

    #[test]
    fn vertical_split_produces_contiguous_disjoint_ranges() {
        let req = request(&["a"], 0, 100);
        let caps = DecompositionConfig::default();
        let subs = decompose(&req, Strategy::Vertical, 4, &caps, None).unwrap();
        assert_eq!(subs.len(), 4);
        covers_pv_range_exactly_once(&subs, &["a"], 0, 100);
    }

    #[test]
    fn grid_split_requires_factorable_target() {
        let req = request(&["a", "b"], 0, 100);
        let caps = DecompositionConfig::default();
        let err = decompose(&req, Strategy::Grid, 3, &caps, Some((1, 3))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestMalformed);
    }

    #[test]
    fn grid_split_produces_rows_times_cols_sub_requests() {
        let req = request(&["a", "b", "c", "d"], 0, 100);
        let caps = DecompositionConfig::default();
        let subs = decompose(&req, Strategy::Grid, 4, &caps, Some((2, 2))).unwrap();
        assert_eq!(subs.len(), 4);
    }

    #[test]
    fn caps_force_over_split_on_pv_count() {
        let req = request(&["a", "b", "c", "d", "e"], 0, 100);
        let mut caps = DecompositionConfig::default();
        caps.max_pvs_per_sub = 2;
        let subs = decompose(&req, Strategy::Horizontal, 1, &caps, None).unwrap();
        assert!(subs.iter().all(|s| s.pvs.len() <= 2));
        let total_pvs: usize = subs.iter().map(|s| s.pvs.len()).sum();
        assert_eq!(total_pvs, 5);
    }

    #[test]
    fn caps_force_over_split_on_range_span() {
        use std::time::Duration;
        let req = request(&["a"], 0, 100);
        let mut caps = DecompositionConfig::default();
        caps.max_range_per_sub = Duration::from_secs(30);
        let subs = decompose(&req, Strategy::Vertical, 1, &caps, None).unwrap();
        assert!(subs.len() > 1);
        covers_pv_range_exactly_once(&subs, &["a"], 0, 100);
    }
}
