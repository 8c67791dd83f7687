// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Correlator: the component that turns an unordered stream of buckets into an ordered,
//! disjoint [`CorrelatedSet`] of blocks keyed by timestamp basis. For request volumes above
//! the configured pivot size, a pool of worker tasks matches incoming buckets against a
//! read-only snapshot of the current set concurrently; only the buckets that found no match
//! go through a serial merge phase, since that's the only part that needs to preserve
//! ordering and disjointness.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::config::ConcurrencyConfig;
use crate::error::ErrorKind;
use crate::model::{Basis, Bucket, CorrelatedBlock, Instant};

/// An ordered, pairwise-domain-disjoint sequence of [`CorrelatedBlock`]s, sorted by basis
/// start time ascending.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CorrelatedSet {
    blocks: Vec<CorrelatedBlock>,
}

impl CorrelatedSet {
    pub fn blocks(&self) -> &[CorrelatedBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn insertion_index(&self, start: Instant) -> usize {
        self.blocks.partition_point(|b| b.basis.start() < start)
    }

    /// Adds one bucket: joins an existing block with an equivalent basis, or inserts a new
    /// block at the position that keeps `blocks` sorted by start time.
    fn insert_bucket(&mut self, bucket: Bucket) -> crate::Result<()> {
        if let Some(existing) = self
            .blocks
            .iter_mut()
            .find(|b| b.basis.equivalent(&bucket.basis))
        {
            return existing.add(bucket);
        }
        let index = self.insertion_index(bucket.basis.start());
        self.blocks.insert(index, CorrelatedBlock::seed(bucket));
        Ok(())
    }

    /// True if `blocks` is sorted by basis start time.
    pub fn verify_ordering(&self) -> bool {
        self.blocks.windows(2).all(|w| w[0].basis.start() <= w[1].basis.start())
    }

    /// True if no two blocks' domains share a point.
    pub fn verify_disjoint_domains(&self) -> bool {
        self.blocks
            .windows(2)
            .all(|w| !w[0].basis.domain().intersects_closed(&w[1].basis.domain()))
    }

    /// True if every column in every block matches its block's basis sample count.
    pub fn verify_column_sizes(&self) -> bool {
        self.blocks.iter().all(|block| {
            block
                .columns
                .values()
                .all(|col| col.values.len() == block.basis.sample_count())
        })
    }
}

/// Groups buckets into the running [`CorrelatedSet`], switching between a serial insert loop
/// and a two-phase parallel partition-then-merge depending on batch size and configuration.
#[derive(Debug, Default)]
pub struct Correlator {
    set: CorrelatedSet,
    concurrency: ConcurrencyConfig,
    bytes_processed: u64,
}

impl Correlator {
    pub fn new(concurrency: ConcurrencyConfig) -> Self {
        Self {
            set: CorrelatedSet::default(),
            concurrency,
            bytes_processed: 0,
        }
    }

    pub fn correlated_set(&self) -> &CorrelatedSet {
        &self.set
    }

    /// Monotonically increasing count of column bytes ingested since the last `reset`.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    pub fn set_concurrency(&mut self, concurrency: ConcurrencyConfig) {
        self.concurrency = concurrency;
    }

    pub fn reset(&mut self) {
        self.set = CorrelatedSet::default();
        self.bytes_processed = 0;
    }

    /// Inserts a single bucket, always via the serial path.
    pub fn insert_bucket(&mut self, bucket: Bucket) -> crate::Result<()> {
        let size = bucket.column.estimated_bytes();
        self.set.insert_bucket(bucket)?;
        self.bytes_processed += size;
        Ok(())
    }

    /// Inserts a batch of buckets, choosing the parallel path when the batch is at least
    /// `concurrency.pivot_size` and parallel insertion is enabled.
    #[instrument(skip(self, buckets), fields(count = buckets.len()))]
    pub async fn insert_frame(&mut self, buckets: Vec<Bucket>) -> crate::Result<()> {
        if !self.concurrency.active || buckets.len() < self.concurrency.pivot_size {
            for bucket in buckets {
                self.insert_bucket(bucket)?;
            }
            return Ok(());
        }

        let (matched, unmatched) = self.partition_parallel(buckets).await?;
        self.merge_groups(matched, unmatched)
    }

    /// Phase 1: takes a read-only snapshot of the current set and spawns `thread_count`
    /// worker tasks, each attempting to match its share of `buckets` against that snapshot.
    /// A bucket whose basis already has a block in the snapshot is `matched`; everything
    /// else is `unmatched` and left for the serial merge phase to place.
    async fn partition_parallel(
        &self,
        buckets: Vec<Bucket>,
    ) -> crate::Result<(Vec<Bucket>, Vec<Bucket>)> {
        let thread_count = self.concurrency.thread_count.max(1);
        let chunk_size = buckets.len().div_ceil(thread_count).max(1);
        let timeout_limit = self.concurrency.timeout_limit;
        let snapshot = Arc::new(self.set.clone());

        let mut joins: JoinSet<crate::Result<(Vec<Bucket>, Vec<Bucket>)>> = JoinSet::new();
        for chunk in buckets.into_iter().collect::<Vec<_>>().chunks(chunk_size).map(<[_]>::to_vec) {
            joins.spawn(partition_chunk(chunk, Arc::clone(&snapshot), timeout_limit));
        }

        let mut matched = Vec::new();
        let mut unmatched = Vec::new();
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok(Ok((m, u))) => {
                    matched.extend(m);
                    unmatched.extend(u);
                }
                Ok(Err(err)) => {
                    warn!(kind = ?err.kind(), "partition task failed");
                    return Err(err);
                }
                Err(join_err) => {
                    return Err(ErrorKind::CompletionFailure.with_source(join_err));
                }
            }
        }
        Ok((matched, unmatched))
    }

    /// Phase 2: the only part of insertion that touches the live set. Matched buckets join
    /// the blocks the workers found them against; unmatched buckets seed new blocks, placed
    /// in sorted order — two unmatched buckets sharing a new basis still land in the same
    /// block, since the first insert creates it and the second then matches against it here.
    fn merge_groups(&mut self, matched: Vec<Bucket>, unmatched: Vec<Bucket>) -> crate::Result<()> {
        for bucket in matched.into_iter().chain(unmatched) {
            self.insert_bucket(bucket)?;
        }
        Ok(())
    }
}

/// Checks `chunk` against the read-only `snapshot` of the set as it stood before this frame
/// started, splitting it into buckets that already have a matching block and buckets that
/// don't. Performs no mutation; the serial merge phase alone is allowed to touch the live set.
async fn partition_chunk(
    chunk: Vec<Bucket>,
    snapshot: Arc<CorrelatedSet>,
    timeout_limit: Duration,
) -> crate::Result<(Vec<Bucket>, Vec<Bucket>)> {
    let work = async move {
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();
        for bucket in chunk {
            if snapshot.blocks().iter().any(|b| b.basis.equivalent(&bucket.basis)) {
                matched.push(bucket);
            } else {
                unmatched.push(bucket);
            }
        }
        (matched, unmatched)
    };

    match tokio::time::timeout(timeout_limit, work).await {
        Ok(result) => Ok(result),
        Err(_) => Err(ErrorKind::CompletionFailure.with_message("partition task exceeded timeout limit")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataColumn, Value, ValueType};

    fn clock_bucket(start_secs: i64, pv: &str) -> Bucket {
        let basis = Basis::clock(Instant::from_secs(start_secs), 1_000_000_000, 2).unwrap();
        let column = DataColumn::new(pv.into(), ValueType::F64, vec![Value::F64(1.0), Value::F64(2.0)]).unwrap();
        Bucket::new(basis, column).unwrap()
    }

    /// A single-sample basis at a distinct instant, so blocks built from distinct start
    /// times never touch even under the closed-interval domain definition.
    fn disjoint_clock_bucket(start_secs: i64, pv: &str) -> Bucket {
        let basis = Basis::clock(Instant::from_secs(start_secs * 2), 1_000_000_000, 1).unwrap();
        let column = DataColumn::new(pv.into(), ValueType::F64, vec![Value::F64(1.0)]).unwrap();
        Bucket::new(basis, column).unwrap()
    }

    #[tokio::test]
    async fn serial_insert_groups_matching_bases_into_one_block() {
        let mut correlator = Correlator::new(ConcurrencyConfig {
            active: false,
            ..ConcurrencyConfig::default()
        });
        correlator.insert_bucket(clock_bucket(0, "a")).unwrap();
        correlator.insert_bucket(clock_bucket(0, "b")).unwrap();
        assert_eq!(correlator.correlated_set().len(), 1);
        assert_eq!(correlator.correlated_set().blocks()[0].columns.len(), 2);
    }

    #[tokio::test]
    async fn serial_insert_keeps_blocks_ordered_by_start() {
        let mut correlator = Correlator::new(ConcurrencyConfig {
            active: false,
            ..ConcurrencyConfig::default()
        });
        correlator.insert_bucket(clock_bucket(10, "a")).unwrap();
        correlator.insert_bucket(clock_bucket(0, "a")).unwrap();
        correlator.insert_bucket(clock_bucket(5, "a")).unwrap();
        assert!(correlator.correlated_set().verify_ordering());
    }

    #[tokio::test]
    async fn duplicate_pv_in_same_basis_is_rejected() {
        let mut correlator = Correlator::default();
        correlator.insert_bucket(clock_bucket(0, "a")).unwrap();
        let err = correlator.insert_bucket(clock_bucket(0, "a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateSeries);
    }

    #[tokio::test]
    async fn reset_then_reinsert_same_frame_is_idempotent() {
        let mut correlator = Correlator::new(ConcurrencyConfig {
            active: true,
            thread_count: 4,
            pivot_size: 4,
            timeout_limit: Duration::from_secs(5),
        });
        let frame: Vec<Bucket> = (0..20).map(|i| disjoint_clock_bucket(i, &format!("pv{i}"))).collect();

        correlator.reset();
        correlator.insert_frame(frame.clone()).await.unwrap();
        let first = correlator.correlated_set().clone();

        correlator.reset();
        correlator.insert_frame(frame).await.unwrap();
        let second = correlator.correlated_set().clone();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn parallel_path_matches_serial_result_above_pivot() {
        let mut correlator = Correlator::new(ConcurrencyConfig {
            active: true,
            thread_count: 4,
            pivot_size: 4,
            timeout_limit: Duration::from_secs(5),
        });
        let buckets: Vec<Bucket> = (0..20).map(|i| disjoint_clock_bucket(i, &format!("pv{i}"))).collect();
        correlator.insert_frame(buckets).await.unwrap();
        assert_eq!(correlator.correlated_set().len(), 20);
        assert!(correlator.correlated_set().verify_ordering());
        assert!(correlator.correlated_set().verify_disjoint_domains());
        assert!(correlator.correlated_set().verify_column_sizes());
    }

    #[tokio::test]
    async fn reset_clears_accumulated_state() {
        let mut correlator = Correlator::default();
        correlator.insert_bucket(clock_bucket(0, "a")).unwrap();
        correlator.reset();
        assert!(correlator.correlated_set().is_empty());
        assert_eq!(correlator.bytes_processed(), 0);
    }

    #[tokio::test]
    async fn bytes_processed_accumulates_across_inserts_and_resets_to_zero() {
        let mut correlator = Correlator::default();
        correlator.insert_bucket(clock_bucket(0, "a")).unwrap();
        let after_one = correlator.bytes_processed();
        assert!(after_one > 0);
        correlator.insert_bucket(clock_bucket(1, "a")).unwrap();
        assert!(correlator.bytes_processed() > after_one);
        correlator.reset();
        assert_eq!(correlator.bytes_processed(), 0);
    }
}
