// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Multi-stream orchestrator: fans a decomposed request out across a bounded pool of
//! concurrently open transport streams, queuing any sub-requests beyond the cap.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::decompose::SubRequest;
use crate::error::ErrorKind;
use crate::ingest::{self, IngestOutcome};
use crate::model::Bucket;
use crate::transport::DataTransport;

/// Whether the orchestrator cancels all still-running ingesters as soon as one fails, or
/// lets every sub-request run to completion and aggregates the first error afterward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailMode {
    FailFast,
    CollectAll,
}

/// Runs every `sub_requests` entry to completion, feeding decoded buckets to `sink` as they
/// arrive, bounding concurrently open streams to `max_streams`.
///
/// Returns `Ok(())` once every sub-request has completed (or been cancelled in `FailFast`
/// mode after a sibling failure). The first fatal error encountered is returned; in
/// `FailFast` mode it also triggers cancellation of every other in-flight ingester.
#[instrument(skip(transport, sub_requests, sink), fields(count = sub_requests.len(), max_streams))]
pub async fn orchestrate(
    transport: Arc<dyn DataTransport>,
    sub_requests: Vec<SubRequest>,
    max_streams: usize,
    fail_mode: FailMode,
    sink: mpsc::Sender<Bucket>,
    cancel: CancellationToken,
) -> crate::Result<()> {
    let max_streams = max_streams.max(1);
    let mut pending = sub_requests.into_iter();
    let mut joins: JoinSet<crate::Result<IngestOutcome>> = JoinSet::new();
    let mut errors: Vec<crate::Error> = Vec::new();

    for sub in pending.by_ref().take(max_streams) {
        spawn_one(&mut joins, Arc::clone(&transport), sub, sink.clone(), cancel.clone());
    }

    while let Some(joined) = joins.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(join_err) => Err(ErrorKind::Internal.with_source(join_err)),
        };

        if let Err(err) = result {
            warn!(kind = ?err.kind(), "sub-request ingest failed");
            if fail_mode == FailMode::FailFast {
                cancel.cancel();
            }
            errors.push(err);
        }

        if !errors.is_empty() && fail_mode == FailMode::FailFast {
            // Drain remaining queued sub-requests without starting them.
            continue;
        }

        if let Some(sub) = pending.next() {
            spawn_one(&mut joins, Arc::clone(&transport), sub, sink.clone(), cancel.clone());
        }
    }

    aggregate(errors)
}

/// Reduces every sub-request failure to a single error: the sole error unchanged, or an
/// aggregate carrying the first error as `source` and the total count in its message.
fn aggregate(mut errors: Vec<crate::Error>) -> crate::Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    if errors.len() == 1 {
        return Err(errors.pop().expect("len == 1"));
    }
    let count = errors.len();
    let first = errors.remove(0);
    let kind = first.kind();
    Err(ErrorKind::CompletionFailure
        .with_message(format!(
            "{count} sub-requests failed; first failure was {kind}: {first}"
        ))
        .with_source(first))
}

fn spawn_one(
    joins: &mut JoinSet<crate::Result<IngestOutcome>>,
    transport: Arc<dyn DataTransport>,
    sub: SubRequest,
    sink: mpsc::Sender<Bucket>,
    cancel: CancellationToken,
) {
    joins.spawn(async move { ingest::ingest(transport, &sub, sink, cancel).await });
}
