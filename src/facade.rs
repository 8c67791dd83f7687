// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Service façade: the public entry point a caller holds. Owns the shared correlator,
//! dispatches decomposition/orchestration/ingestion for each call, and tracks a small
//! lifecycle state machine (`ready -> shutting_down -> terminated`) so in-flight calls drain
//! cleanly instead of being torn down mid-stream.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::assemble::{AssembledTable, TableAssembler};
use crate::config::EngineConfig;
use crate::correlate::Correlator;
use crate::decompose::{self, Strategy};
use crate::error::{Error, ErrorKind};
use crate::model::{Bucket, PvInfo, PvName};
use crate::orchestrate::{self, FailMode};
use crate::request::{MetadataRequest, Request};
use crate::transport::DataTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Ready = 0,
    ShuttingDown = 1,
    Terminated = 2,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Ready,
            1 => State::ShuttingDown,
            _ => State::Terminated,
        }
    }
}

/// The client-side query engine. Cheaply `Clone`-able (internals are `Arc`-shared); every
/// clone observes the same lifecycle state and shares the same correlator lock.
#[derive(Clone)]
pub struct QueryService {
    transport: Arc<dyn DataTransport>,
    config: EngineConfig,
    correlator: Arc<Mutex<Correlator>>,
    state: Arc<AtomicU8>,
    in_flight: Arc<AtomicUsize>,
    terminated: Arc<Notify>,
    shutdown: CancellationToken,
}

/// RAII guard tracking one accepted call. Dropping the last guard while the service is
/// `shutting_down` completes the transition to `terminated` and wakes `await_termination`.
struct CallGuard {
    in_flight: Arc<AtomicUsize>,
    state: Arc<AtomicU8>,
    terminated: Arc<Notify>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && State::from_u8(self.state.load(Ordering::SeqCst)) == State::ShuttingDown {
            self.state.store(State::Terminated as u8, Ordering::SeqCst);
            self.terminated.notify_waiters();
        }
    }
}

impl QueryService {
    pub fn new(transport: Arc<dyn DataTransport>, config: EngineConfig) -> Self {
        Self {
            transport,
            correlator: Arc::new(Mutex::new(Correlator::new(config.concurrency))),
            config,
            state: Arc::new(AtomicU8::new(State::Ready as u8)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        }
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Validates the service is accepting calls and registers one in-flight call, whose
    /// completion is tracked by the returned guard.
    fn check_accepting(&self) -> crate::Result<CallGuard> {
        match self.state() {
            State::Ready => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                Ok(CallGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    state: Arc::clone(&self.state),
                    terminated: Arc::clone(&self.terminated),
                })
            }
            State::ShuttingDown => {
                Err(ErrorKind::Cancelled.with_message("service is shutting down; no new calls accepted"))
            }
            State::Terminated => Err(ErrorKind::Cancelled.with_message("service is terminated")),
        }
    }

    /// Resolves PV metadata for a name list or pattern.
    #[instrument(skip(self))]
    pub async fn query_meta(&self, request: MetadataRequest) -> crate::Result<Vec<PvInfo>> {
        let _guard = self.check_accepting()?;
        let response = self.transport.metadata(request).await.map_err(Error::into_query_failure)?;
        Ok(response.entries)
    }

    /// Single-frame data query. Fails with `Exhausted` if the server can't satisfy the
    /// request in one frame; callers should fall back to [`Self::query_data_stream`].
    #[instrument(skip(self, request))]
    pub async fn query_data_unary(&self, request: Request) -> crate::Result<AssembledTable> {
        let _guard = self.check_accepting()?;
        let wire_request = crate::transport::WireDataRequest::from(&request);
        let (frames, outcome) = self
            .transport
            .unary(wire_request)
            .await
            .map_err(Error::into_query_failure)?;

        match outcome {
            crate::transport::DataResponse::Complete => {
                let mut correlator = self.correlator.lock().await;
                correlator.reset();
                for frame in frames {
                    let bucket = Bucket::new(frame.basis, frame.column).map_err(Error::into_query_failure)?;
                    correlator.insert_bucket(bucket).map_err(Error::into_query_failure)?;
                }
                let set = correlator.correlated_set().clone();
                Ok(TableAssembler::new(self.config.table).assemble(set, &request.pvs, false))
            }
            crate::transport::DataResponse::Exhausted => Err(ErrorKind::Exhausted
                .with_message("unary result exceeds frame size limit")
                .into_query_failure()),
            crate::transport::DataResponse::Rejected { reason } => {
                Err(ErrorKind::TransportRejected.with_message(reason).into_query_failure())
            }
        }
    }

    /// Multi-stream data query: decomposes `request` into sub-requests, fans them out across
    /// a bounded pool of concurrent streams, and correlates the results into a table.
    #[instrument(skip(self, request))]
    pub async fn query_data(&self, request: Request) -> crate::Result<AssembledTable> {
        let _guard = self.check_accepting()?;
        // Use as many concurrent streams as the PV set and `max_streams` allow; `enforce_caps`
        // inside `decompose` handles any further splitting `max_pvs_per_sub`/`max_range_per_sub`
        // demand.
        let target = self.config.decomposition.max_streams.min(request.pvs.len()).max(1);
        let subs = decompose::decompose(
            &request,
            Strategy::Horizontal,
            target,
            &self.config.decomposition,
            None,
        )
        .map_err(Error::into_query_failure)?;

        self.run_multi_stream(subs, request.pvs).await
    }

    /// Identical semantics to [`Self::query_data`] but the caller supplies a pre-decomposed
    /// set of sub-requests directly (e.g. from a caller-side planner). The original PV list
    /// `P` is reconstructed as the union of every sub-request's PVs, since no whole `Request`
    /// is available here.
    #[instrument(skip(self, sub_requests))]
    pub async fn query_data_multi(
        &self,
        sub_requests: Vec<crate::decompose::SubRequest>,
    ) -> crate::Result<AssembledTable> {
        let _guard = self.check_accepting()?;
        let pvs: BTreeSet<PvName> = sub_requests.iter().flat_map(|s| s.pvs.iter().cloned()).collect();
        self.run_multi_stream(sub_requests, pvs).await
    }

    /// Like [`Self::query_data`], but returns the live correlated set as it accumulates
    /// rather than waiting for the whole call to finish, via a bounded channel of buckets
    /// the caller drains concurrently with ingestion.
    #[instrument(skip(self, request))]
    pub async fn query_data_stream(
        &self,
        request: Request,
    ) -> crate::Result<tokio::sync::mpsc::Receiver<Bucket>> {
        let guard = self.check_accepting()?;
        let target = self.config.decomposition.max_streams;
        let subs = decompose::decompose(
            &request,
            Strategy::Horizontal,
            target,
            &self.config.decomposition,
            None,
        )
        .map_err(Error::into_query_failure)?;

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let transport = Arc::clone(&self.transport);
        let max_streams = self.config.decomposition.max_streams;
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let _guard = guard;
            let _ = orchestrate::orchestrate(transport, subs, max_streams, FailMode::FailFast, tx, cancel).await;
        });
        Ok(rx)
    }

    async fn run_multi_stream(
        &self,
        sub_requests: Vec<crate::decompose::SubRequest>,
        pvs: BTreeSet<PvName>,
    ) -> crate::Result<AssembledTable> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let transport = Arc::clone(&self.transport);
        let max_streams = self.config.decomposition.max_streams;
        let cancel = self.shutdown.child_token();

        let correlator = Arc::clone(&self.correlator);
        let drain = tokio::spawn(async move {
            let mut correlator = correlator.lock().await;
            correlator.reset();
            let mut batch = Vec::new();
            while let Some(bucket) = rx.recv().await {
                batch.push(bucket);
                if batch.len() >= 64 {
                    correlator.insert_frame(std::mem::take(&mut batch)).await?;
                }
            }
            if !batch.is_empty() {
                correlator.insert_frame(batch).await?;
            }
            crate::Result::<()>::Ok(())
        });

        orchestrate::orchestrate(transport, sub_requests, max_streams, FailMode::FailFast, tx, cancel)
            .await
            .map_err(Error::into_query_failure)?;

        drain
            .await
            .map_err(|join_err| ErrorKind::Internal.with_source(join_err))?
            .map_err(Error::into_query_failure)?;

        let set = self.correlator.lock().await.correlated_set().clone();
        Ok(TableAssembler::new(self.config.table).assemble(set, &pvs, false))
    }

    /// Begins a graceful shutdown: new calls are rejected immediately, but calls already in
    /// flight are allowed to finish (cooperative cancellation is not triggered). Returns
    /// `true` if this call performed the transition, `false` if the service was already
    /// shutting down or terminated.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> bool {
        let transitioned = self
            .state
            .compare_exchange(
                State::Ready as u8,
                State::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if transitioned {
            if self.config.logging_active {
                info!("query service entering graceful shutdown");
            }
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                self.state.store(State::Terminated as u8, Ordering::SeqCst);
                self.terminated.notify_waiters();
            }
        }
        transitioned
    }

    /// Cancels every in-flight call immediately via the shared cancellation token, then
    /// marks the service terminated. Idempotent; returns `true` only the first time it runs.
    #[instrument(skip(self))]
    pub fn shutdown_now(&self) -> bool {
        let already_terminal = self.state.swap(State::Terminated as u8, Ordering::SeqCst) == State::Terminated as u8;
        self.shutdown.cancel();
        self.terminated.notify_waiters();
        if !already_terminal && self.config.logging_active {
            info!("query service terminated");
        }
        !already_terminal
    }

    /// Blocks until the service reaches `terminated` or `timeout` elapses, whichever comes
    /// first. Returns `true` if termination was observed within the deadline.
    #[instrument(skip(self))]
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        if self.state() == State::Terminated {
            return true;
        }
        let wait = self.terminated.notified();
        tokio::time::timeout(timeout, wait).await.is_ok() || self.state() == State::Terminated
    }
}
