// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stream ingester: drives a single sub-request against a [`DataTransport`] over whichever
//! of the three call shapes it prefers, delivering frames to a sink and honoring cooperative
//! cancellation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::decompose::SubRequest;
use crate::error::ErrorKind;
use crate::model::Bucket;
use crate::request::StreamKind;
use crate::transport::{CursorOp, DataResponse, DataTransport, StreamItem, WireDataRequest};

/// Outcome of draining one sub-request to completion or cancellation.
#[derive(Debug)]
pub enum IngestOutcome {
    Complete,
    Cancelled,
}

/// Drives `sub` against `transport`, pushing each decoded [`Bucket`] onto `sink` as it
/// arrives. Returns once the transport reports completion, the request is rejected/fails,
/// or `cancel` is triggered.
#[instrument(skip(transport, sink, cancel), fields(pvs = sub.pvs.len(), stream_pref = ?sub.stream_pref))]
pub async fn ingest(
    transport: Arc<dyn DataTransport>,
    sub: &SubRequest,
    sink: tokio::sync::mpsc::Sender<Bucket>,
    cancel: CancellationToken,
) -> crate::Result<IngestOutcome> {
    let wire_request = WireDataRequest::from(sub);

    match sub.stream_pref {
        StreamKind::Unary => ingest_unary(transport, wire_request, sink).await,
        StreamKind::Forward => ingest_server_stream(transport, wire_request, sink, cancel).await,
        StreamKind::Bidi => ingest_bidi(transport, wire_request, sink, cancel).await,
    }
}

async fn ingest_unary(
    transport: Arc<dyn DataTransport>,
    request: WireDataRequest,
    sink: tokio::sync::mpsc::Sender<Bucket>,
) -> crate::Result<IngestOutcome> {
    let (frames, outcome) = transport.unary(request).await?;
    match outcome {
        DataResponse::Complete => {
            for frame in frames {
                let bucket = Bucket::new(frame.basis, frame.column)?;
                if sink.send(bucket).await.is_err() {
                    return Ok(IngestOutcome::Cancelled);
                }
            }
            Ok(IngestOutcome::Complete)
        }
        DataResponse::Exhausted => Err(ErrorKind::Exhausted
            .with_message("unary result exceeds frame size limit; retry with a streaming mode")),
        DataResponse::Rejected { reason } => {
            Err(ErrorKind::TransportRejected.with_message(reason))
        }
    }
}

async fn ingest_server_stream(
    transport: Arc<dyn DataTransport>,
    request: WireDataRequest,
    sink: tokio::sync::mpsc::Sender<Bucket>,
    cancel: CancellationToken,
) -> crate::Result<IngestOutcome> {
    let mut receiver = transport.server_stream(request).await?;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("ingest cancelled mid-stream");
                return Ok(IngestOutcome::Cancelled);
            }
            item = receiver.recv() => {
                match item {
                    None => {
                        warn!("transport stream closed without a terminal response");
                        return Err(ErrorKind::TransportFailure
                            .with_message("stream closed before a terminal response arrived"));
                    }
                    Some(Err(err)) => return Err(err),
                    Some(Ok(StreamItem::Frame(frame))) => {
                        let bucket = Bucket::new(frame.basis, frame.column)?;
                        if sink.send(bucket).await.is_err() {
                            return Ok(IngestOutcome::Cancelled);
                        }
                    }
                    Some(Ok(StreamItem::Done(DataResponse::Complete))) => return Ok(IngestOutcome::Complete),
                    Some(Ok(StreamItem::Done(DataResponse::Exhausted))) => {
                        return Err(ErrorKind::Exhausted
                            .with_message("streaming result unexpectedly reported exhaustion"));
                    }
                    Some(Ok(StreamItem::Done(DataResponse::Rejected { reason }))) => {
                        return Err(ErrorKind::TransportRejected.with_message(reason));
                    }
                }
            }
        }
    }
}

async fn ingest_bidi(
    transport: Arc<dyn DataTransport>,
    request: WireDataRequest,
    sink: tokio::sync::mpsc::Sender<Bucket>,
    cancel: CancellationToken,
) -> crate::Result<IngestOutcome> {
    const BATCH: usize = 32;

    let (commands, mut frames) = transport.bidi_cursor(request).await?;
    if commands.send(CursorOp::Advance { max_frames: BATCH }).await.is_err() {
        return Err(ErrorKind::TransportFailure.with_message("cursor command channel closed"));
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = commands.send(CursorOp::Close).await;
                return Ok(IngestOutcome::Cancelled);
            }
            item = frames.recv() => {
                match item {
                    None => {
                        return Err(ErrorKind::TransportFailure
                            .with_message("cursor stream closed before a terminal response arrived"));
                    }
                    Some(Err(err)) => return Err(err),
                    Some(Ok(StreamItem::Frame(frame))) => {
                        let bucket = Bucket::new(frame.basis, frame.column)?;
                        if sink.send(bucket).await.is_err() {
                            let _ = commands.send(CursorOp::Close).await;
                            return Ok(IngestOutcome::Cancelled);
                        }
                        if commands.send(CursorOp::Advance { max_frames: BATCH }).await.is_err() {
                            return Err(ErrorKind::TransportFailure
                                .with_message("cursor command channel closed"));
                        }
                    }
                    Some(Ok(StreamItem::Done(DataResponse::Complete))) => return Ok(IngestOutcome::Complete),
                    Some(Ok(StreamItem::Done(DataResponse::Exhausted))) => {
                        return Err(ErrorKind::Exhausted
                            .with_message("cursor result unexpectedly reported exhaustion"));
                    }
                    Some(Ok(StreamItem::Done(DataResponse::Rejected { reason }))) => {
                        return Err(ErrorKind::TransportRejected.with_message(reason));
                    }
                }
            }
        }
    }
}
