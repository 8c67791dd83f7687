// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transport abstraction: wire-shaped request/response types and the `DataTransport` trait
//! that the ingester drives. A concrete transport (gRPC, in-process test double, ...)
//! implements this trait; the engine itself is transport-agnostic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Basis, DataColumn, Instant, PvInfo, PvName};
use crate::request::{MetadataRequest, Request};

/// Wire-shaped request for a single unary or streaming data call. Distinct from [`Request`]
/// because the wire form carries a pre-resolved PV list (no `BTreeSet`) and omits the
/// caller's stream-kind preference, which is a local routing decision, not a protocol field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireDataRequest {
    pub pvs: Vec<PvName>,
    pub begin: Instant,
    pub end: Instant,
    pub id: Option<String>,
}

impl From<&Request> for WireDataRequest {
    fn from(request: &Request) -> Self {
        Self {
            pvs: request.pvs.iter().cloned().collect(),
            begin: request.range.begin,
            end: request.range.end,
            id: request.id.clone(),
        }
    }
}

impl From<&crate::decompose::SubRequest> for WireDataRequest {
    fn from(sub: &crate::decompose::SubRequest) -> Self {
        Self {
            pvs: sub.pvs.clone(),
            begin: sub.range.begin,
            end: sub.range.end,
            id: sub.id.clone(),
        }
    }
}

/// A single frame returned from the archive: one bucket's worth of data for one PV.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireBucket {
    pub basis: Basis,
    pub column: DataColumn,
}

/// Control messages sent on a bidirectional cursor stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CursorOp {
    /// Requests the next batch of frames.
    Advance { max_frames: usize },
    /// Releases server-side cursor state without reading further.
    Close,
}

/// The terminal outcome of a unary or streaming call, beyond the frames themselves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DataResponse {
    /// All frames for the request have been delivered.
    Complete,
    /// The server cannot satisfy the request in a single frame; the caller must retry with
    /// a streaming mode.
    Exhausted,
    /// The server rejected the request (malformed, unknown PV, out-of-range, ...).
    Rejected { reason: String },
}

/// Wire-shaped metadata response: one [`PvInfo`] per matched PV.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMetadataResponse {
    pub entries: Vec<PvInfo>,
}

/// Abstraction over the archive's network surface. A single call may resolve to a unary
/// RPC, a server-streaming RPC, or a bidirectional cursor, chosen by the caller (typically
/// the ingester, honoring the sub-request's [`crate::request::StreamKind`] preference).
///
/// Implementors own retry/reconnect policy beneath this trait; the engine only sees the
/// three call shapes below plus metadata lookup.
#[async_trait]
pub trait DataTransport: Send + Sync {
    /// A single request/response round trip. Fails with `Exhausted` (surfaced as
    /// `DataResponse::Exhausted`) if the result would not fit in one frame.
    async fn unary(&self, request: WireDataRequest) -> crate::Result<(Vec<WireBucket>, DataResponse)>;

    /// Opens a server-push stream of frames for `request`. Returns a channel receiver the
    /// ingester drains until `DataResponse::Complete` (or an error) arrives.
    async fn server_stream(
        &self,
        request: WireDataRequest,
    ) -> crate::Result<tokio::sync::mpsc::Receiver<crate::Result<StreamItem>>>;

    /// Opens a bidirectional cursor: the ingester sends [`CursorOp`] and receives frames in
    /// response, giving it flow control over how much buckets arrive.
    async fn bidi_cursor(
        &self,
        request: WireDataRequest,
    ) -> crate::Result<(
        tokio::sync::mpsc::Sender<CursorOp>,
        tokio::sync::mpsc::Receiver<crate::Result<StreamItem>>,
    )>;

    /// Resolves PV metadata for a name list or regex pattern.
    async fn metadata(&self, request: MetadataRequest) -> crate::Result<WireMetadataResponse>;
}

/// One item on a streaming or cursor channel: either a data frame or the terminal response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StreamItem {
    Frame(WireBucket),
    Done(DataResponse),
}

/// JSON codec for a single frame, for transports that move frames as opaque JSON documents
/// (an HTTP/JSON gateway in front of the archive, say) rather than a binary wire format.
pub fn encode_frame(bucket: &WireBucket) -> crate::Result<String> {
    serde_json::to_string(bucket).map_err(|err| crate::ErrorKind::Internal.with_source(err))
}

/// Parses a frame previously produced by [`encode_frame`].
pub fn decode_frame(raw: &str) -> crate::Result<WireBucket> {
    serde_json::from_str(raw).map_err(|err| crate::ErrorKind::Internal.with_source(err))
}
