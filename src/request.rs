// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Request model: mutable builders that produce immutable [`Request`]/[`MetadataRequest`]
//! values for transport.

use std::collections::BTreeSet;

use crate::error::ErrorKind;
use crate::model::{Instant, PvName, TimeInterval};

/// Which transport mode a sub-request should prefer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Unary,
    Forward,
    Bidi,
}

/// An immutable data request, produced by [`RequestBuilder::build_data_request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub pvs: BTreeSet<PvName>,
    pub range: RangeBounds,
    pub stream_pref: StreamKind,
    pub id: Option<String>,
}

/// A fully-resolved `[begin, end]` range. Kept distinct from [`TimeInterval`] at the request
/// layer because request construction has its own failure modes (unbounded endpoints) that
/// don't apply once a `TimeInterval` exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeBounds {
    pub begin: Instant,
    pub end: Instant,
}

impl RangeBounds {
    pub fn as_interval(&self) -> crate::Result<TimeInterval> {
        TimeInterval::new(self.begin, self.end)
    }
}

/// Informational helper: `|pvs| * duration_seconds`, for caller-side budgeting. Not used by
/// the engine itself.
pub fn approximate_domain_size(pvs: usize, range: &RangeBounds) -> i64 {
    let duration_secs = range.end.diff_nanos(range.begin) / 1_000_000_000;
    pvs as i64 * duration_secs
}

/// Mutable builder for a [`Request`]. `build_data_request` is the only way to produce an
/// immutable value; builders themselves are reusable scratch state.
#[derive(Clone, Debug, Default)]
pub struct RequestBuilder {
    pvs: BTreeSet<PvName>,
    begin: Option<Instant>,
    end: Option<Instant>,
    stream_pref: Option<StreamKind>,
    id: Option<String>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_pv(&mut self, name: impl Into<PvName>) -> &mut Self {
        self.pvs.insert(name.into());
        self
    }

    pub fn select_pvs(&mut self, names: impl IntoIterator<Item = impl Into<PvName>>) -> &mut Self {
        for name in names {
            self.pvs.insert(name.into());
        }
        self
    }

    pub fn range_between(&mut self, begin: Instant, end: Instant) -> &mut Self {
        self.begin = Some(begin);
        self.end = Some(end);
        self
    }

    pub fn range_after(&mut self, begin: Instant) -> &mut Self {
        self.begin = Some(begin);
        self
    }

    pub fn range_before(&mut self, end: Instant) -> &mut Self {
        self.end = Some(end);
        self
    }

    pub fn set_stream_type(&mut self, kind: StreamKind) -> &mut Self {
        self.stream_pref = Some(kind);
        self
    }

    pub fn set_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    /// Builds an immutable [`Request`].
    ///
    /// Fails with *empty-request* if no PVs were selected, *unbounded-range* if either
    /// endpoint is unset, or *bad-range* if `begin >= end`.
    pub fn build_data_request(&self) -> crate::Result<Request> {
        if self.pvs.is_empty() {
            return Err(ErrorKind::RequestMalformed.with_message("empty request: no PVs selected"));
        }
        let (begin, end) = match (self.begin, self.end) {
            (Some(begin), Some(end)) => (begin, end),
            _ => {
                return Err(ErrorKind::RequestMalformed
                    .with_message("unbounded range: both begin and end must be set"))
            }
        };
        if begin >= end {
            return Err(ErrorKind::RequestMalformed.with_message("bad range: begin must be < end"));
        }
        Ok(Request {
            pvs: self.pvs.clone(),
            range: RangeBounds { begin, end },
            stream_pref: self.stream_pref.unwrap_or(StreamKind::Forward),
            id: self.id.clone(),
        })
    }
}

/// An immutable metadata request, produced by [`MetadataRequestBuilder::build_metadata_request`].
/// Exactly one of `NameList`/`NamePattern`, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataRequest {
    NameList(Vec<PvName>),
    NamePattern(String),
}

/// Builder for [`MetadataRequest`]. Selecting a regex pattern supersedes and clears any
/// previously-selected PV list, and vice versa — the build emits one or the other, never both.
#[derive(Clone, Debug, Default)]
pub struct MetadataRequestBuilder {
    names: Vec<PvName>,
    pattern: Option<String>,
}

impl MetadataRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_pv(&mut self, name: impl Into<PvName>) -> &mut Self {
        self.pattern = None;
        self.names.push(name.into());
        self
    }

    pub fn select_pvs(&mut self, names: impl IntoIterator<Item = impl Into<PvName>>) -> &mut Self {
        self.pattern = None;
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn match_pattern(&mut self, regex: impl Into<String>) -> &mut Self {
        self.names.clear();
        self.pattern = Some(regex.into());
        self
    }

    pub fn build_metadata_request(&self) -> crate::Result<MetadataRequest> {
        if let Some(pattern) = &self.pattern {
            return Ok(MetadataRequest::NamePattern(pattern.clone()));
        }
        if self.names.is_empty() {
            return Err(ErrorKind::RequestMalformed.with_message("empty request: no PVs selected"));
        }
        Ok(MetadataRequest::NameList(self.names.clone()))
    }
}
