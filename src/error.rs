// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{borrow::Cow, fmt::Display};

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// An empty PV set, unbounded range, or inverted range was given to a request builder.
    RequestMalformed,

    /// The server rejected the request outright. Fatal to the call.
    TransportRejected,

    /// A transport stream failed mid-flight. Fatal to the owning sub-request and, by default,
    /// to the whole call (see `fail_fast` on the orchestrator).
    TransportFailure,

    /// Cooperative cancellation completed. Not an error at the API level when caller-initiated;
    /// surfaced as a value so callers can distinguish it from real failures.
    Cancelled,

    /// Two buckets for the same PV matched the same timestamp basis. Indicates a server bug;
    /// overlapping domains are never merged.
    DuplicateSeries,

    /// A bucket's column length did not equal its basis's sample count. Indicates a server bug.
    SizeMismatch,

    /// A column's values were not assignable to the PV's declared type.
    TypeMismatch,

    /// A correlator pool task failed or exceeded `timeout.limit`.
    CompletionFailure,

    /// The unary response would exceed the server's single-frame size limit; callers must
    /// upgrade to `query_data_stream`.
    Exhausted,

    /// A fatal error from any of the above, wrapped by the façade before returning to the caller.
    /// The originating kind is recorded in the message.
    QueryFailed,

    /// Internal invariant violation. Not expected to occur; kept for parity with other clients'
    /// catch-all internal-error kind.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::RequestMalformed => write!(f, "request malformed"),
            ErrorKind::TransportRejected => write!(f, "transport rejected request"),
            ErrorKind::TransportFailure => write!(f, "transport failure"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::DuplicateSeries => write!(f, "duplicate series for basis"),
            ErrorKind::SizeMismatch => write!(f, "column size does not match basis sample count"),
            ErrorKind::TypeMismatch => write!(f, "value type not assignable to declared PV type"),
            ErrorKind::CompletionFailure => write!(f, "correlator task failed or timed out"),
            ErrorKind::Exhausted => write!(f, "result exceeds unary frame size limit"),
            ErrorKind::QueryFailed => write!(f, "query failed"),
            ErrorKind::Internal => write!(f, "internal engine error"),
        }
    }
}

impl ErrorKind {
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::from(self).with_source(source)
    }

    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::from(self).with_message(message)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    message: Option<Cow<'static, str>>,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }
}

impl Error {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn into_source(self) -> Option<Box<dyn std::error::Error + Send + Sync>> {
        self.source
    }

    /// Wraps this error as a *query-failure*, preserving the originating kind in the message.
    pub fn into_query_failure(self) -> Error {
        if self.kind == ErrorKind::QueryFailed {
            return self;
        }
        let originating = self.kind;
        let message = self.to_string();
        ErrorKind::QueryFailed
            .with_message(format!(
                "query failed (originating kind: {originating:?}): {message}"
            ))
            .with_source(self)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(&**source)
    }
}
