use std::io;
use thiserror::Error;

use crate::abort::AbortReason;

/// Top level error for the fetch model.
///
/// Every lower level error converts into this one, so callers that don't
/// care about the failure class can bubble a single type with `?`.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("aborted: {source}")]
    Aborted {
        #[from]
        source: AbortError,
    },

    #[error("body error: {source}")]
    Body {
        #[from]
        source: BodyError,
    },

    #[error("multipart error: {source}")]
    Multipart {
        #[from]
        source: MultipartError,
    },

    #[error("network error: {source}")]
    Network {
        #[from]
        source: NetworkError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: NativeTransportError,
    },

    #[error("invalid message: {source}")]
    Build {
        #[from]
        source: BuildError,
    },
}

/// The operation was canceled through an [`AbortSignal`](crate::AbortSignal).
///
/// Abort is a deliberate termination path, not a protocol failure; it still
/// tears down every stream and native resource it touches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation was aborted: {reason}")]
pub struct AbortError {
    pub reason: AbortReason,
}

impl AbortError {
    pub fn new(reason: AbortReason) -> Self {
        Self { reason }
    }
}

/// Errors surfaced while acquiring or draining a body stream.
///
/// These are intentionally cloneable: a teed body delivers the same terminal
/// error to both branches, and a bridge fans one producer error out to
/// whichever side is currently awaiting a chunk.
#[derive(Debug, Clone, Error)]
pub enum BodyError {
    /// Second acquisition of a body that was already locked or drained.
    #[error("body has already been consumed")]
    AlreadyConsumed,

    #[error(transparent)]
    Aborted(#[from] AbortError),

    #[error("native transport error: {source}")]
    Transport {
        #[from]
        source: NativeTransportError,
    },

    #[error("body decode error: {reason}")]
    Decode { reason: String },

    /// Plumbing failure in the push/pull bridge, e.g. the producer went away
    /// without signalling end of stream.
    #[error("body channel error: {reason}")]
    Channel { reason: String },
}

impl BodyError {
    pub fn decode<S: ToString>(reason: S) -> Self {
        Self::Decode { reason: reason.to_string() }
    }

    pub fn channel<S: ToString>(reason: S) -> Self {
        Self::Channel { reason: reason.to_string() }
    }
}

/// Errors produced by the multipart/form-data codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipartError {
    #[error("content type does not declare a multipart boundary")]
    MissingBoundary,

    #[error("invalid multipart section header: {reason}")]
    InvalidSectionHeader { reason: String },

    #[error("invalid content-disposition: {reason}")]
    InvalidDisposition { reason: String },

    #[error("field {name:?} is not valid utf-8")]
    InvalidFieldValue { name: String },

    #[error("multipart payload truncated before the closing boundary")]
    Truncated,
}

impl MultipartError {
    pub fn invalid_section_header<S: ToString>(reason: S) -> Self {
        Self::InvalidSectionHeader { reason: reason.to_string() }
    }

    pub fn invalid_disposition<S: ToString>(reason: S) -> Self {
        Self::InvalidDisposition { reason: reason.to_string() }
    }
}

/// Outbound fetch failure reported by the engine below us.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("aborted in flight: {source}")]
    Aborted {
        #[from]
        source: AbortError,
    },

    #[error("network failure: {reason}")]
    Failure { reason: String },

    #[error("transport failure: {source}")]
    Transport {
        #[from]
        source: NativeTransportError,
    },
}

impl NetworkError {
    pub fn failure<S: ToString>(reason: S) -> Self {
        Self::Failure { reason: reason.to_string() }
    }
}

/// Socket level failure reported by the external native transport.
///
/// `io::Error` is not cloneable, so the kind and rendered message are
/// captured instead of the error value itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeTransportError {
    #[error("peer closed the connection")]
    Closed,

    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("io error ({kind:?}): {reason}")]
    Io { kind: io::ErrorKind, reason: String },
}

impl NativeTransportError {
    pub fn protocol<S: ToString>(reason: S) -> Self {
        Self::Protocol { reason: reason.to_string() }
    }

    pub fn io(e: &io::Error) -> Self {
        Self::Io { kind: e.kind(), reason: e.to_string() }
    }
}

impl From<io::Error> for NativeTransportError {
    fn from(e: io::Error) -> Self {
        Self::io(&e)
    }
}

/// Errors detected while assembling a [`Request`](crate::Request) or
/// [`Response`](crate::Response).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("request url must be set")]
    MissingUrl,

    #[error("invalid request url: {reason}")]
    InvalidUrl { reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid status code: {reason}")]
    InvalidStatus { reason: String },

    #[error("{method} request cannot carry a body")]
    BodyNotAllowed { method: http::Method },
}

impl BuildError {
    pub fn invalid_url<S: ToString>(reason: S) -> Self {
        Self::InvalidUrl { reason: reason.to_string() }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_status<S: ToString>(reason: S) -> Self {
        Self::InvalidStatus { reason: reason.to_string() }
    }
}
