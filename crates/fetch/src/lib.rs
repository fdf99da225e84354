//! A fetch-shaped request/response model over native HTTP primitives
//!
//! This crate provides the standard fetch vocabulary ([`Request`],
//! [`Response`], [`Headers`], [`Body`], [`FormData`], abort signals and lazy
//! byte streams) implemented on top of the async ecosystem's native
//! primitives. The hard part it owns is the bridging layer: reconciling a
//! push-based native stream world with the fetch standard's lazy pull-based
//! streams while preserving exact chunk ordering under backpressure and
//! cancellation.
//!
//! # Features
//!
//! - Case-insensitive ordered header multimap with fetch join semantics
//! - Single-read bodies with tee-based cloning
//! - Push↔pull byte stream bridging with bounded buffering
//! - Streaming `multipart/form-data` encoding and strict decoding
//! - Abort propagation that unblocks pending reads and writes promptly
//! - An outbound engine contract with capability-selected preparation
//!
//! # Example
//!
//! ```no_run
//! use ferry_fetch::{FetchError, Request, Response};
//! use http::Method;
//!
//! async fn echo(mut request: Request) -> Result<Response, FetchError> {
//!     let payload = request.text().await?;
//!     Ok(Response::builder()
//!         .status(200)
//!         .header("content-type", "application/json")
//!         .body(payload)
//!         .build()?)
//! }
//!
//! # fn build() -> Result<(), FetchError> {
//! let request = Request::builder()
//!     .method(Method::POST)
//!     .url("http://localhost:8080/echo")
//!     .header("content-type", "application/json")
//!     .body(r#"{"requestFoo":"requestFoo"}"#)
//!     .build()?;
//! # let _ = request;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`headers`]: the ordered case-insensitive header container
//! - [`stream`] / [`channel`]: lazy pull streams and the push↔pull bridge
//! - [`body`]: the single-read body state machine
//! - [`form_data`] / [`multipart`]: form entries and their wire codec
//! - [`abort`]: controllers, signals and reasons
//! - [`request`] / [`response`]: the per-exchange value objects
//! - [`engine`]: the outbound dispatch contract and capability dispatcher
//!
//! # Concurrency model
//!
//! Everything here is cooperative and single-owner. A body stream is owned
//! by exactly one reader; producers suspend at the bridge's high-water mark;
//! abort signals are observed at every suspension point. There are no locks
//! beyond the single-owner invariants; correctness rests on disciplined
//! state transitions.

pub mod abort;
pub mod body;
pub mod channel;
pub mod engine;
pub mod error;
pub mod form_data;
pub mod headers;
pub mod multipart;
pub mod request;
pub mod response;
pub mod stream;

pub use abort::{AbortController, AbortReason, AbortSignal};
pub use body::Body;
pub use channel::{ByteSink, byte_channel};
pub use engine::{FetchEngine, FetchRuntime, FetchTarget, RuntimeCapabilities, resolve_url};
pub use error::{AbortError, BodyError, BuildError, FetchError, MultipartError, NativeTransportError, NetworkError};
pub use form_data::{File, FormData, FormDataEntry};
pub use headers::Headers;
pub use request::{Request, RequestBuilder};
pub use response::{Response, ResponseBuilder};
pub use stream::{ByteStream, ChunkResult};
