//! Request listener bridging native HTTP transports to the fetch model
//!
//! This crate turns an incoming native HTTP exchange into a fetch-shaped
//! [`Request`](ferry_fetch::Request), hands it to an application
//! [`Handler`], and writes the returned
//! [`Response`](ferry_fetch::Response) back to the native reply channel,
//! streaming in both directions, with abort propagation wired between the
//! native connection and the request's signal.
//!
//! The native transport itself is an external collaborator described by the
//! [`transport`] contract: it delivers a head plus push-based body events,
//! and accepts a status line, header pairs and a push-based byte sink with
//! a drain signal.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferry_fetch::{Request, Response};
//! use ferry_server::handler::{BoxError, make_handler};
//! use ferry_server::listener::RequestListener;
//!
//! async fn echo(mut request: Request) -> Result<Response, BoxError> {
//!     let payload = request.text().await?;
//!     Ok(Response::builder().status(200).body(payload).build()?)
//! }
//!
//! let listener = Arc::new(RequestListener::new(make_handler(echo)));
//! // per native exchange: listener.serve(head, body_events, &mut reply, connection)
//! # let _ = listener;
//! ```
//!
//! # Lifecycle guarantees
//!
//! - The request body is attached lazily; nothing is read until the handler
//!   pulls.
//! - A handler that never touches the body does not wedge the connection:
//!   the unread remainder is drained before the exchange completes.
//! - Peer disconnect aborts the request signal; application abort tears
//!   down native body consumption.
//! - Response bodies are streamed chunk by chunk with producer pacing
//!   preserved, never buffered wholesale.
//! - On failure the native channel is still closed or terminated; no
//!   sockets or stream subscriptions leak past the exchange.

pub mod handler;
pub mod listener;
pub mod transport;

pub use handler::{BoxError, Handler, HandlerFn, make_handler};
pub use listener::{ExchangeOutcome, RequestListener, ServeError};
pub use transport::{BodyEvent, BodySource, IncomingHead, NativeConnection, ReplyChannel};
