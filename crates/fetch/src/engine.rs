//! Outbound dispatch: the engine contract and the runtime capability
//! dispatcher.
//!
//! The engine below us (the thing that actually talks to the network) is an
//! external collaborator behind [`FetchEngine`]. What this module owns is
//! the boundary discipline: a closed [`FetchTarget`] union instead of
//! duck-typed probing, header preparation chosen once per process from
//! [`RuntimeCapabilities`] (never branched per call), and abort observation
//! around the in-flight dispatch.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::Uri;
use http::header::{self, HeaderValue};
use tracing::debug;

use crate::abort::AbortReason;
use crate::error::{AbortError, BuildError, FetchError, NetworkError};
use crate::headers::Headers;
use crate::request::Request;
use crate::response::Response;

/// The engine that performs an outbound exchange. Implementations receive a
/// fully prepared request and either produce a response or fail with a
/// network error; cancellation is handled by the caller.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    async fn dispatch(&self, request: Request) -> Result<Response, NetworkError>;
}

/// What the host runtime is capable of, probed once at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeCapabilities {
    /// Whether the engine's transport streams request bodies natively. When
    /// false, the legacy connection-pooling preparation is used instead.
    pub native_streams: bool,
}

impl RuntimeCapabilities {
    /// Capabilities of the current host.
    pub fn detect() -> Self {
        Self { native_streams: true }
    }

    /// Forces the buffered-transport code path, for embedders bridging
    /// engines without native stream support.
    pub fn legacy() -> Self {
        Self { native_streams: false }
    }
}

impl Default for RuntimeCapabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// One stable preparation contract with two interchangeable variants.
trait DispatchStrategy: Send + Sync {
    fn prepare(&self, headers: &mut Headers);
    fn name(&self) -> &'static str;
}

/// Native transports manage connection reuse themselves; forwarding
/// connection-management headers across the boundary is a protocol hazard.
struct NativeStrategy;

impl DispatchStrategy for NativeStrategy {
    fn prepare(&self, headers: &mut Headers) {
        headers.sanitize_outbound();
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

/// Legacy transports pool connections only when asked to explicitly.
struct LegacyStrategy;

impl DispatchStrategy for LegacyStrategy {
    fn prepare(&self, headers: &mut Headers) {
        headers.set(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    fn name(&self) -> &'static str {
        "legacy"
    }
}

/// What a fetch call may be given: a url to wrap into a request, or a
/// request built by the caller. Decided once at the API boundary.
#[derive(Debug)]
pub enum FetchTarget {
    Url(Uri),
    Request(Request),
}

impl From<Uri> for FetchTarget {
    fn from(url: Uri) -> Self {
        FetchTarget::Url(url)
    }
}

impl From<Request> for FetchTarget {
    fn from(request: Request) -> Self {
        FetchTarget::Request(request)
    }
}

/// Resolves a url string, upgrading schemaless `//host/...` references to
/// `https:` for parity with how browsers treat them.
pub fn resolve_url(url: &str) -> Result<Uri, BuildError> {
    let resolved = if url.starts_with("//") { format!("https:{url}") } else { url.to_string() };
    resolved.parse().map_err(|e| BuildError::invalid_url(format!("{url:?}: {e}")))
}

/// The explicit context for outbound fetches: an engine plus the
/// preparation strategy chosen once from the host capabilities. There is no
/// process-wide runtime; embedders create one and pass it where needed.
pub struct FetchRuntime {
    engine: Arc<dyn FetchEngine>,
    strategy: &'static dyn DispatchStrategy,
}

impl FetchRuntime {
    pub fn new(capabilities: RuntimeCapabilities, engine: Arc<dyn FetchEngine>) -> Self {
        let strategy: &'static dyn DispatchStrategy =
            if capabilities.native_streams { &NativeStrategy } else { &LegacyStrategy };
        Self { engine, strategy }
    }

    /// Performs one outbound exchange.
    ///
    /// An aborted signal short-circuits before dispatch; an abort while the
    /// exchange is in flight drops the engine future promptly, which is the
    /// engine's cue to cancel the native request.
    pub async fn fetch(&self, target: impl Into<FetchTarget>) -> Result<Response, FetchError> {
        let mut request = match target.into() {
            FetchTarget::Request(request) => request,
            FetchTarget::Url(url) => Request::builder().url(url).build()?,
        };

        self.strategy.prepare(request.headers_mut());
        debug!(strategy = self.strategy.name(), method = %request.method(), url = %request.url(), "dispatching request");

        let signal = request.signal().cloned();
        match signal {
            Some(signal) => {
                if let Some(err) = signal.abort_error() {
                    return Err(err.into());
                }
                tokio::select! {
                    biased;
                    () = signal.cancelled() => {
                        let err = signal.abort_error().unwrap_or_else(|| AbortError::new(AbortReason::Explicit(None)));
                        Err(err.into())
                    }
                    result = self.engine.dispatch(request) => result.map_err(Into::into),
                }
            }
            None => self.engine.dispatch(request).await.map_err(Into::into),
        }
    }
}

impl fmt::Debug for FetchRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRuntime").field("strategy", &self.strategy.name()).finish_non_exhaustive()
    }
}
