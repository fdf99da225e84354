use std::error::Error;
use std::future::Future;

use async_trait::async_trait;

use ferry_fetch::{Request, Response};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// The application handler invoked for each exchange.
///
/// The handler may read the request body at any point, or never; the
/// listener keeps the native stream flowing either way.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Response, BoxError>;
}

/// A [`Handler`] backed by any async fn from [`Request`] to [`Response`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, Err> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, Err>> + Send,
    Err: Into<BoxError>,
{
    async fn handle(&self, request: Request) -> Result<Response, BoxError> {
        (self.f)(request).await.map_err(Into::into)
    }
}

pub fn make_handler<F, Fut, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, Err>> + Send,
    Err: Into<BoxError>,
{
    HandlerFn { f }
}
