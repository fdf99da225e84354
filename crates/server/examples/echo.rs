//! Drives one in-memory exchange through the request listener: a JSON POST
//! is bridged into a fetch Request, echoed by the handler, and the reply is
//! printed as it streams out.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream;
use http::header::{HeaderValue, HOST};
use http::{Method, StatusCode, Version};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ferry_fetch::{Headers, NativeTransportError, Request, Response};
use ferry_server::handler::{make_handler, BoxError};
use ferry_server::listener::RequestListener;
use ferry_server::transport::{BodyEvent, IncomingHead, NativeConnection, ReplyChannel};

/// Reply channel that narrates what the adapter writes.
struct PrintingReply;

impl ReplyChannel for PrintingReply {
    async fn send_head(&mut self, status: StatusCode, headers: &Headers) -> Result<(), NativeTransportError> {
        info!(%status, "reply head");
        headers.for_each(|name, value| info!(header = %name, value, "reply header"));
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), NativeTransportError> {
        info!(chunk = %String::from_utf8_lossy(&chunk), "reply chunk");
        Ok(())
    }

    async fn end(&mut self) -> Result<(), NativeTransportError> {
        info!("reply ended");
        Ok(())
    }

    async fn terminate(&mut self) {
        info!("reply terminated");
    }
}

async fn echo(mut request: Request) -> Result<Response, BoxError> {
    info!(method = %request.method(), url = %request.url(), "handling request");
    let payload = request.text().await?;
    Ok(Response::builder().status(200).header("content-type", "application/json").body(payload).build()?)
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let listener = Arc::new(RequestListener::new(make_handler(echo)));

    let head = IncomingHead::new(
        Method::POST,
        "/echo",
        Version::HTTP_11,
        vec![
            (HOST, HeaderValue::from_static("localhost:8080")),
            (http::header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
        ],
    );
    let body = stream::iter([
        Ok(BodyEvent::Chunk(Bytes::from_static(b"{\"requestFoo\":"))),
        Ok(BodyEvent::Chunk(Bytes::from_static(b"\"requestFoo\"}"))),
        Ok(BodyEvent::End),
    ]);

    let mut reply = PrintingReply;
    match listener.serve(head, Some(body), &mut reply, NativeConnection::detached()).await {
        Ok(outcome) => info!(?outcome, "exchange finished"),
        Err(e) => info!(cause = %e, "exchange failed"),
    }
}
