//! The outbound half of the model: a method, an absolute url, headers, an
//! optional single-read body and an optional abort signal.

use http::header::{self, HeaderName, HeaderValue};
use http::{Method, Uri};

use crate::abort::AbortSignal;
use crate::body::Body;
use crate::error::{BodyError, BuildError, FetchError};
use crate::form_data::FormData;
use crate::headers::Headers;

/// An immutable-by-convention request value. Created per exchange and
/// discarded once the exchange ends.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Uri,
    headers: Headers,
    body: Option<Body>,
    signal: Option<AbortSignal>,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn signal(&self) -> Option<&AbortSignal> {
        self.signal.as_ref()
    }

    /// Collects the body, empty when the request has none.
    pub async fn bytes(&mut self) -> Result<bytes::Bytes, BodyError> {
        match self.body.as_mut() {
            Some(body) => body.bytes().await,
            None => Ok(bytes::Bytes::new()),
        }
    }

    pub async fn text(&mut self) -> Result<String, BodyError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, BodyError> {
        match self.body.as_mut() {
            Some(body) => body.json().await,
            None => Err(BodyError::decode("request has no body")),
        }
    }

    /// Decodes the body as form entries, dispatching on the request's
    /// declared content type.
    pub async fn form_data(&mut self) -> Result<FormData, FetchError> {
        let content_type = self.headers.get(header::CONTENT_TYPE);
        match self.body.as_mut() {
            Some(body) => body.form_data(content_type.as_deref()).await,
            None => Err(BodyError::decode("request has no body").into()),
        }
    }

    /// Clones the request without consuming it.
    ///
    /// An unread body is teed so both requests yield the full byte sequence;
    /// headers are copied, never aliased. Fails once the body is disturbed.
    pub fn try_clone(&mut self) -> Result<Request, BodyError> {
        let body = match self.body.as_mut() {
            Some(body) => Some(body.tee()?),
            None => None,
        };
        Ok(Request {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
            signal: self.signal.clone(),
        })
    }
}

/// Builder for [`Request`]. Conversion failures are deferred and surface
/// from [`build`](RequestBuilder::build).
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    url: Option<Uri>,
    headers: Headers,
    body: Option<Body>,
    signal: Option<AbortSignal>,
    error: Option<BuildError>,
}

impl RequestBuilder {
    fn new() -> Self {
        Self { method: Method::GET, url: None, headers: Headers::new(), body: None, signal: None, error: None }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn url<U>(mut self, url: U) -> Self
    where
        U: TryInto<Uri>,
        U::Error: std::fmt::Display,
    {
        match url.try_into() {
            Ok(url) => self.url = Some(url),
            Err(e) => self.error = Some(BuildError::invalid_url(e)),
        }
        self
    }

    /// Sets a header, overwriting earlier entries for the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok((name, value)) => self.headers.set(name, value),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Adds a header entry, keeping earlier ones for the same name.
    pub fn append_header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok((name, value)) => self.headers.append(name, value),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Replaces the whole header container.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Validates and assembles the request.
    ///
    /// Normalization applied here, before the request ever reaches an
    /// engine or adapter:
    /// - any caller-supplied `connection` header is dropped, case
    ///   insensitively;
    /// - a body-implied content type (multipart boundary) and a knowable
    ///   `Content-Length` are injected unless already present;
    /// - GET/HEAD requests must not carry a body, and the url must be
    ///   absolute.
    pub fn build(self) -> Result<Request, BuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let url = self.url.ok_or(BuildError::MissingUrl)?;
        if url.scheme().is_none() || url.authority().is_none() {
            return Err(BuildError::invalid_url(format!("url must be absolute, got {url}")));
        }

        if self.body.is_some() && matches!(self.method, Method::GET | Method::HEAD) {
            return Err(BuildError::BodyNotAllowed { method: self.method });
        }

        let mut headers = self.headers;
        headers.delete(header::CONNECTION);

        if let Some(body) = &self.body {
            if !headers.contains(header::CONTENT_TYPE) {
                if let Some(content_type) = body.content_type_hint() {
                    headers.set(header::CONTENT_TYPE, content_type.parse().expect("codec content types are valid header values"));
                }
            }
            if !headers.contains(header::CONTENT_LENGTH) {
                if let Some(length) = body.known_length() {
                    headers.set(header::CONTENT_LENGTH, HeaderValue::from(length));
                }
            }
        }

        Ok(Request { method: self.method, url, headers, body: self.body, signal: self.signal })
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), BuildError> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| BuildError::invalid_header(format!("{name:?}: {e}")))?;
    let value = HeaderValue::from_str(value).map_err(|e| BuildError::invalid_header(format!("{name:?} value: {e}")))?;
    Ok((name, value))
}
