//! The inbound half of the model: status, headers and an optional
//! single-read body.

use http::StatusCode;
use http::header::{self, HeaderValue};
use serde::Serialize;

use crate::body::Body;
use crate::error::{BodyError, BuildError, FetchError};
use crate::form_data::FormData;
use crate::headers::Headers;

/// A response value object. Like [`Request`](crate::Request) it lives for
/// one exchange; the adapter drains it and throws it away.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Option<Body>,
    redirected: bool,
}

impl Response {
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::new()
    }

    /// A bodiless response with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self { status, headers: Headers::new(), body: None, redirected: false }
    }

    /// A 200 response carrying a JSON payload and matching content type.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, FetchError> {
        let payload = serde_json::to_vec(value).map_err(|e| BodyError::decode(format!("failed to serialize json: {e}")))?;
        let mut headers = Headers::new();
        headers.set(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.set(header::CONTENT_LENGTH, HeaderValue::from(payload.len() as u64));
        Ok(Self { status: StatusCode::OK, headers, body: Some(Body::from(payload)), redirected: false })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Canonical reason phrase for the status.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn redirected(&self) -> bool {
        self.redirected
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

    pub async fn json_body<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, BodyError> {
        match self.body.as_mut() {
            Some(body) => body.json().await,
            None => Err(BodyError::decode("response has no body")),
        }
    }

    pub async fn form_data(&mut self) -> Result<FormData, FetchError> {
        let content_type = self.headers.get(header::CONTENT_TYPE);
        match self.body.as_mut() {
            Some(body) => body.form_data(content_type.as_deref()).await,
            None => Err(BodyError::decode("response has no body").into()),
        }
    }

    /// Clones the response; an unread body is teed, a disturbed one fails.
    pub fn try_clone(&mut self) -> Result<Response, BodyError> {
        let body = match self.body.as_mut() {
            Some(body) => Some(body.tee()?),
            None => None,
        };
        Ok(Response { status: self.status, headers: self.headers.clone(), body, redirected: self.redirected })
    }
}

/// Builder for [`Response`]. Conversion failures are deferred and surface
/// from [`build`](ResponseBuilder::build).
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: Option<Body>,
    redirected: bool,
    error: Option<BuildError>,
}

impl ResponseBuilder {
    fn new() -> Self {
        Self { status: StatusCode::OK, headers: Headers::new(), body: None, redirected: false, error: None }
    }

    pub fn status<S>(mut self, status: S) -> Self
    where
        S: TryInto<StatusCode>,
        S::Error: std::fmt::Display,
    {
        match status.try_into() {
            Ok(status) => self.status = status,
            Err(e) => self.error = Some(BuildError::invalid_status(e)),
        }
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        match crate::request::parse_header(name, value) {
            Ok((name, value)) => self.headers.set(name, value),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn append_header(mut self, name: &str, value: &str) -> Self {
        match crate::request::parse_header(name, value) {
            Ok((name, value)) => self.headers.append(name, value),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    /// Assembles the response, injecting a body-implied content type and a
    /// knowable `Content-Length` unless already present.
    pub fn build(self) -> Result<Response, BuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut headers = self.headers;
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

        Ok(Response { status: self.status, headers, body: self.body, redirected: self.redirected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[tokio::test]
    async fn json_helper_sets_status_headers_and_body() {
        let mut response = Response::json(&json!({"responseFoo": "responseFoo"})).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.status_text(), "OK");
        assert!(response.ok());
        assert_eq!(response.headers().get("content-type").as_deref(), Some("application/json"));
        assert_eq!(response.bytes().await.unwrap(), Bytes::from(r#"{"responseFoo":"responseFoo"}"#));
    }

    #[test]
    fn builder_rejects_bad_status() {
        let err = Response::builder().status(99).build().unwrap_err();
        assert!(matches!(err, BuildError::InvalidStatus { .. }));
    }

    #[test]
    fn builder_injects_content_length() {
        let response = Response::builder().status(StatusCode::OK).body("four").build().unwrap();
        assert_eq!(response.headers().get("content-length").as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn try_clone_shares_the_full_body() {
        let mut response = Response::builder().body("payload").build().unwrap();
        let mut clone = response.try_clone().unwrap();

        assert_eq!(response.bytes().await.unwrap(), Bytes::from("payload"));
        assert_eq!(clone.bytes().await.unwrap(), Bytes::from("payload"));
    }

    #[test]
    fn empty_has_no_body() {
        let response = Response::empty(StatusCode::NO_CONTENT);
        assert!(response.body().is_none());
        assert!(!response.redirected());
    }
}
