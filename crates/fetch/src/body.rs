//! Message bodies: at most one logical stream, consumable exactly once.
//!
//! The source of a body is a closed union decided at the API boundary
//! (in-memory bytes, a lazy stream, or a form awaiting multipart encoding),
//! never probed dynamically afterwards. Reading twice is a
//! [`BodyError::AlreadyConsumed`]; cloning before any read tees the
//! underlying source so both bodies can be read independently exactly once
//! each.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{BodyError, FetchError};
use crate::form_data::FormData;
use crate::multipart::{self, Encoder};
use crate::stream::ByteStream;

/// A request or response body.
#[derive(Debug)]
pub struct Body {
    state: BodyState,
}

#[derive(Debug)]
enum BodyState {
    Fresh(BodySource),
    Consumed,
}

#[derive(Debug)]
enum BodySource {
    Empty,
    Once(Bytes),
    Stream(ByteStream),
    Form { form: FormData, encoder: Encoder },
}

impl Body {
    pub fn empty() -> Self {
        Self { state: BodyState::Fresh(BodySource::Empty) }
    }

    /// True once the body has been locked or drained.
    pub fn disturbed(&self) -> bool {
        matches!(self.state, BodyState::Consumed)
    }

    /// Exact byte length when knowable up front: in-memory sources and forms
    /// (whose entries are in-memory). Streams report `None`.
    pub fn known_length(&self) -> Option<u64> {
        match &self.state {
            BodyState::Fresh(BodySource::Empty) => Some(0),
            BodyState::Fresh(BodySource::Once(bytes)) => Some(bytes.len() as u64),
            BodyState::Fresh(BodySource::Stream(_)) => None,
            BodyState::Fresh(BodySource::Form { form, encoder }) => Some(encoder.encoded_len(form)),
            BodyState::Consumed => None,
        }
    }

    /// Content type implied by the source itself, if any. Forms carry their
    /// boundary-bearing multipart content type.
    pub fn content_type_hint(&self) -> Option<String> {
        match &self.state {
            BodyState::Fresh(BodySource::Form { encoder, .. }) => Some(encoder.content_type()),
            _ => None,
        }
    }

    /// Locks the body and hands out its stream. The one and only read.
    pub fn stream(&mut self) -> Result<ByteStream, BodyError> {
        match std::mem::replace(&mut self.state, BodyState::Consumed) {
            BodyState::Fresh(BodySource::Empty) => Ok(ByteStream::empty()),
            BodyState::Fresh(BodySource::Once(bytes)) => Ok(ByteStream::once(bytes)),
            BodyState::Fresh(BodySource::Stream(stream)) => Ok(stream),
            BodyState::Fresh(BodySource::Form { form, encoder }) => Ok(encoder.encode(form)),
            BodyState::Consumed => Err(BodyError::AlreadyConsumed),
        }
    }

    /// Collects the whole body into one buffer.
    pub async fn bytes(&mut self) -> Result<Bytes, BodyError> {
        self.stream()?.collect_bytes().await
    }

    /// Collects and decodes as UTF-8, replacing invalid sequences.
    pub async fn text(&mut self) -> Result<String, BodyError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Collects and deserializes a JSON payload.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, BodyError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BodyError::decode(format!("invalid json body: {e}")))
    }

    /// Materializes the body as form entries.
    ///
    /// A body built from a [`FormData`] hands its entries straight back.
    /// Otherwise the declared content type decides the decode:
    /// `multipart/form-data` (with boundary) or
    /// `application/x-www-form-urlencoded`.
    pub async fn form_data(&mut self, content_type: Option<&str>) -> Result<FormData, FetchError> {
        if let BodyState::Fresh(BodySource::Form { .. }) = &self.state {
            match std::mem::replace(&mut self.state, BodyState::Consumed) {
                BodyState::Fresh(BodySource::Form { form, .. }) => return Ok(form),
                _ => unreachable!("state checked above"),
            }
        }

        let content_type = content_type.ok_or_else(|| BodyError::decode("missing content type for form body"))?;
        if content_type.starts_with("application/x-www-form-urlencoded") {
            let payload = self.bytes().await?;
            return Ok(FormData::from_urlencoded(&payload)?);
        }

        let boundary = multipart::parse_boundary(content_type)?;
        let payload = self.bytes().await?;
        Ok(multipart::decode(&payload, &boundary)?)
    }

    /// Splits an unread body in two; both halves yield the full byte
    /// sequence and each can still be read exactly once.
    pub fn tee(&mut self) -> Result<Body, BodyError> {
        let state = std::mem::replace(&mut self.state, BodyState::Consumed);
        match state {
            BodyState::Consumed => Err(BodyError::AlreadyConsumed),
            BodyState::Fresh(BodySource::Empty) => {
                self.state = BodyState::Fresh(BodySource::Empty);
                Ok(Body::empty())
            }
            BodyState::Fresh(BodySource::Once(bytes)) => {
                self.state = BodyState::Fresh(BodySource::Once(bytes.clone()));
                Ok(Body::from(bytes))
            }
            BodyState::Fresh(BodySource::Form { form, encoder }) => {
                let clone = Body { state: BodyState::Fresh(BodySource::Form { form: form.clone(), encoder: encoder.clone() }) };
                self.state = BodyState::Fresh(BodySource::Form { form, encoder });
                Ok(clone)
            }
            BodyState::Fresh(BodySource::Stream(stream)) => {
                let (left, right) = stream.tee();
                self.state = BodyState::Fresh(BodySource::Stream(left));
                Ok(Body::from(right))
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self { state: BodyState::Fresh(BodySource::Once(bytes)) }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::from(Bytes::from(value))
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Body::from(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::from(Bytes::from(value))
    }
}

impl From<ByteStream> for Body {
    fn from(stream: ByteStream) -> Self {
        Self { state: BodyState::Fresh(BodySource::Stream(stream)) }
    }
}

impl From<FormData> for Body {
    fn from(form: FormData) -> Self {
        Self { state: BodyState::Fresh(BodySource::Form { form, encoder: Encoder::new() }) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_data::File;
    use serde::Deserialize;

    #[tokio::test]
    async fn second_read_is_a_reuse_error() {
        let mut body = Body::from("payload");
        assert_eq!(body.bytes().await.unwrap(), Bytes::from("payload"));
        assert!(matches!(body.bytes().await, Err(BodyError::AlreadyConsumed)));
        assert!(body.disturbed());
    }

    #[tokio::test]
    async fn json_round_trip() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Payload {
            #[serde(rename = "requestFoo")]
            request_foo: String,
        }

        let mut body = Body::from(r#"{"requestFoo":"requestFoo"}"#);
        let payload: Payload = body.json().await.unwrap();
        assert_eq!(payload, Payload { request_foo: "requestFoo".into() });
    }

    #[tokio::test]
    async fn tee_before_read_duplicates_the_stream() {
        let mut original = Body::from(ByteStream::from_chunks(["a", "b", "c"]));
        let mut clone = original.tee().unwrap();

        assert_eq!(original.bytes().await.unwrap(), Bytes::from("abc"));
        assert_eq!(clone.bytes().await.unwrap(), Bytes::from("abc"));

        // both halves are single-read
        assert!(matches!(clone.bytes().await, Err(BodyError::AlreadyConsumed)));
    }

    #[tokio::test]
    async fn tee_after_read_fails() {
        let mut body = Body::from("x");
        let _ = body.bytes().await.unwrap();
        assert!(matches!(body.tee(), Err(BodyError::AlreadyConsumed)));
    }

    #[tokio::test]
    async fn form_body_hands_entries_straight_back() {
        let mut form = FormData::new();
        form.append_field("a", "1");
        form.append_file("f", File::new("f.txt", mime::TEXT_PLAIN, "contents"));

        let mut body = Body::from(form);
        assert!(body.content_type_hint().unwrap().starts_with("multipart/form-data; boundary="));
        assert!(body.known_length().is_some());

        let decoded = body.form_data(None).await.unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[tokio::test]
    async fn form_data_decodes_multipart_by_content_type() {
        let mut form = FormData::new();
        form.append_field("a", "1");

        let mut source = Body::from(form);
        let content_type = source.content_type_hint().unwrap();
        let payload = source.bytes().await.unwrap();

        let mut body = Body::from(payload);
        let decoded = body.form_data(Some(&content_type)).await.unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[tokio::test]
    async fn form_data_decodes_urlencoded_by_content_type() {
        let mut body = Body::from("a=1&b=2");
        let decoded = body.form_data(Some("application/x-www-form-urlencoded")).await.unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[tokio::test]
    async fn form_data_rejects_other_content_types() {
        let mut body = Body::from("{}");
        assert!(body.form_data(Some("application/json")).await.is_err());
    }

    #[test]
    fn known_length_tracks_the_source() {
        assert_eq!(Body::empty().known_length(), Some(0));
        assert_eq!(Body::from("1234").known_length(), Some(4));
        assert_eq!(Body::from(ByteStream::empty()).known_length(), None);
    }
}
