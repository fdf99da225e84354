use bytes::Bytes;
use futures::stream;
use uuid::Uuid;

use crate::form_data::{FormData, FormDataEntry};
use crate::stream::ByteStream;

/// Streaming `multipart/form-data` encoder with a per-instance random
/// boundary token.
///
/// The boundary is fixed at construction so the advertised
/// [`content_type`](Encoder::content_type) and the encoded payload always
/// agree, however far apart header injection and body consumption happen.
#[derive(Debug, Clone)]
pub struct Encoder {
    boundary: String,
}

impl Encoder {
    pub fn new() -> Self {
        Self { boundary: format!("----ferryFormBoundary{}", Uuid::new_v4().simple()) }
    }

    /// Fixed boundary constructor, for reproducing known payloads.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self { boundary: boundary.into() }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the owning message's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact encoded length. All entries are in-memory byte sources, so the
    /// length is always knowable up front and usable for `Content-Length`.
    pub fn encoded_len(&self, form: &FormData) -> u64 {
        let mut total = 0u64;
        for entry in form.iter() {
            let content_len = match entry {
                FormDataEntry::Field { value, .. } => value.len() as u64,
                FormDataEntry::File { file, .. } => file.len(),
            };
            total += section_header(&self.boundary, entry).len() as u64 + content_len + 2;
        }
        total + self.closing().len() as u64
    }

    /// Encodes the form into a lazy byte stream. Sections are materialized
    /// one at a time as the stream is pulled.
    pub fn encode(&self, form: FormData) -> ByteStream {
        let boundary = self.boundary.clone();
        let closing = self.closing();

        let chunks = form
            .into_entries()
            .into_iter()
            .flat_map(move |entry| {
                let header = Bytes::from(section_header(&boundary, &entry));
                let content = match entry {
                    FormDataEntry::Field { value, .. } => Bytes::from(value),
                    FormDataEntry::File { file, .. } => file.bytes(),
                };
                [header, content, Bytes::from_static(b"\r\n")]
            })
            .chain([closing])
            .map(Ok);

        ByteStream::wrap(stream::iter(chunks))
    }

    fn closing(&self) -> Bytes {
        Bytes::from(format!("--{}--\r\n", self.boundary))
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn section_header(boundary: &str, entry: &FormDataEntry) -> String {
    match entry {
        FormDataEntry::Field { name, .. } => {
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n", escape(name))
        }
        FormDataEntry::File { name, file } => format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            escape(name),
            escape(file.filename()),
            file.content_type(),
        ),
    }
}

/// Escapes characters that would break the quoted-string parameter syntax.
fn escape(value: &str) -> String {
    value.replace('\r', "%0D").replace('\n', "%0A").replace('"', "%22")
}
