//! FormData: the ordered entry list behind `multipart/form-data` bodies.

use bytes::Bytes;
use mime::Mime;

use crate::error::BodyError;
use crate::stream::ByteStream;

/// A file entry's payload: a filename, a mime type and an in-memory byte
/// source exposed as a stream.
#[derive(Debug, Clone)]
pub struct File {
    filename: String,
    content_type: Mime,
    content: Bytes,
}

impl File {
    pub fn new(filename: impl Into<String>, content_type: Mime, content: impl Into<Bytes>) -> Self {
        Self { filename: filename.into(), content_type, content: content.into() }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// The file content. `Bytes` clones are reference counted, not copies.
    pub fn bytes(&self) -> Bytes {
        self.content.clone()
    }

    pub fn stream(&self) -> ByteStream {
        ByteStream::once(self.content.clone())
    }
}

/// One FormData entry: a plain field or a named file.
#[derive(Debug, Clone)]
pub enum FormDataEntry {
    Field { name: String, value: String },
    File { name: String, file: File },
}

impl FormDataEntry {
    pub fn name(&self) -> &str {
        match self {
            FormDataEntry::Field { name, .. } => name,
            FormDataEntry::File { name, .. } => name,
        }
    }
}

/// Ordered list of form entries. The container exclusively owns its entries;
/// encoding reads them without mutating.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    entries: Vec<FormDataEntry>,
}

impl FormData {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn append_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(FormDataEntry::Field { name: name.into(), value: value.into() });
    }

    pub fn append_file(&mut self, name: impl Into<String>, file: File) {
        self.entries.push(FormDataEntry::File { name: name.into(), file });
    }

    /// First entry with the given name.
    pub fn get(&self, name: &str) -> Option<&FormDataEntry> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FormDataEntry> {
        self.entries.iter().filter(|entry| entry.name() == name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormDataEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<FormDataEntry> {
        self.entries
    }

    /// Decodes an `application/x-www-form-urlencoded` payload into field
    /// entries.
    pub fn from_urlencoded(payload: &[u8]) -> Result<Self, BodyError> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(payload).map_err(|e| BodyError::decode(format!("invalid urlencoded form: {e}")))?;

        let mut form = FormData::new();
        for (name, value) in pairs {
            form.append_field(name, value);
        }
        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_insertion_order() {
        let mut form = FormData::new();
        form.append_field("first", "1");
        form.append_file("upload", File::new("notes.txt", mime::TEXT_PLAIN, "hello"));
        form.append_field("first", "2");

        let names: Vec<_> = form.iter().map(FormDataEntry::name).collect();
        assert_eq!(names, ["first", "upload", "first"]);
        assert_eq!(form.get_all("first").len(), 2);
        assert!(matches!(form.get("upload"), Some(FormDataEntry::File { .. })));
    }

    #[test]
    fn urlencoded_decodes_into_fields() {
        let form = FormData::from_urlencoded(b"a=1&b=two%20words&a=3").unwrap();

        assert_eq!(form.len(), 3);
        let all_a: Vec<_> = form
            .get_all("a")
            .into_iter()
            .map(|entry| match entry {
                FormDataEntry::Field { value, .. } => value.as_str(),
                FormDataEntry::File { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(all_a, ["1", "3"]);
        assert!(matches!(form.get("b"), Some(FormDataEntry::Field { value, .. }) if value == "two words"));
    }

    #[tokio::test]
    async fn file_streams_its_content() {
        let file = File::new("notes.txt", mime::TEXT_PLAIN, "hello");
        assert_eq!(file.stream().collect_bytes().await.unwrap(), Bytes::from("hello"));
        assert_eq!(file.len(), 5);
    }
}
