use bytes::Bytes;
use mime::Mime;

use crate::error::MultipartError;
use crate::form_data::{File, FormData};

/// Sections carry at most a disposition and a content type; a little slack
/// keeps unknown extension headers from failing the parse.
const MAX_SECTION_HEADERS: usize = 8;

/// Extracts the boundary token from a `multipart/form-data` content type.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let mime: Mime = content_type.parse().map_err(|_| MultipartError::MissingBoundary)?;
    if mime.type_() != mime::MULTIPART || mime.subtype() != mime::FORM_DATA {
        return Err(MultipartError::MissingBoundary);
    }
    mime.get_param(mime::BOUNDARY).map(|value| value.to_string()).ok_or(MultipartError::MissingBoundary)
}

/// Decodes a collected multipart payload against its declared boundary.
///
/// Sections become field entries, or file entries when the disposition
/// carries a `filename`. Any malformed boundary, header block or truncated
/// section fails the whole decode.
pub fn decode(payload: &[u8], boundary: &str) -> Result<FormData, MultipartError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut marker = b"\r\n".to_vec();
    marker.extend_from_slice(&delimiter);

    // anything before the first delimiter is preamble and is ignored
    let mut pos = find(payload, &delimiter).ok_or(MultipartError::Truncated)? + delimiter.len();

    let mut form = FormData::new();
    loop {
        let rest = &payload[pos..];
        if rest.starts_with(b"--") {
            return Ok(form);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(MultipartError::invalid_section_header("boundary is not followed by CRLF"));
        }
        pos += 2;

        let headers_len = find(&payload[pos..], b"\r\n\r\n").ok_or(MultipartError::Truncated)?;
        let section = parse_section_headers(&payload[pos..pos + headers_len + 4])?;
        pos += headers_len + 4;

        let content_len = find(&payload[pos..], &marker).ok_or(MultipartError::Truncated)?;
        let content = &payload[pos..pos + content_len];
        pos += content_len + marker.len();

        match section.filename {
            Some(filename) => {
                let mime = section
                    .content_type
                    .as_deref()
                    .and_then(|value| value.parse::<Mime>().ok())
                    .unwrap_or(mime::APPLICATION_OCTET_STREAM);
                form.append_file(section.name, File::new(filename, mime, Bytes::copy_from_slice(content)));
            }
            None => {
                let value = std::str::from_utf8(content)
                    .map_err(|_| MultipartError::InvalidFieldValue { name: section.name.clone() })?;
                form.append_field(section.name, value);
            }
        }
    }
}

struct Section {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_section_headers(block: &[u8]) -> Result<Section, MultipartError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_SECTION_HEADERS];
    let parsed = match httparse::parse_headers(block, &mut headers) {
        Ok(httparse::Status::Complete((_consumed, parsed))) => parsed,
        Ok(httparse::Status::Partial) => return Err(MultipartError::Truncated),
        Err(e) => return Err(MultipartError::invalid_section_header(e)),
    };

    let mut disposition = None;
    let mut content_type = None;
    for header in parsed {
        if header.name.eq_ignore_ascii_case("content-disposition") {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| MultipartError::invalid_disposition("content-disposition is not utf-8"))?;
            disposition = Some(value);
        } else if header.name.eq_ignore_ascii_case("content-type") {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| MultipartError::invalid_section_header("content-type is not utf-8"))?;
            content_type = Some(value.to_string());
        }
    }

    let disposition = disposition.ok_or_else(|| MultipartError::invalid_disposition("section is missing content-disposition"))?;
    parse_disposition(disposition, content_type)
}

fn parse_disposition(value: &str, content_type: Option<String>) -> Result<Section, MultipartError> {
    let mut parts = value.split(';').map(str::trim);

    let kind = parts.next().unwrap_or("");
    if !kind.eq_ignore_ascii_case("form-data") {
        return Err(MultipartError::invalid_disposition(format!("expected form-data, got {kind:?}")));
    }

    let mut name = None;
    let mut filename = None;
    for part in parts {
        let Some((key, raw)) = part.split_once('=') else {
            return Err(MultipartError::invalid_disposition(format!("malformed parameter {part:?}")));
        };
        let unquoted = raw.trim().trim_matches('"');
        match key.trim() {
            "name" => name = Some(unquoted.to_string()),
            "filename" => filename = Some(unquoted.to_string()),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| MultipartError::invalid_disposition("missing name parameter"))?;
    Ok(Section { name, filename, content_type })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_data::FormDataEntry;
    use crate::multipart::Encoder;
    use indoc::indoc;

    /// Fixtures are written with plain newlines and normalized to CRLF.
    fn crlf(payload: &str) -> Vec<u8> {
        payload.replace('\n', "\r\n").into_bytes()
    }

    #[tokio::test]
    async fn round_trips_a_field_and_a_file() {
        let mut form = FormData::new();
        form.append_field("greeting", "hello world");
        form.append_file("upload", File::new("notes.txt", mime::TEXT_PLAIN, "line one\r\nline two"));

        let encoder = Encoder::new();
        let payload = encoder.encode(form).collect_bytes().await.unwrap();
        let decoded = decode(&payload, encoder.boundary()).unwrap();

        assert_eq!(decoded.len(), 2);
        match decoded.get("greeting").unwrap() {
            FormDataEntry::Field { value, .. } => assert_eq!(value, "hello world"),
            FormDataEntry::File { .. } => panic!("expected a field entry"),
        }
        match decoded.get("upload").unwrap() {
            FormDataEntry::File { file, .. } => {
                assert_eq!(file.filename(), "notes.txt");
                assert_eq!(file.content_type(), &mime::TEXT_PLAIN);
                assert_eq!(file.bytes(), Bytes::from("line one\r\nline two"));
            }
            FormDataEntry::Field { .. } => panic!("expected a file entry"),
        }
    }

    #[test]
    fn decodes_a_hand_written_payload() {
        let payload = crlf(indoc! {r#"
            --xyz
            Content-Disposition: form-data; name="a"

            1
            --xyz
            Content-Disposition: form-data; name="f"; filename="f.bin"
            Content-Type: application/octet-stream

            binary
            --xyz--
        "#});

        let decoded = decode(&payload, "xyz").unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded.get("a").unwrap(), FormDataEntry::Field { value, .. } if value == "1"));
        assert!(matches!(decoded.get("f").unwrap(), FormDataEntry::File { file, .. } if file.bytes() == Bytes::from("binary")));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let payload = crlf(indoc! {r#"
            --xyz
            Content-Disposition: form-data; name="a"

            1"#});

        assert_eq!(decode(&payload, "xyz").unwrap_err(), MultipartError::Truncated);
    }

    #[test]
    fn missing_disposition_is_an_error() {
        let payload = crlf(indoc! {r#"
            --xyz
            Content-Type: text/plain

            1
            --xyz--
        "#});

        assert!(matches!(decode(&payload, "xyz").unwrap_err(), MultipartError::InvalidDisposition { .. }));
    }

    #[test]
    fn field_must_be_utf8() {
        let mut payload = crlf(indoc! {r#"
            --xyz
            Content-Disposition: form-data; name="a"

        "#});
        // splice invalid utf-8 content before the closing boundary
        payload.extend_from_slice(b"\xff\xfe\r\n--xyz--\r\n");

        assert!(matches!(decode(&payload, "xyz").unwrap_err(), MultipartError::InvalidFieldValue { name } if name == "a"));
    }

    #[test]
    fn parse_boundary_reads_the_content_type_parameter() {
        let boundary = parse_boundary("multipart/form-data; boundary=abc123").unwrap();
        assert_eq!(boundary, "abc123");

        assert_eq!(parse_boundary("multipart/form-data").unwrap_err(), MultipartError::MissingBoundary);
        assert_eq!(parse_boundary("application/json").unwrap_err(), MultipartError::MissingBoundary);
    }
}
