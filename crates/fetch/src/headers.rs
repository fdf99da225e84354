//! Fetch-shaped header container.
//!
//! [`Headers`] is an ordered multimap over typed [`http`] names and values.
//! Name comparison is case-insensitive; storage canonicalizes to lower-case
//! (the [`HeaderName`] invariant). Reading a name with several entries joins
//! them with `", "`, except for the small set of headers that must keep
//! independent entries (`set-cookie`).

use http::HeaderMap;
use http::header::{self, HeaderName, HeaderValue};
use once_cell::sync::Lazy;

/// Headers that are unsafe to forward verbatim across the native/fetch
/// boundary. Connection management is meaningless once an exchange leaves
/// the transport that owns it.
static HOP_BY_HOP: Lazy<[HeaderName; 4]> = Lazy::new(|| {
    [
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-connection"),
    ]
});

/// Returns true for header names whose repeated entries must never be
/// comma-joined on read.
fn is_multi_value(name: &str) -> bool {
    name.eq_ignore_ascii_case(header::SET_COOKIE.as_str())
}

/// Ordered, case-insensitive header multimap.
///
/// [`set`](Headers::set) overwrites, [`append`](Headers::append) adds a
/// distinct entry, [`get`](Headers::get) joins. Constructing one container
/// from another copies entries; two containers never alias storage.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Replaces every entry for `name` with a single value.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.retain(|(existing, _)| existing != &name);
        self.entries.push((name, value));
    }

    /// Adds an entry, keeping any existing ones for the same name.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.push((name, value));
    }

    /// Joined value for `name`, or `None` when absent.
    ///
    /// Entries are joined with `", "` in insertion order. For multi-value
    /// headers (`set-cookie`) only the first entry is returned; use
    /// [`get_all`](Headers::get_all) for the rest.
    pub fn get(&self, name: impl AsRef<str>) -> Option<String> {
        let name = name.as_ref();
        let mut matches = self.entries.iter().filter(|(n, _)| n.as_str().eq_ignore_ascii_case(name)).map(|(_, v)| v);

        let first = matches.next()?;
        if is_multi_value(name) {
            return Some(String::from_utf8_lossy(first.as_bytes()).into_owned());
        }

        let mut joined = first.as_bytes().to_vec();
        for value in matches {
            joined.extend_from_slice(b", ");
            joined.extend_from_slice(value.as_bytes());
        }
        Some(String::from_utf8_lossy(&joined).into_owned())
    }

    /// Every entry for `name`, in insertion order.
    pub fn get_all(&self, name: impl AsRef<str>) -> Vec<&HeaderValue> {
        let name = name.as_ref();
        self.entries.iter().filter(|(n, _)| n.as_str().eq_ignore_ascii_case(name)).map(|(_, v)| v).collect()
    }

    /// Removes every entry matching `name` case-insensitively.
    pub fn delete(&mut self, name: impl AsRef<str>) {
        let name = name.as_ref();
        self.entries.retain(|(n, _)| !n.as_str().eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        let name = name.as_ref();
        self.entries.iter().any(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
    }

    /// Number of stored entries (not distinct names).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    /// Visits each distinct name once, in insertion order of first
    /// occurrence, with the joined value. Multi-value headers are visited
    /// once per entry instead.
    pub fn for_each(&self, mut f: impl FnMut(&HeaderName, &str)) {
        let mut seen: Vec<&HeaderName> = Vec::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            if is_multi_value(name.as_str()) {
                f(name, &String::from_utf8_lossy(value.as_bytes()));
                continue;
            }
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            // joined read for the first occurrence covers the later ones
            if let Some(joined) = self.get(name) {
                f(name, &joined);
            }
        }
    }

    /// Strips connection management headers before a request crosses the
    /// native/fetch boundary.
    pub fn sanitize_outbound(&mut self) {
        for name in HOP_BY_HOP.iter() {
            self.delete(name);
        }
    }
}

impl From<&HeaderMap> for Headers {
    fn from(map: &HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            headers.append(name.clone(), value.clone());
        }
        headers
    }
}

impl From<&Headers> for HeaderMap {
    fn from(headers: &Headers) -> Self {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            map.append(name.clone(), value.clone());
        }
        map
    }
}

impl FromIterator<(HeaderName, HeaderValue)> for Headers {
    fn from_iter<I: IntoIterator<Item = (HeaderName, HeaderValue)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &'static str) -> HeaderValue {
        HeaderValue::from_static(s)
    }

    #[test]
    fn get_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.set(header::CONTENT_TYPE, value("application/json"));

        assert_eq!(headers.get("Content-Type").as_deref(), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE").as_deref(), Some("application/json"));
        assert_eq!(headers.get("accept"), None);
    }

    #[test]
    fn append_joins_on_read() {
        let mut headers = Headers::new();
        headers.append(header::ACCEPT, value("text/html"));
        headers.append(header::ACCEPT, value("application/json"));

        assert_eq!(headers.get("accept").as_deref(), Some("text/html, application/json"));
        assert_eq!(headers.get_all("accept").len(), 2);
    }

    #[test]
    fn set_overwrites_previous_entries() {
        let mut headers = Headers::new();
        headers.append(header::ACCEPT, value("text/html"));
        headers.append(header::ACCEPT, value("application/json"));
        headers.set(header::ACCEPT, value("*/*"));

        assert_eq!(headers.get("accept").as_deref(), Some("*/*"));
        assert_eq!(headers.get_all("accept").len(), 1);
    }

    #[test]
    fn set_cookie_entries_stay_independent() {
        let mut headers = Headers::new();
        headers.append(header::SET_COOKIE, value("a=1"));
        headers.append(header::SET_COOKIE, value("b=2"));

        assert_eq!(headers.get("set-cookie").as_deref(), Some("a=1"));
        let all: Vec<_> = headers.get_all("set-cookie").into_iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(all, ["a=1", "b=2"]);
    }

    #[test]
    fn delete_removes_all_matches() {
        let mut headers = Headers::new();
        headers.append(header::ACCEPT, value("text/html"));
        headers.append(header::ACCEPT, value("application/json"));
        headers.delete("Accept");

        assert!(!headers.contains("accept"));
        assert!(headers.is_empty());
    }

    #[test]
    fn for_each_visits_first_occurrence_order() {
        let mut headers = Headers::new();
        headers.append(header::ACCEPT, value("text/html"));
        headers.append(header::CONTENT_TYPE, value("application/json"));
        headers.append(header::ACCEPT, value("application/json"));
        headers.append(header::SET_COOKIE, value("a=1"));
        headers.append(header::SET_COOKIE, value("b=2"));

        let mut visited = Vec::new();
        headers.for_each(|name, joined| visited.push((name.as_str().to_string(), joined.to_string())));

        assert_eq!(
            visited,
            [
                ("accept".to_string(), "text/html, application/json".to_string()),
                ("content-type".to_string(), "application/json".to_string()),
                ("set-cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
            ]
        );
    }

    #[test]
    fn sanitize_strips_connection_management() {
        let mut headers = Headers::new();
        headers.set(header::CONNECTION, value("keep-alive"));
        headers.set(HeaderName::from_static("proxy-connection"), value("keep-alive"));
        headers.set(HeaderName::from_static("keep-alive"), value("timeout=5"));
        headers.set(header::TRANSFER_ENCODING, value("chunked"));
        headers.set(header::ACCEPT, value("application/json"));

        headers.sanitize_outbound();

        assert!(!headers.contains("connection"));
        assert!(!headers.contains("proxy-connection"));
        assert!(!headers.contains("keep-alive"));
        assert!(!headers.contains("transfer-encoding"));
        assert_eq!(headers.get("accept").as_deref(), Some("application/json"));
    }

    #[test]
    fn conversion_copies_entries() {
        let mut headers = Headers::new();
        headers.set(header::ACCEPT, value("application/json"));

        let map = HeaderMap::from(&headers);
        let mut copied = Headers::from(&map);
        copied.delete("accept");

        // the original is untouched by mutations of the copy
        assert_eq!(headers.get("accept").as_deref(), Some("application/json"));
    }
}
