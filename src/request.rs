//! Read-only view of an incoming request, as consumed by the matcher.

use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Ordered multimap of names to values.
///
/// Each name appears once; repeated insertions append to its value list.
pub type MultiMap = Vec<(String, Vec<String>)>;

fn append(map: &mut MultiMap, name: String, value: String) {
    match map.iter_mut().find(|(n, _)| *n == name) {
        Some((_, values)) => values.push(value),
        None => map.push((name, vec![value])),
    }
}

/// RFC 7230 `tchar`.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Decode one query component: `+` is a space, `%XX` an escaped byte.
fn query_unescape(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    for (i, _) in raw.match_indices('%') {
        let escape = bytes.get(i + 1..i + 3)?;
        if !escape.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
    }
    let spaced = raw.replace('+', " ");
    Some(percent_decode_str(&spaced).decode_utf8_lossy().into_owned())
}

/// Canonical form of a header name: `content-type` becomes `Content-Type`,
/// `x_odd` becomes `X_odd`.
///
/// Names that are not HTTP tokens are returned unchanged.
pub fn canonical_header_name(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

/// Method, path, headers and query parameters of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: String,
    path: String,
    headers: MultiMap,
    query: MultiMap,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Build from a request target: origin-form (`/a/b?x=1`) or an absolute
    /// URL (`https://host.io/a/b?x=1`). Path and query are percent-decoded.
    pub fn from_target(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = if target.starts_with('/') {
            let without_fragment = target.split('#').next().unwrap_or(target);
            match without_fragment.split_once('?') {
                Some((path, query)) => (path.to_string(), Some(query.to_string())),
                None => (without_fragment.to_string(), None),
            }
        } else {
            match url::Url::parse(target) {
                Ok(url) => (url.path().to_string(), url.query().map(str::to_string)),
                Err(_) => (target.to_string(), None),
            }
        };
        let path = percent_decode_str(&path).decode_utf8_lossy().into_owned();
        let request = Self::new(method, path);
        match query {
            Some(q) => request.with_query_string(&q),
            None => request,
        }
    }

    /// Build from the pieces a proxy typically hands over.
    pub fn from_parts(
        method: &str,
        path: &str,
        query_string: Option<&str>,
        headers: &HashMap<String, Vec<String>>,
    ) -> Self {
        let mut request = Self::new(method, path);
        for (name, values) in headers {
            for value in values {
                request.append_header(name, value);
            }
        }
        match query_string {
            Some(q) => request.with_query_string(q),
            None => request,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.append_header(name, value);
        self
    }

    pub fn append_header(&mut self, name: &str, value: impl Into<String>) {
        append(&mut self.headers, canonical_header_name(name), value.into());
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        append(&mut self.query, name.into(), value.into());
        self
    }

    /// Add every parameter of a URL-encoded query string.
    ///
    /// Pairs containing `;` or a malformed escape are skipped.
    pub fn with_query_string(mut self, query: &str) -> Self {
        for pair in query.split('&') {
            if pair.is_empty() || pair.contains(';') {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            if let (Some(name), Some(value)) = (query_unescape(name), query_unescape(value)) {
                append(&mut self.query, name, value);
            }
        }
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, Vec<String>)] {
        &self.headers
    }

    pub fn query(&self) -> &[(String, Vec<String>)] {
        &self.query
    }

    /// All values of a header, by case-insensitive name.
    pub fn header_values(&self, name: &str) -> &[String] {
        let name = canonical_header_name(name);
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn query_values(&self, name: &str) -> &[String] {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }
}
