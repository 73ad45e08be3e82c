//! Case-insensitive header storage and typed header parsing.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// An ordered, case-insensitive, multi-valued header store.
///
/// Lookups compare names case-insensitively; insertion order is preserved.
/// `get` returns the first value when a header is repeated, `get_all` returns
/// every value.
///
/// # Example
/// ```
/// use webmach::request::HeaderMap;
///
/// let mut headers = HeaderMap::new();
/// headers.append("Vary", "Accept");
/// headers.append("vary", "Authorization");
///
/// assert_eq!(headers.get("VARY"), Some("Accept"));
/// assert_eq!(headers.get_all("Vary"), vec!["Accept", "Authorization"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self { entries: vec![] }
    }

    fn eq_name(a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    /// Get the first value for a header, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| Self::eq_name(n, name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| Self::eq_name(n, name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| Self::eq_name(n, name))
    }

    /// Replace all values of a header with a single value.
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Add a value without removing existing ones (repeated headers).
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Set a header only if it is not already present.
    pub fn set_if_absent(&mut self, name: &str, value: &str) {
        if !self.contains(name) {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !Self::eq_name(n, name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` into this map, replacing same-named
    /// entries.
    pub fn merge(&mut self, other: &HeaderMap) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("error parsing header '{header}': {reason}")]
pub struct HeaderParseError {
    header: String,
    reason: String,
}

impl HeaderParseError {
    pub fn new(header: &str, reason: &str) -> Self {
        Self {
            header: header.to_string(),
            reason: reason.to_string(),
        }
    }
}

type Result<T> = std::result::Result<T, HeaderParseError>;

/// One token of an Accept header: `type/subtype` with optional quality.
///
/// Parameters other than `q` are parsed and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub mime_type: String,
    pub mime_subtype: String,
    pub quality: f32,
}

impl MediaRange {
    /// True for `*/*`.
    pub fn is_wildcard(&self) -> bool {
        self.mime_type == "*" && self.mime_subtype == "*"
    }

    /// Whether a concrete media type such as `application/json` is
    /// acceptable under this range. `*/*` accepts anything; otherwise only
    /// an exact match counts. Partial wildcards (`text/*`) accept nothing.
    pub fn accepts(&self, media_type: &str) -> bool {
        if self.is_wildcard() {
            return true;
        }
        let mut parts = media_type.splitn(2, '/');
        let (mime_type, mime_subtype) = match (parts.next(), parts.next()) {
            (Some(t), Some(s)) => (t, s),
            _ => return false,
        };
        self.mime_type.eq_ignore_ascii_case(mime_type)
            && self.mime_subtype.eq_ignore_ascii_case(mime_subtype)
    }
}

// Accept: <MIME_type>/<MIME_subtype>
// Accept: */*
// Multiple types, weighted with the quality value syntax:
// Accept: text/html, application/xhtml+xml, application/xml;q=0.9, */*;q=0.8
impl FromStr for MediaRange {
    type Err = HeaderParseError;
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let media = parts
            .next()
            .ok_or_else(|| HeaderParseError::new("Accept", "empty token"))?
            .trim();
        let mut quality = 1.0;
        for param in parts {
            let param = param.trim();
            if let Some(q) = param.strip_prefix("q=") {
                quality = str::parse::<f32>(q)
                    .map_err(|_| HeaderParseError::new("Accept", "invalid q value"))?;
            }
        }
        let media_parts: Vec<&str> = media.split('/').collect();
        let (mime_type, mime_subtype) = match &media_parts[..] {
            [mime_type, mime_subtype] => (
                mime_type.to_ascii_lowercase(),
                mime_subtype.to_ascii_lowercase(),
            ),
            _ => return Err(HeaderParseError::new("Accept", "invalid media type format")),
        };
        Ok(MediaRange {
            mime_type,
            mime_subtype,
            quality,
        })
    }
}

/// A parsed Accept header: media ranges ordered by descending quality
/// (stable, so equal-quality tokens keep their written order).
#[derive(Debug, Clone, PartialEq)]
pub struct Accept {
    ranges: Vec<MediaRange>,
}

impl Accept {
    /// The `*/*` Accept used when the request carries none.
    pub fn wildcard() -> Self {
        Self {
            ranges: vec![MediaRange {
                mime_type: "*".to_string(),
                mime_subtype: "*".to_string(),
                quality: 1.0,
            }],
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MediaRange> {
        self.ranges.iter()
    }

    /// True when every token is the full wildcard. Used to decide whether
    /// the response must carry `Vary: Accept`.
    pub fn is_pure_wildcard(&self) -> bool {
        self.ranges.iter().all(|r| r.is_wildcard())
    }

    /// Best quality at which `media_type` is acceptable, if at all.
    pub fn quality_for(&self, media_type: &str) -> Option<f32> {
        self.ranges
            .iter()
            .filter(|r| r.accepts(media_type))
            .map(|r| r.quality)
            .fold(None, |best, q| match best {
                Some(b) if b >= q => Some(b),
                _ => Some(q),
            })
    }
}

impl FromStr for Accept {
    type Err = HeaderParseError;
    fn from_str(s: &str) -> Result<Self> {
        let mut ranges = vec![];
        for part in s.split(',') {
            // Malformed tokens are skipped rather than failing the header.
            if let Ok(range) = str::parse::<MediaRange>(part.trim()) {
                ranges.push(range);
            }
        }
        if ranges.is_empty() {
            return Err(HeaderParseError::new("Accept", "no valid media ranges"));
        }
        ranges.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(Self { ranges })
    }
}

/// A parsed Content-Type header.
///
/// The media type is lowercased with parameters stripped; `charset` and
/// `boundary` are kept when present.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentType {
    pub mime_type: String,
    pub mime_subtype: String,
    pub charset: Option<String>,
    pub boundary: Option<String>,
}

impl ContentType {
    pub fn media_type(&self) -> String {
        format!("{}/{}", self.mime_type, self.mime_subtype)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.media_type())?;
        if let Some(charset) = &self.charset {
            write!(f, "; charset={}", charset)?;
        }
        Ok(())
    }
}

// Content-Type: text/html; charset=UTF-8
// Content-Type: multipart/form-data; boundary=something
impl FromStr for ContentType {
    type Err = HeaderParseError;
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let media = parts
            .next()
            .ok_or_else(|| HeaderParseError::new("Content-Type", "empty"))?;
        let media_parts: Vec<&str> = media.trim().split('/').collect();
        let (mime_type, mime_subtype) = match &media_parts[..] {
            [mime_type, mime_subtype] => (
                mime_type.to_ascii_lowercase(),
                mime_subtype.to_ascii_lowercase(),
            ),
            _ => {
                return Err(HeaderParseError::new(
                    "Content-Type",
                    "invalid media type format",
                ))
            }
        };
        let mut charset = None;
        let mut boundary = None;
        for param in parts {
            let kv: Vec<&str> = param.trim().splitn(2, '=').collect();
            if let [key, value] = kv[..] {
                match key.to_ascii_lowercase().as_str() {
                    "charset" => charset = Some(value.trim_matches('"').to_ascii_lowercase()),
                    "boundary" => boundary = Some(value.trim_matches('"').to_string()),
                    _ => (),
                }
            }
        }
        Ok(ContentType {
            mime_type,
            mime_subtype,
            charset,
            boundary,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_map_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert!(headers.contains("Content-type"));
    }

    #[test]
    fn test_header_map_set_replaces_append_adds() {
        let mut headers = HeaderMap::new();
        headers.append("Vary", "Accept");
        headers.append("Vary", "Authorization");
        assert_eq!(headers.get_all("vary").len(), 2);
        headers.set("Vary", "Accept");
        assert_eq!(headers.get_all("vary"), vec!["Accept"]);
    }

    #[test]
    fn test_accept_quality_ordering() {
        let accept: Accept = "text/html;q=0.9, application/json;q=1.0".parse().unwrap();
        let first = accept.iter().next().unwrap();
        assert_eq!(first.mime_subtype, "json");
        assert_eq!(accept.quality_for("text/html"), Some(0.9));
    }

    #[test]
    fn test_accept_wildcard_matches_anything() {
        let accept: Accept = "*/*".parse().unwrap();
        assert!(accept.is_pure_wildcard());
        assert_eq!(accept.quality_for("application/vnd.custom"), Some(1.0));
    }

    #[test]
    fn test_accept_partial_wildcard_matches_nothing() {
        let accept: Accept = "text/*".parse().unwrap();
        assert_eq!(accept.quality_for("text/html"), None);
    }

    #[test]
    fn test_accept_skips_malformed_tokens() {
        let accept: Accept = "garbage, application/json".parse().unwrap();
        assert_eq!(accept.iter().count(), 1);
        assert_eq!(accept.quality_for("application/json"), Some(1.0));
    }

    #[test]
    fn test_content_type_with_charset() {
        let ct: ContentType = "Application/JSON; charset=UTF-8".parse().unwrap();
        assert_eq!(ct.media_type(), "application/json");
        assert_eq!(ct.charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_with_boundary() {
        let ct: ContentType = "multipart/form-data; boundary=xyz".parse().unwrap();
        assert_eq!(ct.boundary.as_deref(), Some("xyz"));
        assert_eq!(ct.charset, None);
    }
}
