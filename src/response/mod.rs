//! HTTP response and status codes.
use crate::request::HeaderMap;

pub mod status;

/// An HTTP response.
///
/// Built up by states and handlers, finalized once by the application
/// (default headers, `Content-Type`, `Content-Length`), then serialized by
/// an adapter.
///
/// # Example
/// ```
/// use webmach::response::Response;
///
/// let response = Response::new(200)
///     .with_header("X-Custom", "1")
///     .with_body(b"Hello!".to_vec());
///
/// assert_eq!(response.status, "OK");
/// assert_eq!(response.content_length(), 6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub status: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Cache of the outgoing `Content-Type`, copied into `headers` when the
    /// response is finalized.
    pub content_type: Option<String>,
}

impl Response {
    /// Create a new Response. Status is automatically set to the default
    /// reason phrase for the given code (200 -> "OK", etc.)
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            status: status::default(status_code),
            headers: HeaderMap::new(),
            body: None,
            content_type: None,
        }
    }

    /// A JSON response with body and content type set.
    pub fn json(status_code: u16, value: &serde_json::Value) -> Self {
        Self::new(status_code)
            .with_body(value.to_string().into_bytes())
            .with_content_type("application/json")
    }

    /// A plain text response with body and content type set.
    pub fn text(status_code: u16, body: &str) -> Self {
        Self::new(status_code)
            .with_body(body.as_bytes().to_vec())
            .with_content_type("text/plain")
    }

    /// Change status code (updates the reason phrase too).
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self.status = status::default(status_code);
        self
    }

    /// Change the reason phrase.
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    /// Add a header (repeated names allowed).
    pub fn with_header(mut self, header: &str, value: &str) -> Self {
        self.headers.append(header, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn content_length(&self) -> usize {
        match &self.body {
            Some(body) => body.len(),
            None => 0,
        }
    }

    /// True for statuses that must not carry a body (or a Content-Length,
    /// in strict mode): 204 and 304, plus 1xx.
    pub fn body_forbidden(&self) -> bool {
        matches!(self.status_code, 204 | 304) || (100..200).contains(&self.status_code)
    }

    /// Write HTTP/1.1 response bytes. `Content-Length` is computed from the
    /// body when no header was set (except where a body is forbidden).
    /// With `head_only`, headers are emitted but the body is discarded.
    pub fn into_bytes(mut self, head_only: bool) -> Vec<u8> {
        let mut bytes: Vec<u8> = vec![];

        let status_line = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status);
        bytes.extend(status_line.into_bytes());

        if let Some(content_type) = &self.content_type {
            if !self.headers.contains("content-type") {
                self.headers.set("Content-Type", content_type);
            }
        }
        if self.body.is_some() && !self.body_forbidden() {
            self.headers
                .set_if_absent("Content-Length", &self.content_length().to_string());
        }

        for (header, value) in self.headers.iter() {
            let header_line = format!("{}: {}\r\n", header, value);
            bytes.extend(header_line.into_bytes());
        }

        bytes.extend(b"\r\n");
        if !head_only && !self.body_forbidden() {
            if let Some(body) = &self.body {
                bytes.extend(body);
            }
        }
        bytes
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_response_bytes() {
        let response = Response::new(500)
            .with_header("Connection", "closed")
            .with_body(b"foobar!".to_vec());

        let actual = response.into_bytes(false);
        let expected = b"HTTP/1.1 500 Internal Server Error\r\nConnection: closed\r\nContent-Length: 7\r\n\r\nfoobar!";
        assert_eq!(expected[..], actual[..]);
    }

    #[test]
    fn test_head_only_keeps_headers_drops_body() {
        let response = Response::new(200)
            .with_header("Content-Length", "7")
            .with_body(b"foobar!".to_vec());
        let bytes = response.into_bytes(true);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Content-Length: 7"));
        assert!(!text.contains("foobar!"));
    }

    #[test]
    fn test_no_content_has_no_length() {
        let response = Response::new(204);
        let text = String::from_utf8(response.into_bytes(false)).unwrap();
        assert!(!text.to_lowercase().contains("content-length"));
    }

    #[test]
    fn test_content_type_cache_copied_to_headers() {
        let response = Response::json(200, &serde_json::json!({"ok": true}));
        let text = String::from_utf8(response.into_bytes(false)).unwrap();
        assert!(text.contains("Content-Type: application/json"));
    }
}
