//! HTTP request model and typed header accessors.
use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use conditional::{format_http_date, parse_http_date, EntityTag, TagSet};
pub use header::{Accept, ContentType, HeaderMap, HeaderParseError, MediaRange};

pub mod conditional;
pub mod header;
pub mod parser;

/// The HTTP methods the framework knows about.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    PATCH,
    DELETE,
    OPTIONS,
}

/// All known methods, in the order `Allow` headers list them.
pub const KNOWN_METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
        }
    }

    /// Safe methods per RFC 9110 §9.2.1, as far as conditional requests
    /// care: `If-None-Match` answers 304 rather than 412 for these.
    pub fn is_safe(&self) -> bool {
        matches!(self, Method::GET | Method::HEAD)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("unknown HTTP method: {0}")]
pub struct InvalidMethod(pub String);

impl FromStr for Method {
    type Err = InvalidMethod;
    fn from_str(s: &str) -> Result<Self, InvalidMethod> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "OPTIONS" => Ok(Method::OPTIONS),
            _ => Err(InvalidMethod(s.to_string())),
        }
    }
}

/// An HTTP request.
///
/// Adapters construct one of these (percent-decoded path, case-insensitive
/// headers, whole body) and hand it to the application. The router fills
/// `path_params`; nothing else mutates a request once it enters the state
/// machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Percent-decoded path, used for routing.
    pub path: String,
    /// The path as received on the wire, kept for logging.
    pub raw_path: String,
    pub headers: HeaderMap,
    /// Query parameters; repeated names keep the last value.
    pub query_params: HashMap<String, String>,
    /// Captured path segments, filled in by the router.
    pub path_params: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            path: "/".to_string(),
            raw_path: "/".to_string(),
            headers: [("Host", "localhost")].into_iter().collect(),
            query_params: HashMap::new(),
            path_params: HashMap::new(),
            body: None,
        }
    }
}

impl Request {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            raw_path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_query_param(mut self, name: &str, value: &str) -> Self {
        self.query_params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a JSON body together with its Content-Type.
    pub fn with_json(mut self, value: &serde_json::Value) -> Self {
        self.headers.set("Content-Type", "application/json");
        self.body = Some(value.to_string().into_bytes());
        self
    }

    pub fn accept(&self) -> Result<Option<Accept>, HeaderParseError> {
        match self.headers.get("accept") {
            Some(s) => Ok(Some(str::parse::<Accept>(s)?)),
            None => Ok(None),
        }
    }

    pub fn content_type(&self) -> Result<Option<ContentType>, HeaderParseError> {
        match self.headers.get("content-type") {
            Some(s) => Ok(Some(str::parse::<ContentType>(s)?)),
            None => Ok(None),
        }
    }

    pub fn if_match(&self) -> Option<TagSet> {
        self.headers.get("if-match").and_then(TagSet::parse)
    }

    pub fn if_none_match(&self) -> Option<TagSet> {
        self.headers.get("if-none-match").and_then(TagSet::parse)
    }

    pub fn if_modified_since(&self) -> Option<DateTime<Utc>> {
        self.headers
            .get("if-modified-since")
            .and_then(parse_http_date)
    }

    pub fn if_unmodified_since(&self) -> Option<DateTime<Utc>> {
        self.headers
            .get("if-unmodified-since")
            .and_then(parse_http_date)
    }

    /// Whether the request carries any of the four conditional headers.
    pub fn has_conditional_headers(&self) -> bool {
        ["if-match", "if-none-match", "if-modified-since", "if-unmodified-since"]
            .iter()
            .any(|h| self.headers.contains(h))
    }
}
