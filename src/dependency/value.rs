//! The tagged value type flowing through the dependency container.
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use crate::request::{HeaderMap, Request};
use crate::response::Response;

/// A header map shared between providers and the response pipeline, so a
/// validator can set `response_headers` that the renderer later merges into
/// the outgoing response.
pub type SharedHeaders = Arc<Mutex<HeaderMap>>;

/// One part of a multipart/form-data body.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Part {
    /// The part's form field name from its Content-Disposition, if any.
    pub fn name(&self) -> Option<&str> {
        let disposition = self.headers.get("content-disposition")?;
        disposition.split(';').find_map(|param| {
            let param = param.trim();
            param
                .strip_prefix("name=")
                .map(|v| v.trim_matches('"'))
        })
    }
}

/// A value produced by a dependency provider.
///
/// Handlers, state callbacks, validators, and error handlers all speak this
/// type; the variants cover everything the reserved names and built-in
/// parsers produce.
#[derive(Debug, Clone)]
pub enum DepValue {
    None,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    Json(Json),
    Form(Vec<(String, String)>),
    Multipart(Vec<Part>),
    Headers(SharedHeaders),
    Request(Arc<Request>),
    Response(Box<Response>),
}

impl DepValue {
    /// Truthiness for predicate state callbacks: `None`, `false`, zero and
    /// empty values are falsy, everything else is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            DepValue::None => false,
            DepValue::Bool(b) => *b,
            DepValue::Int(i) => *i != 0,
            DepValue::Text(s) => !s.is_empty(),
            DepValue::Bytes(b) => !b.is_empty(),
            DepValue::Time(_) => true,
            DepValue::Json(j) => match j {
                Json::Null => false,
                Json::Bool(b) => *b,
                Json::Number(n) => n.as_f64() != Some(0.0),
                Json::String(s) => !s.is_empty(),
                Json::Array(a) => !a.is_empty(),
                Json::Object(o) => !o.is_empty(),
            },
            DepValue::Form(entries) => !entries.is_empty(),
            DepValue::Multipart(parts) => !parts.is_empty(),
            DepValue::Headers(_) | DepValue::Request(_) | DepValue::Response(_) => true,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DepValue::None)
    }

    pub fn as_json(&self) -> Option<&Json> {
        match self {
            DepValue::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DepValue::Text(s) => Some(s),
            DepValue::Json(Json::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            DepValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            DepValue::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_headers(&self) -> Option<&SharedHeaders> {
        match self {
            DepValue::Headers(h) => Some(h),
            _ => None,
        }
    }
}

impl From<bool> for DepValue {
    fn from(b: bool) -> Self {
        DepValue::Bool(b)
    }
}

impl From<i64> for DepValue {
    fn from(i: i64) -> Self {
        DepValue::Int(i)
    }
}

impl From<&str> for DepValue {
    fn from(s: &str) -> Self {
        DepValue::Text(s.to_string())
    }
}

impl From<String> for DepValue {
    fn from(s: String) -> Self {
        DepValue::Text(s)
    }
}

impl From<Json> for DepValue {
    fn from(j: Json) -> Self {
        DepValue::Json(j)
    }
}

impl From<DateTime<Utc>> for DepValue {
    fn from(t: DateTime<Utc>) -> Self {
        DepValue::Time(t)
    }
}

impl From<Response> for DepValue {
    fn from(r: Response) -> Self {
        DepValue::Response(Box::new(r))
    }
}

impl<T: Into<DepValue>> From<Option<T>> for DepValue {
    fn from(o: Option<T>) -> Self {
        match o {
            Some(v) => v.into(),
            None => DepValue::None,
        }
    }
}
