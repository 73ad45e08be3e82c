//! Error taxonomy and per-status, per-accept error rendering.
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

use crate::content::ParseError;
use crate::dependency::{
    resolve, DepMap, DepValue, DependencyError, ProviderFn, RequestScope, ResolveEnv,
};
use crate::request::{Accept, Method};
use crate::response::Response;
use crate::validation::{ValidationError, ValidationIssue};

/// Every way a request can terminate early. Each kind knows its status
/// code; the display string is the human-readable message of the default
/// error body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("Not Found")]
    RouteMiss,
    #[error("Method Not Allowed")]
    MethodMismatch { allow: Vec<Method> },
    #[error("Service Unavailable")]
    ServiceUnavailable,
    #[error("Not Implemented")]
    UnknownMethod,
    #[error("URI Too Long")]
    UriTooLong,
    #[error("Method Not Allowed")]
    MethodNotAllowed { allow: Vec<Method> },
    #[error("Bad Request")]
    Malformed,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Invalid Content Headers")]
    InvalidContentHeaders,
    #[error("Not Found")]
    ResourceMiss,
    #[error("Precondition Failed")]
    PreconditionFailed,
    #[error("No content renderers available")]
    NoRenderers,
    #[error("Not Acceptable. Available types: {}", .available.join(", "))]
    NotAcceptable { available: Vec<String> },
    #[error("Unsupported media type{}", .0.as_ref().map(|t| format!(": {}", t)).unwrap_or_default())]
    UnsupportedMediaType(Option<String>),
    #[error("{0}")]
    Parse(ParseError),
    #[error("{}", .0.message)]
    Validation(ValidationError),
    #[error("Unresolved dependency: {0}")]
    UnresolvedDependency(String),
    #[error("Cyclic dependency: {0}")]
    CyclicDependency(String),
    #[error("Internal server error: {0}")]
    HandlerException(String),
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::RouteMiss | ErrorKind::ResourceMiss => 404,
            ErrorKind::MethodMismatch { .. } | ErrorKind::MethodNotAllowed { .. } => 405,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::UnknownMethod => 501,
            ErrorKind::UriTooLong => 414,
            ErrorKind::Malformed | ErrorKind::InvalidContentHeaders => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::PreconditionFailed => 412,
            ErrorKind::NoRenderers => 500,
            ErrorKind::NotAcceptable { .. } => 406,
            ErrorKind::UnsupportedMediaType(_) => 415,
            ErrorKind::Parse(_) | ErrorKind::Validation(_) => 422,
            ErrorKind::UnresolvedDependency(_)
            | ErrorKind::CyclicDependency(_)
            | ErrorKind::HandlerException(_) => 500,
        }
    }

    /// The `Allow` header value carried by 405 responses.
    pub fn allow(&self) -> Option<&[Method]> {
        match self {
            ErrorKind::MethodMismatch { allow } | ErrorKind::MethodNotAllowed { allow } => {
                Some(allow)
            }
            _ => None,
        }
    }

    fn details(&self) -> Vec<ValidationIssue> {
        match self {
            ErrorKind::Validation(e) => e.details.clone(),
            _ => vec![],
        }
    }
}

impl From<DependencyError> for ErrorKind {
    fn from(err: DependencyError) -> Self {
        match err {
            DependencyError::Validation(e) => ErrorKind::Validation(e),
            DependencyError::Parse(e) => ErrorKind::Parse(e),
            DependencyError::UnsupportedMediaType(t) => ErrorKind::UnsupportedMediaType(t),
            DependencyError::Unresolved(name) => ErrorKind::UnresolvedDependency(name),
            DependencyError::Cyclic(name) => ErrorKind::CyclicDependency(name),
            DependencyError::TypeMismatch { .. } | DependencyError::Provider(_) => {
                ErrorKind::HandlerException(err.to_string())
            }
        }
    }
}

/// The default JSON error body. Empty fields are left out entirely.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// A user-installed error responder for one status code, optionally
/// restricted to one media type (`None` = default for the status).
#[derive(Clone)]
pub struct ErrorHandler {
    pub status: u16,
    pub media_type: Option<String>,
    pub deps: Vec<String>,
    pub func: ProviderFn,
}

#[derive(Default, Clone)]
pub struct ErrorHandlerRegistry {
    handlers: Vec<ErrorHandler>,
}

impl ErrorHandlerRegistry {
    pub fn register(&mut self, handler: ErrorHandler) {
        self.handlers.push(handler);
    }

    /// Best handler for a status under an Accept header: media-specific
    /// handlers by descending quality (ties to registration order), then
    /// the status default.
    pub fn find(&self, status: u16, accept: &Accept) -> Option<&ErrorHandler> {
        let mut best: Option<(&ErrorHandler, f32)> = None;
        for handler in self.handlers.iter().filter(|h| h.status == status) {
            if let Some(media_type) = &handler.media_type {
                if let Some(q) = accept.quality_for(media_type) {
                    if q > 0.0 && !matches!(best, Some((_, best_q)) if best_q >= q) {
                        best = Some((handler, q));
                    }
                }
            }
        }
        best.map(|(h, _)| h).or_else(|| {
            self.handlers
                .iter()
                .find(|h| h.status == status && h.media_type.is_none())
        })
    }
}

/// Render a terminal error through the registry, falling back to the
/// default JSON body.
pub fn render_error(
    env: &ResolveEnv,
    scope: &mut RequestScope,
    registry: &ErrorHandlerRegistry,
    kind: &ErrorKind,
) -> Response {
    let status = kind.status_code();
    let accept = match env.request.accept() {
        Ok(Some(accept)) => accept,
        _ => Accept::wildcard(),
    };

    let mut response = match registry.find(status, &accept) {
        Some(handler) => match call_error_handler(env, scope, handler) {
            Ok(response) => response.with_status_code(status),
            Err(e) => {
                error!("error handler for {} failed: {}", status, e);
                default_error_response(env, scope, kind)
            }
        },
        None => default_error_response(env, scope, kind),
    };

    if let Some(allow) = kind.allow() {
        let allow: Vec<&str> = allow.iter().map(|m| m.as_str()).collect();
        response.headers.set("Allow", &allow.join(", "));
    }
    response
}

fn call_error_handler(
    env: &ResolveEnv,
    scope: &mut RequestScope,
    handler: &ErrorHandler,
) -> Result<Response, DependencyError> {
    let mut deps = DepMap::default();
    for dep in &handler.deps {
        deps.insert(dep, resolve(env, scope, dep)?);
    }
    let value = (handler.func)(&deps)?;
    let default_media = |fallback: &str| {
        handler
            .media_type
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    };
    let mut response = match value {
        DepValue::Response(response) => *response,
        DepValue::Json(json) => Response::new(500)
            .with_body(json.to_string().into_bytes())
            .with_content_type(&default_media("application/json")),
        DepValue::Text(text) => Response::new(500)
            .with_body(text.into_bytes())
            .with_content_type(&default_media("text/plain")),
        other => {
            warn!("error handler returned unrenderable value: {:?}", other);
            return Err(DependencyError::provider("unrenderable error body"));
        }
    };
    if response.content_type.is_none() {
        response.content_type = handler.media_type.clone();
    }
    Ok(response)
}

fn default_error_response(env: &ResolveEnv, scope: &mut RequestScope, kind: &ErrorKind) -> Response {
    let text_of = |scope: &mut RequestScope, name: &str| {
        resolve(env, scope, name)
            .ok()
            .and_then(|v| v.as_text().map(String::from))
    };
    let body = ErrorBody {
        error: kind.to_string(),
        details: kind.details(),
        request_id: text_of(scope, "request_id"),
        trace_id: text_of(scope, "trace_id"),
    };
    let json = serde_json::to_value(&body).unwrap_or_else(|_| {
        serde_json::json!({ "error": kind.to_string() })
    });
    Response::json(kind.status_code(), &json)
}
