//! AWS API Gateway adapter, covering REST (payload v1) and HTTP API
//! (payload v2) events.
//!
//! Startup handlers run when the adapter is constructed, which in a Lambda
//! is the cold start.
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::strip_head_body;
use crate::app::{App, Application, BuildError};
use crate::request::{HeaderMap, Method, Request};
use crate::response::Response;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event carries no HTTP method")]
    MissingMethod,
    #[error("event carries no path")]
    MissingPath,
    #[error(transparent)]
    InvalidMethod(#[from] crate::request::InvalidMethod),
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// The incoming event, with both payload formats' fields. REST events put
/// the method at the top level; HTTP API v2 events put it (and the path)
/// under `requestContext.http`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiGatewayEvent {
    pub http_method: Option<String>,
    pub path: Option<String>,
    pub raw_path: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub query_string_parameters: Option<HashMap<String, String>>,
    pub path_parameters: Option<HashMap<String, String>>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
    pub request_context: Option<RequestContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    pub http_method: Option<String>,
    pub http: Option<HttpContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpContext {
    pub method: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl ApiGatewayEvent {
    fn method(&self) -> Result<Method, EventError> {
        let method = self
            .http_method
            .as_deref()
            .or_else(|| {
                self.request_context.as_ref().and_then(|ctx| {
                    ctx.http
                        .as_ref()
                        .and_then(|http| http.method.as_deref())
                        .or(ctx.http_method.as_deref())
                })
            })
            .ok_or(EventError::MissingMethod)?;
        Ok(method.parse()?)
    }

    fn path(&self) -> Result<&str, EventError> {
        self.path
            .as_deref()
            .or(self.raw_path.as_deref())
            .or_else(|| {
                self.request_context
                    .as_ref()
                    .and_then(|ctx| ctx.http.as_ref())
                    .and_then(|http| http.path.as_deref())
            })
            .ok_or(EventError::MissingPath)
    }

    /// Convert the event into a core request: decoded path, case-preserved
    /// headers, base64-decoded body.
    pub fn into_request(self) -> Result<Request, EventError> {
        let method = self.method()?;
        let raw_path = self.path()?.to_string();
        let path = percent_decode_str(&raw_path)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw_path.clone());

        let mut headers = HeaderMap::new();
        if let Some(event_headers) = &self.headers {
            for (name, value) in event_headers {
                headers.append(name, value);
            }
        }

        let body = match &self.body {
            Some(body) if self.is_base64_encoded => Some(BASE64.decode(body)?),
            Some(body) => Some(body.clone().into_bytes()),
            None => None,
        };

        Ok(Request {
            method,
            path,
            raw_path,
            headers,
            query_params: self.query_string_parameters.unwrap_or_default(),
            path_params: HashMap::new(),
            body,
        })
    }
}

fn to_event_response(mut response: Response) -> ApiGatewayResponse {
    if response.body.is_some() && !response.body_forbidden() {
        let length = response.content_length().to_string();
        response.headers.set_if_absent("Content-Length", &length);
    }
    // The v1 response header map is single-valued; repeated headers
    // (Vary, mostly) collapse into one comma-separated value.
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in response.headers.iter() {
        headers
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let (body, is_base64_encoded) = match response.body {
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(text) => (text, false),
            Err(e) => (BASE64.encode(e.as_bytes()), true),
        },
        None => (String::new(), false),
    };

    ApiGatewayResponse {
        status_code: response.status_code,
        headers,
        body,
        is_base64_encoded,
    }
}

/// The Lambda-side adapter: freeze at cold start, convert per invocation.
pub struct LambdaAdapter {
    app: App,
}

impl LambdaAdapter {
    /// Freeze the application; startup handlers run here.
    pub fn new(app: Application) -> Result<Self, BuildError> {
        Ok(Self { app: app.freeze()? })
    }

    pub fn from_app(app: App) -> Self {
        Self { app }
    }

    pub fn handle(&self, event: ApiGatewayEvent) -> ApiGatewayResponse {
        match event.into_request() {
            Ok(request) => {
                let method = request.method;
                let mut response = self.app.execute(request);
                strip_head_body(method, &mut response);
                to_event_response(response)
            }
            Err(e) => to_event_response(Response::json(
                400,
                &serde_json::json!({ "error": e.to_string() }),
            )),
        }
    }

    /// Convenience for handlers receiving untyped JSON events.
    pub fn handle_json(&self, event: &serde_json::Value) -> serde_json::Value {
        let event: ApiGatewayEvent = match serde_json::from_value(event.clone()) {
            Ok(event) => event,
            Err(e) => {
                let response = to_event_response(Response::json(
                    400,
                    &serde_json::json!({ "error": format!("malformed event: {}", e) }),
                ));
                return serde_json::to_value(response).unwrap_or_default();
            }
        };
        serde_json::to_value(self.handle(event)).unwrap_or_default()
    }
}
