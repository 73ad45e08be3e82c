//! Transport adapters: everything that converts between a wire format and
//! the core `Request`/`Response` pair.
//!
//! The HTTP/1.x server lives in [`crate::server`]; this module holds the
//! in-process adapter and the AWS API Gateway event adapter.
use std::sync::Arc;

use crate::app::App;
use crate::request::{Method, Request};
use crate::response::Response;

pub mod aws;

/// Discard the body at the adapter boundary for HEAD requests, keeping
/// status and headers (including `Content-Length`) intact.
pub(crate) fn strip_head_body(method: Method, response: &mut Response) {
    if method == Method::HEAD {
        response.body = None;
    }
}

/// The in-process adapter: a thin, purely synchronous wrapper over
/// `App::execute`, with request-building helpers. This is the driver
/// integration tests use.
///
/// # Example
/// ```
/// use webmach::adapter::DirectClient;
/// use webmach::app::Application;
/// use webmach::dependency::DepValue;
///
/// let mut app = Application::new();
/// app.get("/ping", "ping", &[], |_| Ok(DepValue::Text("pong".to_string())));
/// let client = DirectClient::new(app.freeze().unwrap());
///
/// let response = client.get("/ping");
/// assert_eq!(response.status_code, 200);
/// ```
#[derive(Clone)]
pub struct DirectClient {
    app: Arc<App>,
}

impl DirectClient {
    pub fn new(app: App) -> Self {
        Self { app: Arc::new(app) }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn execute(&self, request: Request) -> Response {
        let method = request.method;
        let mut response = self.app.execute(request);
        strip_head_body(method, &mut response);
        response
    }

    pub fn get(&self, path: &str) -> Response {
        self.execute(Request::new(Method::GET, path))
    }

    pub fn head(&self, path: &str) -> Response {
        self.execute(Request::new(Method::HEAD, path))
    }

    pub fn delete(&self, path: &str) -> Response {
        self.execute(Request::new(Method::DELETE, path))
    }

    pub fn options(&self, path: &str) -> Response {
        self.execute(Request::new(Method::OPTIONS, path))
    }

    pub fn post_json(&self, path: &str, body: &serde_json::Value) -> Response {
        self.execute(Request::new(Method::POST, path).with_json(body))
    }

    pub fn put_json(&self, path: &str, body: &serde_json::Value) -> Response {
        self.execute(Request::new(Method::PUT, path).with_json(body))
    }
}
