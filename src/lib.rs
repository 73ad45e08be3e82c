//! A lightweight HTTP resource framework built around two ideas:
//! * A webmachine-style [state machine](crate::machine) walking each request
//!   through ordered decision points (routing, availability, authorization,
//!   conditional requests, content negotiation) until a terminal response.
//! * A [dependency container](crate::dependency) resolving handler and
//!   callback arguments by name, memoized per request or per process.
//!
//! Handlers, state callbacks, validators, and error handlers are all
//! dependency providers; routes bind callbacks simply by declaring their
//! names as handler dependencies. Adapters convert transports (in-process
//! calls, AWS API Gateway events, HTTP/1.x sockets) to and from the core
//! `Request`/`Response` pair.
//!
//! # Example
//! ```
//! use serde_json::json;
//! use webmach::adapter::DirectClient;
//! use webmach::app::Application;
//! use webmach::dependency::DepValue;
//!
//! let mut app = Application::new();
//!
//! // A resource-providing callback: None means 404, a value is cached
//! // and injected into the handler under the same name.
//! app.resource_exists("doc", &["path_params"], |deps| {
//!     let params = deps.json("path_params")?;
//!     Ok(match params["id"].as_str() {
//!         Some("1") => DepValue::Json(json!({"id": 1, "title": "First"})),
//!         _ => DepValue::None,
//!     })
//! });
//! app.etag("doc_etag", &["doc"], |deps| {
//!     Ok(DepValue::Text(format!("v{}", deps.json("doc")?["id"])))
//! });
//! app.get("/docs/{id}", "get_doc", &["doc", "doc_etag"], |deps| {
//!     Ok(deps.get("doc").clone())
//! });
//!
//! let client = DirectClient::new(app.freeze().unwrap());
//!
//! let response = client.get("/docs/1");
//! assert_eq!(response.status_code, 200);
//! assert_eq!(response.headers.get("etag"), Some("\"v1\""));
//!
//! let cached = client.execute(
//!     webmach::request::Request::new(webmach::request::Method::GET, "/docs/1")
//!         .with_header("If-None-Match", "\"v1\""),
//! );
//! assert_eq!(cached.status_code, 304);
//!
//! assert_eq!(client.get("/docs/2").status_code, 404);
//! ```
pub mod adapter;
pub mod app;
pub mod content;
pub mod dependency;
pub mod error;
pub mod hooks;
pub mod io;
pub mod machine;
pub mod prelude;
pub mod request;
pub mod response;
pub mod router;
pub mod runner;
pub mod server;
pub mod validation;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
