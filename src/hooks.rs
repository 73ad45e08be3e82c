//! Response finalization: default headers, request/trace ids, lengths.
//!
//! Every terminal response, success or error, passes through here exactly
//! once before reaching an adapter.
use std::sync::Arc;

use crate::dependency::{resolve, IdHook, RequestScope, ResolveEnv};
use crate::request::Request;
use crate::response::Response;

/// A default-headers hook: runs against every outgoing response.
pub type HeaderHook = Arc<dyn Fn(&Request, &mut Response) + Send + Sync>;

/// The application's installed hooks.
#[derive(Default, Clone)]
pub struct Hooks {
    pub header_hooks: Vec<HeaderHook>,
    pub request_id: Option<IdHook>,
    pub trace_id: Option<IdHook>,
}

/// Apply hooks and header bookkeeping to a terminal response.
///
/// Order matters: provider-written `response_headers` first, then the
/// installed default-header hooks (which may override), then the id
/// headers, and finally `Content-Type`/`Content-Length`.
pub fn finalize_response(
    env: &ResolveEnv,
    scope: &mut RequestScope,
    hooks: &Hooks,
    mut response: Response,
) -> Response {
    response.headers.merge(&scope.take_response_headers());

    for hook in &hooks.header_hooks {
        hook(env.request, &mut response);
    }

    for name in ["request_id", "trace_id"] {
        if let Ok(value) = resolve(env, scope, name) {
            if let Some(id) = value.as_text() {
                let header = match name {
                    "request_id" => "x-request-id",
                    _ => "x-trace-id",
                };
                response.headers.set_if_absent(header, id);
            }
        }
    }

    if let Some(content_type) = &response.content_type {
        if response.body.is_some() {
            response.headers.set("Content-Type", content_type);
        }
    }

    if response.body_forbidden() {
        response.body = None;
        response.headers.remove("content-length");
    } else if response.body.is_some() {
        response
            .headers
            .set("Content-Length", &response.content_length().to_string());
    }

    response
}
