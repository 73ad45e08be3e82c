//! The decision points, in canonical order.
use log::{debug, warn};

use crate::dependency::{DepValue, StateSlot};
use crate::error::ErrorKind;
use crate::machine::{RendererChoice, StateContext, Terminal};
use crate::request::{format_http_date, EntityTag, Method, TagSet};
use crate::response::Response;

use chrono::{DateTime, Utc};

const MAX_URI_LENGTH: usize = 2048;

/// The decision points of the machine. `execute` returns the next state or
/// a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    RouteExists,
    ServiceAvailable,
    KnownMethod,
    UriTooLong,
    MethodAllowed,
    MalformedRequest,
    Authorized,
    Forbidden,
    ContentHeadersValid,
    ResourceExists,
    IfMatch,
    IfUnmodifiedSince,
    IfNoneMatch,
    IfModifiedSince,
    ContentTypesProvided,
    ContentTypesAccepted,
    ExecuteAndRender,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::RouteExists => "RouteExists",
            State::ServiceAvailable => "ServiceAvailable",
            State::KnownMethod => "KnownMethod",
            State::UriTooLong => "UriTooLong",
            State::MethodAllowed => "MethodAllowed",
            State::MalformedRequest => "MalformedRequest",
            State::Authorized => "Authorized",
            State::Forbidden => "Forbidden",
            State::ContentHeadersValid => "ContentHeadersValid",
            State::ResourceExists => "ResourceExists",
            State::IfMatch => "IfMatch",
            State::IfUnmodifiedSince => "IfUnmodifiedSince",
            State::IfNoneMatch => "IfNoneMatch",
            State::IfModifiedSince => "IfModifiedSince",
            State::ContentTypesProvided => "ContentTypesProvided",
            State::ContentTypesAccepted => "ContentTypesAccepted",
            State::ExecuteAndRender => "ExecuteAndRender",
        }
    }

    pub fn execute(self, ctx: &mut StateContext) -> Result<State, Terminal> {
        match self {
            State::RouteExists => route_exists(ctx),
            State::ServiceAvailable => service_available(ctx),
            State::KnownMethod => known_method(ctx),
            State::UriTooLong => uri_too_long(ctx),
            State::MethodAllowed => method_allowed(ctx),
            State::MalformedRequest => malformed_request(ctx),
            State::Authorized => authorized(ctx),
            State::Forbidden => forbidden(ctx),
            State::ContentHeadersValid => content_headers_valid(ctx),
            State::ResourceExists => resource_exists(ctx),
            State::IfMatch => if_match(ctx),
            State::IfUnmodifiedSince => if_unmodified_since(ctx),
            State::IfNoneMatch => if_none_match(ctx),
            State::IfModifiedSince => if_modified_since(ctx),
            State::ContentTypesProvided => content_types_provided(ctx),
            State::ContentTypesAccepted => content_types_accepted(ctx),
            State::ExecuteAndRender => execute_and_render(ctx),
        }
    }
}

/// Evaluate the callback bound to a slot, if any.
fn call_callback(
    ctx: &mut StateContext,
    slot: StateSlot,
) -> Result<Option<DepValue>, Terminal> {
    match ctx.callback_name(slot) {
        None => Ok(None),
        Some(name) => match ctx.resolve(&name) {
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(ctx.dep_failure(e)),
        },
    }
}

/// B13: look up `(method, path)` and bind the route.
fn route_exists(ctx: &mut StateContext) -> Result<State, Terminal> {
    match ctx.app.router.find_index(ctx.request.method, &ctx.request.path) {
        Some((idx, path_params)) => {
            ctx.request.path_params = path_params;
            ctx.set_route(idx);
            Ok(State::ServiceAvailable)
        }
        None => {
            if ctx.app.router.path_has_routes(&ctx.request.path) {
                let allow = ctx.app.router.allowed_methods(&ctx.request.path);
                if ctx.request.method == Method::OPTIONS {
                    // No OPTIONS route registered; answer from the registry.
                    let mut allow_with_options = allow;
                    if !allow_with_options.contains(&Method::OPTIONS) {
                        allow_with_options.push(Method::OPTIONS);
                    }
                    let allow_value: Vec<&str> =
                        allow_with_options.iter().map(|m| m.as_str()).collect();
                    return Err(Terminal::Response(
                        Response::new(200).with_header("Allow", &allow_value.join(", ")),
                    ));
                }
                return Err(Terminal::Error(ErrorKind::MethodMismatch { allow }));
            }
            if let Some(name) = ctx.app.default_callbacks.get(&StateSlot::RouteNotFound).cloned() {
                match ctx.resolve(&name) {
                    Ok(DepValue::Response(response)) => {
                        return Err(Terminal::Response(*response))
                    }
                    Ok(_) => (),
                    Err(e) => warn!("route_not_found callback failed: {}", e),
                }
            }
            Err(Terminal::Error(ErrorKind::RouteMiss))
        }
    }
}

/// B12: the service can decline every request.
fn service_available(ctx: &mut StateContext) -> Result<State, Terminal> {
    if let Some(value) = call_callback(ctx, StateSlot::ServiceAvailable)? {
        if !value.truthy() {
            return Err(Terminal::Error(ErrorKind::ServiceUnavailable));
        }
    }
    Ok(State::KnownMethod)
}

/// B11: unknown methods get 501. The default accepts the standard seven,
/// which is everything the request model can carry.
fn known_method(ctx: &mut StateContext) -> Result<State, Terminal> {
    if let Some(value) = call_callback(ctx, StateSlot::KnownMethod)? {
        if !value.truthy() {
            return Err(Terminal::Error(ErrorKind::UnknownMethod));
        }
    }
    Ok(State::UriTooLong)
}

/// B10: overly long request paths get 414.
fn uri_too_long(ctx: &mut StateContext) -> Result<State, Terminal> {
    match call_callback(ctx, StateSlot::UriTooLong)? {
        Some(value) => {
            if value.truthy() {
                return Err(Terminal::Error(ErrorKind::UriTooLong));
            }
        }
        None => {
            if ctx.request.path.len() > MAX_URI_LENGTH {
                return Err(Terminal::Error(ErrorKind::UriTooLong));
            }
        }
    }
    Ok(State::MethodAllowed)
}

/// B9: a callback can veto the method for this route.
fn method_allowed(ctx: &mut StateContext) -> Result<State, Terminal> {
    if let Some(value) = call_callback(ctx, StateSlot::MethodAllowed)? {
        if !value.truthy() {
            let allow = ctx.app.router.allowed_methods(&ctx.request.path);
            return Err(Terminal::Error(ErrorKind::MethodNotAllowed { allow }));
        }
    }
    Ok(State::MalformedRequest)
}

/// B8: a truthy callback short-circuits with 400.
fn malformed_request(ctx: &mut StateContext) -> Result<State, Terminal> {
    if let Some(value) = call_callback(ctx, StateSlot::MalformedRequest)? {
        if value.truthy() {
            return Err(Terminal::Error(ErrorKind::Malformed));
        }
    }
    Ok(State::Authorized)
}

/// B7: the authorized callback must return truthy.
fn authorized(ctx: &mut StateContext) -> Result<State, Terminal> {
    if let Some(value) = call_callback(ctx, StateSlot::Authorized)? {
        if !value.truthy() {
            return Err(Terminal::Error(ErrorKind::Unauthorized));
        }
    }
    Ok(State::Forbidden)
}

/// B6: route-bound forbidden callbacks are resource-providing (`None`
/// means forbidden, a value is cached for the handler); an application
/// default is a predicate where truthy means forbidden.
fn forbidden(ctx: &mut StateContext) -> Result<State, Terminal> {
    let route_bound = ctx.route_bound(StateSlot::Forbidden);
    if let Some(value) = call_callback(ctx, StateSlot::Forbidden)? {
        let is_forbidden = if route_bound {
            value.is_none()
        } else {
            value.truthy()
        };
        if is_forbidden {
            return Err(Terminal::Error(ErrorKind::Forbidden));
        }
    }
    Ok(State::ContentHeadersValid)
}

/// B5: content header validation; falsy means 400.
fn content_headers_valid(ctx: &mut StateContext) -> Result<State, Terminal> {
    if let Some(value) = call_callback(ctx, StateSlot::ContentHeadersValid)? {
        if !value.truthy() {
            return Err(Terminal::Error(ErrorKind::InvalidContentHeaders));
        }
    }
    Ok(State::ResourceExists)
}

/// G7: resource lookup, plus the gate that skips the conditional states
/// when neither the route nor the request needs them.
fn resource_exists(ctx: &mut StateContext) -> Result<State, Terminal> {
    if let Some(value) = call_callback(ctx, StateSlot::ResourceExists)? {
        if value.is_none() {
            // An If-Match precondition on a missing resource fails before
            // the POST-create path gets a say (RFC 9110).
            if ctx.request.if_match().is_some() {
                return Err(Terminal::Error(ErrorKind::PreconditionFailed));
            }
            if ctx.request.method == Method::POST {
                ctx.resource_missing = true;
            } else {
                return Err(Terminal::Error(ErrorKind::ResourceMiss));
            }
        }
    }

    let route_supports_conditional = ctx
        .route()
        .map(|r| {
            r.state_callbacks.contains_key(&StateSlot::Etag)
                || r.state_callbacks.contains_key(&StateSlot::LastModified)
        })
        .unwrap_or(false);
    if !route_supports_conditional && !ctx.request.has_conditional_headers() {
        debug!("skipping conditional states (no callbacks, no conditional headers)");
        return Ok(State::ContentTypesProvided);
    }
    Ok(State::IfMatch)
}

fn current_etag(ctx: &mut StateContext) -> Result<Option<EntityTag>, Terminal> {
    match call_callback(ctx, StateSlot::Etag)? {
        Some(value) => match value.as_text() {
            Some(text) => Ok(Some(EntityTag::from_callback(text))),
            None => {
                if !value.is_none() {
                    warn!("etag callback returned a non-text value");
                }
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

fn current_last_modified(ctx: &mut StateContext) -> Result<Option<DateTime<Utc>>, Terminal> {
    match call_callback(ctx, StateSlot::LastModified)? {
        Some(value) => Ok(value.as_time()),
        None => Ok(None),
    }
}

/// G3: `If-Match` uses strong comparison; `*` matches any existing
/// resource; no match (or no ETag at all) fails the precondition.
fn if_match(ctx: &mut StateContext) -> Result<State, Terminal> {
    let tags = match ctx.request.if_match() {
        Some(tags) => tags,
        None => return Ok(State::IfUnmodifiedSince),
    };
    if ctx.resource_missing {
        return Err(Terminal::Error(ErrorKind::PreconditionFailed));
    }
    if let TagSet::Any = tags {
        return Ok(State::IfUnmodifiedSince);
    }
    let current = match current_etag(ctx)? {
        Some(current) => current,
        None => return Err(Terminal::Error(ErrorKind::PreconditionFailed)),
    };
    if tags.matches_strong(&current) {
        Ok(State::IfUnmodifiedSince)
    } else {
        Err(Terminal::Error(ErrorKind::PreconditionFailed))
    }
}

/// G4: the resource must not have changed after the given instant.
fn if_unmodified_since(ctx: &mut StateContext) -> Result<State, Terminal> {
    let since = match ctx.request.if_unmodified_since() {
        Some(since) => since,
        None => return Ok(State::IfNoneMatch),
    };
    match current_last_modified(ctx)? {
        Some(last_modified) if last_modified <= since => Ok(State::IfNoneMatch),
        // Newer than the precondition, or no modification time to compare.
        _ => Err(Terminal::Error(ErrorKind::PreconditionFailed)),
    }
}

/// G5: a matching `If-None-Match` answers 304 on safe methods and 412 on
/// everything else. Comparison is weak.
fn if_none_match(ctx: &mut StateContext) -> Result<State, Terminal> {
    let tags = match ctx.request.if_none_match() {
        Some(tags) => tags,
        None => return Ok(State::IfModifiedSince),
    };
    let current = current_etag(ctx)?;
    let matched = match (&tags, &current) {
        (TagSet::Any, _) => !ctx.resource_missing,
        (_, Some(current)) => tags.matches_weak(current),
        (_, None) => false,
    };
    if !matched {
        return Ok(State::IfModifiedSince);
    }
    if ctx.request.method.is_safe() {
        let mut response = Response::new(304);
        if let Some(current) = current {
            response.headers.set("ETag", &current.to_string());
        }
        Err(Terminal::Response(response))
    } else {
        Err(Terminal::Error(ErrorKind::PreconditionFailed))
    }
}

/// G6: only GET/HEAD; an unmodified resource answers 304.
fn if_modified_since(ctx: &mut StateContext) -> Result<State, Terminal> {
    if !ctx.request.method.is_safe() {
        return Ok(State::ContentTypesProvided);
    }
    let since = match ctx.request.if_modified_since() {
        Some(since) => since,
        None => return Ok(State::ContentTypesProvided),
    };
    match current_last_modified(ctx)? {
        Some(last_modified) if last_modified <= since => {
            Err(Terminal::Response(Response::new(304)))
        }
        // Missing modification time means assume modified.
        _ => Ok(State::ContentTypesProvided),
    }
}

fn available_media_types(ctx: &StateContext) -> Vec<String> {
    let mut available: Vec<String> = vec![];
    if let Some(route) = ctx.route() {
        for renderer in &route.renderers {
            if !available.contains(&renderer.media_type) {
                available.push(renderer.media_type.clone());
            }
        }
    }
    for renderer in &ctx.app.renderers {
        let media_type = renderer.media_type().to_string();
        if !available.contains(&media_type) {
            available.push(media_type);
        }
    }
    available
}

/// C3: a route with no renderers at all is a misconfiguration.
fn content_types_provided(ctx: &mut StateContext) -> Result<State, Terminal> {
    if available_media_types(ctx).is_empty() {
        return Err(Terminal::Error(ErrorKind::NoRenderers));
    }
    Ok(State::ContentTypesAccepted)
}

/// C4: pick the renderer for the request's Accept header. Route-local
/// renderers take precedence over the global list; within each, the
/// highest quality wins with registration order breaking ties.
fn content_types_accepted(ctx: &mut StateContext) -> Result<State, Terminal> {
    let not_acceptable = |ctx: &StateContext| {
        Terminal::Error(ErrorKind::NotAcceptable {
            available: available_media_types(ctx),
        })
    };
    let accept = match ctx.request.accept() {
        Ok(Some(accept)) => accept,
        Ok(None) => crate::request::Accept::wildcard(),
        Err(_) => return Err(not_acceptable(ctx)),
    };

    let app = ctx.app;
    let route_candidates = ctx
        .route()
        .map(|r| r.renderers.as_slice())
        .unwrap_or(&[])
        .iter()
        .enumerate()
        .map(|(i, r)| (RendererChoice::RouteLocal(i), r.media_type.clone()));
    let global_candidates = app
        .renderers
        .iter()
        .enumerate()
        .map(|(i, r)| (RendererChoice::Global(i), r.media_type().to_string()));

    match crate::content::negotiate(&accept, route_candidates.chain(global_candidates)) {
        Some(choice) => {
            ctx.renderer = Some(choice);
            Ok(State::ExecuteAndRender)
        }
        None => Err(not_acceptable(ctx)),
    }
}

/// Terminal: run the handler through the container and render its return.
fn execute_and_render(ctx: &mut StateContext) -> Result<State, Terminal> {
    let route = match ctx.route() {
        Some(route) => route,
        None => {
            return Err(Terminal::Error(ErrorKind::HandlerException(
                "no route bound at execution".to_string(),
            )))
        }
    };

    let mut deps = crate::dependency::DepMap::default();
    for dep in &route.deps {
        match ctx.resolve(dep) {
            Ok(value) => deps.insert(dep, value),
            Err(e) => return Err(ctx.dep_failure(e)),
        }
    }
    let result = match (route.handler)(&deps) {
        Ok(result) => result,
        Err(e) => return Err(ctx.dep_failure(e)),
    };
    // The handler return is a dependency too: route-local renderers can ask
    // for it by the route's name.
    ctx.scope.insert(&route.name, result.clone());

    let mut response = match result {
        DepValue::Response(response) => {
            let mut response = *response;
            if response.content_type.is_none() && response.body.is_some() {
                response.content_type = Some(chosen_content_type(ctx, route));
            }
            response
        }
        DepValue::None => Response::new(204),
        value => match render_value(ctx, route, &value) {
            Ok(response) => response,
            Err(terminal) => return Err(terminal),
        },
    };

    if ctx.callback_name(StateSlot::Etag).is_some() {
        if let Some(etag) = current_etag(ctx)? {
            response.headers.set_if_absent("ETag", &etag.to_string());
        }
    }
    if ctx.callback_name(StateSlot::LastModified).is_some() {
        if let Some(last_modified) = current_last_modified(ctx)? {
            response
                .headers
                .set_if_absent("Last-Modified", &format_http_date(last_modified));
        }
    }

    if let Ok(Some(accept)) = ctx.request.accept() {
        if !accept.is_pure_wildcard() {
            response.headers.append("Vary", "Accept");
        }
    }
    if ctx.request.headers.contains("authorization") {
        response.headers.append("Vary", "Authorization");
    }

    Err(Terminal::Response(response))
}

fn chosen_content_type(ctx: &StateContext, route: &crate::router::RouteEntry) -> String {
    match ctx.renderer {
        Some(RendererChoice::RouteLocal(i)) => {
            let renderer = &route.renderers[i];
            match &renderer.charset {
                Some(charset) => format!("{}; charset={}", renderer.media_type, charset),
                None => renderer.media_type.clone(),
            }
        }
        Some(RendererChoice::Global(i)) => ctx.app.renderers[i].content_type(),
        None => "application/octet-stream".to_string(),
    }
}

fn render_value(
    ctx: &mut StateContext,
    route: &crate::router::RouteEntry,
    value: &DepValue,
) -> Result<Response, Terminal> {
    let content_type = chosen_content_type(ctx, route);
    let body = match ctx.renderer {
        Some(RendererChoice::RouteLocal(i)) => {
            let renderer = route.renderers[i].clone();
            let mut deps = crate::dependency::DepMap::default();
            for dep in &renderer.deps {
                match ctx.resolve(dep) {
                    Ok(value) => deps.insert(dep, value),
                    Err(e) => return Err(ctx.dep_failure(e)),
                }
            }
            let rendered = match (renderer.func)(&deps) {
                Ok(rendered) => rendered,
                Err(e) => return Err(ctx.dep_failure(e)),
            };
            match rendered {
                DepValue::Text(text) => text.into_bytes(),
                DepValue::Bytes(bytes) => bytes,
                DepValue::Json(json) => json.to_string().into_bytes(),
                other => {
                    return Err(ctx.dep_failure(
                        crate::dependency::DependencyError::provider(&format!(
                            "route renderer for {} returned unrenderable value: {:?}",
                            renderer.media_type, other
                        )),
                    ))
                }
            }
        }
        Some(RendererChoice::Global(i)) => {
            let renderer = ctx.app.renderers[i].clone();
            match renderer.render(value, &ctx.request) {
                Ok(bytes) => bytes,
                Err(e) => {
                    ctx.scope
                        .record_exception(DepValue::Text(e.to_string()));
                    return Err(Terminal::Error(ErrorKind::HandlerException(e.to_string())));
                }
            }
        }
        None => {
            return Err(Terminal::Error(ErrorKind::HandlerException(
                "no renderer chosen before execution".to_string(),
            )))
        }
    };
    let mut response = Response::new(200).with_body(body);
    response.content_type = Some(content_type);
    Ok(response)
}
