//! The webmachine-style decision state machine.
//!
//! A request walks an ordered sequence of decision points; each either
//! names the next state or terminates with a response. The loop below is
//! the only driver: states never call each other.
use log::{debug, error};

use crate::app::App;
use crate::dependency::{
    resolve, DepValue, DependencyError, RequestScope, ResolveEnv, StateSlot,
};
use crate::error::{render_error, ErrorKind};
use crate::hooks::finalize_response;
use crate::request::Request;
use crate::response::Response;
use crate::router::RouteEntry;

pub mod states;

pub use states::State;

/// Safety limit preventing a miswired transition table from looping.
pub const MAX_TRANSITIONS: usize = 50;

/// What a state hands back when it ends the request: a finished response,
/// or an error kind that still needs rendering through the error-handler
/// registry.
#[derive(Debug)]
pub enum Terminal {
    Response(Response),
    Error(ErrorKind),
}

/// Which renderer won content negotiation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RendererChoice {
    /// Index into the route's own renderer list.
    RouteLocal(usize),
    /// Index into the application's global renderer list.
    Global(usize),
}

/// Everything states share while one request is processed.
pub struct StateContext<'a> {
    pub app: &'a App,
    pub request: Request,
    pub scope: RequestScope,
    route_idx: Option<usize>,
    pub renderer: Option<RendererChoice>,
    /// Set when a POST may create a missing resource: conditional states
    /// must treat the resource as absent.
    pub resource_missing: bool,
}

impl<'a> StateContext<'a> {
    pub fn new(app: &'a App, request: Request) -> Self {
        Self {
            app,
            request,
            scope: RequestScope::new(),
            route_idx: None,
            renderer: None,
            resource_missing: false,
        }
    }

    pub fn set_route(&mut self, idx: usize) {
        self.route_idx = Some(idx);
    }

    pub fn route(&self) -> Option<&'a RouteEntry> {
        self.route_idx.map(|idx| self.app.router.get(idx))
    }

    /// Resolve a dependency in this request's scope.
    pub fn resolve(&mut self, name: &str) -> Result<DepValue, DependencyError> {
        let env = ResolveEnv {
            registry: &self.app.registry,
            parsers: &self.app.parsers,
            session: &self.app.session,
            request: &self.request,
            request_id_hook: self.app.hooks.request_id.as_ref(),
            trace_id_hook: self.app.hooks.trace_id.as_ref(),
        };
        resolve(&env, &mut self.scope, name)
    }

    /// The provider name bound to a decision point: the route's pre-bound
    /// callback first, the application default second.
    pub fn callback_name(&self, slot: StateSlot) -> Option<String> {
        if let Some(route) = self.route() {
            if let Some(name) = route.state_callbacks.get(&slot) {
                return Some(name.clone());
            }
        }
        self.app.default_callbacks.get(&slot).cloned()
    }

    /// Whether the callback for the slot was bound from the route's handler
    /// dependencies (resource-providing semantics) rather than installed as
    /// an application default (predicate semantics).
    pub fn route_bound(&self, slot: StateSlot) -> bool {
        self.route()
            .map(|r| r.state_callbacks.contains_key(&slot))
            .unwrap_or(false)
    }

    /// Record a dependency failure as the request's exception and turn it
    /// into the matching terminal error.
    pub fn dep_failure(&mut self, err: DependencyError) -> Terminal {
        self.scope
            .record_exception(DepValue::Text(err.to_string()));
        Terminal::Error(err.into())
    }
}

/// Run one request through the machine and produce the final response.
pub fn process(app: &App, request: Request) -> Response {
    let mut ctx = StateContext::new(app, request);
    debug!(
        "state machine: {} {}",
        ctx.request.method, ctx.request.raw_path
    );

    let mut state = State::RouteExists;
    let mut transitions = 0;
    let terminal = loop {
        transitions += 1;
        if transitions > MAX_TRANSITIONS {
            error!("state machine exceeded {} transitions", MAX_TRANSITIONS);
            break Terminal::Error(ErrorKind::HandlerException(
                "state machine loop detected".to_string(),
            ));
        }
        debug!("  [{}] -> {}", transitions, state.name());
        match state.execute(&mut ctx) {
            Ok(next) => state = next,
            Err(terminal) => break terminal,
        }
    };

    let StateContext {
        app,
        request,
        mut scope,
        ..
    } = ctx;
    let env = ResolveEnv {
        registry: &app.registry,
        parsers: &app.parsers,
        session: &app.session,
        request: &request,
        request_id_hook: app.hooks.request_id.as_ref(),
        trace_id_hook: app.hooks.trace_id.as_ref(),
    };

    let response = match terminal {
        Terminal::Response(response) => response,
        Terminal::Error(kind) => render_error(&env, &mut scope, &app.error_handlers, &kind),
    };
    let response = finalize_response(&env, &mut scope, &app.hooks, response);
    debug!(
        "  complete in {} states: {} {}",
        transitions, response.status_code, response.status
    );
    response
}
