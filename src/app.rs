//! The application: a registration-time builder frozen into an immutable
//! runtime snapshot.
//!
//! All registration happens on [`Application`]; [`Application::freeze`]
//! validates the dependency graph, pre-binds state callbacks from handler
//! dependency names, runs startup handlers, and produces an [`App`] that is
//! read-only and safe to share across server threads.
use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::content::{
    FormParser, HtmlRenderer, JsonParser, JsonRenderer, MultipartParser, Parser, Renderer,
    TextParser, TextRenderer,
};
use crate::dependency::{
    is_reserved, resolve_startup, DepMap, DepValue, DependencyError, DependencyRegistry, Provider,
    ProviderKind, Scope, SessionCache, StateSlot,
};
use crate::error::{ErrorHandler, ErrorHandlerRegistry};
use crate::hooks::Hooks;
use crate::machine;
use crate::request::{Method, Request};
use crate::response::Response;
use crate::router::{RouteEntry, RouteRenderer, Router};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("session provider '{provider}' depends on request-scoped '{dep}'")]
    SessionDependsOnRequest { provider: String, dep: String },
    #[error("session provider '{provider}' depends on unknown '{dep}'")]
    SessionDependsOnUnknown { provider: String, dep: String },
    #[error("session providers form a dependency cycle through '{provider}'")]
    CyclicSessionGraph { provider: String },
    #[error("no route named '{0}'")]
    UnknownRoute(String),
    #[error("startup handler '{name}' failed: {source}")]
    Startup {
        name: String,
        source: DependencyError,
    },
}

/// The mutable registration surface. Every method returns `&mut Self` so
/// registrations chain; problems that can only be reported later (an
/// unknown route name, say) are collected and surfaced by `freeze`.
pub struct Application {
    router: Router,
    registry: DependencyRegistry,
    parsers: Vec<Arc<dyn Parser>>,
    renderers: Vec<Arc<dyn Renderer>>,
    error_handlers: ErrorHandlerRegistry,
    default_callbacks: HashMap<StateSlot, String>,
    hooks: Hooks,
    deferred_errors: Vec<BuildError>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// A new application with the built-in parsers (JSON, form, text,
    /// multipart) and the built-in renderers, JSON first.
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            registry: DependencyRegistry::default(),
            parsers: vec![
                Arc::new(JsonParser),
                Arc::new(FormParser),
                Arc::new(TextParser),
                Arc::new(MultipartParser),
            ],
            renderers: vec![
                Arc::new(JsonRenderer),
                Arc::new(HtmlRenderer),
                Arc::new(TextRenderer),
            ],
            error_handlers: ErrorHandlerRegistry::default(),
            default_callbacks: HashMap::new(),
            hooks: Hooks::default(),
            deferred_errors: vec![],
        }
    }

    /// Register a route. `name` doubles as the handler's provider name:
    /// its return value is cached under it, so route-local renderers can
    /// declare it as a dependency. `deps` are the handler's dependency
    /// names, which also drive state-callback pre-binding.
    pub fn route<F>(
        &mut self,
        method: Method,
        template: &str,
        name: &str,
        deps: &[&str],
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.router
            .add(RouteEntry::new(method, template, name, deps, Arc::new(handler)));
        self
    }

    pub fn get<F>(&mut self, template: &str, name: &str, deps: &[&str], handler: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.route(Method::GET, template, name, deps, handler)
    }

    pub fn post<F>(&mut self, template: &str, name: &str, deps: &[&str], handler: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.route(Method::POST, template, name, deps, handler)
    }

    pub fn put<F>(&mut self, template: &str, name: &str, deps: &[&str], handler: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.route(Method::PUT, template, name, deps, handler)
    }

    pub fn patch<F>(&mut self, template: &str, name: &str, deps: &[&str], handler: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.route(Method::PATCH, template, name, deps, handler)
    }

    pub fn delete<F>(&mut self, template: &str, name: &str, deps: &[&str], handler: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.route(Method::DELETE, template, name, deps, handler)
    }

    /// Register a plain value provider.
    pub fn dependency<F>(&mut self, name: &str, scope: Scope, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.registry.register(Provider::new(name, scope, deps, func));
        self
    }

    /// Register a session provider evaluated eagerly at freeze time.
    pub fn startup<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.registry
            .register(Provider::new(name, Scope::Session, deps, func).with_startup());
        self
    }

    /// Register a validation provider: a failure is a typed validation
    /// error that terminates the request with 422.
    pub fn validator<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.registry.register(
            Provider::new(name, Scope::Request, deps, func).with_kind(ProviderKind::Validator),
        );
        self
    }

    /// Register a state-callback provider. A route whose handler declares
    /// `name` among its dependencies gets this callback bound to `slot`.
    pub fn state_callback<F>(
        &mut self,
        slot: StateSlot,
        name: &str,
        deps: &[&str],
        func: F,
    ) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.registry.register(
            Provider::new(name, Scope::Request, deps, func)
                .with_kind(ProviderKind::StateCallback(slot)),
        );
        self
    }

    /// A resource-providing callback: `None` means not found (or, on POST,
    /// "may create"); anything else is cached under `name` for the handler.
    pub fn resource_exists<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.state_callback(StateSlot::ResourceExists, name, deps, func)
    }

    /// A resource-providing forbidden check: `None` means 403.
    pub fn forbidden<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.state_callback(StateSlot::Forbidden, name, deps, func)
    }

    pub fn authorized<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.state_callback(StateSlot::Authorized, name, deps, func)
    }

    /// An entity-tag callback enabling conditional requests on routes that
    /// depend on it. The returned text may be bare, quoted, or `W/`-weak.
    pub fn etag<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.state_callback(StateSlot::Etag, name, deps, func)
    }

    /// A last-modified callback enabling date-based conditional requests.
    pub fn last_modified<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.state_callback(StateSlot::LastModified, name, deps, func)
    }

    /// Install an application-wide default callback for a decision point,
    /// used by routes that don't bind their own.
    pub fn default_callback<F>(
        &mut self,
        slot: StateSlot,
        name: &str,
        deps: &[&str],
        func: F,
    ) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.registry
            .register(Provider::new(name, Scope::Request, deps, func));
        self.default_callbacks.insert(slot, name.to_string());
        self
    }

    /// Install the handler consulted before the default 404 when no route
    /// matches. A `Response` return is used as-is.
    pub fn route_not_found<F>(&mut self, name: &str, deps: &[&str], func: F) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.default_callback(StateSlot::RouteNotFound, name, deps, func)
    }

    /// Bind a route-local renderer to the route registered under
    /// `route_name`. Its deps may include `route_name` itself to receive
    /// the handler's return value.
    pub fn route_renderer<F>(
        &mut self,
        route_name: &str,
        media_type: &str,
        charset: Option<&str>,
        deps: &[&str],
        func: F,
    ) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        let renderer = RouteRenderer {
            media_type: media_type.to_string(),
            charset: charset.map(String::from),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            func: Arc::new(func),
        };
        match self.router.iter_mut().find(|r| r.name == route_name) {
            Some(route) => route.renderers.push(renderer),
            None => self
                .deferred_errors
                .push(BuildError::UnknownRoute(route_name.to_string())),
        }
        self
    }

    /// Register a custom content parser (vendor media types). Its
    /// dependency name engages it the way `json_body` engages the JSON
    /// parser.
    pub fn parser<P: Parser + 'static>(&mut self, parser: P) -> &mut Self {
        self.parsers.push(Arc::new(parser));
        self
    }

    /// Register an additional global renderer (after the built-ins).
    pub fn renderer<R: Renderer + 'static>(&mut self, renderer: R) -> &mut Self {
        self.renderers.push(Arc::new(renderer));
        self
    }

    /// Replace the global renderer list entirely.
    pub fn clear_renderers(&mut self) -> &mut Self {
        self.renderers.clear();
        self
    }

    /// Register an error responder for a status code, optionally
    /// restricted to one media type (`None` = default for the status).
    pub fn error_handler<F>(
        &mut self,
        status: u16,
        media_type: Option<&str>,
        deps: &[&str],
        func: F,
    ) -> &mut Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        self.error_handlers.register(ErrorHandler {
            status,
            media_type: media_type.map(String::from),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            func: Arc::new(func),
        });
        self
    }

    /// Install a default-headers hook, run against every outgoing
    /// response in installation order.
    pub fn default_headers<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.hooks.header_hooks.push(Arc::new(hook));
        self
    }

    pub fn request_id_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.hooks.request_id = Some(Arc::new(hook));
        self
    }

    pub fn trace_id_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.hooks.trace_id = Some(Arc::new(hook));
        self
    }

    /// Validate the registration graph, pre-bind state callbacks, run
    /// startup handlers, and produce the immutable runtime.
    pub fn freeze(mut self) -> Result<App, BuildError> {
        if let Some(error) = self.deferred_errors.into_iter().next() {
            return Err(error);
        }

        // Session providers must not reach into request scope.
        for provider in self.registry.iter() {
            if provider.scope != Scope::Session {
                continue;
            }
            for dep in &provider.deps {
                let parser_name = self.parsers.iter().any(|p| p.dependency_name() == dep);
                if is_reserved(dep) || parser_name {
                    return Err(BuildError::SessionDependsOnRequest {
                        provider: provider.name.clone(),
                        dep: dep.clone(),
                    });
                }
                match self.registry.get(dep) {
                    Some(p) if p.scope == Scope::Request => {
                        return Err(BuildError::SessionDependsOnRequest {
                            provider: provider.name.clone(),
                            dep: dep.clone(),
                        })
                    }
                    Some(_) => (),
                    None => {
                        return Err(BuildError::SessionDependsOnUnknown {
                            provider: provider.name.clone(),
                            dep: dep.clone(),
                        })
                    }
                }
            }
        }

        // A cyclic session graph would deadlock two concurrent requests on
        // each other's cache cells at runtime; reject it here instead.
        fn on_cycle<'a>(
            registry: &'a DependencyRegistry,
            name: &'a str,
            path: &mut Vec<&'a str>,
        ) -> bool {
            if path.contains(&name) {
                return true;
            }
            let provider = match registry.get(name) {
                Some(provider) => provider,
                None => return false,
            };
            path.push(name);
            let cyclic = provider.deps.iter().any(|dep| on_cycle(registry, dep, path));
            path.pop();
            cyclic
        }
        for provider in self.registry.iter().filter(|p| p.scope == Scope::Session) {
            let mut path = vec![];
            if on_cycle(&self.registry, &provider.name, &mut path) {
                return Err(BuildError::CyclicSessionGraph {
                    provider: provider.name.clone(),
                });
            }
        }

        // Pre-bind state callbacks from handler dependency names.
        for route in self.router.iter_mut() {
            for dep in route.deps.clone() {
                if let Some(provider) = self.registry.get(&dep) {
                    if let ProviderKind::StateCallback(slot) = provider.kind {
                        debug!(
                            "route '{}' binds '{}' to {:?}",
                            route.name, dep, slot
                        );
                        route.state_callbacks.insert(slot, dep);
                    }
                }
            }
        }

        let session = SessionCache::default();
        let mut startup_names: Vec<String> = self
            .registry
            .iter()
            .filter(|p| p.startup)
            .map(|p| p.name.clone())
            .collect();
        startup_names.sort();
        for name in startup_names {
            debug!("running startup handler '{}'", name);
            let mut stack = vec![];
            resolve_startup(&self.registry, &session, &name, &mut stack).map_err(|source| {
                BuildError::Startup {
                    name: name.clone(),
                    source,
                }
            })?;
        }

        Ok(App {
            router: self.router,
            registry: self.registry,
            parsers: self.parsers,
            renderers: self.renderers,
            error_handlers: self.error_handlers,
            default_callbacks: self.default_callbacks,
            hooks: self.hooks,
            session,
        })
    }
}

/// The frozen application. Routes, providers, and renderers are read-only;
/// the session cache is the only shared mutable state and is internally
/// synchronized.
pub struct App {
    pub(crate) router: Router,
    pub(crate) registry: DependencyRegistry,
    pub(crate) parsers: Vec<Arc<dyn Parser>>,
    pub(crate) renderers: Vec<Arc<dyn Renderer>>,
    pub(crate) error_handlers: ErrorHandlerRegistry,
    pub(crate) default_callbacks: HashMap<StateSlot, String>,
    pub(crate) hooks: Hooks,
    pub(crate) session: SessionCache,
}

impl App {
    /// Process one request through the state machine.
    pub fn execute(&self, request: Request) -> Response {
        machine::process(self, request)
    }
}
