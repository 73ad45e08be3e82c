//! Named dependency providers with request/session scoped caching.
//!
//! Providers declare the names of the dependencies they consume; resolution
//! walks those names depth-first with memoization, so within one request a
//! provider runs at most once no matter how many handlers and callbacks
//! depend on it. Session-scoped providers run at most once per process.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use serde_json::Value as Json;
use thiserror::Error;

use crate::content::{Parser, RawBody};
use crate::request::{HeaderMap, Request};
use crate::validation::ValidationError;

pub use value::{DepValue, Part, SharedHeaders};

pub mod value;

/// How long a resolved value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Reset at the start of each request.
    Request,
    /// Memoized for the process lifetime.
    Session,
}

/// The decision points a state callback can be bound to. Handler dependency
/// names are matched against callback providers at registration time, which
/// is what turns a plain dependency into a per-route decision function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateSlot {
    ServiceAvailable,
    KnownMethod,
    UriTooLong,
    MethodAllowed,
    MalformedRequest,
    Authorized,
    Forbidden,
    ContentHeadersValid,
    ResourceExists,
    Etag,
    LastModified,
    RouteNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Plain,
    /// Failure is a typed validation error surfacing as 422.
    Validator,
    /// Participates in a state machine decision when bound to a route.
    StateCallback(StateSlot),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DependencyError {
    #[error("unresolved dependency: {0}")]
    Unresolved(String),
    #[error("cyclic dependency involving '{0}'")]
    Cyclic(String),
    #[error("dependency '{name}' is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Parse(#[from] crate::content::ParseError),
    #[error("no parser accepts content type {0:?}")]
    UnsupportedMediaType(Option<String>),
    #[error("provider failed: {0}")]
    Provider(String),
}

impl DependencyError {
    pub fn provider(reason: &str) -> Self {
        Self::Provider(reason.to_string())
    }
}

/// The resolved values a provider (or handler) receives, keyed by the
/// dependency names it declared.
#[derive(Debug, Default, Clone)]
pub struct DepMap {
    values: HashMap<String, DepValue>,
}

static NONE: DepValue = DepValue::None;

impl DepMap {
    pub fn insert(&mut self, name: &str, value: DepValue) {
        self.values.insert(name.to_string(), value);
    }

    /// The value for a name; absent names read as `None`.
    pub fn get(&self, name: &str) -> &DepValue {
        self.values.get(name).unwrap_or(&NONE)
    }

    pub fn truthy(&self, name: &str) -> bool {
        self.get(name).truthy()
    }

    fn mismatch(name: &str, expected: &'static str) -> DependencyError {
        DependencyError::TypeMismatch {
            name: name.to_string(),
            expected,
        }
    }

    pub fn json(&self, name: &str) -> Result<&Json, DependencyError> {
        self.get(name)
            .as_json()
            .ok_or_else(|| Self::mismatch(name, "JSON value"))
    }

    pub fn text(&self, name: &str) -> Result<&str, DependencyError> {
        self.get(name)
            .as_text()
            .ok_or_else(|| Self::mismatch(name, "text value"))
    }

    pub fn request(&self, name: &str) -> Result<&Request, DependencyError> {
        self.get(name)
            .as_request()
            .ok_or_else(|| Self::mismatch(name, "request"))
    }

    pub fn headers(&self, name: &str) -> Result<&SharedHeaders, DependencyError> {
        self.get(name)
            .as_headers()
            .ok_or_else(|| Self::mismatch(name, "header map"))
    }
}

pub type ProviderFn = Arc<dyn Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync>;

/// A named provider: a function resolving a value from other named
/// dependencies.
#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub scope: Scope,
    pub kind: ProviderKind,
    pub deps: Vec<String>,
    pub startup: bool,
    pub func: ProviderFn,
}

impl Provider {
    pub fn new<F>(name: &str, scope: Scope, deps: &[&str], func: F) -> Self
    where
        F: Fn(&DepMap) -> Result<DepValue, DependencyError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            scope,
            kind: ProviderKind::Plain,
            deps: deps.iter().map(|d| d.to_string()).collect(),
            startup: false,
            func: Arc::new(func),
        }
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_startup(mut self) -> Self {
        self.startup = true;
        self
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("deps", &self.deps)
            .field("startup", &self.startup)
            .finish()
    }
}

/// The provider table, built before any request is served and read-only
/// afterwards.
#[derive(Debug, Default, Clone)]
pub struct DependencyRegistry {
    providers: HashMap<String, Provider>,
}

impl DependencyRegistry {
    pub fn register(&mut self, provider: Provider) {
        self.providers.insert(provider.name.clone(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.values()
    }
}

/// Names the container resolves without a registered provider.
pub const RESERVED_NAMES: [&str; 13] = [
    "request",
    "path_params",
    "query_params",
    "request_headers",
    "response_headers",
    "body",
    "json_body",
    "form_body",
    "text_body",
    "multipart_body",
    "exception",
    "request_id",
    "trace_id",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Process-wide cache for session-scoped providers. Each key is evaluated
/// at most once; concurrent readers see either "absent" or the final value.
#[derive(Debug, Default)]
pub struct SessionCache {
    cells: Mutex<HashMap<String, Arc<Mutex<Option<DepValue>>>>>,
}

fn unpoison<T>(result: Result<T, std::sync::PoisonError<T>>) -> T {
    result.unwrap_or_else(|e| e.into_inner())
}

impl SessionCache {
    fn cell(&self, name: &str) -> Arc<Mutex<Option<DepValue>>> {
        let mut cells = unpoison(self.cells.lock());
        cells.entry(name.to_string()).or_default().clone()
    }

    pub fn get(&self, name: &str) -> Option<DepValue> {
        let cell = self.cell(name);
        let slot = unpoison(cell.lock());
        slot.clone()
    }

    /// Insert a value directly (startup handlers).
    pub fn insert(&self, name: &str, value: DepValue) {
        let cell = self.cell(name);
        let mut slot = unpoison(cell.lock());
        *slot = Some(value);
    }

    /// Write-once evaluation: the per-key lock is held across `init`, so a
    /// provider never runs twice even under concurrent requests. A failed
    /// evaluation leaves the cell empty.
    pub fn get_or_try_init<F>(&self, name: &str, init: F) -> Result<DepValue, DependencyError>
    where
        F: FnOnce() -> Result<DepValue, DependencyError>,
    {
        let cell = self.cell(name);
        let mut slot = unpoison(cell.lock());
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = init()?;
        *slot = Some(value.clone());
        Ok(value)
    }
}

pub type IdHook = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Everything resolution needs from the application, borrowed per request.
pub struct ResolveEnv<'a> {
    pub registry: &'a DependencyRegistry,
    pub parsers: &'a [Arc<dyn Parser>],
    pub session: &'a SessionCache,
    pub request: &'a Request,
    pub request_id_hook: Option<&'a IdHook>,
    pub trace_id_hook: Option<&'a IdHook>,
}

/// Per-request resolution state: the request cache, the in-flight stack
/// used for cycle detection, and the shared response-header sink.
#[derive(Debug)]
pub struct RequestScope {
    values: HashMap<String, DepValue>,
    stack: Vec<String>,
    pub response_headers: SharedHeaders,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestScope {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            stack: vec![],
            response_headers: Arc::new(Mutex::new(HeaderMap::new())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DepValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: &str, value: DepValue) {
        self.values.insert(name.to_string(), value);
    }

    /// Record an exception for the `exception` reserved name.
    pub fn record_exception(&mut self, value: DepValue) {
        self.values.insert("exception".to_string(), value);
    }

    /// Headers providers asked to be merged into the outgoing response.
    pub fn take_response_headers(&self) -> HeaderMap {
        unpoison(self.response_headers.lock()).clone()
    }
}

/// Resolve a dependency by name. Implements the lookup order of the
/// container contract: reserved names, session cache, request cache,
/// registered provider.
pub fn resolve(
    env: &ResolveEnv,
    scope: &mut RequestScope,
    name: &str,
) -> Result<DepValue, DependencyError> {
    if let Some(value) = resolve_reserved(env, scope, name)? {
        return Ok(value);
    }
    // Cycle detection must run before the session lookup: a session
    // provider re-entering itself would block on its own in-progress cell.
    if scope.stack.iter().any(|n| n == name) {
        return Err(DependencyError::Cyclic(name.to_string()));
    }
    if let Some(value) = env.session.get(name) {
        return Ok(value);
    }
    if let Some(value) = scope.get(name) {
        return Ok(value.clone());
    }
    let provider = env
        .registry
        .get(name)
        .ok_or_else(|| DependencyError::Unresolved(name.to_string()))?;

    match provider.scope {
        Scope::Session => env.session.get_or_try_init(name, || {
            debug!("evaluating session provider '{}'", name);
            let deps = build_depmap(env, scope, provider)?;
            (provider.func)(&deps)
        }),
        Scope::Request => {
            debug!("evaluating request provider '{}'", name);
            let deps = build_depmap(env, scope, provider)?;
            let value = (provider.func)(&deps)?;
            scope.insert(name, value.clone());
            Ok(value)
        }
    }
}

fn build_depmap(
    env: &ResolveEnv,
    scope: &mut RequestScope,
    provider: &Provider,
) -> Result<DepMap, DependencyError> {
    scope.stack.push(provider.name.clone());
    let mut deps = DepMap::default();
    let mut result = Ok(());
    for dep in &provider.deps {
        match resolve(env, scope, dep) {
            Ok(value) => deps.insert(dep, value),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    scope.stack.pop();
    result.map(|_| deps)
}

/// Resolve a session-scoped provider outside any request (startup
/// handlers). Reserved names and request-scoped providers are unreachable
/// here by construction.
pub fn resolve_startup(
    registry: &DependencyRegistry,
    session: &SessionCache,
    name: &str,
    stack: &mut Vec<String>,
) -> Result<DepValue, DependencyError> {
    if stack.iter().any(|n| n == name) {
        return Err(DependencyError::Cyclic(name.to_string()));
    }
    if let Some(value) = session.get(name) {
        return Ok(value);
    }
    let provider = registry
        .get(name)
        .ok_or_else(|| DependencyError::Unresolved(name.to_string()))?;
    if provider.scope != Scope::Session {
        return Err(DependencyError::provider(&format!(
            "'{}' is request-scoped and cannot be used at startup",
            name
        )));
    }
    session.get_or_try_init(name, || {
        stack.push(name.to_string());
        let mut deps = DepMap::default();
        let mut result = Ok(());
        for dep in &provider.deps {
            match resolve_startup(registry, session, dep, stack) {
                Ok(value) => deps.insert(dep, value),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        stack.pop();
        result?;
        (provider.func)(&deps)
    })
}

fn map_to_json(map: &HashMap<String, String>) -> DepValue {
    DepValue::Json(Json::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Json::String(v.clone())))
            .collect(),
    ))
}

fn resolve_reserved(
    env: &ResolveEnv,
    scope: &mut RequestScope,
    name: &str,
) -> Result<Option<DepValue>, DependencyError> {
    // Parser-backed names (built-in and custom) are handled below; the
    // remaining reserved names are plain views of the request context.
    let value = match name {
        "request" => {
            if let Some(cached) = scope.get(name) {
                return Ok(Some(cached.clone()));
            }
            let value = DepValue::Request(Arc::new(env.request.clone()));
            scope.insert(name, value.clone());
            value
        }
        "path_params" => map_to_json(&env.request.path_params),
        "query_params" => map_to_json(&env.request.query_params),
        "request_headers" => {
            if let Some(cached) = scope.get(name) {
                return Ok(Some(cached.clone()));
            }
            let value = DepValue::Headers(Arc::new(Mutex::new(env.request.headers.clone())));
            scope.insert(name, value.clone());
            value
        }
        "response_headers" => DepValue::Headers(scope.response_headers.clone()),
        "exception" => scope.get(name).cloned().unwrap_or(DepValue::None),
        "request_id" => resolve_id(env, scope, "request_id", env.request_id_hook)?,
        "trace_id" => resolve_id(env, scope, "trace_id", env.trace_id_hook)?,
        "body" => {
            let value = match &env.request.body {
                Some(bytes) => DepValue::Bytes(bytes.clone()),
                None => DepValue::None,
            };
            scope.insert(name, value.clone());
            value
        }
        _ => {
            let parser = env
                .parsers
                .iter()
                .find(|p| p.dependency_name() == name)
                .cloned();
            match parser {
                Some(parser) => {
                    if let Some(cached) = scope.get(name) {
                        return Ok(Some(cached.clone()));
                    }
                    let value = parse_body(env, &*parser)?;
                    scope.insert(name, value.clone());
                    value
                }
                None => return Ok(None),
            }
        }
    };
    Ok(Some(value))
}

fn resolve_id(
    env: &ResolveEnv,
    scope: &mut RequestScope,
    name: &str,
    hook: Option<&IdHook>,
) -> Result<DepValue, DependencyError> {
    if let Some(cached) = scope.get(name) {
        return Ok(cached.clone());
    }
    let id = match hook {
        Some(hook) => hook(env.request),
        None => uuid::Uuid::new_v4().to_string(),
    };
    let value = DepValue::Text(id);
    scope.insert(name, value.clone());
    Ok(value)
}

/// Run a parser against the request body. The request's media type must
/// equal the parser's declared media type; a missing Content-Type is
/// treated as matching.
fn parse_body(env: &ResolveEnv, parser: &dyn Parser) -> Result<DepValue, DependencyError> {
    let content_type = env
        .request
        .content_type()
        .map_err(|_| DependencyError::UnsupportedMediaType(env.request.headers.get("content-type").map(String::from)))?;
    if let Some(ct) = &content_type {
        if ct.media_type() != parser.media_type() {
            return Err(DependencyError::UnsupportedMediaType(Some(ct.media_type())));
        }
    }
    let bytes = match &env.request.body {
        Some(bytes) => bytes,
        None => return Ok(DepValue::None),
    };
    let body = RawBody {
        bytes,
        content_type: content_type.as_ref(),
    };
    Ok(parser.parse(&body)?)
}
