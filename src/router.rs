//! Path based route registry.
//!
//! Templates use `{name}` placeholders, each matching exactly one path
//! segment. Lookup returns the route and the captured parameters; a
//! secondary query answers which methods have routes for a path, which is
//! what tells a 404 apart from a 405.
use std::collections::HashMap;

use crate::dependency::{ProviderFn, StateSlot};
use crate::request::{Method, KNOWN_METHODS};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    fn from_str(s: &str) -> Self {
        match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => Self::Param(name.to_string()),
            None => Self::Literal(s.to_string()),
        }
    }

    fn matches(&self, s: &str) -> (bool, Option<(String, String)>) {
        match self {
            Self::Literal(p) => (s == &p[..], None),
            Self::Param(p) => (true, Some((p.clone(), s.to_string()))),
        }
    }
}

/// A renderer bound to a single route: a dependency provider whose output
/// becomes the response body when its media type wins negotiation. Its
/// declared deps may include the route's handler name, making the handler
/// return available to it.
#[derive(Clone)]
pub struct RouteRenderer {
    pub media_type: String,
    pub charset: Option<String>,
    pub deps: Vec<String>,
    pub func: ProviderFn,
}

/// One registered route. Immutable once the application is frozen.
#[derive(Clone)]
pub struct RouteEntry {
    pub method: Method,
    pub template: String,
    segments: Vec<Segment>,
    /// The handler's provider name; its return value is cached under this
    /// name so route-local renderers can depend on it.
    pub name: String,
    /// Declared handler dependency names; drives injection and callback
    /// pre-binding.
    pub deps: Vec<String>,
    pub handler: ProviderFn,
    /// State callbacks pre-bound from the handler's dependency names.
    pub state_callbacks: HashMap<StateSlot, String>,
    pub renderers: Vec<RouteRenderer>,
}

impl RouteEntry {
    pub fn new(method: Method, template: &str, name: &str, deps: &[&str], handler: ProviderFn) -> Self {
        Self {
            method,
            template: template.to_string(),
            segments: template.split('/').map(Segment::from_str).collect(),
            name: name.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            handler,
            state_callbacks: HashMap::new(),
            renderers: vec![],
        }
    }

    /// Match a path against the template, capturing placeholder segments.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            let (matches, param) = segment.matches(part);
            if !matches {
                return None;
            }
            if let Some((name, value)) = param {
                params.insert(name, value);
            }
        }
        Some(params)
    }

    fn answers(&self, method: Method) -> bool {
        // HEAD rides the GET pipeline when no explicit HEAD route exists.
        self.method == method || (method == Method::HEAD && self.method == Method::GET)
    }
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("template", &self.template)
            .field("name", &self.name)
            .field("deps", &self.deps)
            .finish()
    }
}

/// The route table. Registration order is the tie-break when several
/// templates match a path.
#[derive(Debug, Default, Clone)]
pub struct Router {
    routes: Vec<RouteEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: vec![] }
    }

    pub fn add(&mut self, route: RouteEntry) {
        self.routes.push(route);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RouteEntry> {
        self.routes.iter_mut()
    }

    /// Find the route answering `(method, path)` and its captured params.
    pub fn find(&self, method: Method, path: &str) -> Option<(&RouteEntry, HashMap<String, String>)> {
        self.find_index(method, path)
            .map(|(idx, params)| (&self.routes[idx], params))
    }

    /// As `find`, but returning the route's index into the table.
    pub fn find_index(&self, method: Method, path: &str) -> Option<(usize, HashMap<String, String>)> {
        for (idx, route) in self.routes.iter().enumerate() {
            if !route.answers(method) {
                continue;
            }
            if let Some(params) = route.matches(path) {
                return Some((idx, params));
            }
        }
        None
    }

    pub fn get(&self, idx: usize) -> &RouteEntry {
        &self.routes[idx]
    }

    /// Does any route match this path, under any method?
    pub fn path_has_routes(&self, path: &str) -> bool {
        self.routes.iter().any(|r| r.matches(path).is_some())
    }

    /// Methods with a route matching this path, in canonical order.
    /// A GET route implies HEAD.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        KNOWN_METHODS
            .iter()
            .copied()
            .filter(|&method| {
                self.routes
                    .iter()
                    .any(|r| r.answers(method) && r.matches(path).is_some())
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dependency::DepValue;
    use std::sync::Arc;

    fn route(method: Method, template: &str, name: &str) -> RouteEntry {
        RouteEntry::new(method, template, name, &[], Arc::new(|_| Ok(DepValue::None)))
    }

    #[test]
    fn test_literal_match() {
        let mut router = Router::new();
        router.add(route(Method::GET, "/hello", "hello"));
        let (found, params) = router.find(Method::GET, "/hello").unwrap();
        assert_eq!(found.name, "hello");
        assert!(params.is_empty());
        assert!(router.find(Method::GET, "/hello/x").is_none());
        assert!(router.find(Method::POST, "/hello").is_none());
    }

    #[test]
    fn test_placeholder_captures_one_segment() {
        let mut router = Router::new();
        router.add(route(Method::GET, "/users/{id}/posts/{post}", "user_post"));
        let (_, params) = router.find(Method::GET, "/users/42/posts/7").unwrap();
        assert_eq!(params["id"], "42");
        assert_eq!(params["post"], "7");
        assert!(router.find(Method::GET, "/users/42/posts").is_none());
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let mut router = Router::new();
        router.add(route(Method::GET, "/users/{id}", "by_param"));
        router.add(route(Method::GET, "/users/me", "literal"));
        let (found, _) = router.find(Method::GET, "/users/me").unwrap();
        assert_eq!(found.name, "by_param");
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let mut router = Router::new();
        router.add(route(Method::GET, "/doc", "doc"));
        assert!(router.find(Method::HEAD, "/doc").is_some());
        assert!(router.find(Method::PUT, "/doc").is_none());
    }

    #[test]
    fn test_allowed_methods() {
        let mut router = Router::new();
        router.add(route(Method::GET, "/x", "get_x"));
        router.add(route(Method::POST, "/x", "post_x"));
        let allowed = router.allowed_methods("/x");
        assert_eq!(allowed, vec![Method::GET, Method::HEAD, Method::POST]);
        assert!(router.path_has_routes("/x"));
        assert!(!router.path_has_routes("/y"));
    }
}
