pub use crate::adapter::DirectClient;
pub use crate::app::{App, Application, BuildError};
pub use crate::content::{ParseError, Parser, RenderError, Renderer};
pub use crate::dependency::{
    DepMap, DepValue, DependencyError, Scope, SharedHeaders, StateSlot,
};
pub use crate::error::ErrorKind;
pub use crate::request::{HeaderMap, Method, Request};
pub use crate::response::Response;
pub use crate::server::Server;
pub use crate::validation::{ValidationError, ValidationIssue};
