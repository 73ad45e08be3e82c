//! HTTP server adapters.
use std::io;

use log::error;
use thiserror::Error;

pub mod stream;
pub mod tcp;

pub use stream::StreamServer;
pub use tcp::TcpServer;

#[derive(Debug, Error)]
#[error("server error: {message}")]
pub struct ServerError {
    message: String,
}

impl ServerError {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        ServerError::new(&format!("IOError({})", err))
    }
}

pub trait Server {
    /// Serve one request, must be implemented.
    fn serve_one(&mut self) -> Result<(), ServerError>;

    /// Serve requests forever (default implementation).
    fn serve_forever(&mut self) {
        loop {
            match self.serve_one() {
                Ok(()) => (),
                Err(e) => error!("{}", e),
            }
        }
    }
}
