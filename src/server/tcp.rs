//! TCP HTTP server.
use std::io::prelude::*;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::*;

use crate::app::App;
use crate::request::parser::RequestParser;
use crate::request::Method;
use crate::response::Response;
use crate::runner::Runner;
use crate::server::{Server, ServerError};
use crate::VERSION;

/// A single or multi-threaded TCP server driving the application.
pub struct TcpServer {
    listener: TcpListener,
    runner: Runner,
    app: Arc<App>,
    timeout: Option<Duration>,
}

impl TcpServer {
    /// Create a new TCP server.
    ///
    /// # Arguments
    /// * `bind_addr`: Address to listen on, such as "0.0.0.0:8080"
    /// * `n_threads`: Number of threads.
    ///   - 0: create a new thread for each request (not recommended)
    ///   - 1: single-threaded
    ///   - 2+: threadpool with n threads
    /// * `timeout`: network socket timeout
    /// * `app`: the frozen application
    pub fn new(
        bind_addr: &str,
        n_threads: usize,
        timeout: Option<Duration>,
        app: App,
    ) -> Result<Self, std::io::Error> {
        Ok(Self {
            listener: TcpListener::bind(bind_addr)?,
            runner: Runner::new(n_threads),
            timeout,
            app: Arc::new(app),
        })
    }
}

impl Server for TcpServer {
    fn serve_one(&mut self) -> Result<(), ServerError> {
        let (mut stream, addr) = self.listener.accept()?;
        debug!("accepted connection from {:?}", addr);
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        let app = self.app.clone();
        self.runner.run(move || {
            let start = Instant::now();
            debug!("parsing request");
            let mut parser = RequestParser::new(&mut stream);
            let response;
            let mut head_only = false;
            let path;
            let method;
            let content_length;
            match parser.parse() {
                Ok(request) => {
                    trace!("REQUEST {:?}", &request);
                    content_length = request.body.as_ref().map(|b| b.len()).unwrap_or(0);
                    path = request.raw_path.clone();
                    method = request.method.to_string();
                    head_only = request.method == Method::HEAD;
                    debug!("running state machine");
                    response = app.execute(request);
                }
                Err(e) => {
                    error!("{}", e);
                    response = Response::json(400, &serde_json::json!({ "error": e.to_string() }));
                    path = "<none>".to_string();
                    method = "<none>".to_string();
                    content_length = 0;
                }
            };
            let response = response
                .with_header("Server", &format!("webmach::TcpServer/{}", VERSION))
                .with_header("Connection", "closed");
            trace!("RESPONSE {:?}", &response);
            info!(
                "{:?} - {}ms - {} {} {} ({} bytes) -> {} {} ({} bytes)",
                std::thread::current().id(),
                start.elapsed().as_millis(),
                addr,
                method,
                path,
                content_length,
                response.status_code,
                &response.status,
                response.content_length(),
            );
            debug!("writing response");
            match stream.write_all(&response.into_bytes(head_only)) {
                Ok(_) => (),
                Err(e) => error!("IO error: {}", e),
            }
        });
        Ok(())
    }
}
