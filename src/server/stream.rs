//! Generic IO stream HTTP server.
use std::io::prelude::*;
use std::sync::Arc;

use crate::app::App;
use crate::request::parser::RequestParser;
use crate::request::Method;
use crate::response::Response;
use crate::server::{Server, ServerError};
use crate::VERSION;

/// Serve HTTP requests over any `Read + Write` stream. The stream is not
/// closed between requests; the parser persists so pipelined requests
/// buffered ahead are not lost — handy for tests driving the application
/// through real request bytes.
///
/// # Example
/// ```
/// use webmach::app::Application;
/// use webmach::dependency::DepValue;
/// use webmach::io::ReadWriteAdapter;
/// use webmach::server::{Server, StreamServer};
///
/// let mut app = Application::new();
/// app.get("/hello", "hello", &[], |_| Ok(DepValue::Text("Hello!".to_string())));
/// let app = app.freeze().unwrap();
///
/// let read_buf = b"GET /hello HTTP/1.1\r\nHost: localhost\r\nAccept: text/plain\r\n\r\n";
/// let mut write_buf = vec![];
/// let stream = ReadWriteAdapter::new(&read_buf[..], &mut write_buf);
/// let mut server = StreamServer::new(stream, std::sync::Arc::new(app));
/// server.serve_one().unwrap();
///
/// let response = String::from_utf8(write_buf).unwrap();
/// assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(response.ends_with("Hello!"));
/// ```
pub struct StreamServer<S: Read> {
    app: Arc<App>,
    parser: RequestParser<S>,
}

impl<S: Read + Write> StreamServer<S> {
    pub fn new(stream: S, app: Arc<App>) -> Self {
        Self {
            app,
            parser: RequestParser::new(stream),
        }
    }
}

impl<S: Read + Write> Server for StreamServer<S> {
    fn serve_one(&mut self) -> Result<(), ServerError> {
        self.parser.reset();
        let (response, head_only) = match self.parser.parse() {
            Ok(request) => {
                let head_only = request.method == Method::HEAD;
                (self.app.execute(request), head_only)
            }
            Err(e) => (
                Response::json(400, &serde_json::json!({ "error": e.to_string() })),
                false,
            ),
        };
        let response = response
            .with_header("Server", &format!("webmach::StreamServer/{}", VERSION))
            .with_header("Connection", "keep-alive");
        let stream = self.parser.stream_mut();
        stream.write_all(&response.into_bytes(head_only))?;
        stream.flush()?;
        Ok(())
    }
}
