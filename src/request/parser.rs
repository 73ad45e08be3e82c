//! HTTP/1.x wire parser producing core [`Request`](crate::request::Request)s.
//!
//! Reads one full request (start line, headers, whole body) from a stream
//! before the state machine ever runs, per the adapter contract. Paths are
//! percent-decoded for routing with the wire form kept for logging.
use std::collections::HashMap;
use std::io::prelude::*;
use std::str::FromStr;
use std::str::Utf8Error;

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::request::{HeaderMap, Method, Request};

const PARSER_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("error parsing request at position {position}: {reason}")]
pub struct WireParseError {
    position: usize,
    reason: String,
}

impl WireParseError {
    pub fn new(position: usize, reason: &str) -> Self {
        Self {
            position,
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for WireParseError {
    fn from(err: std::io::Error) -> Self {
        WireParseError::new(0, &err.to_string())
    }
}

impl From<Utf8Error> for WireParseError {
    fn from(err: Utf8Error) -> Self {
        WireParseError::new(0, &err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WireParseError>;

const WHITESPACE: &[u8] = b" \t";
const PATH: &[u8] =
    b"/ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~%!$&'()*+,;=:@";
const QUERY: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~%!$&'()*+,;=:@/?";
const FRAGMENT: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~%!$&'()*+,;=?/:@";

fn one_of(chars: &'static [u8]) -> impl Fn(u8) -> bool {
    move |c: u8| chars.contains(&c)
}

fn in_range(min: u8, max: u8) -> impl Fn(u8) -> bool {
    move |c: u8| (min..=max).contains(&c)
}

/// A deliberately small recursive-descent HTTP/1.x request parser.
pub struct RequestParser<R: Read> {
    buffer: [u8; PARSER_BUFFER_SIZE],
    buffer_position: usize,
    buffer_read_size: usize,
    peek: Option<u8>,
    stream_position: usize,
    eof: bool,
    stream: R,
}

impl<R: Read> RequestParser<R> {
    pub fn new(stream: R) -> Self {
        Self {
            peek: None,
            buffer: [0; PARSER_BUFFER_SIZE],
            stream,
            buffer_position: 0,
            buffer_read_size: 0,
            stream_position: 0,
            eof: false,
        }
    }

    fn error(&self, reason: &str) -> WireParseError {
        WireParseError::new(self.stream_position, reason)
    }

    /// Prepare for the next request on the same stream. Bytes already
    /// buffered past the previous request are kept.
    pub fn reset(&mut self) {
        self.eof = false;
    }

    /// The underlying stream, for writing a response back.
    pub fn stream_mut(&mut self) -> &mut R {
        &mut self.stream
    }

    fn read(&mut self) -> Result<()> {
        self.buffer_read_size = self.stream.read(&mut self.buffer)?;
        self.buffer_position = 0;
        Ok(())
    }

    /// Get the next byte and advance the peek. Caller must set `eof` before
    /// the final expected byte, otherwise this blocks on `read`.
    fn next(&mut self) -> Result<Option<u8>> {
        let curr = self.peek;
        if self.eof {
            self.peek = None;
            return Ok(curr);
        }
        if self.buffer_position == self.buffer_read_size {
            self.read()?;
        }
        if self.buffer_position == self.buffer_read_size {
            self.peek = None;
        } else {
            self.peek = Some(self.buffer[self.buffer_position]);
            self.buffer_position += 1;
            self.stream_position += 1;
        }
        Ok(curr)
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        let next = self.next()?;
        if next == Some(b) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn expects(&mut self, bs: &[u8]) -> Result<()> {
        for b in bs {
            self.expect(*b)?;
        }
        Ok(())
    }

    fn one<F>(&mut self, predicate: &F) -> Result<Vec<u8>>
    where
        F: Fn(u8) -> bool,
    {
        match self.peek {
            Some(peek) if predicate(peek) => Ok(vec![self.next()?.unwrap()]),
            _ => Err(self.error("unexpected character")),
        }
    }

    fn star<F>(&mut self, predicate: &F) -> Result<Vec<u8>>
    where
        F: Fn(u8) -> bool,
    {
        let mut out = vec![];
        while let Some(peek) = self.peek {
            if !predicate(peek) {
                break;
            }
            out.push(self.next()?.unwrap());
        }
        Ok(out)
    }

    fn plus<F>(&mut self, predicate: &F) -> Result<Vec<u8>>
    where
        F: Fn(u8) -> bool,
    {
        let mut out = self.one(predicate)?;
        out.append(&mut self.star(predicate)?);
        Ok(out)
    }

    fn crlf(&mut self) -> Result<()> {
        self.expects(b"\r\n")
    }

    fn until(&mut self, b: u8) -> Result<Vec<u8>> {
        let mut word: Vec<u8> = vec![];
        while self.peek != Some(b) {
            word.push(
                self.next()?
                    .ok_or_else(|| self.error("unexpected end of input"))?,
            )
        }
        Ok(word)
    }

    fn method(&mut self) -> Result<Method> {
        let method = self.plus(&in_range(b'A', b'Z'))?;
        let method = std::str::from_utf8(&method)?;
        Method::from_str(method).map_err(|_| self.error("invalid HTTP method"))
    }

    fn path(&mut self) -> Result<String> {
        if self.peek != Some(b'/') {
            return Err(self.error("expected path starting with /"));
        }
        let path = self.plus(&one_of(PATH))?;
        Ok(std::str::from_utf8(&path)?.to_string())
    }

    fn query(&mut self) -> Result<String> {
        if self.peek == Some(b'?') {
            self.expect(b'?')?;
            let query = self.star(&one_of(QUERY))?;
            Ok(std::str::from_utf8(&query)?.to_string())
        } else {
            Ok("".to_string())
        }
    }

    fn fragment(&mut self) -> Result<()> {
        // Fragments never reach a server in practice; parse and discard.
        if self.peek == Some(b'#') {
            self.expect(b'#')?;
            self.star(&one_of(FRAGMENT))?;
        }
        Ok(())
    }

    fn header(&mut self) -> Result<(String, String)> {
        let header = self.until(b':')?;
        self.expects(b":")?;
        self.star(&one_of(WHITESPACE))?;
        let value = self.until(b'\r')?;
        self.crlf()?;
        Ok((
            std::str::from_utf8(&header)?.to_string(),
            std::str::from_utf8(&value)?.to_string(),
        ))
    }

    fn headers(&mut self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        while self.peek != Some(b'\r') {
            let (name, value) = self.header()?;
            headers.append(&name, &value);
        }
        Ok(headers)
    }

    fn body(&mut self, content_length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![];
        for i in 0..content_length {
            if i == content_length - 1 {
                self.eof = true;
            }
            if let Some(b) = self.next()? {
                buf.push(b);
            } else {
                return Err(self.error(&format!("expected {} more bytes", content_length - i)));
            }
        }
        Ok(buf)
    }

    /// Parse the next HTTP request in the stream.
    pub fn parse(&mut self) -> Result<Request> {
        self.next()?;
        let method = self.method()?;
        self.plus(&one_of(WHITESPACE))?;
        let raw_path = self.path()?;
        let query = self.query()?;
        self.fragment()?;
        self.plus(&one_of(WHITESPACE))?;
        self.expects(b"HTTP/1.")?;
        self.one(&one_of(b"01"))?;
        self.crlf()?;
        let headers = self.headers()?;

        let content_length = match headers.get("content-length") {
            Some(cl_str) => str::parse::<usize>(cl_str)
                .map_err(|_| self.error("invalid content-length"))?,
            None => 0,
        };
        let body;
        if content_length == 0 {
            self.expect(b'\r')?;
            self.eof = true;
            self.expect(b'\n')?;
            body = None;
        } else {
            self.crlf()?;
            body = Some(self.body(content_length)?);
        }

        let path = percent_decode_str(&raw_path)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw_path.clone());
        Ok(Request {
            method,
            path,
            raw_path,
            headers,
            query_params: parse_query_params(&query),
            path_params: HashMap::new(),
            body,
        })
    }
}

/// Decode a query string into a map; repeated names keep the last value.
pub fn parse_query_params(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
        params.insert(name.into_owned(), value.into_owned());
    }
    params
}
