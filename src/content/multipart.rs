//! multipart/form-data bodies split into parts.
//!
//! Parts carry their headers and raw bytes; no streaming, the whole body is
//! already in memory by the time a parser runs.
use crate::content::{ParseError, Parser, RawBody};
use crate::dependency::{DepValue, Part};
use crate::request::HeaderMap;

pub struct MultipartParser;

impl Parser for MultipartParser {
    fn media_type(&self) -> &str {
        "multipart/form-data"
    }

    fn dependency_name(&self) -> &str {
        "multipart_body"
    }

    fn parse(&self, body: &RawBody) -> Result<DepValue, ParseError> {
        let boundary = body
            .content_type
            .and_then(|ct| ct.boundary.as_deref())
            .ok_or_else(|| {
                ParseError::malformed("multipart/form-data", "missing boundary parameter")
            })?;
        let parts = split_parts(body.bytes, boundary)?;
        Ok(DepValue::Multipart(parts))
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn split_parts(bytes: &[u8], boundary: &str) -> Result<Vec<Part>, ParseError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = vec![];
    let mut pos = find(bytes, &delimiter, 0)
        .ok_or_else(|| ParseError::malformed("multipart/form-data", "boundary not found"))?;

    loop {
        pos += delimiter.len();
        // Closing delimiter is "--boundary--".
        if bytes[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        // Skip the CRLF after the delimiter.
        if bytes[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
        let end = find(bytes, &delimiter, pos)
            .ok_or_else(|| ParseError::malformed("multipart/form-data", "unterminated part"))?;
        let raw_part = &bytes[pos..end];
        parts.push(parse_part(raw_part)?);
        pos = end;
    }
}

fn parse_part(raw: &[u8]) -> Result<Part, ParseError> {
    let header_end = find(raw, b"\r\n\r\n", 0)
        .ok_or_else(|| ParseError::malformed("multipart/form-data", "part without header block"))?;
    let header_text = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| ParseError::malformed("multipart/form-data", "non-text part headers"))?;
    let mut headers = HeaderMap::new();
    for line in header_text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            headers.append(name.trim(), value.trim());
        }
    }
    let mut body = raw[header_end + 4..].to_vec();
    // Part bodies are CRLF-terminated before the next delimiter.
    if body.ends_with(b"\r\n") {
        body.truncate(body.len() - 2);
    }
    Ok(Part { headers, body })
}
