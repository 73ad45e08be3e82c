//! Plain text and HTML content handling.
use crate::content::{json, ParseError, Parser, RawBody, RenderError, Renderer};
use crate::dependency::DepValue;
use crate::request::Request;

/// Identity parser for `text/plain`.
pub struct TextParser;

impl Parser for TextParser {
    fn media_type(&self) -> &str {
        "text/plain"
    }

    fn dependency_name(&self) -> &str {
        "text_body"
    }

    fn parse(&self, body: &RawBody) -> Result<DepValue, ParseError> {
        Ok(DepValue::Text(body.text()?))
    }
}

pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn media_type(&self) -> &str {
        "text/plain"
    }

    fn charset(&self) -> Option<&str> {
        Some("utf-8")
    }

    fn render(&self, value: &DepValue, _request: &Request) -> Result<Vec<u8>, RenderError> {
        let text = match value {
            DepValue::Text(s) => s.clone(),
            DepValue::Json(serde_json::Value::String(s)) => s.clone(),
            DepValue::Bytes(b) => return Ok(b.clone()),
            other => match json::value_to_json(other) {
                Some(j) => j.to_string(),
                None => {
                    return Err(RenderError::new(
                        "text/plain",
                        "value has no text representation",
                    ))
                }
            },
        };
        Ok(text.into_bytes())
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Renderer for `text/html`. Text values are assumed to already be markup
/// and pass through; structured values are escaped and wrapped.
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn media_type(&self) -> &str {
        "text/html"
    }

    fn charset(&self) -> Option<&str> {
        Some("utf-8")
    }

    fn render(&self, value: &DepValue, _request: &Request) -> Result<Vec<u8>, RenderError> {
        let html = match value {
            DepValue::Text(s) => s.clone(),
            other => match json::value_to_json(other) {
                Some(j) => format!(
                    "<pre>{}</pre>",
                    escape_html(&serde_json::to_string_pretty(&j).unwrap_or_default())
                ),
                None => {
                    return Err(RenderError::new(
                        "text/html",
                        "value has no HTML representation",
                    ))
                }
            },
        };
        Ok(html.into_bytes())
    }
}
