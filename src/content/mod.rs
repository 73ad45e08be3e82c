//! Content-Type based request parsing and Accept based response rendering.
use thiserror::Error;

use crate::dependency::DepValue;
use crate::request::{Accept, ContentType, Request};

pub mod form;
pub mod json;
pub mod multipart;
pub mod text;

pub use form::FormParser;
pub use json::{JsonParser, JsonRenderer};
pub use multipart::MultipartParser;
pub use text::{HtmlRenderer, TextParser, TextRenderer};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("cannot decode body as {charset}: {reason}")]
    Decode { charset: String, reason: String },
    #[error("malformed {media_type} body: {reason}")]
    Malformed { media_type: String, reason: String },
}

impl ParseError {
    pub fn malformed(media_type: &str, reason: &str) -> Self {
        Self::Malformed {
            media_type: media_type.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot render value as {media_type}: {reason}")]
pub struct RenderError {
    pub media_type: String,
    pub reason: String,
}

impl RenderError {
    pub fn new(media_type: &str, reason: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Decode body bytes to text per the Content-Type charset rules: an
/// explicit `utf-8` is strict, `iso-8859-1` always succeeds, and with no
/// declared charset UTF-8 is tried first with a Latin-1 fallback.
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> Result<String, ParseError> {
    fn latin1(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| b as char).collect()
    }
    match charset {
        Some("utf-8") | Some("utf8") => {
            String::from_utf8(bytes.to_vec()).map_err(|e| ParseError::Decode {
                charset: "utf-8".to_string(),
                reason: e.to_string(),
            })
        }
        Some("iso-8859-1") | Some("latin-1") | Some("latin1") => Ok(latin1(bytes)),
        Some(other) => Err(ParseError::Decode {
            charset: other.to_string(),
            reason: "unsupported charset".to_string(),
        }),
        None => Ok(String::from_utf8(bytes.to_vec()).unwrap_or_else(|e| latin1(e.as_bytes()))),
    }
}

/// A request body handed to a parser: raw bytes plus the parsed
/// Content-Type (for charset and boundary parameters).
pub struct RawBody<'a> {
    pub bytes: &'a [u8],
    pub content_type: Option<&'a ContentType>,
}

impl<'a> RawBody<'a> {
    /// The body decoded to text per the charset rules.
    pub fn text(&self) -> Result<String, ParseError> {
        let charset = self.content_type.and_then(|ct| ct.charset.as_deref());
        decode_text(self.bytes, charset)
    }
}

/// A request-side content parser, selected by Content-Type.
///
/// `dependency_name` is the reserved name that engages this parser
/// (`json_body`, `form_body`, ... for the built-ins; anything for custom
/// vendor parsers).
pub trait Parser: Send + Sync {
    fn media_type(&self) -> &str;
    fn dependency_name(&self) -> &str;
    fn parse(&self, body: &RawBody) -> Result<DepValue, ParseError>;
}

/// A response-side renderer, selected by Accept.
pub trait Renderer: Send + Sync {
    fn media_type(&self) -> &str;
    fn charset(&self) -> Option<&str> {
        None
    }
    fn render(&self, value: &DepValue, request: &Request) -> Result<Vec<u8>, RenderError>;

    /// Whether this renderer is acceptable under the given Accept header.
    fn can_render(&self, accept: &Accept) -> bool {
        matches!(accept.quality_for(self.media_type()), Some(q) if q > 0.0)
    }

    /// The Content-Type value this renderer produces.
    fn content_type(&self) -> String {
        match self.charset() {
            Some(charset) => format!("{}; charset={}", self.media_type(), charset),
            None => self.media_type().to_string(),
        }
    }
}

/// Pick the best candidate media type for an Accept header.
///
/// `candidates` are `(key, media_type)` pairs in priority order (route-local
/// renderers ahead of global ones, each in registration order). The winner
/// is the candidate with the highest quality; ties go to the earlier
/// candidate.
pub fn negotiate<K: Copy>(
    accept: &Accept,
    candidates: impl Iterator<Item = (K, String)>,
) -> Option<K> {
    let mut best: Option<(K, f32)> = None;
    for (key, media_type) in candidates {
        if let Some(q) = accept.quality_for(&media_type) {
            if q <= 0.0 {
                continue;
            }
            match best {
                Some((_, best_q)) if best_q >= q => (),
                _ => best = Some((key, q)),
            }
        }
    }
    best.map(|(key, _)| key)
}
