//! URL-encoded form bodies, parsed with [`form_urlencoded`](form_urlencoded).
use crate::content::{ParseError, Parser, RawBody};
use crate::dependency::DepValue;

/// Parser for `application/x-www-form-urlencoded`. Syntax never fails:
/// whatever decodes becomes entries of a multi-map preserving order and
/// repeats.
pub struct FormParser;

impl Parser for FormParser {
    fn media_type(&self) -> &str {
        "application/x-www-form-urlencoded"
    }

    fn dependency_name(&self) -> &str {
        "form_body"
    }

    fn parse(&self, body: &RawBody) -> Result<DepValue, ParseError> {
        let text = body.text()?;
        let entries: Vec<(String, String)> = form_urlencoded::parse(text.as_bytes())
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        Ok(DepValue::Form(entries))
    }
}
