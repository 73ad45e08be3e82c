//! Strict JSON parsing and rendering with [`serde_json`](serde_json).
use serde_json::Value as Json;

use crate::content::{ParseError, Parser, RawBody, RenderError, Renderer};
use crate::dependency::DepValue;
use crate::request::{format_http_date, Request};

pub struct JsonParser;

impl Parser for JsonParser {
    fn media_type(&self) -> &str {
        "application/json"
    }

    fn dependency_name(&self) -> &str {
        "json_body"
    }

    fn parse(&self, body: &RawBody) -> Result<DepValue, ParseError> {
        let text = body.text()?;
        let value: Json = serde_json::from_str(&text)
            .map_err(|e| ParseError::malformed("application/json", &e.to_string()))?;
        Ok(DepValue::Json(value))
    }
}

/// Project a dependency value onto JSON, for rendering. Values with no
/// JSON counterpart (raw bytes, shared headers, responses) are refused.
pub fn value_to_json(value: &DepValue) -> Option<Json> {
    match value {
        DepValue::None => Some(Json::Null),
        DepValue::Bool(b) => Some(Json::Bool(*b)),
        DepValue::Int(i) => Some(Json::from(*i)),
        DepValue::Text(s) => Some(Json::String(s.clone())),
        DepValue::Time(t) => Some(Json::String(format_http_date(*t))),
        DepValue::Json(j) => Some(j.clone()),
        DepValue::Form(entries) => {
            let mut map = serde_json::Map::new();
            for (name, value) in entries {
                let value = Json::String(value.clone());
                match map.entry(name.clone()) {
                    serde_json::map::Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                    serde_json::map::Entry::Occupied(mut slot) => match slot.get_mut() {
                        Json::Array(values) => values.push(value),
                        existing => {
                            let first = existing.take();
                            *existing = Json::Array(vec![first, value]);
                        }
                    },
                }
            }
            Some(Json::Object(map))
        }
        DepValue::Bytes(_)
        | DepValue::Multipart(_)
        | DepValue::Headers(_)
        | DepValue::Request(_)
        | DepValue::Response(_) => None,
    }
}

pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn media_type(&self) -> &str {
        "application/json"
    }

    fn render(&self, value: &DepValue, _request: &Request) -> Result<Vec<u8>, RenderError> {
        let json = value_to_json(value).ok_or_else(|| {
            RenderError::new("application/json", "value has no JSON representation")
        })?;
        serde_json::to_vec(&json)
            .map_err(|e| RenderError::new("application/json", &e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn raw(bytes: &[u8]) -> RawBody<'_> {
        RawBody {
            bytes,
            content_type: None,
        }
    }

    #[test]
    fn test_parse_valid_json() {
        let value = JsonParser.parse(&raw(b"{\"a\": 1}")).unwrap();
        assert_eq!(value.as_json(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(JsonParser.parse(&raw(b"{not json")).is_err());
        assert!(JsonParser.parse(&raw(b"")).is_err());
    }

    #[test]
    fn test_render_json_value() {
        let body = JsonRenderer
            .render(&DepValue::Json(json!({"message": "Hello"})), &Request::default())
            .unwrap();
        assert_eq!(body, b"{\"message\":\"Hello\"}");
    }

    #[test]
    fn test_render_refuses_bytes() {
        let result = JsonRenderer.render(&DepValue::Bytes(vec![0xff]), &Request::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_form_projection_builds_multi_map() {
        let form = DepValue::Form(vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "3".to_string()),
        ]);
        assert_eq!(
            value_to_json(&form).unwrap(),
            json!({"a": ["1", "3"], "b": "2"})
        );
    }

    #[test]
    fn test_parse_render_round_trip_canonicalizes() {
        let input = b"{ \"b\" : 2, \"a\": [1, 2] }";
        let parsed = JsonParser.parse(&raw(input)).unwrap();
        let rendered = JsonRenderer.render(&parsed, &Request::default()).unwrap();
        let reparsed: Json = serde_json::from_slice(&rendered).unwrap();
        assert_eq!(reparsed, json!({"a": [1, 2], "b": 2}));
    }
}
