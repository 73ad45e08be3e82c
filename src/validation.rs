//! Validated domain models and machine-readable failure details.
//!
//! A validation provider either returns a value or fails with a
//! [`ValidationError`]; the state machine turns the failure into a
//! `422 Unprocessable Entity` whose body carries the issue list.
use serde::Serialize;
use serde_json::Value as Json;
use thiserror::Error;

/// One entry of a validation failure: what went wrong, where, and
/// optionally an echo of the offending input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Json>,
}

impl ValidationIssue {
    pub fn new(kind: &str, loc: &[&str], msg: &str) -> Self {
        Self {
            kind: kind.to_string(),
            loc: loc.iter().map(|s| s.to_string()).collect(),
            msg: msg.to_string(),
            input: None,
        }
    }

    pub fn with_input(mut self, input: Json) -> Self {
        self.input = Some(input);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub details: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            details: vec![],
        }
    }

    pub fn with_issue(mut self, issue: ValidationIssue) -> Self {
        self.details.push(issue);
        self
    }

    /// The conventional failure used when field checks are collected.
    pub fn failed(details: Vec<ValidationIssue>) -> Self {
        Self {
            message: "Validation failed".to_string(),
            details,
        }
    }
}

/// A validated domain model: constructed from untyped JSON or not at all.
pub trait Validate: Sized {
    fn validate(value: &Json) -> Result<Self, ValidationError>;
}

/// Field-level checks shared by validation providers. Each check returns
/// the extracted value or the issue describing its absence/shape problem,
/// so a validator can collect every failure before giving up.
pub mod checks {
    use super::*;

    fn field<'a>(body: &'a Json, name: &str) -> Option<&'a Json> {
        body.get(name)
    }

    fn missing(name: &str) -> ValidationIssue {
        ValidationIssue::new("missing", &[name], "Field required")
    }

    pub fn non_empty_string(body: &Json, name: &str) -> Result<String, ValidationIssue> {
        match field(body, name) {
            None | Some(Json::Null) => Err(missing(name)),
            Some(Json::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Json::String(s)) => Err(ValidationIssue::new(
                "string_too_short",
                &[name],
                "String should have at least 1 character",
            )
            .with_input(Json::String(s.clone()))),
            Some(other) => Err(ValidationIssue::new(
                "string_type",
                &[name],
                "Input should be a valid string",
            )
            .with_input(other.clone())),
        }
    }

    pub fn email(body: &Json, name: &str) -> Result<String, ValidationIssue> {
        let value = non_empty_string(body, name)?;
        let bad = || {
            ValidationIssue::new(
                "value_error",
                &[name],
                "value is not a valid email address",
            )
            .with_input(Json::String(value.clone()))
        };
        let (local, domain) = value.split_once('@').ok_or_else(bad)?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(bad());
        }
        let (host, tld) = domain.rsplit_once('.').ok_or_else(bad)?;
        if host.is_empty() || tld.is_empty() {
            return Err(bad());
        }
        Ok(value)
    }

    pub fn int_in_range(
        body: &Json,
        name: &str,
        min: i64,
        max: i64,
    ) -> Result<i64, ValidationIssue> {
        let value = match field(body, name) {
            None | Some(Json::Null) => return Err(missing(name)),
            Some(Json::Number(n)) => match n.as_i64() {
                Some(i) => i,
                None => {
                    return Err(ValidationIssue::new(
                        "int_type",
                        &[name],
                        "Input should be a valid integer",
                    )
                    .with_input(Json::Number(n.clone())))
                }
            },
            Some(other) => {
                return Err(ValidationIssue::new(
                    "int_type",
                    &[name],
                    "Input should be a valid integer",
                )
                .with_input(other.clone()))
            }
        };
        if value < min || value > max {
            return Err(ValidationIssue::new(
                "out_of_range",
                &[name],
                &format!("Input should be between {} and {}", min, max),
            )
            .with_input(Json::from(value)));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::checks;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_serialization_uses_type_key() {
        let issue = ValidationIssue::new("missing", &["name"], "Field required");
        let serialized = serde_json::to_value(&issue).unwrap();
        assert_eq!(serialized["type"], "missing");
        assert_eq!(serialized["loc"], json!(["name"]));
        assert!(serialized.get("input").is_none());
    }

    #[test]
    fn test_collecting_field_failures() {
        let body = json!({"name": "", "email": "x", "age": -1});
        let mut details = vec![];
        for result in [
            checks::non_empty_string(&body, "name").map(|_| ()),
            checks::email(&body, "email").map(|_| ()),
            checks::int_in_range(&body, "age", 0, 150).map(|_| ()),
        ] {
            if let Err(issue) = result {
                details.push(issue);
            }
        }
        let error = ValidationError::failed(details);
        assert_eq!(error.message, "Validation failed");
        assert_eq!(error.details.len(), 3);
        let locs: Vec<_> = error.details.iter().map(|d| d.loc[0].as_str()).collect();
        assert_eq!(locs, vec!["name", "email", "age"]);
    }

    #[test]
    fn test_email_check() {
        assert!(checks::email(&json!({"email": "a@b.co"}), "email").is_ok());
        assert!(checks::email(&json!({"email": "a@b"}), "email").is_err());
        assert!(checks::email(&json!({"email": "@b.co"}), "email").is_err());
        assert!(checks::email(&json!({"email": "a@b."}), "email").is_err());
    }

    #[test]
    fn test_int_range_check() {
        let body = json!({"age": 151});
        let issue = checks::int_in_range(&body, "age", 0, 150).unwrap_err();
        assert_eq!(issue.kind, "out_of_range");
        assert_eq!(issue.input, Some(json!(151)));
    }

    #[test]
    fn test_validate_trait() {
        struct Username(String);
        impl Validate for Username {
            fn validate(value: &Json) -> Result<Self, ValidationError> {
                checks::non_empty_string(value, "username")
                    .map(Username)
                    .map_err(|issue| ValidationError::failed(vec![issue]))
            }
        }
        assert!(Username::validate(&json!({"username": "ada"})).is_ok());
        assert!(Username::validate(&json!({})).is_err());
    }
}
