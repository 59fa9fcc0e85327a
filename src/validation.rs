use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use validator::{Validate, ValidationError};

use crate::engine::{DEFAULT_MAX_LENGTH, DEFAULT_TEMPERATURE};
use crate::error::{GateError, Result};

pub const MAX_PROMPT_CHARS: u64 = 8000;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-\.@]+$").expect("static pattern compiles"))
}

fn validate_identifier(value: &str) -> std::result::Result<(), ValidationError> {
    if identifier_pattern().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("identifier"))
    }
}

fn validate_scopes(scopes: &BTreeSet<String>) -> std::result::Result<(), ValidationError> {
    if scopes.iter().all(|s| s == "*" || identifier_pattern().is_match(s)) {
        Ok(())
    } else {
        Err(ValidationError::new("scope"))
    }
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = MAX_PROMPT_CHARS))]
    pub prompt: String,
    #[validate(range(min = 1, max = 1024))]
    pub max_length: Option<u32>,
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn max_length(&self) -> u32 {
        self.max_length.unwrap_or(DEFAULT_MAX_LENGTH)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Body of `POST /api/admin/keys`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IssueKeyRequest {
    #[validate(length(min = 1, max = 64), custom(function = "validate_identifier"))]
    pub owner: String,
    #[validate(range(min = 1, max = 100000))]
    pub rate_limit: u32,
    #[serde(default)]
    #[validate(custom(function = "validate_scopes"))]
    pub scopes: BTreeSet<String>,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate_generate(request: &GenerateRequest) -> Result<()> {
        request.validate()?;
        if request.prompt.trim().is_empty() {
            return Err(GateError::Validation("prompt cannot be blank".to_string()));
        }
        Ok(())
    }

    pub fn validate_issue(request: &IssueKeyRequest) -> Result<()> {
        request.validate()?;
        Ok(())
    }

    /// Checks one `key:owner` pair from the configured credential list.
    pub fn validate_credential_entry(key: &str, owner: &str) -> Result<()> {
        if key.is_empty() || owner.is_empty() {
            return Err(GateError::Validation("key and owner cannot be empty".to_string()));
        }
        if !identifier_pattern().is_match(key) {
            return Err(GateError::Validation(
                "key can only contain alphanumerics and - _ . @".to_string(),
            ));
        }
        if !identifier_pattern().is_match(owner) {
            return Err(GateError::Validation("owner contains invalid characters".to_string()));
        }
        Ok(())
    }

    /// Parses a task id path segment.
    pub fn validate_task_id(raw: &str) -> Result<uuid::Uuid> {
        uuid::Uuid::parse_str(raw.trim())
            .map_err(|_| GateError::Validation(format!("'{}' is not a valid task id", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(prompt: &str, max_length: Option<u32>, temperature: Option<f32>) -> GenerateRequest {
        GenerateRequest {
            prompt: prompt.to_string(),
            max_length,
            temperature,
        }
    }

    #[test]
    fn test_validate_generate_request() {
        let request = generate("fn main() {}", Some(50), Some(0.2));
        assert!(RequestValidator::validate_generate(&request).is_ok());
        assert_eq!(request.max_length(), 50);

        let defaults = generate("x", None, None);
        assert!(RequestValidator::validate_generate(&defaults).is_ok());
        assert_eq!(defaults.max_length(), DEFAULT_MAX_LENGTH);
        assert_eq!(defaults.temperature(), DEFAULT_TEMPERATURE);
    }

    #[test]
    fn test_invalid_generate_request() {
        assert!(RequestValidator::validate_generate(&generate("", None, None)).is_err());
        assert!(RequestValidator::validate_generate(&generate("   ", None, None)).is_err());
        assert!(RequestValidator::validate_generate(&generate("x", Some(0), None)).is_err());
        assert!(RequestValidator::validate_generate(&generate("x", Some(5000), None)).is_err());
        assert!(RequestValidator::validate_generate(&generate("x", None, Some(3.5))).is_err());

        let longest = "x".repeat(MAX_PROMPT_CHARS as usize);
        assert!(RequestValidator::validate_generate(&generate(&longest, None, None)).is_ok());

        let long = "a".repeat(MAX_PROMPT_CHARS as usize + 1);
        let err = RequestValidator::validate_generate(&generate(&long, None, None)).unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));
    }

    #[test]
    fn test_validate_issue_request() {
        let request: IssueKeyRequest =
            serde_json::from_str(r#"{"owner": "ci-bot", "rate_limit": 30}"#).unwrap();
        assert!(request.scopes.is_empty());
        assert!(RequestValidator::validate_issue(&request).is_ok());

        let bad_owner: IssueKeyRequest =
            serde_json::from_str(r#"{"owner": "ci bot!", "rate_limit": 30}"#).unwrap();
        assert!(RequestValidator::validate_issue(&bad_owner).is_err());

        let bad_limit: IssueKeyRequest =
            serde_json::from_str(r#"{"owner": "ci", "rate_limit": 0}"#).unwrap();
        assert!(RequestValidator::validate_issue(&bad_limit).is_err());

        let bad_scope: IssueKeyRequest =
            serde_json::from_str(r#"{"owner": "ci", "rate_limit": 5, "scopes": ["gen erate"]}"#).unwrap();
        assert!(RequestValidator::validate_issue(&bad_scope).is_err());
    }

    #[test]
    fn test_credential_entry_format() {
        assert!(RequestValidator::validate_credential_entry("abc-123", "alice").is_ok());
        assert!(RequestValidator::validate_credential_entry("bad key", "alice").is_err());
        assert!(RequestValidator::validate_credential_entry("abc", "").is_err());
    }

    #[test]
    fn test_task_id_parsing() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(RequestValidator::validate_task_id(&id.to_string()).unwrap(), id);
        assert!(RequestValidator::validate_task_id("not-a-uuid").is_err());
    }
}
