use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Validation,
    Conflict,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Per-field messages for `Validation` errors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        let message = fields
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            code: ErrorCode::Validation,
            message,
            fields,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_joins_field_messages() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Program name is required".to_string());
        fields.insert(
            "description".to_string(),
            "Description is required".to_string(),
        );
        let err = ApiError::validation(fields);
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(
            err.message,
            "description: Description is required; name: Program name is required"
        );
    }

    #[test]
    fn fields_are_omitted_from_wire_when_empty() {
        let json = serde_json::to_value(ApiError::not_found("client not found")).expect("json");
        assert_eq!(
            json,
            serde_json::json!({ "code": "not_found", "message": "client not found" })
        );
    }
}
