use std::collections::BTreeMap;

use shared::{
    domain::EnrollmentId,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

/// Field name to user-facing message, ordered by field name.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("server responded {status}: {message}")]
    Http {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid server url {url}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("invalid input: {}", describe_fields(.0))]
    Validation(FieldErrors),
    #[error("{0}")]
    DuplicateEnrollment(String),
    #[error("failed to load enrollments: {0}")]
    Load(String),
    #[error("{0}")]
    Enroll(String),
    #[error("delete already in flight for enrollment {0}")]
    DeleteAlreadyPending(EnrollmentId),
    #[error("enrollment {0} is not in the current list")]
    UnknownEnrollment(EnrollmentId),
    #[error("enrolling requires a client-scoped synchronizer")]
    ScopeRequiresClient,
}

impl ClientError {
    /// Decoded server error. Validation bodies that name fields keep them.
    pub(crate) fn from_api(status: u16, err: ApiError) -> Self {
        if err.code == ErrorCode::Validation && !err.fields.is_empty() {
            return Self::Validation(err.fields);
        }
        Self::Http {
            status,
            code: Some(err.code),
            message: err.message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Http { status, code, .. } => {
                *status == 404 || matches!(code, Some(ErrorCode::NotFound))
            }
            _ => false,
        }
    }

    /// True for an active-enrollment conflict.
    ///
    /// Structured `conflict` codes are authoritative. Bodies without a code fall
    /// back to matching "already enrolled" or "duplicate" in the message.
    pub fn is_duplicate_enrollment(&self) -> bool {
        match self {
            Self::DuplicateEnrollment(_) => true,
            Self::Http {
                code: Some(code), ..
            } => *code == ErrorCode::Conflict,
            Self::Http {
                code: None,
                message,
                ..
            } => mentions_duplicate(message),
            _ => false,
        }
    }

    /// Message without the status prefix, for banners and dialogs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

fn mentions_duplicate(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("already enrolled") || lower.contains("duplicate")
}

pub(crate) fn describe_fields(fields: &FieldErrors) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, code: Option<ErrorCode>, message: &str) -> ClientError {
        ClientError::Http {
            status,
            code,
            message: message.to_string(),
        }
    }

    #[test]
    fn structured_conflict_is_a_duplicate() {
        assert!(http(409, Some(ErrorCode::Conflict), "nope").is_duplicate_enrollment());
        assert!(!http(400, Some(ErrorCode::Validation), "duplicate field").is_duplicate_enrollment());
    }

    #[test]
    fn unstructured_bodies_fall_back_to_message_matching() {
        assert!(http(400, None, "Client is Already Enrolled in program").is_duplicate_enrollment());
        assert!(http(500, None, "DUPLICATE key").is_duplicate_enrollment());
        assert!(!http(500, None, "database locked").is_duplicate_enrollment());
        assert!(!ClientError::Transport("duplicate".into()).is_duplicate_enrollment());
    }

    #[test]
    fn not_found_matches_status_or_code() {
        assert!(http(404, None, "Not Found").is_not_found());
        assert!(http(410, Some(ErrorCode::NotFound), "gone").is_not_found());
        assert!(!http(500, None, "boom").is_not_found());
    }

    #[test]
    fn validation_bodies_keep_their_fields() {
        let mut fields = FieldErrors::new();
        fields.insert("contact_number".into(), "Contact number is required".into());
        assert_eq!(
            ClientError::from_api(400, ApiError::validation(fields.clone())),
            ClientError::Validation(fields)
        );

        let bare = ClientError::from_api(400, ApiError::new(ErrorCode::Validation, "bad input"));
        assert_eq!(bare, http(400, Some(ErrorCode::Validation), "bad input"));
    }

    #[test]
    fn validation_display_lists_fields_in_order() {
        let mut fields = FieldErrors::new();
        fields.insert("program_id".into(), "Please select a program".into());
        fields.insert("enrollment_date".into(), "Enrollment date is required".into());
        assert_eq!(
            ClientError::Validation(fields).to_string(),
            "invalid input: enrollment_date: Enrollment date is required; program_id: Please select a program"
        );
    }
}
