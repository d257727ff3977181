//! Form validators. Each returns an empty map when the form is acceptable and
//! never fails; the `into_request` companions convert accepted forms into
//! typed requests.

use chrono::NaiveDate;
use shared::{
    domain::{looks_like_email, EnrollmentStatus, ProgramId},
    protocol::{CreateClientRequest, CreateEnrollmentRequest, CreateProgramRequest},
};

use crate::error::FieldErrors;

pub const PROGRAM_REQUIRED: &str = "Please select a program";
pub const ENROLLMENT_DATE_REQUIRED: &str = "Enrollment date is required";
pub const ENROLLMENT_DATE_INVALID: &str = "Enrollment date must be a valid date (YYYY-MM-DD)";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentDraft {
    pub program_id: String,
    pub enrollment_date: String,
    pub status: EnrollmentStatus,
}

impl EnrollmentDraft {
    pub fn new(program_id: impl Into<String>, enrollment_date: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            enrollment_date: enrollment_date.into(),
            status: EnrollmentStatus::default(),
        }
    }

    pub fn with_status(mut self, status: EnrollmentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn into_request(&self) -> Result<CreateEnrollmentRequest, FieldErrors> {
        let mut errors = FieldErrors::new();
        let program_id = required(&mut errors, "program_id", &self.program_id, PROGRAM_REQUIRED);
        let enrollment_date = date_field(
            &mut errors,
            "enrollment_date",
            &self.enrollment_date,
            ENROLLMENT_DATE_REQUIRED,
            ENROLLMENT_DATE_INVALID,
        );

        match (program_id, enrollment_date) {
            (Some(program_id), Some(enrollment_date)) if errors.is_empty() => {
                Ok(CreateEnrollmentRequest {
                    program_id: ProgramId::from(program_id),
                    enrollment_date,
                    status: self.status,
                })
            }
            _ => Err(errors),
        }
    }
}

pub fn validate_enrollment(draft: &EnrollmentDraft) -> FieldErrors {
    draft.into_request().err().unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDraft {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub contact_number: String,
    pub email: String,
    pub address: String,
}

impl ClientDraft {
    pub fn into_request(&self) -> Result<CreateClientRequest, FieldErrors> {
        let mut errors = FieldErrors::new();
        let first_name = required(
            &mut errors,
            "first_name",
            &self.first_name,
            "First name is required",
        );
        let last_name = required(
            &mut errors,
            "last_name",
            &self.last_name,
            "Last name is required",
        );
        let date_of_birth = date_field(
            &mut errors,
            "date_of_birth",
            &self.date_of_birth,
            "Date of birth is required",
            "Date of birth must be a valid date (YYYY-MM-DD)",
        );
        let gender = required(&mut errors, "gender", &self.gender, "Gender is required");
        let contact_number = required(
            &mut errors,
            "contact_number",
            &self.contact_number,
            "Contact number is required",
        );
        let email = optional(&self.email);
        if email.as_deref().is_some_and(|email| !looks_like_email(email)) {
            errors.insert("email".to_string(), "Email is invalid".to_string());
        }

        match (first_name, last_name, date_of_birth, gender, contact_number) {
            (Some(first_name), Some(last_name), Some(date_of_birth), Some(gender), Some(contact))
                if errors.is_empty() =>
            {
                Ok(CreateClientRequest {
                    first_name,
                    last_name,
                    date_of_birth,
                    gender,
                    contact_number: Some(contact),
                    email,
                    address: optional(&self.address),
                })
            }
            _ => Err(errors),
        }
    }
}

pub fn validate_client(draft: &ClientDraft) -> FieldErrors {
    draft.into_request().err().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDraft {
    pub name: String,
    pub description: String,
    pub active: bool,
}

impl Default for ProgramDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            active: true,
        }
    }
}

impl ProgramDraft {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            active: true,
        }
    }

    pub fn into_request(&self) -> Result<CreateProgramRequest, FieldErrors> {
        let mut errors = FieldErrors::new();
        let name = required(&mut errors, "name", &self.name, "Program name is required");
        let description = required(
            &mut errors,
            "description",
            &self.description,
            "Description is required",
        );

        match (name, description) {
            (Some(name), Some(description)) => Ok(CreateProgramRequest {
                name,
                description,
                active: self.active,
            }),
            _ => Err(errors),
        }
    }
}

pub fn validate_program(draft: &ProgramDraft) -> FieldErrors {
    draft.into_request().err().unwrap_or_default()
}

fn required(errors: &mut FieldErrors, field: &str, raw: &str, message: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        errors.insert(field.to_string(), message.to_string());
        return None;
    }
    Some(value.to_string())
}

fn optional(raw: &str) -> Option<String> {
    let value = raw.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn date_field(
    errors: &mut FieldErrors,
    field: &str,
    raw: &str,
    missing: &str,
    invalid: &str,
) -> Option<NaiveDate> {
    let value = required(errors, field, raw, missing)?;
    match parse_iso_date(&value) {
        Some(date) => Some(date),
        None => {
            errors.insert(field.to_string(), invalid.to_string());
            None
        }
    }
}

/// Strict `YYYY-MM-DD`; chrono alone would also accept unpadded months.
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
