use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{ClientId, EnrollmentId, EnrollmentStatus, ProgramId};

pub const API_BASE_PATH: &str = "/api/v1";

pub fn programs_route() -> &'static str {
    "/programs"
}

pub fn program_route(program_id: &ProgramId) -> String {
    format!("/programs/{program_id}")
}

pub fn clients_route() -> &'static str {
    "/clients"
}

pub fn client_search_route() -> &'static str {
    "/clients/search"
}

pub fn client_route(client_id: &ClientId) -> String {
    format!("/clients/{client_id}")
}

pub fn client_enrollments_route(client_id: &ClientId) -> String {
    format!("/clients/{client_id}/enrollments")
}

pub fn enrollments_route() -> &'static str {
    "/enrollments"
}

pub fn enrollment_route(enrollment_id: &EnrollmentId) -> String {
    format!("/enrollments/{enrollment_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProgramRequest {
    pub name: String,
    pub description: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateClientRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Body of `POST /clients/:id/enrollments`. The client comes from the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEnrollmentRequest {
    pub program_id: ProgramId,
    pub enrollment_date: NaiveDate,
    #[serde(default)]
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEnrollmentRequest {
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSearchQuery {
    #[serde(default)]
    pub q: String,
}
