use std::{collections::BTreeMap, sync::Arc};

use chrono::NaiveDate;
use shared::{
    domain::{
        looks_like_email, Client, ClientId, Enrollment, EnrollmentId, HealthProgram, ProgramId,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        CreateClientRequest, CreateEnrollmentRequest, CreateProgramRequest,
        UpdateEnrollmentRequest,
    },
};
use storage::{EnrollmentWrite, RegistryRepository};
use tracing::info;

pub const DUPLICATE_ENROLLMENT_MESSAGE: &str =
    "client is already enrolled in this program with an active enrollment";

#[derive(Clone)]
pub struct ApiContext {
    pub repository: Arc<dyn RegistryRepository>,
}

impl ApiContext {
    pub fn new(repository: Arc<dyn RegistryRepository>) -> Self {
        Self { repository }
    }
}

pub async fn health(ctx: &ApiContext) -> Result<(), ApiError> {
    ctx.repository.health_check().await.map_err(internal)
}

pub async fn list_programs(ctx: &ApiContext) -> Result<Vec<HealthProgram>, ApiError> {
    ctx.repository.list_programs().await.map_err(internal)
}

pub async fn get_program(
    ctx: &ApiContext,
    program_id: &ProgramId,
) -> Result<HealthProgram, ApiError> {
    ctx.repository
        .get_program(program_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("program not found"))
}

pub async fn create_program(
    ctx: &ApiContext,
    request: CreateProgramRequest,
) -> Result<HealthProgram, ApiError> {
    let mut fields = BTreeMap::new();
    require(&mut fields, "name", &request.name, "Program name is required");
    require(
        &mut fields,
        "description",
        &request.description,
        "Description is required",
    );
    if !fields.is_empty() {
        return Err(ApiError::validation(fields));
    }

    let program = ctx
        .repository
        .insert_program(&request)
        .await
        .map_err(internal)?;
    info!(program_id = %program.id, name = %program.name, "program created");
    Ok(program)
}

pub async fn list_clients(ctx: &ApiContext) -> Result<Vec<Client>, ApiError> {
    ctx.repository.list_clients().await.map_err(internal)
}

pub async fn search_clients(ctx: &ApiContext, query: &str) -> Result<Vec<Client>, ApiError> {
    ctx.repository.search_clients(query).await.map_err(internal)
}

pub async fn get_client(ctx: &ApiContext, client_id: &ClientId) -> Result<Client, ApiError> {
    ctx.repository
        .get_client(client_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("client not found"))
}

pub async fn create_client(
    ctx: &ApiContext,
    request: CreateClientRequest,
) -> Result<Client, ApiError> {
    let mut fields = BTreeMap::new();
    require(
        &mut fields,
        "first_name",
        &request.first_name,
        "First name is required",
    );
    require(
        &mut fields,
        "last_name",
        &request.last_name,
        "Last name is required",
    );
    require(&mut fields, "gender", &request.gender, "Gender is required");
    require(
        &mut fields,
        "contact_number",
        request.contact_number.as_deref().unwrap_or_default(),
        "Contact number is required",
    );
    if let Some(email) = request.email.as_deref().map(str::trim) {
        if !email.is_empty() && !looks_like_email(email) {
            fields.insert("email".to_string(), "Email is invalid".to_string());
        }
    }
    if !fields.is_empty() {
        return Err(ApiError::validation(fields));
    }

    let client = ctx
        .repository
        .insert_client(&request)
        .await
        .map_err(internal)?;
    info!(client_id = %client.id, "client registered");
    Ok(client)
}

pub async fn list_enrollments(ctx: &ApiContext) -> Result<Vec<Enrollment>, ApiError> {
    ctx.repository.list_enrollments().await.map_err(internal)
}

pub async fn list_client_enrollments(
    ctx: &ApiContext,
    client_id: &ClientId,
) -> Result<Vec<Enrollment>, ApiError> {
    ensure_client_exists(ctx, client_id).await?;
    ctx.repository
        .list_enrollments_for_client(client_id)
        .await
        .map_err(internal)
}

pub async fn create_enrollment(
    ctx: &ApiContext,
    client_id: &ClientId,
    request: CreateEnrollmentRequest,
) -> Result<Enrollment, ApiError> {
    if request.program_id.as_str().trim().is_empty() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "program_id".to_string(),
            "Please select a program".to_string(),
        );
        return Err(ApiError::validation(fields));
    }
    ensure_client_exists(ctx, client_id).await?;
    get_program(ctx, &request.program_id).await?;

    match ctx
        .repository
        .insert_enrollment(client_id, &request)
        .await
        .map_err(internal)?
    {
        EnrollmentWrite::Stored(enrollment) => {
            info!(
                enrollment_id = %enrollment.id,
                %client_id,
                program_id = %enrollment.program_id,
                status = %enrollment.status,
                "client enrolled"
            );
            Ok(enrollment)
        }
        EnrollmentWrite::DuplicateActive => Err(duplicate_enrollment()),
        EnrollmentWrite::NotFound => Err(ApiError::not_found("client or program not found")),
    }
}

pub async fn update_enrollment(
    ctx: &ApiContext,
    enrollment_id: &EnrollmentId,
    request: UpdateEnrollmentRequest,
) -> Result<Enrollment, ApiError> {
    match ctx
        .repository
        .update_enrollment_status(enrollment_id, request.status)
        .await
        .map_err(internal)?
    {
        EnrollmentWrite::Stored(enrollment) => {
            info!(%enrollment_id, status = %enrollment.status, "enrollment updated");
            Ok(enrollment)
        }
        EnrollmentWrite::DuplicateActive => Err(duplicate_enrollment()),
        EnrollmentWrite::NotFound => Err(ApiError::not_found("enrollment not found")),
    }
}

pub async fn delete_enrollment(
    ctx: &ApiContext,
    enrollment_id: &EnrollmentId,
) -> Result<(), ApiError> {
    let deleted = ctx
        .repository
        .delete_enrollment(enrollment_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("enrollment not found"));
    }
    info!(%enrollment_id, "enrollment deleted");
    Ok(())
}

/// Seeds the demo registry (two clients, two programs) into an empty store.
/// Returns `false` without writing when programs already exist.
pub async fn seed_demo_data(ctx: &ApiContext) -> Result<bool, ApiError> {
    if !list_programs(ctx).await?.is_empty() {
        return Ok(false);
    }

    for (name, description) in [
        ("TB Program", "Tuberculosis treatment and prevention"),
        ("Malaria Control", "Malaria prevention and treatment"),
    ] {
        create_program(
            ctx,
            CreateProgramRequest {
                name: name.to_string(),
                description: description.to_string(),
                active: true,
            },
        )
        .await?;
    }

    for (first_name, last_name, (year, month, day), gender, contact_number) in [
        ("John", "Doe", (1990, 1, 1), "Male", "0700000001"),
        ("Jane", "Smith", (1992, 5, 15), "Female", "0700000002"),
    ] {
        let date_of_birth = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| ApiError::new(ErrorCode::Internal, "invalid demo date of birth"))?;
        create_client(
            ctx,
            CreateClientRequest {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                date_of_birth,
                gender: gender.to_string(),
                contact_number: Some(contact_number.to_string()),
                email: None,
                address: None,
            },
        )
        .await?;
    }

    info!("demo registry data seeded");
    Ok(true)
}

async fn ensure_client_exists(ctx: &ApiContext, client_id: &ClientId) -> Result<(), ApiError> {
    get_client(ctx, client_id).await.map(|_| ())
}

fn require(fields: &mut BTreeMap<String, String>, field: &str, value: &str, message: &str) {
    if value.trim().is_empty() {
        fields.insert(field.to_string(), message.to_string());
    }
}

fn duplicate_enrollment() -> ApiError {
    ApiError::new(ErrorCode::Conflict, DUPLICATE_ENROLLMENT_MESSAGE)
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
