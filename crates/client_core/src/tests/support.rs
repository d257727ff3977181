//! In-process registry backed by `server_api` over in-memory SQLite.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use server_api::ApiContext;
use shared::{
    domain::{Client, ClientId, Enrollment, EnrollmentId, HealthProgram, ProgramId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateClientRequest, CreateEnrollmentRequest, CreateProgramRequest,
        UpdateEnrollmentRequest,
    },
};
use storage::Storage;

use crate::{error::ClientError, registry_client::RegistryApi};

pub(crate) struct InProcessRegistry {
    pub(crate) ctx: ApiContext,
    /// Makes every delete fail with a 500 while set.
    pub(crate) fail_deletes: AtomicBool,
}

impl InProcessRegistry {
    pub(crate) async fn seeded() -> Arc<Self> {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let ctx = ApiContext::new(Arc::new(storage));
        server_api::seed_demo_data(&ctx).await.expect("seed");
        Arc::new(Self {
            ctx,
            fail_deletes: AtomicBool::new(false),
        })
    }

    pub(crate) async fn client_named(&self, first_name: &str) -> Client {
        server_api::list_clients(&self.ctx)
            .await
            .expect("clients")
            .into_iter()
            .find(|client| client.first_name == first_name)
            .expect("seeded client")
    }

    pub(crate) async fn program_named(&self, name: &str) -> HealthProgram {
        server_api::list_programs(&self.ctx)
            .await
            .expect("programs")
            .into_iter()
            .find(|program| program.name == name)
            .expect("seeded program")
    }
}

fn to_client_error(err: ApiError) -> ClientError {
    let status = match err.code {
        ErrorCode::NotFound => 404,
        ErrorCode::Validation => 400,
        ErrorCode::Conflict => 409,
        ErrorCode::Internal => 500,
    };
    ClientError::from_api(status, err)
}

#[async_trait]
impl RegistryApi for InProcessRegistry {
    async fn list_programs(&self) -> Result<Vec<HealthProgram>, ClientError> {
        server_api::list_programs(&self.ctx)
            .await
            .map_err(to_client_error)
    }

    async fn get_program(&self, program_id: &ProgramId) -> Result<HealthProgram, ClientError> {
        server_api::get_program(&self.ctx, program_id)
            .await
            .map_err(to_client_error)
    }

    async fn create_program(
        &self,
        request: &CreateProgramRequest,
    ) -> Result<HealthProgram, ClientError> {
        server_api::create_program(&self.ctx, request.clone())
            .await
            .map_err(to_client_error)
    }

    async fn list_clients(&self) -> Result<Vec<Client>, ClientError> {
        server_api::list_clients(&self.ctx)
            .await
            .map_err(to_client_error)
    }

    async fn search_clients(&self, query: &str) -> Result<Vec<Client>, ClientError> {
        server_api::search_clients(&self.ctx, query)
            .await
            .map_err(to_client_error)
    }

    async fn get_client(&self, client_id: &ClientId) -> Result<Client, ClientError> {
        server_api::get_client(&self.ctx, client_id)
            .await
            .map_err(to_client_error)
    }

    async fn create_client(&self, request: &CreateClientRequest) -> Result<Client, ClientError> {
        server_api::create_client(&self.ctx, request.clone())
            .await
            .map_err(to_client_error)
    }

    async fn list_enrollments(&self) -> Result<Vec<Enrollment>, ClientError> {
        server_api::list_enrollments(&self.ctx)
            .await
            .map_err(to_client_error)
    }

    async fn list_client_enrollments(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<Enrollment>, ClientError> {
        server_api::list_client_enrollments(&self.ctx, client_id)
            .await
            .map_err(to_client_error)
    }

    async fn create_enrollment(
        &self,
        client_id: &ClientId,
        request: &CreateEnrollmentRequest,
    ) -> Result<Enrollment, ClientError> {
        server_api::create_enrollment(&self.ctx, client_id, request.clone())
            .await
            .map_err(to_client_error)
    }

    async fn update_enrollment(
        &self,
        enrollment_id: &EnrollmentId,
        request: &UpdateEnrollmentRequest,
    ) -> Result<Enrollment, ClientError> {
        server_api::update_enrollment(&self.ctx, enrollment_id, request.clone())
            .await
            .map_err(to_client_error)
    }

    async fn delete_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<(), ClientError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(to_client_error(ApiError::new(
                ErrorCode::Internal,
                "database unavailable",
            )));
        }
        server_api::delete_enrollment(&self.ctx, enrollment_id)
            .await
            .map_err(to_client_error)
    }
}
