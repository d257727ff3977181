use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Client, ClientId, Enrollment, EnrollmentId, HealthProgram, ProgramId},
    error::ApiError,
    protocol::{
        client_enrollments_route, client_route, client_search_route, clients_route,
        enrollment_route, enrollments_route, program_route, programs_route, CreateClientRequest,
        CreateEnrollmentRequest, CreateProgramRequest, UpdateEnrollmentRequest, API_BASE_PATH,
    },
};
use tracing::debug;
use url::Url;

use crate::error::ClientError;

/// Remote registry operations, one per resource and verb.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn list_programs(&self) -> Result<Vec<HealthProgram>, ClientError>;
    async fn get_program(&self, program_id: &ProgramId) -> Result<HealthProgram, ClientError>;
    async fn create_program(
        &self,
        request: &CreateProgramRequest,
    ) -> Result<HealthProgram, ClientError>;

    async fn list_clients(&self) -> Result<Vec<Client>, ClientError>;
    async fn search_clients(&self, query: &str) -> Result<Vec<Client>, ClientError>;
    async fn get_client(&self, client_id: &ClientId) -> Result<Client, ClientError>;
    async fn create_client(&self, request: &CreateClientRequest) -> Result<Client, ClientError>;

    async fn list_enrollments(&self) -> Result<Vec<Enrollment>, ClientError>;
    async fn list_client_enrollments(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<Enrollment>, ClientError>;
    async fn create_enrollment(
        &self,
        client_id: &ClientId,
        request: &CreateEnrollmentRequest,
    ) -> Result<Enrollment, ClientError>;
    async fn update_enrollment(
        &self,
        enrollment_id: &EnrollmentId,
        request: &UpdateEnrollmentRequest,
    ) -> Result<Enrollment, ClientError>;
    async fn delete_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<(), ClientError>;
}

/// HTTP implementation of [`RegistryApi`] over `{server_url}/api/v1`.
///
/// One attempt per call. Non-2xx responses become [`ClientError::Http`], with
/// the structured error code when the body decodes as an API error.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        Self::with_http(reqwest::Client::new(), server_url)
    }

    pub fn with_http(http: reqwest::Client, server_url: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidServerUrl {
            url: server_url.to_string(),
            reason,
        };
        let parsed = Url::parse(server_url.trim()).map_err(|err| invalid(err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
        }

        let base_url = format!("{}{API_BASE_PATH}", parsed.as_str().trim_end_matches('/'));
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = self.execute(request).await?;
        Ok(response.json().await?)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request = request.build()?;
        debug!(method = %request.method(), url = %request.url(), "registry request");
        let response = self.http.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(http_error(status, &body))
    }
}

/// Builds the error for a non-success response body.
pub(crate) fn http_error(status: StatusCode, body: &str) -> ClientError {
    if let Ok(api_error) = serde_json::from_str::<ApiError>(body) {
        return ClientError::from_api(status.as_u16(), api_error);
    }

    let trimmed = body.trim();
    let message = if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    };
    ClientError::Http {
        status: status.as_u16(),
        code: None,
        message,
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn list_programs(&self) -> Result<Vec<HealthProgram>, ClientError> {
        self.fetch(self.http.get(self.url(programs_route()))).await
    }

    async fn get_program(&self, program_id: &ProgramId) -> Result<HealthProgram, ClientError> {
        self.fetch(self.http.get(self.url(&program_route(program_id))))
            .await
    }

    async fn create_program(
        &self,
        request: &CreateProgramRequest,
    ) -> Result<HealthProgram, ClientError> {
        self.fetch(self.http.post(self.url(programs_route())).json(request))
            .await
    }

    async fn list_clients(&self) -> Result<Vec<Client>, ClientError> {
        self.fetch(self.http.get(self.url(clients_route()))).await
    }

    async fn search_clients(&self, query: &str) -> Result<Vec<Client>, ClientError> {
        self.fetch(
            self.http
                .get(self.url(client_search_route()))
                .query(&[("q", query)]),
        )
        .await
    }

    async fn get_client(&self, client_id: &ClientId) -> Result<Client, ClientError> {
        self.fetch(self.http.get(self.url(&client_route(client_id))))
            .await
    }

    async fn create_client(&self, request: &CreateClientRequest) -> Result<Client, ClientError> {
        self.fetch(self.http.post(self.url(clients_route())).json(request))
            .await
    }

    async fn list_enrollments(&self) -> Result<Vec<Enrollment>, ClientError> {
        self.fetch(self.http.get(self.url(enrollments_route())))
            .await
    }

    async fn list_client_enrollments(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<Enrollment>, ClientError> {
        self.fetch(self.http.get(self.url(&client_enrollments_route(client_id))))
            .await
    }

    async fn create_enrollment(
        &self,
        client_id: &ClientId,
        request: &CreateEnrollmentRequest,
    ) -> Result<Enrollment, ClientError> {
        self.fetch(
            self.http
                .post(self.url(&client_enrollments_route(client_id)))
                .json(request),
        )
        .await
    }

    async fn update_enrollment(
        &self,
        enrollment_id: &EnrollmentId,
        request: &UpdateEnrollmentRequest,
    ) -> Result<Enrollment, ClientError> {
        self.fetch(
            self.http
                .put(self.url(&enrollment_route(enrollment_id)))
                .json(request),
        )
        .await
    }

    async fn delete_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<(), ClientError> {
        self.execute(self.http.delete(self.url(&enrollment_route(enrollment_id))))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/registry_client_tests.rs"]
mod tests;
