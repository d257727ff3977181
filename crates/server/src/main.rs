use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use server_api::ApiContext;
use shared::{
    domain::{Client, ClientId, Enrollment, EnrollmentId, HealthProgram, ProgramId},
    error::{ApiError, ErrorCode},
    protocol::{
        ClientSearchQuery, CreateClientRequest, CreateEnrollmentRequest, CreateProgramRequest,
        UpdateEnrollmentRequest, API_BASE_PATH,
    },
};
use storage::Storage;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

type HttpError = (StatusCode, Json<ApiError>);
type HttpResult<T> = Result<T, HttpError>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext::new(Arc::new(storage));

    if settings.seed_demo_data {
        server_api::seed_demo_data(&api)
            .await
            .map_err(|e| anyhow::anyhow!("failed to seed demo data: {}", e.message))?;
    }

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, base_path = API_BASE_PATH, "registry server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/programs", get(http_list_programs).post(http_create_program))
        .route("/programs/:program_id", get(http_get_program))
        .route("/clients", get(http_list_clients).post(http_create_client))
        .route("/clients/search", get(http_search_clients))
        .route("/clients/:client_id", get(http_get_client))
        .route(
            "/clients/:client_id/enrollments",
            get(http_list_client_enrollments).post(http_create_enrollment),
        )
        .route("/enrollments", get(http_list_enrollments))
        .route(
            "/enrollments/:enrollment_id",
            put(http_update_enrollment).delete(http_delete_enrollment),
        );

    Router::new()
        .route("/healthz", get(healthz))
        .nest(API_BASE_PATH, api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ApiError) -> HttpError {
    if matches!(err.code, ErrorCode::Internal) {
        error!(message = %err.message, "request failed");
    }
    (status_for(err.code), Json(err))
}

fn json_body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> HttpResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        (
            rejection.status(),
            Json(ApiError::new(ErrorCode::Validation, rejection.body_text())),
        )
    })
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    server_api::health(&state.api).await.map_err(http_error)?;
    Ok("ok")
}

async fn http_list_programs(
    State(state): State<Arc<AppState>>,
) -> HttpResult<Json<Vec<HealthProgram>>> {
    server_api::list_programs(&state.api)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_get_program(
    State(state): State<Arc<AppState>>,
    Path(program_id): Path<String>,
) -> HttpResult<Json<HealthProgram>> {
    server_api::get_program(&state.api, &ProgramId(program_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_create_program(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateProgramRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<HealthProgram>)> {
    let request = json_body(payload)?;
    let program = server_api::create_program(&state.api, request)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(program)))
}

async fn http_list_clients(State(state): State<Arc<AppState>>) -> HttpResult<Json<Vec<Client>>> {
    server_api::list_clients(&state.api)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_search_clients(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientSearchQuery>,
) -> HttpResult<Json<Vec<Client>>> {
    server_api::search_clients(&state.api, &query.q)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_get_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> HttpResult<Json<Client>> {
    server_api::get_client(&state.api, &ClientId(client_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_create_client(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateClientRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<Client>)> {
    let request = json_body(payload)?;
    let client = server_api::create_client(&state.api, request)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn http_list_enrollments(
    State(state): State<Arc<AppState>>,
) -> HttpResult<Json<Vec<Enrollment>>> {
    server_api::list_enrollments(&state.api)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_list_client_enrollments(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> HttpResult<Json<Vec<Enrollment>>> {
    server_api::list_client_enrollments(&state.api, &ClientId(client_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_create_enrollment(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    payload: Result<Json<CreateEnrollmentRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<Enrollment>)> {
    let request = json_body(payload)?;
    let enrollment = server_api::create_enrollment(&state.api, &ClientId(client_id), request)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn http_update_enrollment(
    State(state): State<Arc<AppState>>,
    Path(enrollment_id): Path<String>,
    payload: Result<Json<UpdateEnrollmentRequest>, JsonRejection>,
) -> HttpResult<Json<Enrollment>> {
    let request = json_body(payload)?;
    server_api::update_enrollment(&state.api, &EnrollmentId(enrollment_id), request)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_delete_enrollment(
    State(state): State<Arc<AppState>>,
    Path(enrollment_id): Path<String>,
) -> HttpResult<StatusCode> {
    server_api::delete_enrollment(&state.api, &EnrollmentId(enrollment_id))
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
