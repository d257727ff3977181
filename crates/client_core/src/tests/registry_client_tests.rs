use super::*;
use axum::{
    extract::{Path, Query},
    http::StatusCode as AxumStatus,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, TimeZone, Utc};
use shared::{
    domain::EnrollmentStatus,
    error::{ApiError, ErrorCode},
    protocol::ClientSearchQuery,
};
use tokio::net::TcpListener;

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
}

fn program(id: &str, name: &str) -> HealthProgram {
    HealthProgram {
        id: ProgramId::from(id),
        name: name.to_string(),
        description: format!("{name} services"),
        active: true,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn client(first_name: &str) -> Client {
    Client {
        id: ClientId::from("c-1"),
        first_name: first_name.to_string(),
        last_name: "Doe".to_string(),
        date_of_birth: date("1990-01-01"),
        gender: "Male".to_string(),
        contact_number: None,
        email: None,
        address: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

async fn create_enrollment_stub(
    Path(client_id): Path<String>,
    Json(request): Json<CreateEnrollmentRequest>,
) -> Result<(AxumStatus, Json<Enrollment>), (AxumStatus, String)> {
    match client_id.as_str() {
        "structured" => Err((
            AxumStatus::CONFLICT,
            serde_json::to_string(&ApiError::new(
                ErrorCode::Conflict,
                "Client is already enrolled in this program",
            ))
            .expect("json"),
        )),
        "legacy" => Err((
            AxumStatus::BAD_REQUEST,
            "Client already enrolled in this program".to_string(),
        )),
        _ => Ok((
            AxumStatus::CREATED,
            Json(Enrollment {
                id: EnrollmentId::from("e-new"),
                client_id: ClientId::from(client_id),
                program_id: request.program_id,
                enrollment_date: request.enrollment_date,
                status: request.status,
                client: None,
                program: None,
            }),
        )),
    }
}

async fn delete_stub(Path(enrollment_id): Path<String>) -> AxumStatus {
    match enrollment_id.as_str() {
        "gone" => AxumStatus::NOT_FOUND,
        "broken" => AxumStatus::INTERNAL_SERVER_ERROR,
        _ => AxumStatus::NO_CONTENT,
    }
}

async fn spawn_stub_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let api = Router::new()
        .route(
            "/programs",
            get(|| async { Json(vec![program("p-1", "TB Program")]) }),
        )
        .route(
            "/clients/search",
            get(|Query(query): Query<ClientSearchQuery>| async move {
                Json(vec![client(&query.q)])
            }),
        )
        .route("/clients/:client_id/enrollments", post(create_enrollment_stub))
        .route(
            "/enrollments/:enrollment_id",
            put(|| async { AxumStatus::SERVICE_UNAVAILABLE }).delete(delete_stub),
        );
    let app = Router::new().nest("/api/v1", api);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

#[test]
fn base_url_appends_versioned_path() {
    let client = RegistryClient::new("http://localhost:4000/").expect("client");
    assert_eq!(client.base_url(), "http://localhost:4000/api/v1");
}

#[test]
fn rejects_unusable_server_urls() {
    assert!(matches!(
        RegistryClient::new("not a url"),
        Err(ClientError::InvalidServerUrl { .. })
    ));
    assert!(matches!(
        RegistryClient::new("ftp://localhost"),
        Err(ClientError::InvalidServerUrl { .. })
    ));
}

#[test]
fn http_error_prefers_structured_body() {
    let body = r#"{"code":"not_found","message":"Client not found"}"#;
    assert_eq!(
        http_error(StatusCode::NOT_FOUND, body),
        ClientError::Http {
            status: 404,
            code: Some(ErrorCode::NotFound),
            message: "Client not found".to_string(),
        }
    );
}

#[test]
fn http_error_carries_validation_fields() {
    let body = r#"{"code":"validation","message":"contact_number: Contact number is required","fields":{"contact_number":"Contact number is required"}}"#;
    let err = http_error(StatusCode::BAD_REQUEST, body);
    let ClientError::Validation(fields) = err else {
        panic!("expected field errors, got {err:?}");
    };
    assert_eq!(
        fields.get("contact_number").map(String::as_str),
        Some("Contact number is required")
    );
}

#[test]
fn http_error_falls_back_to_status_reason() {
    assert_eq!(
        http_error(StatusCode::BAD_GATEWAY, "  "),
        ClientError::Http {
            status: 502,
            code: None,
            message: "Bad Gateway".to_string(),
        }
    );
}

#[tokio::test]
async fn decodes_typed_payloads() {
    let server_url = spawn_stub_server().await;
    let api = RegistryClient::new(&server_url).expect("client");

    let programs = api.list_programs().await.expect("programs");
    assert_eq!(programs, vec![program("p-1", "TB Program")]);

    let clients = api.search_clients("Ada Lovelace").await.expect("search");
    assert_eq!(clients[0].first_name, "Ada Lovelace");
}

#[tokio::test]
async fn create_enrollment_posts_to_client_scoped_route() {
    let server_url = spawn_stub_server().await;
    let api = RegistryClient::new(&server_url).expect("client");
    let request = CreateEnrollmentRequest {
        program_id: ProgramId::from("p-1"),
        enrollment_date: date("2024-01-01"),
        status: EnrollmentStatus::Pending,
    };

    let created = api
        .create_enrollment(&ClientId::from("c-9"), &request)
        .await
        .expect("created");
    assert_eq!(created.client_id, ClientId::from("c-9"));
    assert_eq!(created.status, EnrollmentStatus::Pending);
}

#[tokio::test]
async fn conflicts_are_classified_as_duplicates() {
    let server_url = spawn_stub_server().await;
    let api = RegistryClient::new(&server_url).expect("client");
    let request = CreateEnrollmentRequest {
        program_id: ProgramId::from("p-1"),
        enrollment_date: date("2024-01-01"),
        status: EnrollmentStatus::Active,
    };

    let structured = api
        .create_enrollment(&ClientId::from("structured"), &request)
        .await
        .expect_err("conflict");
    assert!(matches!(
        structured,
        ClientError::Http {
            status: 409,
            code: Some(ErrorCode::Conflict),
            ..
        }
    ));
    assert!(structured.is_duplicate_enrollment());

    let legacy = api
        .create_enrollment(&ClientId::from("legacy"), &request)
        .await
        .expect_err("legacy conflict");
    assert!(matches!(legacy, ClientError::Http { code: None, .. }));
    assert!(legacy.is_duplicate_enrollment());
}

#[tokio::test]
async fn delete_maps_statuses() {
    let server_url = spawn_stub_server().await;
    let api = RegistryClient::new(&server_url).expect("client");

    api.delete_enrollment(&EnrollmentId::from("e-1"))
        .await
        .expect("deleted");

    let gone = api
        .delete_enrollment(&EnrollmentId::from("gone"))
        .await
        .expect_err("404");
    assert!(gone.is_not_found());

    let broken = api
        .delete_enrollment(&EnrollmentId::from("broken"))
        .await
        .expect_err("500");
    assert!(!broken.is_not_found());
}

#[tokio::test]
async fn unavailable_update_surfaces_http_error() {
    let server_url = spawn_stub_server().await;
    let api = RegistryClient::new(&server_url).expect("client");
    let err = api
        .update_enrollment(
            &EnrollmentId::from("e-1"),
            &UpdateEnrollmentRequest {
                status: EnrollmentStatus::Completed,
            },
        )
        .await
        .expect_err("503");
    assert_eq!(
        err,
        ClientError::Http {
            status: 503,
            code: None,
            message: "Service Unavailable".to_string(),
        }
    );
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = RegistryClient::new(&format!("http://{addr}")).expect("client");
    let err = api.list_clients().await.expect_err("refused");
    assert!(matches!(err, ClientError::Transport(_)));
}
