use super::*;
use crate::test_support::InProcessRegistry;
use shared::domain::EnrollmentStatus;
use std::sync::atomic::Ordering;

fn row(id: &str, client: &str, program: &str, status: EnrollmentStatus) -> EnrollmentRow {
    EnrollmentRow {
        id: EnrollmentId::from(id),
        client_name: client.to_string(),
        program_name: program.to_string(),
        enrollment_date: "2024-01-01".to_string(),
        status: status.to_string(),
    }
}

#[test]
fn status_text_filter_keeps_only_matching_statuses() {
    let rows = vec![
        row("a", "John Doe", "TB Program", EnrollmentStatus::Active),
        row("b", "Jane Smith", "Malaria Control", EnrollmentStatus::Completed),
    ];

    let filtered = filter_by_status_text(rows, "active");
    assert_eq!(filtered.len(), 1);
    assert!(filtered
        .iter()
        .all(|row| row.status.to_lowercase().contains("active")));
}

#[test]
fn enrollment_search_covers_client_and_program_names() {
    let rows = vec![
        row("a", "John Doe", "TB Program", EnrollmentStatus::Active),
        row("b", "Jane Smith", "Malaria Control", EnrollmentStatus::Active),
    ];

    let by_client = filter_enrollment_rows(rows.clone(), "SMITH");
    assert_eq!(by_client.len(), 1);
    assert_eq!(by_client[0].id, EnrollmentId::from("b"));

    let by_program = filter_enrollment_rows(rows.clone(), "tb pro");
    assert_eq!(by_program[0].id, EnrollmentId::from("a"));

    assert_eq!(filter_enrollment_rows(rows, "  ").len(), 2);
}

#[test]
fn errors_map_to_their_presentation() {
    assert_eq!(
        ViewError::from(ClientError::DuplicateEnrollment("dup".into())),
        ViewError::Conflict("dup".into())
    );
    assert_eq!(
        ViewError::from(ClientError::Load("down".into())),
        ViewError::Section("down".into())
    );
    assert_eq!(
        ViewError::from(ClientError::Enroll("boom".into())),
        ViewError::Banner("boom".into())
    );
}

#[tokio::test]
async fn client_detail_shows_profile_with_fallbacks() {
    let registry = InProcessRegistry::seeded().await;
    let john = registry.client_named("John").await;
    let mut view = ClientDetailView::new(registry.clone(), john.id.clone());

    view.load().await.expect("load");
    let profile = view.profile().expect("profile");
    assert_eq!(profile.full_name, "John Doe");
    assert_eq!(profile.date_of_birth, "1990-01-01");
    assert_eq!(profile.contact_number, "0700000001");
    assert_eq!(profile.email, NOT_PROVIDED);
    assert_eq!(profile.address, NOT_PROVIDED);
    assert!(view.rows().is_empty());
    assert_eq!(view.available_programs().len(), 2);
}

#[tokio::test]
async fn unknown_client_fails_the_section() {
    let registry = InProcessRegistry::seeded().await;
    let mut view = ClientDetailView::new(registry, ClientId::from("missing"));

    assert!(matches!(view.load().await, Err(ViewError::Section(_))));
    assert!(view.section_error().is_some());
    assert!(view.profile().is_none());
}

#[tokio::test]
async fn enroll_then_duplicate_opens_conflict_dialog() {
    let registry = InProcessRegistry::seeded().await;
    let john = registry.client_named("John").await;
    let tb = registry.program_named("TB Program").await;
    let mut view = ClientDetailView::new(registry.clone(), john.id.clone())
        .with_reconcile(EnrollReconcile::Reload);
    view.load().await.expect("load");

    let draft = EnrollmentDraft::new(tb.id.as_str(), "2024-01-01");
    view.enroll(&draft).await.expect("enroll");
    let rows = view.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].program_name, "TB Program");
    assert_eq!(rows[0].status, "Active");

    let err = view.enroll(&draft).await.expect_err("duplicate");
    assert!(matches!(err, ViewError::Conflict(_)));
    assert!(view.conflict().is_some());
    assert!(view.banner().is_none());
    assert_eq!(view.rows().len(), 1);

    view.dismiss_conflict();
    assert!(view.conflict().is_none());
}

#[tokio::test]
async fn completed_enrollment_does_not_block_a_new_one() {
    let registry = InProcessRegistry::seeded().await;
    let jane = registry.client_named("Jane").await;
    let malaria = registry.program_named("Malaria Control").await;
    let mut view = ClientDetailView::new(registry.clone(), jane.id.clone());
    view.load().await.expect("load");

    let draft = EnrollmentDraft::new(malaria.id.as_str(), "2023-01-01");
    let first = view.enroll(&draft).await.expect("first");
    view.synchronizer()
        .update_status(&first.id, EnrollmentStatus::Completed)
        .await
        .expect("complete");

    view.enroll(&EnrollmentDraft::new(malaria.id.as_str(), "2024-01-01"))
        .await
        .expect("second active enrollment");
    let statuses: Vec<String> = view.rows().into_iter().map(|row| row.status).collect();
    assert_eq!(statuses, vec!["Completed", "Active"]);
}

#[tokio::test]
async fn invalid_enroll_form_shows_field_errors() {
    let registry = InProcessRegistry::seeded().await;
    let john = registry.client_named("John").await;
    let mut view = ClientDetailView::new(registry.clone(), john.id.clone());
    view.load().await.expect("load");

    let err = view
        .enroll(&EnrollmentDraft::new("", ""))
        .await
        .expect_err("invalid");
    assert!(matches!(err, ViewError::Fields(_)));
    assert_eq!(view.form_errors().len(), 2);
    assert!(server_api::list_enrollments(&registry.ctx)
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn confirm_delete_closes_prompt_and_removes_row() {
    let registry = InProcessRegistry::seeded().await;
    let john = registry.client_named("John").await;
    let tb = registry.program_named("TB Program").await;
    let mut view = ClientDetailView::new(registry.clone(), john.id.clone());
    view.load().await.expect("load");
    let enrollment = view
        .enroll(&EnrollmentDraft::new(tb.id.as_str(), "2024-01-01"))
        .await
        .expect("enroll");

    view.request_delete(enrollment.id.clone());
    assert_eq!(view.pending_confirmation(), Some(&enrollment.id));

    let ticket = view.confirm_delete().expect("ticket");
    assert!(view.pending_confirmation().is_none());
    assert!(view.rows().is_empty());

    assert_eq!(view.settle(ticket).await, DeleteOutcome::Removed);
    assert!(view.banner().is_none());
    assert!(!view.is_pending(&enrollment.id));
}

#[tokio::test]
async fn rollback_raises_the_banner_after_the_ticket_is_dropped() {
    let registry = InProcessRegistry::seeded().await;
    let john = registry.client_named("John").await;
    let tb = registry.program_named("TB Program").await;
    let mut view = ClientDetailView::new(registry.clone(), john.id.clone());
    view.load().await.expect("load");
    let enrollment = view
        .enroll(&EnrollmentDraft::new(tb.id.as_str(), "2024-01-01"))
        .await
        .expect("enroll");
    registry.fail_deletes.store(true, Ordering::SeqCst);
    let mut events = view.synchronizer().subscribe();

    view.request_delete(enrollment.id.clone());
    drop(view.confirm_delete().expect("ticket"));
    assert!(view.rows().is_empty());

    loop {
        if let SyncEvent::Restored { .. } = events.recv().await.expect("event") {
            break;
        }
    }
    assert!(view.banner().is_none());

    view.poll_events();
    assert_eq!(
        view.banner(),
        Some("Failed to delete enrollment: database unavailable")
    );
    assert_eq!(view.rows().len(), 1);
    assert!(!view.is_pending(&enrollment.id));

    view.dismiss_banner();
    view.poll_events();
    assert!(view.banner().is_none());
}

#[tokio::test]
async fn cancelled_prompt_keeps_the_row() {
    let registry = InProcessRegistry::seeded().await;
    let john = registry.client_named("John").await;
    let tb = registry.program_named("TB Program").await;
    let mut view = ClientDetailView::new(registry.clone(), john.id.clone());
    view.load().await.expect("load");
    let enrollment = view
        .enroll(&EnrollmentDraft::new(tb.id.as_str(), "2024-01-01"))
        .await
        .expect("enroll");

    view.request_delete(enrollment.id);
    view.cancel_delete();
    assert!(view.confirm_delete().is_none());
    assert_eq!(view.rows().len(), 1);
}

#[tokio::test]
async fn enrollments_view_lists_and_filters_everything() {
    let registry = InProcessRegistry::seeded().await;
    let john = registry.client_named("John").await;
    let jane = registry.client_named("Jane").await;
    let tb = registry.program_named("TB Program").await;
    let malaria = registry.program_named("Malaria Control").await;
    for (client, program) in [(&john, &tb), (&jane, &malaria)] {
        let mut detail = ClientDetailView::new(registry.clone(), client.id.clone());
        detail
            .enroll(&EnrollmentDraft::new(program.id.as_str(), "2024-02-01"))
            .await
            .expect("enroll");
    }

    let mut view = EnrollmentsView::new(registry.clone());
    view.load().await.expect("load");
    assert_eq!(view.rows().len(), 2);

    view.set_query("malaria");
    let rows = view.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].client_name, "Jane Smith");
}

#[tokio::test]
async fn clients_view_registers_and_searches() {
    let registry = InProcessRegistry::seeded().await;
    let mut view = ClientsView::new(registry.clone());
    view.load().await.expect("load");

    let draft = ClientDraft {
        first_name: "Amina".into(),
        last_name: "Otieno".into(),
        date_of_birth: "1985-07-20".into(),
        gender: "Female".into(),
        contact_number: "0722000111".into(),
        email: "amina@example.org".into(),
        address: "Kisumu".into(),
    };
    view.register(&draft).await.expect("register");
    assert_eq!(view.rows().len(), 3);

    view.set_query("0722");
    let rows = view.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].full_name, "Amina Otieno");

    view.set_query("EXAMPLE.ORG");
    assert_eq!(view.rows().len(), 1);

    let invalid = view.register(&ClientDraft::default()).await;
    assert!(matches!(invalid, Err(ViewError::Fields(_))));
}

#[tokio::test]
async fn programs_view_creates_and_filters() {
    let registry = InProcessRegistry::seeded().await;
    let mut view = ProgramsView::new(registry.clone());
    view.load().await.expect("load");
    assert_eq!(view.programs().len(), 2);

    view.create(&ProgramDraft::new("HIV Care", "Antiretroviral follow-up"))
        .await
        .expect("create");
    view.set_query("antiretroviral");
    let programs = view.programs();
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].name, "HIV Care");
}
