//! View-models for the registry screens: synchronizer state, UI state, and the
//! user intents that drive them.

use std::sync::Arc;

use shared::domain::{Client, ClientId, Enrollment, EnrollmentId, HealthProgram};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{
    error::{describe_fields, ClientError, FieldErrors},
    registry_client::RegistryApi,
    sync::{
        DeleteOutcome, DeleteTicket, EnrollReconcile, EnrollmentSynchronizer, SyncEvent,
        SyncScope,
    },
    validation::{ClientDraft, EnrollmentDraft, ProgramDraft},
};

pub const NOT_PROVIDED: &str = "Not provided";

/// How a failure is presented.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    /// Inline messages next to form fields.
    #[error("{}", describe_fields(.0))]
    Fields(FieldErrors),
    /// Dismissible dialog for a duplicate enrollment.
    #[error("{0}")]
    Conflict(String),
    /// Dismissible banner above the list.
    #[error("{0}")]
    Banner(String),
    /// The whole section failed to load.
    #[error("{0}")]
    Section(String),
}

impl From<ClientError> for ViewError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Validation(fields) => Self::Fields(fields),
            ClientError::DuplicateEnrollment(message) => Self::Conflict(message),
            ClientError::Load(message) => Self::Section(message),
            other => Self::Banner(other.user_message()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRow {
    pub id: EnrollmentId,
    pub client_name: String,
    pub program_name: String,
    pub enrollment_date: String,
    pub status: String,
}

impl EnrollmentRow {
    pub fn from_enrollment(enrollment: &Enrollment) -> Self {
        Self {
            id: enrollment.id.clone(),
            client_name: enrollment
                .client
                .as_ref()
                .map(|client| client.full_name())
                .unwrap_or_else(|| enrollment.client_id.to_string()),
            program_name: enrollment
                .program
                .as_ref()
                .map(|program| program.name.clone())
                .unwrap_or_else(|| enrollment.program_id.to_string()),
            enrollment_date: enrollment.enrollment_date.format("%Y-%m-%d").to_string(),
            status: enrollment.status.to_string(),
        }
    }
}

/// Rows whose client or program name contains `query`, ignoring case.
pub fn filter_enrollment_rows(rows: Vec<EnrollmentRow>, query: &str) -> Vec<EnrollmentRow> {
    rows.into_iter()
        .filter(|row| {
            matches_any(
                &[row.client_name.as_str(), row.program_name.as_str()],
                query,
            )
        })
        .collect()
}

pub fn filter_by_status_text(rows: Vec<EnrollmentRow>, query: &str) -> Vec<EnrollmentRow> {
    rows.into_iter()
        .filter(|row| matches_any(&[row.status.as_str()], query))
        .collect()
}

fn matches_any(haystacks: &[&str], query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    needle.is_empty()
        || haystacks
            .iter()
            .any(|haystack| haystack.to_lowercase().contains(&needle))
}

fn or_not_provided(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => NOT_PROVIDED.to_string(),
    }
}

/// Every enrollment in the registry.
pub struct EnrollmentsView {
    sync: EnrollmentSynchronizer,
    query: String,
    section_error: Option<String>,
}

impl EnrollmentsView {
    pub fn new(api: Arc<dyn RegistryApi>) -> Self {
        Self {
            sync: EnrollmentSynchronizer::new(api, SyncScope::All),
            query: String::new(),
            section_error: None,
        }
    }

    pub async fn load(&mut self) -> Result<(), ViewError> {
        match self.sync.load().await {
            Ok(_) => {
                self.section_error = None;
                Ok(())
            }
            Err(err) => {
                let err = ViewError::from(err);
                if let ViewError::Section(message) = &err {
                    self.section_error = Some(message.clone());
                }
                Err(err)
            }
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn rows(&self) -> Vec<EnrollmentRow> {
        let rows = self
            .sync
            .snapshot()
            .iter()
            .map(EnrollmentRow::from_enrollment)
            .collect();
        filter_enrollment_rows(rows, &self.query)
    }

    pub fn section_error(&self) -> Option<&str> {
        self.section_error.as_deref()
    }

    pub fn synchronizer(&self) -> &EnrollmentSynchronizer {
        &self.sync
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub full_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub contact_number: String,
    pub email: String,
    pub address: String,
    pub registered_on: String,
}

impl From<&Client> for ClientProfile {
    fn from(client: &Client) -> Self {
        Self {
            full_name: client.full_name(),
            date_of_birth: client.date_of_birth.format("%Y-%m-%d").to_string(),
            gender: client.gender.clone(),
            contact_number: or_not_provided(client.contact_number.as_deref()),
            email: or_not_provided(client.email.as_deref()),
            address: or_not_provided(client.address.as_deref()),
            registered_on: client.created_at.format("%Y-%m-%d").to_string(),
        }
    }
}

/// One client's profile and enrollments, with the enroll and delete flows.
pub struct ClientDetailView {
    api: Arc<dyn RegistryApi>,
    client_id: ClientId,
    sync: EnrollmentSynchronizer,
    events: broadcast::Receiver<SyncEvent>,
    client: Option<Client>,
    programs: Vec<HealthProgram>,
    section_error: Option<String>,
    banner: Option<String>,
    conflict: Option<String>,
    form_errors: FieldErrors,
    confirm_delete: Option<EnrollmentId>,
}

impl ClientDetailView {
    pub fn new(api: Arc<dyn RegistryApi>, client_id: ClientId) -> Self {
        let sync = EnrollmentSynchronizer::new(api.clone(), SyncScope::Client(client_id.clone()));
        let events = sync.subscribe();
        Self {
            api,
            client_id,
            sync,
            events,
            client: None,
            programs: Vec::new(),
            section_error: None,
            banner: None,
            conflict: None,
            form_errors: FieldErrors::new(),
            confirm_delete: None,
        }
    }

    pub fn with_reconcile(mut self, reconcile: EnrollReconcile) -> Self {
        self.sync = self.sync.with_reconcile(reconcile);
        self
    }

    /// Loads the profile, its enrollments and the program picker together.
    pub async fn load(&mut self) -> Result<(), ViewError> {
        let loaded = futures::try_join!(
            self.api.get_client(&self.client_id),
            self.sync.load(),
            self.api.list_programs(),
        );
        match loaded {
            Ok((client, _, programs)) => {
                self.client = Some(client);
                self.programs = programs;
                self.section_error = None;
                Ok(())
            }
            Err(err) => {
                let message = match err {
                    ClientError::Load(message) => message,
                    other => other.user_message(),
                };
                self.section_error = Some(message.clone());
                Err(ViewError::Section(message))
            }
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn profile(&self) -> Option<ClientProfile> {
        self.client.as_ref().map(ClientProfile::from)
    }

    pub fn rows(&self) -> Vec<EnrollmentRow> {
        self.sync
            .snapshot()
            .iter()
            .map(EnrollmentRow::from_enrollment)
            .collect()
    }

    /// Programs offered in the enroll form.
    pub fn available_programs(&self) -> Vec<&HealthProgram> {
        self.programs.iter().filter(|program| program.active).collect()
    }

    pub async fn enroll(&mut self, draft: &EnrollmentDraft) -> Result<Enrollment, ViewError> {
        self.form_errors.clear();
        match self.sync.enroll(draft).await {
            Ok(enrollment) => {
                self.banner = None;
                Ok(enrollment)
            }
            Err(err) => {
                let err = ViewError::from(err);
                match &err {
                    ViewError::Fields(fields) => self.form_errors = fields.clone(),
                    ViewError::Conflict(message) => self.conflict = Some(message.clone()),
                    ViewError::Banner(message) | ViewError::Section(message) => {
                        self.banner = Some(message.clone())
                    }
                }
                Err(err)
            }
        }
    }

    pub fn request_delete(&mut self, enrollment_id: EnrollmentId) {
        self.confirm_delete = Some(enrollment_id);
    }

    pub fn cancel_delete(&mut self) {
        self.confirm_delete = None;
    }

    pub fn pending_confirmation(&self) -> Option<&EnrollmentId> {
        self.confirm_delete.as_ref()
    }

    /// Closes the prompt and starts the optimistic delete.
    pub fn confirm_delete(&mut self) -> Option<DeleteTicket> {
        let enrollment_id = self.confirm_delete.take()?;
        match self.sync.remove(&enrollment_id) {
            Ok(ticket) => Some(ticket),
            Err(err) => {
                self.banner = Some(err.user_message());
                None
            }
        }
    }

    /// Waits for a delete and raises the banner if it was rolled back.
    pub async fn settle(&mut self, ticket: DeleteTicket) -> DeleteOutcome {
        let outcome = ticket.settled().await;
        self.poll_events();
        if let DeleteOutcome::RolledBack(err) = &outcome {
            self.banner = Some(err.user_message());
        }
        outcome
    }

    /// Applies synchronizer events that arrived since the last poll.
    ///
    /// A rollback raises the banner even when nobody kept the delete's ticket.
    pub fn poll_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(SyncEvent::Restored { error, .. }) => {
                    self.banner = Some(error.user_message());
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    pub fn is_pending(&self, enrollment_id: &EnrollmentId) -> bool {
        self.sync.is_pending(enrollment_id)
    }

    pub fn form_errors(&self) -> &FieldErrors {
        &self.form_errors
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    pub fn conflict(&self) -> Option<&str> {
        self.conflict.as_deref()
    }

    pub fn dismiss_conflict(&mut self) {
        self.conflict = None;
    }

    pub fn section_error(&self) -> Option<&str> {
        self.section_error.as_deref()
    }

    pub fn synchronizer(&self) -> &EnrollmentSynchronizer {
        &self.sync
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRow {
    pub id: ClientId,
    pub full_name: String,
    pub gender: String,
    pub date_of_birth: String,
    pub contact_number: String,
    pub email: String,
}

impl From<&Client> for ClientRow {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id.clone(),
            full_name: client.full_name(),
            gender: client.gender.clone(),
            date_of_birth: client.date_of_birth.format("%Y-%m-%d").to_string(),
            contact_number: client.contact_number.clone().unwrap_or_default(),
            email: client.email.clone().unwrap_or_default(),
        }
    }
}

pub struct ClientsView {
    api: Arc<dyn RegistryApi>,
    clients: Vec<Client>,
    query: String,
    section_error: Option<String>,
}

impl ClientsView {
    pub fn new(api: Arc<dyn RegistryApi>) -> Self {
        Self {
            api,
            clients: Vec::new(),
            query: String::new(),
            section_error: None,
        }
    }

    pub async fn load(&mut self) -> Result<(), ViewError> {
        match self.api.list_clients().await {
            Ok(clients) => {
                self.clients = clients;
                self.section_error = None;
                Ok(())
            }
            Err(err) => {
                let message = err.user_message();
                self.section_error = Some(message.clone());
                Err(ViewError::Section(message))
            }
        }
    }

    pub async fn register(&mut self, draft: &ClientDraft) -> Result<Client, ViewError> {
        let request = draft.into_request().map_err(ViewError::Fields)?;
        let client = self.api.create_client(&request).await?;
        self.clients.push(client.clone());
        Ok(client)
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// Filtered over full name, email and contact number.
    pub fn rows(&self) -> Vec<ClientRow> {
        self.clients
            .iter()
            .map(ClientRow::from)
            .filter(|row| {
                matches_any(
                    &[
                        row.full_name.as_str(),
                        row.email.as_str(),
                        row.contact_number.as_str(),
                    ],
                    &self.query,
                )
            })
            .collect()
    }

    pub fn section_error(&self) -> Option<&str> {
        self.section_error.as_deref()
    }
}

pub struct ProgramsView {
    api: Arc<dyn RegistryApi>,
    programs: Vec<HealthProgram>,
    query: String,
    section_error: Option<String>,
}

impl ProgramsView {
    pub fn new(api: Arc<dyn RegistryApi>) -> Self {
        Self {
            api,
            programs: Vec::new(),
            query: String::new(),
            section_error: None,
        }
    }

    pub async fn load(&mut self) -> Result<(), ViewError> {
        match self.api.list_programs().await {
            Ok(programs) => {
                self.programs = programs;
                self.section_error = None;
                Ok(())
            }
            Err(err) => {
                let message = err.user_message();
                self.section_error = Some(message.clone());
                Err(ViewError::Section(message))
            }
        }
    }

    pub async fn create(&mut self, draft: &ProgramDraft) -> Result<HealthProgram, ViewError> {
        let request = draft.into_request().map_err(ViewError::Fields)?;
        let program = self.api.create_program(&request).await?;
        self.programs.push(program.clone());
        Ok(program)
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn programs(&self) -> Vec<&HealthProgram> {
        self.programs
            .iter()
            .filter(|program| {
                matches_any(
                    &[program.name.as_str(), program.description.as_str()],
                    &self.query,
                )
            })
            .collect()
    }

    pub fn section_error(&self) -> Option<&str> {
        self.section_error.as_deref()
    }
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
