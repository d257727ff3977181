//! Local enrollment list kept in step with the registry.
//!
//! Deletes are optimistic: [`EnrollmentSynchronizer::remove`] drops the entry
//! before the request is sent and restores it if the server rejects the
//! delete with anything other than 404. Restored entries go back to their
//! place in the last known server order, so several rollbacks settling in any
//! order rebuild the original list.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{ClientId, Enrollment, EnrollmentId, EnrollmentStatus},
    protocol::UpdateEnrollmentRequest,
};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    registry_client::RegistryApi,
    validation::EnrollmentDraft,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    Client(ClientId),
    All,
}

/// How a successful enroll is reflected locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrollReconcile {
    /// Append the server's response to the list.
    #[default]
    Append,
    /// Re-fetch the list to pick up denormalized client and program fields.
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Loaded(Vec<Enrollment>),
    LoadFailed(String),
    Enrolled(Enrollment),
    Updated(Enrollment),
    Removed(EnrollmentId),
    DeleteConfirmed(EnrollmentId),
    Restored {
        enrollment: Enrollment,
        error: ClientError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    /// The server no longer had the enrollment; treated as success.
    AlreadyGone,
    RolledBack(ClientError),
}

/// Handle to an in-flight delete. Dropping it does not cancel the request.
#[derive(Debug)]
pub struct DeleteTicket {
    enrollment_id: EnrollmentId,
    outcome: oneshot::Receiver<DeleteOutcome>,
}

impl DeleteTicket {
    pub fn enrollment_id(&self) -> &EnrollmentId {
        &self.enrollment_id
    }

    pub async fn settled(self) -> DeleteOutcome {
        self.outcome.await.unwrap_or_else(|_| {
            DeleteOutcome::RolledBack(ClientError::Enroll(
                "delete task ended before reporting an outcome".to_string(),
            ))
        })
    }
}

#[derive(Default)]
struct SyncState {
    enrollments: Vec<Enrollment>,
    /// Server order of every known id, including ones with a delete in flight.
    order: Vec<EnrollmentId>,
    pending: HashSet<EnrollmentId>,
    loaded: bool,
}

impl SyncState {
    fn push(&mut self, enrollment: Enrollment) {
        if !self.order.contains(&enrollment.id) {
            self.order.push(enrollment.id.clone());
        }
        self.enrollments.push(enrollment);
    }

    /// Index in `enrollments` that keeps it consistent with `order`.
    fn restore_index(&self, enrollment_id: &EnrollmentId) -> usize {
        let Some(position) = self.order.iter().position(|id| id == enrollment_id) else {
            return self.enrollments.len();
        };
        let earlier: HashSet<&EnrollmentId> = self.order[..position].iter().collect();
        self.enrollments
            .iter()
            .filter(|enrollment| earlier.contains(&enrollment.id))
            .count()
    }
}

#[derive(Clone)]
pub struct EnrollmentSynchronizer {
    api: Arc<dyn RegistryApi>,
    scope: SyncScope,
    reconcile: EnrollReconcile,
    state: Arc<Mutex<SyncState>>,
    events: broadcast::Sender<SyncEvent>,
}

impl EnrollmentSynchronizer {
    pub fn new(api: Arc<dyn RegistryApi>, scope: SyncScope) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            api,
            scope,
            reconcile: EnrollReconcile::default(),
            state: Arc::new(Mutex::new(SyncState::default())),
            events,
        }
    }

    pub fn with_reconcile(mut self, reconcile: EnrollReconcile) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn scope(&self) -> &SyncScope {
        &self.scope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Enrollment> {
        self.lock_state().enrollments.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_state().loaded
    }

    pub fn is_pending(&self, enrollment_id: &EnrollmentId) -> bool {
        self.lock_state().pending.contains(enrollment_id)
    }

    /// Replaces local state with the server's list.
    ///
    /// Entries with a delete still in flight stay hidden.
    pub async fn load(&self) -> Result<Vec<Enrollment>, ClientError> {
        let fetched = match &self.scope {
            SyncScope::Client(client_id) => self.api.list_client_enrollments(client_id).await,
            SyncScope::All => self.api.list_enrollments().await,
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                let message = err.user_message();
                warn!(scope = ?self.scope, error = %err, "failed to load enrollments");
                self.publish(SyncEvent::LoadFailed(message.clone()));
                return Err(ClientError::Load(message));
            }
        };

        let visible = {
            let mut state = self.lock_state();
            state.order = fetched.iter().map(|enrollment| enrollment.id.clone()).collect();
            let visible: Vec<Enrollment> = fetched
                .into_iter()
                .filter(|enrollment| !state.pending.contains(&enrollment.id))
                .collect();
            state.enrollments = visible.clone();
            state.loaded = true;
            visible
        };
        debug!(scope = ?self.scope, count = visible.len(), "enrollments loaded");
        self.publish(SyncEvent::Loaded(visible.clone()));
        Ok(visible)
    }

    /// Validates the draft, then creates the enrollment for the scoped client.
    ///
    /// Invalid drafts never reach the network.
    pub async fn enroll(&self, draft: &EnrollmentDraft) -> Result<Enrollment, ClientError> {
        let SyncScope::Client(client_id) = &self.scope else {
            return Err(ClientError::ScopeRequiresClient);
        };
        let request = draft.into_request().map_err(ClientError::Validation)?;

        let enrollment = self
            .api
            .create_enrollment(client_id, &request)
            .await
            .map_err(classify_mutation_error)?;
        info!(
            enrollment_id = %enrollment.id,
            %client_id,
            program_id = %enrollment.program_id,
            "enrollment created"
        );

        match self.reconcile {
            EnrollReconcile::Append => {
                self.lock_state().push(enrollment.clone());
            }
            EnrollReconcile::Reload => {
                if let Err(err) = self.load().await {
                    warn!(error = %err, "reload after enroll failed; appending response");
                    let mut state = self.lock_state();
                    if !state.enrollments.iter().any(|e| e.id == enrollment.id) {
                        state.push(enrollment.clone());
                    }
                }
            }
        }
        self.publish(SyncEvent::Enrolled(enrollment.clone()));
        Ok(enrollment)
    }

    /// Removes the enrollment locally and issues the delete in the background.
    ///
    /// Must be called inside a tokio runtime. The entry is gone from
    /// [`snapshot`](Self::snapshot) when this returns.
    pub fn remove(&self, enrollment_id: &EnrollmentId) -> Result<DeleteTicket, ClientError> {
        let removed = {
            let mut state = self.lock_state();
            if state.pending.contains(enrollment_id) {
                return Err(ClientError::DeleteAlreadyPending(enrollment_id.clone()));
            }
            let Some(index) = state
                .enrollments
                .iter()
                .position(|enrollment| &enrollment.id == enrollment_id)
            else {
                return Err(ClientError::UnknownEnrollment(enrollment_id.clone()));
            };
            let removed = state.enrollments.remove(index);
            state.pending.insert(enrollment_id.clone());
            removed
        };
        self.publish(SyncEvent::Removed(enrollment_id.clone()));

        let (tx, outcome) = oneshot::channel();
        let sync = self.clone();
        tokio::spawn(async move {
            let outcome = sync.settle_delete(removed).await;
            let _ = tx.send(outcome);
        });

        Ok(DeleteTicket {
            enrollment_id: enrollment_id.clone(),
            outcome,
        })
    }

    async fn settle_delete(&self, removed: Enrollment) -> DeleteOutcome {
        match self.api.delete_enrollment(&removed.id).await {
            Ok(()) => {
                self.finish_delete(&removed.id);
                info!(enrollment_id = %removed.id, "enrollment deleted");
                DeleteOutcome::Removed
            }
            Err(err) if err.is_not_found() => {
                self.finish_delete(&removed.id);
                debug!(enrollment_id = %removed.id, "enrollment already gone on server");
                DeleteOutcome::AlreadyGone
            }
            Err(err) => {
                warn!(enrollment_id = %removed.id, error = %err, "delete failed; restoring enrollment");
                let error =
                    ClientError::Enroll(format!("Failed to delete enrollment: {}", err.user_message()));
                self.restore(removed, error.clone());
                DeleteOutcome::RolledBack(error)
            }
        }
    }

    fn finish_delete(&self, enrollment_id: &EnrollmentId) {
        {
            let mut state = self.lock_state();
            state.pending.remove(enrollment_id);
            state.order.retain(|id| id != enrollment_id);
        }
        self.publish(SyncEvent::DeleteConfirmed(enrollment_id.clone()));
    }

    fn restore(&self, enrollment: Enrollment, error: ClientError) {
        {
            let mut state = self.lock_state();
            state.pending.remove(&enrollment.id);
            // A reload may already have brought the entry back.
            if !state.enrollments.iter().any(|e| e.id == enrollment.id) {
                let index = state.restore_index(&enrollment.id);
                state.enrollments.insert(index, enrollment.clone());
            }
        }
        self.publish(SyncEvent::Restored { enrollment, error });
    }

    pub async fn update_status(
        &self,
        enrollment_id: &EnrollmentId,
        status: EnrollmentStatus,
    ) -> Result<Enrollment, ClientError> {
        let mut updated = self
            .api
            .update_enrollment(enrollment_id, &UpdateEnrollmentRequest { status })
            .await
            .map_err(classify_mutation_error)?;

        {
            let mut state = self.lock_state();
            if let Some(slot) = state.enrollments.iter_mut().find(|e| &e.id == enrollment_id) {
                if updated.client.is_none() {
                    updated.client = slot.client.clone();
                }
                if updated.program.is_none() {
                    updated.program = slot.program.clone();
                }
                *slot = updated.clone();
            }
        }
        info!(%enrollment_id, status = %status, "enrollment status updated");
        self.publish(SyncEvent::Updated(updated.clone()));
        Ok(updated)
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

fn classify_mutation_error(err: ClientError) -> ClientError {
    if err.is_duplicate_enrollment() {
        return ClientError::DuplicateEnrollment(err.user_message());
    }
    match err {
        ClientError::Validation(_) => err,
        other => ClientError::Enroll(other.user_message()),
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
