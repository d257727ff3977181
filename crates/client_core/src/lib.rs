//! Client side of the health program registry: the typed API client, the
//! enrollment synchronizer, form validators and screen view-models.

pub mod error;
pub mod registry_client;
pub mod sync;
pub mod validation;
pub mod views;

pub use error::{ClientError, FieldErrors};
pub use registry_client::{RegistryApi, RegistryClient};
pub use sync::{
    DeleteOutcome, DeleteTicket, EnrollReconcile, EnrollmentSynchronizer, SyncEvent, SyncScope,
};
pub use validation::{
    validate_client, validate_enrollment, validate_program, ClientDraft, EnrollmentDraft,
    ProgramDraft,
};
pub use views::{
    ClientDetailView, ClientProfile, ClientRow, ClientsView, EnrollmentRow, EnrollmentsView,
    ProgramsView, ViewError,
};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
