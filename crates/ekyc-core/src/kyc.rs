//! The business step: one decoded frame against the store.
//!
//! This is the only module that touches the store. Every store failure is
//! recoverable and collapses to a negative result; the engine never answers
//! a request positively on failure. The report still records that the store
//! misbehaved so the worker's circuit breaker can see an outage.

use tracing::{info, warn};

use crate::codec::{IdentityFrame, Operation};
use crate::store::{Store, UserRecord};

/// What the business step decided for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Publish a reply carrying this verification result.
    Reply(bool),
    /// The frame was already verified; no side effect, no reply.
    AlreadyVerified,
    /// Unrecognised request; no side effect, no reply.
    Ignored,
}

/// Outcome plus the store's health during the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// The decision for this frame.
    pub outcome: Outcome,
    /// Whether any store call failed while deciding.
    pub store_error: bool,
}

impl StepReport {
    const fn clean(outcome: Outcome) -> Self {
        Self {
            outcome,
            store_error: false,
        }
    }
}

/// Applies the business state machine to one decoded frame.
///
/// - A verification request answers with whether `(id, name)` exists.
/// - An add-user request inserts the user if absent and answers with
///   whether the insert created a row.
/// - Everything else produces no reply.
#[must_use]
pub fn respond(frame: &IdentityFrame<'_>, store: &dyn Store) -> StepReport {
    match frame.operation() {
        Operation::VerifyRequest => {
            let (exists, errored) = exists_user(store, frame.id(), frame.name());
            info!(
                id = frame.id(),
                name = frame.name(),
                verified = exists,
                "verification request"
            );
            StepReport {
                outcome: Outcome::Reply(exists),
                store_error: errored,
            }
        }
        Operation::AddUserRequest => {
            let (added, errored) = add_user(store, frame);
            info!(
                id = frame.id(),
                name = frame.name(),
                added,
                "add-user request"
            );
            StepReport {
                outcome: Outcome::Reply(added),
                store_error: errored,
            }
        }
        Operation::AlreadyVerified => {
            info!(name = frame.name(), "identity already verified");
            StepReport::clean(Outcome::AlreadyVerified)
        }
        Operation::Unknown => {
            info!(msg = frame.msg(), "message requires no action");
            StepReport::clean(Outcome::Ignored)
        }
    }
}

/// Existence check with the error contract folded in: any store failure
/// reads as "not present". Returns `(exists, errored)`.
fn exists_user(store: &dyn Store, id: &str, name: &str) -> (bool, bool) {
    match store.exists_user(id, name) {
        Ok(exists) => (exists, false),
        Err(e) => {
            warn!(id, name, error = %e, "existence check failed");
            (false, true)
        }
    }
}

/// Insert guarded by an existence check; the unique constraint settles the
/// race when two workers add the same pair at once. Returns
/// `(added, errored)`.
fn add_user(store: &dyn Store, frame: &IdentityFrame<'_>) -> (bool, bool) {
    let (exists, errored) = exists_user(store, frame.id(), frame.name());
    if errored {
        return (false, true);
    }
    if exists {
        info!(id = frame.id(), name = frame.name(), "user already present");
        return (false, false);
    }
    let user = UserRecord {
        doc_type: frame.doc_type().to_string(),
        id: frame.id().to_string(),
        name: frame.name().to_string(),
        date_of_issue: frame.date_of_issue().to_string(),
        date_of_expiry: frame.date_of_expiry().to_string(),
        address: frame.address().to_string(),
    };
    match store.insert_user(&user) {
        Ok(inserted) => (inserted, false),
        Err(e) => {
            warn!(id = frame.id(), name = frame.name(), error = %e, "insert failed");
            (false, true)
        }
    }
}
