//! Lifecycle state machines.
//!
//! Each mutable entity has a status enum with a static transition table. Statuses with no
//! outgoing transitions are terminal. The entity modules also hold the record types, since a
//! record's mutability rules are a function of its status.

pub mod appointment;
pub mod consultation;
pub mod document;
pub mod lab_order;
pub mod lab_result;
pub mod prescription;

use crate::access::{OwnedResource, ResourceKind};
use crate::{CareError, CareResult};
use careflow_types::{NonEmptyText, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A status field governed by a transition table.
pub trait LifecycleStatus: Copy + Eq + Debug + 'static {
    const KIND: ResourceKind;

    fn as_str(&self) -> &'static str;

    /// Statuses reachable from this one in a single step.
    fn allowed_next(&self) -> &'static [Self];

    fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    fn can_transition_to(&self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }
}

/// Checks a single step against the table.
///
/// # Errors
///
/// Returns [`CareError::InvalidTransition`] for any pair absent from the table.
pub fn check_transition<S: LifecycleStatus>(from: S, to: S) -> CareResult<S> {
    if from.can_transition_to(to) {
        return Ok(to);
    }
    Err(CareError::InvalidTransition(format!(
        "{} cannot move from {} to {}",
        S::KIND,
        from.as_str(),
        to.as_str()
    )))
}

/// Mutability rules of a record, as a function of its status.
///
/// Consulted by [`crate::authz::AuthorizationEngine::can_modify`] and
/// [`crate::authz::AuthorizationEngine::can_cancel`] on top of the ownership check.
pub trait Governed: OwnedResource {
    type Status: LifecycleStatus;

    /// Status a cancellation moves to, for entities that can be cancelled.
    const CANCELLED: Option<Self::Status>;

    /// Admins may edit content in a locked status that is not terminal.
    const ADMIN_OVERRIDE: bool = true;

    /// The status as of `now`.
    fn status_at(&self, now: DateTime<Utc>) -> Self::Status;

    /// Content edits are refused in `status`.
    fn locks_content(status: Self::Status) -> bool;
}

/// Human-facing sequence number, `{prefix}-{year}-{sequence:06}`.
pub fn sequence_number(prefix: &str, year: i32, sequence: usize) -> String {
    format!("{prefix}-{year}-{sequence:06}")
}

/// Who cancelled a record, when, and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub cancelled_by: UserId,
    pub cancelled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<NonEmptyText>,
}
