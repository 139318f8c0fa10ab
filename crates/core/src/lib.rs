//! # Careflow Core
//!
//! Authorization and lifecycle rules for the Careflow clinical records system.
//!
//! This crate decides whether a principal may perform an action on a clinical record and, when
//! they may, applies the change with optimistic concurrency and records an audit event:
//! - Role permissions come from the immutable registry in `careflow-registry`
//! - Record ownership is evaluated per entity through [`access::OwnedResource`]
//! - Status changes are validated against each entity's transition table in [`lifecycle`]
//! - Writes go through a [`store::RecordStore`], which rejects stale revisions and
//!   conflicting bookings atomically
//!
//! **No transport concerns**: HTTP routing, sessions and persistence engines belong to the
//! surrounding application. Services take the authenticated principal as an argument and
//! never look one up themselves.

pub mod access;
pub mod audit;
pub mod authz;
pub mod clock;
pub mod config;
pub mod constants;
pub mod decision;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod principal;
pub mod reference;
pub mod services;
pub mod store;

pub use access::{OwnedResource, ResourceKind, Subject};
pub use audit::{AuditAction, AuditEvent, AuditOutcome, AuditRecorder, AuditSink};
pub use authz::AuthorizationEngine;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use decision::Decision;
pub use directory::{IdentityDirectory, InMemoryDirectory};
pub use error::{CareError, CareResult};
pub use principal::Principal;
pub use reference::Ref;
pub use services::{CareContext, Plan};
pub use store::{InMemoryStore, Record, RecordStore, Write};
