//! Per-entity services.
//!
//! Every service follows the same pipeline for a mutating action:
//! principal present → role permission → record ownership → lifecycle guard → conditional
//! write → audit. The first four steps are pure and produce a [`Plan`]; `decide` stops there and
//! reports the outcome, `apply` executes the plan against the store and records the outcome.

pub mod appointment;
pub mod consultation;
pub mod document;
pub mod lab_order;
pub mod lab_result;
pub mod patient;
pub mod prescription;

use crate::access::{ResourceKind, Subject};
use crate::audit::{AuditAction, AuditRecorder};
use crate::authz::AuthorizationEngine;
use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::directory::IdentityDirectory;
use crate::principal::Principal;
use crate::store::{Record, RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_types::RecordId;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Collaborators shared by every service.
#[derive(Clone)]
pub struct CareContext {
    cfg: Arc<CoreConfig>,
    engine: AuthorizationEngine,
    directory: Arc<dyn IdentityDirectory>,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
}

impl CareContext {
    pub fn new(
        cfg: Arc<CoreConfig>,
        directory: Arc<dyn IdentityDirectory>,
        audit: AuditRecorder,
    ) -> Self {
        let engine = AuthorizationEngine::new(cfg.registry().clone());
        Self {
            cfg,
            engine,
            directory,
            audit,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cfg(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    pub fn directory(&self) -> &dyn IdentityDirectory {
        self.directory.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn subject<'a>(&'a self, principal: &'a Principal) -> Subject<'a> {
        Subject::new(principal, self.directory.as_ref(), self.now())
    }

    /// Runs `op` and records its outcome against `target`, or against the created record's id
    /// when there was no target.
    pub(crate) fn audited<R: Record>(
        &self,
        principal: Option<&Principal>,
        action: AuditAction,
        kind: ResourceKind,
        target: Option<RecordId>,
        op: impl FnOnce() -> CareResult<R>,
    ) -> CareResult<R> {
        let result = op();
        let resource_id = target.or_else(|| result.as_ref().ok().map(Record::id));
        self.audit
            .record_result(principal, action, kind, resource_id, self.now(), &result);
        result
    }
}

/// Writes a service intends to make, computed without side effects.
///
/// A plan holds one write, or two applied in order (for example superseding a document version
/// before storing its replacement). Executing it returns the record of the last write.
#[derive(Debug)]
pub struct Plan<R> {
    first: Write<R>,
    then: Option<Write<R>>,
    next_state: Option<&'static str>,
}

impl<R: Record> Plan<R> {
    pub(crate) fn new(write: Write<R>, next_state: Option<&'static str>) -> Self {
        Self {
            first: write,
            then: None,
            next_state,
        }
    }

    pub(crate) fn followed_by(mut self, write: Write<R>) -> Self {
        self.then = Some(write);
        self
    }

    /// Status the returned record will hold, when the entity has a lifecycle.
    pub fn next_state(&self) -> Option<&'static str> {
        self.next_state
    }

    /// The record as it will be stored by the last write.
    pub fn record(&self) -> &R {
        self.then.as_ref().unwrap_or(&self.first).record()
    }

    pub fn execute(self, store: &dyn RecordStore<R>) -> CareResult<R> {
        let first = store.apply(self.first)?;
        match self.then {
            Some(write) => store.apply(write),
            None => Ok(first),
        }
    }
}

/// Evaluates a write's conflict guards against the current store contents.
///
/// The store evaluates the same guards again atomically with the write; this early pass lets
/// `decide` report a conflict without writing anything.
pub(crate) fn precheck<R: Record>(store: &dyn RecordStore<R>, write: &Write<R>) -> CareResult<()> {
    let guards = write.guards();
    if guards.is_empty() {
        return Ok(());
    }
    let id = write.record().id();
    let others = store.find(&|r: &R| r.id() != id)?;
    match guards
        .iter()
        .find(|guard| others.iter().any(|r| guard.matches(r)))
    {
        Some(guard) => Err(CareError::Conflict(guard.reason().to_owned())),
        None => Ok(()),
    }
}

/// Loads a record or fails with [`CareError::NotFound`].
pub(crate) fn load<R: Record>(
    store: &dyn RecordStore<R>,
    kind: ResourceKind,
    id: RecordId,
) -> CareResult<R> {
    store
        .find_by_id(id)?
        .ok_or_else(|| CareError::NotFound(kind.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support;
