//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The core never reads environment variables itself; binaries read
//! them and hand the results to [`resolve_registry`] and [`CoreConfig::new`].

use crate::constants::{
    DEFAULT_PRESCRIPTION_VALIDITY_DAYS, DEFAULT_SLOT_MINUTES, DEFAULT_WORKING_HOURS_END,
    DEFAULT_WORKING_HOURS_START,
};
use crate::{CareError, CareResult};
use careflow_registry::PermissionRegistry;
use chrono::Duration;
use std::path::PathBuf;
use std::sync::Arc;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    registry: Arc<PermissionRegistry>,
    prescription_validity: Duration,
    working_hours_start: u32,
    working_hours_end: u32,
    slot_minutes: u32,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::InvalidInput`] if the validity is not positive, the working hours are
    /// not an increasing range within a day, or the slot length is zero or longer than the day.
    pub fn new(
        registry: Arc<PermissionRegistry>,
        prescription_validity_days: i64,
        working_hours_start: u32,
        working_hours_end: u32,
        slot_minutes: u32,
    ) -> CareResult<Self> {
        if prescription_validity_days <= 0 {
            return Err(CareError::InvalidInput(
                "prescription validity must be at least one day".into(),
            ));
        }
        let prescription_validity = Duration::try_days(prescription_validity_days).ok_or_else(
            || {
                CareError::InvalidInput(format!(
                    "prescription validity of {prescription_validity_days} days is out of range"
                ))
            },
        )?;
        if working_hours_start >= working_hours_end || working_hours_end > 24 {
            return Err(CareError::InvalidInput(format!(
                "working hours {working_hours_start}..{working_hours_end} are not a valid range"
            )));
        }
        if slot_minutes == 0 || slot_minutes > (working_hours_end - working_hours_start) * 60 {
            return Err(CareError::InvalidInput(format!(
                "slot length of {slot_minutes} minutes does not fit the working day"
            )));
        }

        Ok(Self {
            registry,
            prescription_validity,
            working_hours_start,
            working_hours_end,
            slot_minutes,
        })
    }

    /// Configuration with the stock working day and validity period.
    pub fn with_defaults(registry: Arc<PermissionRegistry>) -> Self {
        Self {
            registry,
            prescription_validity: Duration::days(DEFAULT_PRESCRIPTION_VALIDITY_DAYS),
            working_hours_start: DEFAULT_WORKING_HOURS_START,
            working_hours_end: DEFAULT_WORKING_HOURS_END,
            slot_minutes: DEFAULT_SLOT_MINUTES,
        }
    }

    pub fn registry(&self) -> &Arc<PermissionRegistry> {
        &self.registry
    }

    pub fn prescription_validity(&self) -> Duration {
        self.prescription_validity
    }

    pub fn working_hours(&self) -> (u32, u32) {
        (self.working_hours_start, self.working_hours_end)
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }
}

/// Load the permission registry without reading environment variables.
///
/// If `override_path` is provided the catalogue is read from that file; otherwise the catalogue
/// embedded in the binary is used.
pub fn resolve_registry(override_path: Option<PathBuf>) -> CareResult<PermissionRegistry> {
    match override_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading permission registry override");
            Ok(PermissionRegistry::from_path(&path)?)
        }
        None => Ok(PermissionRegistry::builtin()?),
    }
}
