//! Constants used throughout the core crate.

/// Days a prescription stays valid when no expiry is supplied.
pub const DEFAULT_PRESCRIPTION_VALIDITY_DAYS: i64 = 365;

/// First bookable hour of a doctor's day (UTC).
pub const DEFAULT_WORKING_HOURS_START: u32 = 9;

/// Hour at which the last slot must have started (UTC, exclusive).
pub const DEFAULT_WORKING_HOURS_END: u32 = 17;

/// Length of one availability slot.
pub const DEFAULT_SLOT_MINUTES: u32 = 30;

/// Prefix of generated prescription numbers (`RX-2026-000001`).
pub const PRESCRIPTION_NUMBER_PREFIX: &str = "RX";

/// Prefix of generated lab order numbers (`LAB-2026-000001`).
pub const LAB_ORDER_NUMBER_PREFIX: &str = "LAB";

/// Expected turnaround by lab priority, in hours.
pub const LAB_TURNAROUND_STAT_HOURS: i64 = 2;
pub const LAB_TURNAROUND_URGENT_HOURS: i64 = 24;
pub const LAB_TURNAROUND_ROUTINE_HOURS: i64 = 72;
