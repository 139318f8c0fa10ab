//! Side-effect free answers for API layers that want to ask before acting.

use crate::CareResult;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Lifecycle status the target would hold after the action, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl Decision {
    pub fn allow(next_state: Option<&str>) -> Self {
        Self {
            allowed: true,
            reason: None,
            next_state: next_state.map(str::to_owned),
            status_code: None,
        }
    }

    /// Summarises a planning result, keeping the error text and status of a refusal.
    pub fn from_plan<P>(plan: &CareResult<P>, next_state: impl Fn(&P) -> Option<&'static str>) -> Self {
        match plan {
            Ok(p) => Self::allow(next_state(p)),
            Err(err) => Self {
                allowed: false,
                reason: Some(err.to_string()),
                next_state: None,
                status_code: Some(err.status_code()),
            },
        }
    }
}
