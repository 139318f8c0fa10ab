//! Role enumeration.

use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The fixed set of roles. Every user holds exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Secretary,
    Patient,
    Pharmacist,
    LabTechnician,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: &'static [Role] = &[
        Role::Admin,
        Role::Doctor,
        Role::Nurse,
        Role::Secretary,
        Role::Patient,
        Role::Pharmacist,
        Role::LabTechnician,
    ];

    /// Parses a role from its wire name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownRole`] if the string is not one of the fixed role names.
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        match s {
            "admin" => Ok(Self::Admin),
            "doctor" => Ok(Self::Doctor),
            "nurse" => Ok(Self::Nurse),
            "secretary" => Ok(Self::Secretary),
            "patient" => Ok(Self::Patient),
            "pharmacist" => Ok(Self::Pharmacist),
            "lab_technician" => Ok(Self::LabTechnician),
            _ => Err(RegistryError::UnknownRole(s.to_owned())),
        }
    }

    /// Returns the wire name of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Doctor => "doctor",
            Self::Nurse => "nurse",
            Self::Secretary => "secretary",
            Self::Patient => "patient",
            Self::Pharmacist => "pharmacist",
            Self::LabTechnician => "lab_technician",
        }
    }

    /// Roles that act as clinical or front-desk staff.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Self::Patient)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()).unwrap(), *role);
        }
    }

    #[test]
    fn rejects_unknown_and_differently_cased_names() {
        assert!(matches!(
            Role::parse("Doctor"),
            Err(RegistryError::UnknownRole(name)) if name == "Doctor"
        ));
        assert!(Role::parse("superuser").is_err());
    }
}
