//! Typed identifiers in canonical form.
//!
//! Each identifier is a distinct type so a patient-profile id can never be compared against a
//! user id by accident. Clinical records reference patients by [`PatientId`]; principals are
//! identified by [`UserId`].

use crate::IdError;
use std::{fmt, str::FromStr};
use uuid::Uuid;

macro_rules! canonical_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parses an identifier that must already be in canonical form.
            ///
            /// # Errors
            ///
            /// Returns [`IdError::NotCanonical`] for hyphenated, uppercase, short or non-hex input.
            pub fn parse(input: &str) -> Result<Self, IdError> {
                if !is_canonical(input) {
                    return Err(IdError::NotCanonical(input.to_owned()));
                }
                Uuid::parse_str(input)
                    .map(Self)
                    .map_err(|_| IdError::NotCanonical(input.to_owned()))
            }

            /// Returns the underlying UUID.
            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

canonical_id!(
    /// Identifier of an authenticated user account.
    UserId
);
canonical_id!(
    /// Identifier of a patient profile (distinct from the patient's user account).
    PatientId
);
canonical_id!(
    /// Identifier of a pharmacy.
    PharmacyId
);
canonical_id!(
    /// Identifier of a clinical record (appointment, lab order, prescription, document, ...).
    RecordId
);

/// Returns true if `input` is exactly 32 lowercase hex characters.
fn is_canonical(input: &str) -> bool {
    input.len() == 32
        && input
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_canonical_and_parses_back() {
        let id = UserId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(UserId::parse(&text).expect("canonical"), id);
    }

    #[test]
    fn rejects_hyphenated_and_uppercase_forms() {
        assert!(PatientId::parse("550e8400-e29b-41d4-a716-446655440000").is_err());
        assert!(PatientId::parse("550E8400E29B41D4A716446655440000").is_err());
        assert!(PatientId::parse("550e8400").is_err());
        assert!(PatientId::parse("550e8400e29b41d4a716446655440000").is_ok());
    }

    #[test]
    fn serde_uses_canonical_string() {
        let id = RecordId::parse("550e8400e29b41d4a716446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400e29b41d4a716446655440000\"");
        let back: RecordId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
