//! References between records.
//!
//! A record may point at another entity either by bare identifier or by carrying a hydrated
//! copy of it (what a read model or API layer would populate). Ownership comparisons always go
//! through [`Ref::id`] so both shapes resolve to the same canonical identifier.

use careflow_registry::Role;
use careflow_types::{PatientId, PharmacyId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity that has a canonical identifier.
pub trait Identified {
    type Id: Copy + Eq + fmt::Debug + fmt::Display;

    fn id(&self) -> Self::Id;
}

/// Either a bare identifier or the referenced object itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    untagged,
    bound(
        serialize = "T: Serialize, T::Id: Serialize",
        deserialize = "T: Deserialize<'de>, T::Id: Deserialize<'de>"
    )
)]
pub enum Ref<T: Identified> {
    Id(T::Id),
    Object(T),
}

impl<T: Identified> Ref<T> {
    /// The canonical identifier, whichever form this reference holds.
    pub fn id(&self) -> T::Id {
        match self {
            Ref::Id(id) => *id,
            Ref::Object(obj) => obj.id(),
        }
    }

    /// Whether this reference points at `id`.
    pub fn is(&self, id: T::Id) -> bool {
        self.id() == id
    }

    /// The hydrated object, if this reference carries one.
    pub fn object(&self) -> Option<&T> {
        match self {
            Ref::Id(_) => None,
            Ref::Object(obj) => Some(obj),
        }
    }
}

impl<T: Identified> From<T> for Ref<T> {
    fn from(obj: T) -> Self {
        Ref::Object(obj)
    }
}

/// Display form of a user as embedded in other records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Identified for UserSummary {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

/// Display form of a patient profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub id: PatientId,
    pub first_name: String,
    pub last_name: String,
}

impl Identified for PatientSummary {
    type Id = PatientId;

    fn id(&self) -> PatientId {
        self.id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PharmacySummary {
    pub id: PharmacyId,
    pub name: String,
}

impl Identified for PharmacySummary {
    type Id = PharmacyId;

    fn id(&self) -> PharmacyId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "550e8400e29b41d4a716446655440000";

    #[test]
    fn test_bare_and_hydrated_resolve_to_same_id() {
        let id = UserId::parse(RAW).expect("id");
        let bare: Ref<UserSummary> = Ref::Id(id);
        let hydrated: Ref<UserSummary> = UserSummary {
            id,
            name: "Dr. Martin".into(),
            role: Some(Role::Doctor),
        }
        .into();

        assert_eq!(bare.id(), hydrated.id());
        assert!(hydrated.is(id));
        assert!(bare.object().is_none());
        assert_eq!(hydrated.object().map(|u| u.name.as_str()), Some("Dr. Martin"));
    }

    #[test]
    fn test_deserializes_either_shape() {
        let bare: Ref<PatientSummary> =
            serde_json::from_str(&format!("\"{RAW}\"")).expect("bare");
        let hydrated: Ref<PatientSummary> = serde_json::from_str(&format!(
            r#"{{"id":"{RAW}","first_name":"Ana","last_name":"Silva"}}"#
        ))
        .expect("hydrated");

        assert!(matches!(bare, Ref::Id(_)));
        assert!(matches!(hydrated, Ref::Object(_)));
        assert_eq!(bare.id(), hydrated.id());
    }

    #[test]
    fn test_non_canonical_bare_id_is_rejected() {
        let result: Result<Ref<PharmacySummary>, _> =
            serde_json::from_str("\"550e8400-e29b-41d4-a716-446655440000\"");
        assert!(result.is_err());
    }
}
