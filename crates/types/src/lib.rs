//! Shared value types for Careflow.
//!
//! - [`NonEmptyText`]: trimmed text that is guaranteed to contain something
//! - Typed identifiers ([`UserId`], [`PatientId`], [`PharmacyId`], [`RecordId`])
//!
//! ## Canonical identifier form
//!
//! Every identifier wraps a UUID and is rendered as **32 lowercase hexadecimal characters**
//! (no hyphens), for example `550e8400e29b41d4a716446655440000`. Externally supplied
//! identifiers must already be canonical; hyphenated or uppercase forms are rejected so two
//! spellings of the same id can never compare unequal after resolution.

mod id;

pub use id::{PatientId, PharmacyId, RecordId, UserId};

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// Errors returned when parsing identifiers.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("identifier must be 32 lowercase hex characters without hyphens, got: '{0}'")]
    NotCanonical(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a labelled section on a new line, keeping earlier text intact.
    ///
    /// Used for notes fields that only ever grow (cancellation reasons, completion notes).
    pub fn append_section(existing: Option<&NonEmptyText>, label: &str, text: &NonEmptyText) -> Self {
        let section = format!("{label}: {text}");
        match existing {
            Some(prev) => Self(format!("{}\n{}", prev.0, section)),
            None => Self(section),
        }
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_whitespace_only_text() {
        assert!(matches!(NonEmptyText::new("   \n"), Err(TextError::Empty)));
    }

    #[test]
    fn trims_input() {
        let text = NonEmptyText::new("  chest pain ").expect("valid text");
        assert_eq!(text.as_str(), "chest pain");
    }

    #[test]
    fn append_section_keeps_history() {
        let first = NonEmptyText::new("Bring previous results").unwrap();
        let reason = NonEmptyText::new("Patient travelling").unwrap();
        let notes = NonEmptyText::append_section(Some(&first), "Cancellation reason", &reason);
        assert_eq!(
            notes.as_str(),
            "Bring previous results\nCancellation reason: Patient travelling"
        );

        let fresh = NonEmptyText::append_section(None, "Completion notes", &reason);
        assert_eq!(fresh.as_str(), "Completion notes: Patient travelling");
    }

    #[test]
    fn deserialize_rejects_empty_string() {
        let err = serde_json::from_str::<NonEmptyText>("\"  \"");
        assert!(err.is_err());
    }
}
