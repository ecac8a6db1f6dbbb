//! Shared primitive types for the EMTCT workspace.
//!
//! Identifier newtypes keep patient, pregnancy and lab identifiers from being mixed up
//! when they cross the engine's join steps. All identifiers in the clinical source of
//! record are integer keys, so each newtype wraps an `i64`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

integer_id!(
    /// Patient identifier in the clinical source of record (mothers and infants alike).
    PatientId
);
integer_id!(
    /// Pregnancy identifier; the identity key shared by the source and the mirror registry.
    PregnancyId
);
integer_id!(
    /// Laboratory test order (request) identifier.
    OrderId
);
integer_id!(
    /// Order-item identifier: the unit that results and samples are matched against.
    OrderItemId
);
integer_id!(
    /// Test result identifier. Reconciled lab results are unique by this key.
    ResultId
);
integer_id!(SampleId);

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction. Used for the
/// audit user names stamped on screening records, which must never be blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, returning `TextError::Empty` for blank input.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NonEmptyText {
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
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  nurse@moh.gov.bz ").expect("non-empty");
        assert_eq!(text.as_str(), "nurse@moh.gov.bz");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert!(matches!(NonEmptyText::new("   "), Err(TextError::Empty)));
    }

    #[test]
    fn non_empty_text_deserialize_rejects_blank() {
        let err = serde_json::from_str::<NonEmptyText>("\"\"").expect_err("blank should fail");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn ids_serialize_as_bare_integers() {
        let json = serde_json::to_string(&PregnancyId::new(42)).expect("serialize");
        assert_eq!(json, "42");
        let back: OrderItemId = serde_json::from_str("7").expect("deserialize");
        assert_eq!(back.get(), 7);
    }

    #[test]
    fn distinct_id_types_display_raw_value() {
        assert_eq!(PatientId::from(1001).to_string(), "1001");
        assert_eq!(ResultId::new(5).to_string(), "5");
    }
}
