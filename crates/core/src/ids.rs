//! Identifier newtypes.
//!
//! Every persisted entity is keyed by a random (v4) UUID wrapped in its own
//! type so that a step id can never be passed where a progress id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a [`crate::Process`].
    ProcessId
);
uuid_id!(
    /// Identifier of a [`crate::ProcessStep`].
    StepId
);
uuid_id!(
    /// Identifier of a [`crate::FormRecord`].
    FormId
);
uuid_id!(
    /// Identifier of a [`crate::Progress`].
    ProgressId
);
uuid_id!(
    /// Identifier of a [`crate::StepCompletion`].
    CompletionId
);
uuid_id!(
    /// Identifier of a [`crate::SubmissionRecord`].
    SubmissionId
);
uuid_id!(
    /// Identifier of a [`crate::ProcessViewRecord`].
    ViewId
);

/// Reference to a user account managed outside the engine.
///
/// Used both for process owners and for authenticated visitors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display() {
        let id = StepId::new();
        let parsed: StepId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn malformed_id_is_rejected() {
        assert!("not-a-uuid".parse::<ProcessId>().is_err());
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let id = ProgressId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }
}
