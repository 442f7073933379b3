//! Process definitions: processes, their ordered steps, and the forms the
//! steps point at.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::{FormId, OwnerId, ProcessId, StepId};
use crate::slug::is_valid_slug;
use crate::JsonMap;

/// Violations of the definition invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("process title is required")]
    EmptyTitle,

    #[error("step title is required")]
    EmptyStepTitle,

    #[error("invalid slug '{0}': use ASCII letters, digits, '-' and '_' (at most 100)")]
    InvalidSlug(String),

    #[error("password is required for private processes")]
    MissingSecret,

    #[error("public processes cannot carry an access secret")]
    UnexpectedSecret,

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Who may see a process without a password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(DefinitionError::UnknownVariant {
                kind: "visibility",
                value: other.to_string(),
            }),
        }
    }
}

/// How a visitor moves through the steps.
///
/// Linear processes expose a single cursor moved by advance/retreat. Free
/// processes let the visitor complete steps in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Linear,
    Free,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Linear => "linear",
            ProcessType::Free => "free",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessType {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ProcessType::Linear),
            "free" => Ok(ProcessType::Free),
            other => Err(DefinitionError::UnknownVariant {
                kind: "process type",
                value: other.to_string(),
            }),
        }
    }
}

/// A named multi-step workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub owner_id: OwnerId,
    pub title: String,
    pub description: Option<String>,
    /// Globally unique, URL-safe.
    pub slug: String,
    pub visibility: Visibility,
    /// PHC-format hash of the access password. Never the plaintext.
    #[serde(skip_serializing)]
    #[serde(default)]
    pub access_secret: Option<String>,
    pub process_type: ProcessType,
    pub is_active: bool,
    #[serde(default)]
    pub settings: JsonMap,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default)]
    pub published_at: Option<OffsetDateTime>,
}

impl Process {
    /// Whether visitors must unlock the process with a password.
    pub fn is_password_protected(&self) -> bool {
        self.visibility == Visibility::Private
            && self.access_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Set visibility together with its secret, enforcing the pairing rule:
    /// public always clears the secret, private keeps the one supplied.
    pub fn set_access(&mut self, visibility: Visibility, secret_hash: Option<String>) {
        self.visibility = visibility;
        self.access_secret = match visibility {
            Visibility::Public => None,
            Visibility::Private => secret_hash.filter(|s| !s.is_empty()),
        };
    }

    /// Check the definition invariants.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.title.trim().is_empty() {
            return Err(DefinitionError::EmptyTitle);
        }
        if !is_valid_slug(&self.slug) {
            return Err(DefinitionError::InvalidSlug(self.slug.clone()));
        }
        match (self.visibility, self.access_secret.as_deref()) {
            (Visibility::Private, None) | (Visibility::Private, Some("")) => {
                Err(DefinitionError::MissingSecret)
            }
            (Visibility::Public, Some(_)) => Err(DefinitionError::UnexpectedSecret),
            _ => Ok(()),
        }
    }
}

/// One stage of a process, bound to exactly one form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: StepId,
    pub process_id: ProcessId,
    pub form_id: FormId,
    pub title: String,
    pub description: Option<String>,
    /// Position within the process. Unique per process.
    pub order_index: u32,
    pub is_required: bool,
    /// Conditional display rules, interpreted by the rendering collaborator.
    #[serde(default)]
    pub conditions: JsonMap,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProcessStep {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.title.trim().is_empty() {
            return Err(DefinitionError::EmptyStepTitle);
        }
        Ok(())
    }
}

/// The slice of a form the engine needs: enough to point a visitor at it.
/// Field definitions stay with the form collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRecord {
    pub id: FormId,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(visibility: Visibility, secret: Option<&str>) -> Process {
        let now = OffsetDateTime::UNIX_EPOCH;
        Process {
            id: ProcessId::new(),
            owner_id: OwnerId::new("owner-1"),
            title: "Onboarding".to_string(),
            description: None,
            slug: "onboarding".to_string(),
            visibility,
            access_secret: secret.map(str::to_string),
            process_type: ProcessType::Linear,
            is_active: true,
            settings: JsonMap::new(),
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }

    #[test]
    fn private_without_secret_is_invalid() {
        assert_eq!(
            process(Visibility::Private, None).validate(),
            Err(DefinitionError::MissingSecret)
        );
        assert_eq!(
            process(Visibility::Private, Some("")).validate(),
            Err(DefinitionError::MissingSecret)
        );
    }

    #[test]
    fn public_with_secret_is_invalid() {
        assert_eq!(
            process(Visibility::Public, Some("$argon2id$...")).validate(),
            Err(DefinitionError::UnexpectedSecret)
        );
    }

    #[test]
    fn set_access_public_clears_secret() {
        let mut p = process(Visibility::Private, Some("$argon2id$abc"));
        p.set_access(Visibility::Public, Some("$argon2id$abc".to_string()));
        assert_eq!(p.access_secret, None);
        assert!(p.validate().is_ok());
        assert!(!p.is_password_protected());
    }

    #[test]
    fn private_with_secret_is_protected() {
        let p = process(Visibility::Private, Some("$argon2id$abc"));
        assert!(p.validate().is_ok());
        assert!(p.is_password_protected());
    }

    #[test]
    fn secret_is_never_serialized() {
        let p = process(Visibility::Private, Some("$argon2id$abc"));
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("access_secret").is_none());
        assert_eq!(json["visibility"], "private");
    }

    #[test]
    fn enum_parsing_rejects_unknown_values() {
        assert_eq!("linear".parse::<ProcessType>(), Ok(ProcessType::Linear));
        assert!("branching".parse::<ProcessType>().is_err());
        assert!("secret".parse::<Visibility>().is_err());
    }
}
