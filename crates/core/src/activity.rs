//! Records produced by collaborators around a run: form submissions and
//! process views. The engine reads submissions to check session ownership
//! and appends views for the analytics consumer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::{FormId, ProcessId, SubmissionId, ViewId};
use crate::JsonMap;

/// A form submission as far as step completion cares: which form, and
/// which session sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: SubmissionId,
    pub form_id: FormId,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// One recorded visit to a process page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessViewRecord {
    pub id: ViewId,
    pub process_id: ProcessId,
    pub session_id: String,
    pub ip_address: Option<String>,
    #[serde(default)]
    pub metadata: JsonMap,
    #[serde(with = "time::serde::rfc3339")]
    pub viewed_at: OffsetDateTime,
}
