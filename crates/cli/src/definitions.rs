//! Definitions file: forms and processes with nested steps, as JSON.
//!
//! ```json
//! {
//!   "forms": [{ "slug": "contact", "title": "Contact details" }],
//!   "processes": [{
//!     "title": "Onboarding",
//!     "slug": "onboarding",
//!     "published": true,
//!     "steps": [{ "form": "contact", "title": "Who are you?" }]
//!   }]
//! }
//! ```
//!
//! `check` validates a file without touching storage; `seed` loads it
//! through [`ProcessManager`], so slugs, passwords and ordering follow the
//! same rules as the owner API.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stepwise_core::{is_valid_slug, FormId, FormRecord, JsonMap, OwnerId, Visibility};
use stepwise_engine::{EngineError, NewProcess, NewStep, ProcessManager};
use stepwise_storage::ProcessStorage;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DefinitionsFile {
    #[serde(default)]
    pub(crate) forms: Vec<FormDef>,
    #[serde(default)]
    pub(crate) processes: Vec<ProcessDef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FormDef {
    #[serde(default)]
    pub(crate) id: Option<FormId>,
    pub(crate) slug: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProcessDef {
    #[serde(flatten)]
    pub(crate) process: NewProcess,
    #[serde(default)]
    pub(crate) published: bool,
    #[serde(default)]
    pub(crate) steps: Vec<StepDef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StepDef {
    /// Slug of a form declared in the same file.
    pub(crate) form: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default = "required_by_default")]
    pub(crate) is_required: bool,
    #[serde(default)]
    pub(crate) conditions: JsonMap,
}

fn required_by_default() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum DefinitionsError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: invalid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("definitions file has {} problem(s)", .0.len())]
    Invalid(Vec<Problem>),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One thing wrong with a definitions file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Problem {
    /// Where in the file, e.g. `processes[1].steps[0]`.
    pub(crate) at: String,
    pub(crate) message: String,
}

impl Problem {
    fn new(at: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            at: at.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.at, self.message)
    }
}

pub(crate) fn load(path: &Path) -> Result<DefinitionsFile, DefinitionsError> {
    let text = std::fs::read_to_string(path).map_err(|source| DefinitionsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DefinitionsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Offline validation. An empty result means the file will seed cleanly
/// into an empty database.
pub(crate) fn check(file: &DefinitionsFile) -> Vec<Problem> {
    let mut problems = Vec::new();

    let mut form_slugs = HashSet::new();
    for (i, form) in file.forms.iter().enumerate() {
        let at = format!("forms[{i}]");
        if form.title.trim().is_empty() {
            problems.push(Problem::new(&at, "title is empty"));
        }
        if !form_slugs.insert(form.slug.as_str()) {
            problems.push(Problem::new(&at, format!("duplicate form slug '{}'", form.slug)));
        }
    }

    let mut process_slugs = HashSet::new();
    for (i, def) in file.processes.iter().enumerate() {
        let at = format!("processes[{i}]");
        let process = &def.process;
        if process.title.trim().is_empty() {
            problems.push(Problem::new(&at, "title is empty"));
        }
        if let Some(slug) = &process.slug {
            if !is_valid_slug(slug) {
                problems.push(Problem::new(&at, format!("invalid slug '{slug}'")));
            } else if !process_slugs.insert(slug.as_str()) {
                problems.push(Problem::new(&at, format!("duplicate process slug '{slug}'")));
            }
        }
        if process.visibility == Visibility::Private
            && process.password.as_deref().map_or(true, str::is_empty)
        {
            problems.push(Problem::new(&at, "private process needs a password"));
        }
        for (j, step) in def.steps.iter().enumerate() {
            let at = format!("{at}.steps[{j}]");
            if step.title.trim().is_empty() {
                problems.push(Problem::new(&at, "title is empty"));
            }
            if !form_slugs.contains(step.form.as_str()) {
                problems.push(Problem::new(&at, format!("unknown form '{}'", step.form)));
            }
        }
    }
    problems
}

/// What `seed` created.
#[derive(Debug, Default, Serialize)]
pub(crate) struct SeedReport {
    pub(crate) forms: usize,
    pub(crate) processes: Vec<String>,
    pub(crate) steps: usize,
}

/// Load `file` for `owner`. Fails before writing anything if `check` finds
/// problems; otherwise each form, process and step is created in turn.
pub(crate) async fn seed<S: ProcessStorage>(
    manager: &ProcessManager<S>,
    owner: &OwnerId,
    file: DefinitionsFile,
) -> Result<SeedReport, DefinitionsError> {
    let problems = check(&file);
    if !problems.is_empty() {
        return Err(DefinitionsError::Invalid(problems));
    }

    let mut report = SeedReport::default();
    let mut forms: HashMap<String, FormId> = HashMap::new();
    for def in file.forms {
        let form = FormRecord {
            id: def.id.unwrap_or_default(),
            slug: def.slug,
            title: def.title,
            description: def.description,
        };
        forms.insert(form.slug.clone(), form.id);
        manager.register_form(form).await?;
        report.forms += 1;
    }

    for def in file.processes {
        let process = manager.create_process(owner, def.process).await?;
        for step in def.steps {
            let form_id = forms
                .get(&step.form)
                .copied()
                .ok_or_else(|| EngineError::not_found("form"))?;
            let new = NewStep {
                form_id,
                title: step.title,
                description: step.description,
                order_index: None,
                is_required: step.is_required,
                conditions: step.conditions,
            };
            manager.create_step(owner, &process.slug, new).await?;
            report.steps += 1;
        }
        if def.published {
            manager.publish(owner, &process.slug).await?;
        }
        tracing::info!(slug = %process.slug, "seeded process");
        report.processes.push(process.slug);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stepwise_engine::{EngineConfig, HashingParams};
    use stepwise_storage::MemoryStorage;

    use super::*;

    const GOOD: &str = r#"{
        "forms": [
            {"slug": "contact", "title": "Contact details"},
            {"slug": "payment", "title": "Payment", "description": "Card only"}
        ],
        "processes": [
            {
                "title": "Onboarding",
                "slug": "onboarding",
                "published": true,
                "steps": [
                    {"form": "contact", "title": "Who are you?"},
                    {"form": "payment", "title": "Pay", "is_required": false}
                ]
            },
            {
                "title": "Members area",
                "visibility": "private",
                "password": "s3cret",
                "process_type": "free",
                "steps": [{"form": "contact", "title": "Update details"}]
            }
        ]
    }"#;

    fn parse(json: &str) -> DefinitionsFile {
        serde_json::from_str(json).unwrap()
    }

    fn manager() -> ProcessManager<MemoryStorage> {
        let config = EngineConfig {
            hashing: HashingParams::minimal(),
            ..EngineConfig::default()
        };
        ProcessManager::new(Arc::new(MemoryStorage::new()), &config).unwrap()
    }

    #[test]
    fn good_file_has_no_problems() {
        assert!(check(&parse(GOOD)).is_empty());
    }

    #[test]
    fn check_reports_every_problem_with_its_location() {
        let file = parse(
            r#"{
                "forms": [{"slug": "a", "title": "A"}, {"slug": "a", "title": "A again"}],
                "processes": [
                    {"title": "One", "slug": "dup", "steps": [{"form": "missing", "title": "x"}]},
                    {"title": "Two", "slug": "dup"},
                    {"title": "Three", "slug": "Bad Slug", "visibility": "private"}
                ]
            }"#,
        );
        let problems = check(&file);
        let rendered: Vec<String> = problems.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "forms[1]: duplicate form slug 'a'",
                "processes[0].steps[0]: unknown form 'missing'",
                "processes[1]: duplicate process slug 'dup'",
                "processes[2]: invalid slug 'Bad Slug'",
                "processes[2]: private process needs a password",
            ]
        );
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let err = serde_json::from_str::<DefinitionsFile>(r#"{"forms": [], "extra": 1}"#);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn seed_creates_everything_in_order() {
        let manager = manager();
        let owner = OwnerId::new("seed-owner");
        let report = seed(&manager, &owner, parse(GOOD)).await.unwrap();

        assert_eq!(report.forms, 2);
        assert_eq!(report.steps, 3);
        assert_eq!(report.processes, vec!["onboarding", "members-area"]);

        let onboarding = manager.get_process(&owner, "onboarding").await.unwrap();
        assert!(onboarding.published_at.is_some());
        let steps = manager.list_steps(&owner, "onboarding").await.unwrap();
        let titles: Vec<&str> = steps.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Who are you?", "Pay"]);
        assert!(!steps[1].is_required);

        let members = manager.get_process(&owner, "members-area").await.unwrap();
        assert!(members.is_password_protected());
        assert!(members.published_at.is_none());
    }

    #[tokio::test]
    async fn seed_refuses_an_invalid_file() {
        let manager = manager();
        let file = parse(r#"{"processes": [{"title": "x", "steps": [{"form": "nope", "title": "y"}]}]}"#);
        let err = seed(&manager, &OwnerId::new("o"), file).await.unwrap_err();
        assert!(matches!(err, DefinitionsError::Invalid(ref p) if p.len() == 1));
    }
}
