//! Synchronous per-table operations on a borrowed connection.
//!
//! Each store wraps `&Connection` the way the snapshot hands it out. No
//! method here awaits, so prepared statements never live across a
//! suspension point.

use rusqlite::{params, Connection, OptionalExtension, Row};
use stepwise_core::{
    sort_steps, FormId, FormRecord, OwnerId, Process, ProcessId, ProcessStep, ProcessViewRecord,
    Progress, ProgressId, ProgressStatus, StepCompletion, StepId, SubmissionId, SubmissionRecord,
};
use stepwise_storage::StorageError;

use crate::codec::{json, json_map, parsed, parsed_opt, timestamp, timestamp_opt, ts, ts_opt};

// ── Forms and submissions ────────────────────────────────────────────────────

pub(crate) struct FormStore<'a> {
    conn: &'a Connection,
}

impl<'a> FormStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, form: &FormRecord) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO forms (id, slug, title, description) VALUES (?, ?, ?, ?)",
            params![
                form.id.to_string(),
                form.slug,
                form.title,
                form.description
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, form_id: FormId) -> crate::Result<FormRecord> {
        self.conn
            .query_row(
                "SELECT id, slug, title, description FROM forms WHERE id = ?",
                params![form_id.to_string()],
                |row| {
                    Ok(FormRecord {
                        id: parsed(row, 0)?,
                        slug: row.get(1)?,
                        title: row.get(2)?,
                        description: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| {
                StorageError::FormNotFound {
                    form_id: form_id.to_string(),
                }
                .into()
            })
    }

    pub fn insert_submission(&self, submission: &SubmissionRecord) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO submissions (id, form_id, session_id, submitted_at) VALUES (?, ?, ?, ?)",
            params![
                submission.id.to_string(),
                submission.form_id.to_string(),
                submission.session_id,
                ts(submission.submitted_at)?
            ],
        )?;
        Ok(())
    }

    pub fn get_submission(&self, submission_id: SubmissionId) -> crate::Result<SubmissionRecord> {
        self.conn
            .query_row(
                "SELECT id, form_id, session_id, submitted_at FROM submissions WHERE id = ?",
                params![submission_id.to_string()],
                |row| {
                    Ok(SubmissionRecord {
                        id: parsed(row, 0)?,
                        form_id: parsed(row, 1)?,
                        session_id: row.get(2)?,
                        submitted_at: timestamp(row, 3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| {
                StorageError::SubmissionNotFound {
                    submission_id: submission_id.to_string(),
                }
                .into()
            })
    }
}

// ── Processes ────────────────────────────────────────────────────────────────

const PROCESS_COLUMNS: &str = "id, owner_id, title, description, slug, visibility, access_secret, \
     process_type, is_active, settings, created_at, updated_at, published_at";

fn process_from_row(row: &Row<'_>) -> rusqlite::Result<Process> {
    Ok(Process {
        id: parsed(row, 0)?,
        owner_id: OwnerId::new(row.get::<_, String>(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        slug: row.get(4)?,
        visibility: parsed(row, 5)?,
        access_secret: row.get(6)?,
        process_type: parsed(row, 7)?,
        is_active: row.get(8)?,
        settings: json_map(row, 9)?,
        created_at: timestamp(row, 10)?,
        updated_at: timestamp(row, 11)?,
        published_at: timestamp_opt(row, 12)?,
    })
}

pub(crate) struct ProcessStore<'a> {
    conn: &'a Connection,
}

impl<'a> ProcessStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, p: &Process) -> crate::Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO processes ({PROCESS_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                p.id.to_string(),
                p.owner_id.as_str(),
                p.title,
                p.description,
                p.slug,
                p.visibility.as_str(),
                p.access_secret,
                p.process_type.as_str(),
                p.is_active,
                json(&p.settings)?,
                ts(p.created_at)?,
                ts(p.updated_at)?,
                ts_opt(p.published_at)?
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, p: &Process) -> crate::Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE processes
            SET owner_id = ?, title = ?, description = ?, slug = ?, visibility = ?,
                access_secret = ?, process_type = ?, is_active = ?, settings = ?,
                updated_at = ?, published_at = ?
            WHERE id = ?
            "#,
            params![
                p.owner_id.as_str(),
                p.title,
                p.description,
                p.slug,
                p.visibility.as_str(),
                p.access_secret,
                p.process_type.as_str(),
                p.is_active,
                json(&p.settings)?,
                ts(p.updated_at)?,
                ts_opt(p.published_at)?,
                p.id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::ProcessNotFound {
                key: p.id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn delete(&self, process_id: ProcessId) -> crate::Result<()> {
        let changed = self.conn.execute(
            "DELETE FROM processes WHERE id = ?",
            params![process_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::ProcessNotFound {
                key: process_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn find<P: rusqlite::Params>(&self, filter: &str, args: P) -> crate::Result<Option<Process>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {PROCESS_COLUMNS} FROM processes WHERE {filter}"),
                args,
                process_from_row,
            )
            .optional()?)
    }

    pub fn get(&self, process_id: ProcessId) -> crate::Result<Process> {
        self.find("id = ?", params![process_id.to_string()])?
            .ok_or_else(|| {
                StorageError::ProcessNotFound {
                    key: process_id.to_string(),
                }
                .into()
            })
    }

    pub fn get_owned(&self, owner_id: &OwnerId, slug: &str) -> crate::Result<Process> {
        self.find("slug = ? AND owner_id = ?", params![slug, owner_id.as_str()])?
            .ok_or_else(|| {
                StorageError::ProcessNotFound {
                    key: slug.to_string(),
                }
                .into()
            })
    }

    pub fn get_public(&self, slug: &str) -> crate::Result<Process> {
        self.find("slug = ? AND is_active = 1", params![slug])?
            .ok_or_else(|| {
                StorageError::ProcessNotFound {
                    key: slug.to_string(),
                }
                .into()
            })
    }

    pub fn slug_exists(&self, slug: &str) -> crate::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM processes WHERE slug = ?",
            params![slug],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

// ── Steps ────────────────────────────────────────────────────────────────────

const STEP_COLUMNS: &str = "id, process_id, form_id, title, description, order_index, \
     is_required, conditions, created_at, updated_at";

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<ProcessStep> {
    Ok(ProcessStep {
        id: parsed(row, 0)?,
        process_id: parsed(row, 1)?,
        form_id: parsed(row, 2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        order_index: row.get(5)?,
        is_required: row.get(6)?,
        conditions: json_map(row, 7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn step_not_found(step_id: StepId) -> crate::Error {
    StorageError::StepNotFound {
        step_id: step_id.to_string(),
    }
    .into()
}

pub(crate) struct StepStore<'a> {
    conn: &'a Connection,
}

impl<'a> StepStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, s: &ProcessStep) -> crate::Result<()> {
        self.conn.execute(
            &format!("INSERT INTO process_steps ({STEP_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                s.id.to_string(),
                s.process_id.to_string(),
                s.form_id.to_string(),
                s.title,
                s.description,
                s.order_index,
                s.is_required,
                json(&s.conditions)?,
                ts(s.created_at)?,
                ts(s.updated_at)?
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, s: &ProcessStep) -> crate::Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE process_steps
            SET form_id = ?, title = ?, description = ?, order_index = ?, is_required = ?,
                conditions = ?, updated_at = ?
            WHERE id = ? AND process_id = ?
            "#,
            params![
                s.form_id.to_string(),
                s.title,
                s.description,
                s.order_index,
                s.is_required,
                json(&s.conditions)?,
                ts(s.updated_at)?,
                s.id.to_string(),
                s.process_id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(step_not_found(s.id));
        }
        Ok(())
    }

    pub fn delete(&self, process_id: ProcessId, step_id: StepId) -> crate::Result<()> {
        let changed = self.conn.execute(
            "DELETE FROM process_steps WHERE id = ? AND process_id = ?",
            params![step_id.to_string(), process_id.to_string()],
        )?;
        if changed == 0 {
            return Err(step_not_found(step_id));
        }
        Ok(())
    }

    pub fn list(&self, process_id: ProcessId) -> crate::Result<Vec<ProcessStep>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STEP_COLUMNS} FROM process_steps WHERE process_id = ? \
             ORDER BY order_index, created_at, id"
        ))?;
        let mut steps = stmt
            .query_map(params![process_id.to_string()], step_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        sort_steps(&mut steps);
        Ok(steps)
    }

    pub fn get(&self, process_id: ProcessId, step_id: StepId) -> crate::Result<ProcessStep> {
        self.conn
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM process_steps WHERE id = ? AND process_id = ?"),
                params![step_id.to_string(), process_id.to_string()],
                step_from_row,
            )
            .optional()?
            .ok_or_else(|| step_not_found(step_id))
    }

    pub fn max_order_index(&self, process_id: ProcessId) -> crate::Result<Option<u32>> {
        Ok(self.conn.query_row(
            "SELECT MAX(order_index) FROM process_steps WHERE process_id = ?",
            params![process_id.to_string()],
            |row| row.get(0),
        )?)
    }

    pub fn set_order_index(
        &self,
        process_id: ProcessId,
        step_id: StepId,
        order_index: u32,
    ) -> crate::Result<()> {
        let changed = self.conn.execute(
            "UPDATE process_steps SET order_index = ? WHERE id = ? AND process_id = ?",
            params![order_index, step_id.to_string(), process_id.to_string()],
        )?;
        if changed == 0 {
            return Err(step_not_found(step_id));
        }
        Ok(())
    }

    /// SQLite checks UNIQUE per row, so a plain `order_index + delta` can
    /// trip over a neighbour that has not moved yet. The range is first
    /// lifted clear of every live value, then dropped onto its target.
    pub fn shift(&self, process_id: ProcessId, start: u32, delta: i32) -> crate::Result<usize> {
        let pid = process_id.to_string();
        let Some(max) = self.max_order_index(process_id)? else {
            return Ok(0);
        };
        let lift = i64::from(max) + 1 + i64::from(delta).abs();
        let start = i64::from(start);

        // Both statements land or neither does.
        self.conn.execute_batch("SAVEPOINT shift_order")?;
        let result = self
            .conn
            .execute(
                "UPDATE process_steps SET order_index = order_index + ?1 \
                 WHERE process_id = ?2 AND order_index >= ?3",
                params![lift, pid, start],
            )
            .and_then(|_| {
                self.conn.execute(
                    "UPDATE process_steps SET order_index = order_index - ?1 + ?2 \
                     WHERE process_id = ?3 AND order_index >= ?4",
                    params![lift, i64::from(delta), pid, start + lift],
                )
            });
        match result {
            Ok(moved) => {
                self.conn.execute_batch("RELEASE shift_order")?;
                Ok(moved)
            }
            Err(e) => {
                self.conn
                    .execute_batch("ROLLBACK TO shift_order; RELEASE shift_order")?;
                Err(e.into())
            }
        }
    }
}

// ── Progress ─────────────────────────────────────────────────────────────────

const PROGRESS_COLUMNS: &str = "id, process_id, user_id, session_id, status, current_step_index, \
     completion_percentage, started_at, completed_at, last_activity_at, version";

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<Progress> {
    Ok(Progress {
        id: parsed(row, 0)?,
        process_id: parsed(row, 1)?,
        user_id: row.get::<_, Option<String>>(2)?.map(OwnerId::new),
        session_id: row.get(3)?,
        status: parsed(row, 4)?,
        current_step_index: row.get(5)?,
        completion_percentage: parsed(row, 6)?,
        started_at: timestamp(row, 7)?,
        completed_at: timestamp_opt(row, 8)?,
        last_activity_at: timestamp(row, 9)?,
        version: row.get(10)?,
    })
}

pub(crate) struct ProgressStore<'a> {
    conn: &'a Connection,
}

impl<'a> ProgressStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, p: &Progress) -> crate::Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO progress ({PROGRESS_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                p.id.to_string(),
                p.process_id.to_string(),
                p.user_id.as_ref().map(OwnerId::as_str),
                p.session_id,
                p.status.as_str(),
                p.current_step_index,
                p.completion_percentage.to_string(),
                ts(p.started_at)?,
                ts_opt(p.completed_at)?,
                ts(p.last_activity_at)?,
                p.version
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, progress_id: ProgressId) -> crate::Result<Progress> {
        self.conn
            .query_row(
                &format!("SELECT {PROGRESS_COLUMNS} FROM progress WHERE id = ?"),
                params![progress_id.to_string()],
                progress_from_row,
            )
            .optional()?
            .ok_or_else(|| {
                StorageError::ProgressNotFound {
                    key: progress_id.to_string(),
                }
                .into()
            })
    }

    pub fn get_by_session(&self, process_id: ProcessId, session_id: &str) -> crate::Result<Progress> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM progress WHERE process_id = ? AND session_id = ?"
                ),
                params![process_id.to_string(), session_id],
                progress_from_row,
            )
            .optional()?
            .ok_or_else(|| {
                StorageError::ProgressNotFound {
                    key: format!("{process_id}/{session_id}"),
                }
                .into()
            })
    }

    pub fn update(&self, p: &Progress, expected_version: i64) -> crate::Result<i64> {
        let changed = self.conn.execute(
            r#"
            UPDATE progress
            SET user_id = ?, status = ?, current_step_index = ?, completion_percentage = ?,
                completed_at = ?, last_activity_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
            params![
                p.user_id.as_ref().map(OwnerId::as_str),
                p.status.as_str(),
                p.current_step_index,
                p.completion_percentage.to_string(),
                ts_opt(p.completed_at)?,
                ts(p.last_activity_at)?,
                p.id.to_string(),
                expected_version
            ],
        )?;
        if changed == 0 {
            // Distinguish a stale version from a missing row.
            self.get(p.id)?;
            return Err(StorageError::ConcurrentConflict {
                progress_id: p.id.to_string(),
                expected_version,
            }
            .into());
        }
        Ok(expected_version + 1)
    }

    pub fn delete(&self, progress_id: ProgressId) -> crate::Result<()> {
        let changed = self.conn.execute(
            "DELETE FROM progress WHERE id = ?",
            params![progress_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::ProgressNotFound {
                key: progress_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn list(
        &self,
        process_id: Option<ProcessId>,
        status: Option<ProgressStatus>,
        limit: usize,
    ) -> crate::Result<Vec<Progress>> {
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress \
             WHERE (?1 IS NULL OR process_id = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY last_activity_at DESC, id LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    process_id.map(|id| id.to_string()),
                    status.map(|s| s.as_str()),
                    limit
                ],
                progress_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── Step completions ─────────────────────────────────────────────────────────

const COMPLETION_COLUMNS: &str = "id, progress_id, step_id, submission_id, status, completed_at";

fn completion_from_row(row: &Row<'_>) -> rusqlite::Result<StepCompletion> {
    Ok(StepCompletion {
        id: parsed(row, 0)?,
        progress_id: parsed(row, 1)?,
        step_id: parsed(row, 2)?,
        submission_id: parsed_opt(row, 3)?,
        status: parsed(row, 4)?,
        completed_at: timestamp_opt(row, 5)?,
    })
}

pub(crate) struct CompletionStore<'a> {
    conn: &'a Connection,
}

impl<'a> CompletionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, c: &StepCompletion) -> crate::Result<()> {
        self.conn.execute(
            &format!("INSERT INTO step_completions ({COMPLETION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
            params![
                c.id.to_string(),
                c.progress_id.to_string(),
                c.step_id.to_string(),
                c.submission_id.map(|id| id.to_string()),
                c.status.as_str(),
                ts_opt(c.completed_at)?
            ],
        )?;
        Ok(())
    }

    pub fn list(&self, progress_id: ProgressId) -> crate::Result<Vec<StepCompletion>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM step_completions WHERE progress_id = ? ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![progress_id.to_string()], completion_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get(&self, progress_id: ProgressId, step_id: StepId) -> crate::Result<StepCompletion> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {COMPLETION_COLUMNS} FROM step_completions \
                     WHERE progress_id = ? AND step_id = ?"
                ),
                params![progress_id.to_string(), step_id.to_string()],
                completion_from_row,
            )
            .optional()?
            .ok_or_else(|| {
                StorageError::CompletionNotFound {
                    key: format!("{progress_id}/{step_id}"),
                }
                .into()
            })
    }

    pub fn update(&self, c: &StepCompletion) -> crate::Result<()> {
        let changed = self.conn.execute(
            "UPDATE step_completions SET submission_id = ?, status = ?, completed_at = ? WHERE id = ?",
            params![
                c.submission_id.map(|id| id.to_string()),
                c.status.as_str(),
                ts_opt(c.completed_at)?,
                c.id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::CompletionNotFound {
                key: c.id.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ── Views ────────────────────────────────────────────────────────────────────

pub(crate) struct ViewStore<'a> {
    conn: &'a Connection,
}

impl<'a> ViewStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, v: &ProcessViewRecord) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO process_views (id, process_id, session_id, ip_address, metadata, viewed_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                v.id.to_string(),
                v.process_id.to_string(),
                v.session_id,
                v.ip_address,
                json(&v.metadata)?,
                ts(v.viewed_at)?
            ],
        )?;
        Ok(())
    }

    pub fn list(&self, process_id: ProcessId) -> crate::Result<Vec<ProcessViewRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, process_id, session_id, ip_address, metadata, viewed_at \
             FROM process_views WHERE process_id = ? ORDER BY viewed_at, id",
        )?;
        let rows = stmt
            .query_map(params![process_id.to_string()], |row| {
                Ok(ProcessViewRecord {
                    id: parsed(row, 0)?,
                    process_id: parsed(row, 1)?,
                    session_id: row.get(2)?,
                    ip_address: row.get(3)?,
                    metadata: json_map(row, 4)?,
                    viewed_at: timestamp(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
