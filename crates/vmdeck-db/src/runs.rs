use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One lifecycle command run against an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub subject: String,
    pub action: String,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

const SELECT_COLUMNS: &str =
    "id, subject, action, status, error_message, started_at, finished_at";

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
    let status: String = row.get(3)?;
    let status = RunStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown run status: {status}").into(),
        )
    })?;
    Ok(Run {
        id: row.get(0)?,
        subject: row.get(1)?,
        action: row.get(2)?,
        status,
        error_message: row.get(4)?,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
    })
}

pub fn create_run(conn: &Connection, subject: &str, action: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO runs (subject, action) VALUES (?1, ?2)",
        params![subject, action],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record the outcome of a run. Returns `false` if no run has that id.
pub fn finish_run(
    conn: &Connection,
    id: i64,
    status: RunStatus,
    error_message: Option<&str>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE runs SET status = ?1, error_message = ?2, finished_at = datetime('now') \
         WHERE id = ?3",
        params![status.as_str(), error_message, id],
    )?;
    Ok(changed > 0)
}

pub fn get_run(conn: &Connection, id: i64) -> rusqlite::Result<Option<Run>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM runs WHERE id = ?1"),
        params![id],
        row_to_run,
    )
    .optional()
}

/// Most recent run for `subject`, if any.
pub fn last_run(conn: &Connection, subject: &str) -> rusqlite::Result<Option<Run>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM runs WHERE subject = ?1 ORDER BY id DESC LIMIT 1"),
        params![subject],
        row_to_run,
    )
    .optional()
}

/// Mark runs left `running` by a previous process as failed.
pub fn fail_interrupted_runs(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE runs SET status = 'failed', error_message = 'interrupted', \
         finished_at = datetime('now') WHERE status = 'running'",
        [],
    )
}
