use rusqlite::{params, Connection, OptionalExtension};

/// External instance-management CLI.
pub const INSTANCE_CLI_BINARY: &str = "instance_cli_binary";
/// JSON array of arguments for interactive shells; `{subject}` is expanded.
pub const INSTANCE_SHELL_ARGS: &str = "instance_shell_args";
/// JSON array of arguments for log tails; `{subject}` is expanded.
pub const INSTANCE_LOG_ARGS: &str = "instance_log_args";
/// Initial PTY columns for new sessions.
pub const TERMINAL_DEFAULT_COLS: &str = "terminal_default_cols";
/// Initial PTY rows for new sessions.
pub const TERMINAL_DEFAULT_ROWS: &str = "terminal_default_rows";
/// Replay buffer kept per session across view detach.
pub const SESSION_SCROLLBACK_BYTES: &str = "session_scrollback_bytes";
/// Concurrent lifecycle commands.
pub const RUNNER_MAX_CONCURRENCY: &str = "runner_max_concurrency";

/// Values written on first open. Existing values are never overwritten.
pub const DEFAULTS: &[(&str, &str)] = &[
    (INSTANCE_CLI_BINARY, "multipass"),
    (INSTANCE_SHELL_ARGS, r#"["shell","{subject}"]"#),
    (
        INSTANCE_LOG_ARGS,
        r#"["exec","{subject}","--","journalctl","--follow","--no-pager"]"#,
    ),
    (TERMINAL_DEFAULT_COLS, "80"),
    (TERMINAL_DEFAULT_ROWS, "24"),
    (SESSION_SCROLLBACK_BYTES, "262144"),
    (RUNNER_MAX_CONCURRENCY, "2"),
];

pub fn get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn seed_defaults(conn: &Connection) -> rusqlite::Result<()> {
    for (key, value) in DEFAULTS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}
