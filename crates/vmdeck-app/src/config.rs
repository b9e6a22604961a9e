//! Engine settings read from the `settings` table.

use std::str::FromStr;

use rusqlite::Connection;
use vmdeck_db::settings;
use vmdeck_events::DEFAULT_MAX_CONCURRENCY;
use vmdeck_session::{PtyConnector, TermSize, DEFAULT_SCROLLBACK_BYTES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub cli_binary: String,
    /// `None` keeps the connector's built-in template.
    pub shell_args: Option<Vec<String>>,
    pub log_args: Option<Vec<String>>,
    pub default_size: TermSize,
    pub scrollback_bytes: usize,
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cli_binary: "multipass".to_string(),
            shell_args: None,
            log_args: None,
            default_size: TermSize::default(),
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    /// Read every key, falling back to the default for missing or malformed
    /// values. Only a database failure is an error.
    pub fn load(conn: &Connection) -> rusqlite::Result<Self> {
        let defaults = Self::default();

        let cli_binary = settings::get(conn, settings::INSTANCE_CLI_BINARY)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.cli_binary);
        let shell_args = parse_args(conn, settings::INSTANCE_SHELL_ARGS)?;
        let log_args = parse_args(conn, settings::INSTANCE_LOG_ARGS)?;
        let cols = parse_positive(conn, settings::TERMINAL_DEFAULT_COLS, defaults.default_size.cols)?;
        let rows = parse_positive(conn, settings::TERMINAL_DEFAULT_ROWS, defaults.default_size.rows)?;
        let scrollback_bytes = parse_or(
            conn,
            settings::SESSION_SCROLLBACK_BYTES,
            defaults.scrollback_bytes,
        )?;
        let max_concurrency = parse_positive(
            conn,
            settings::RUNNER_MAX_CONCURRENCY,
            defaults.max_concurrency,
        )?;

        Ok(Self {
            cli_binary,
            shell_args,
            log_args,
            default_size: TermSize::new(cols, rows),
            scrollback_bytes,
            max_concurrency,
        })
    }

    pub fn connector(&self) -> PtyConnector {
        let mut connector = PtyConnector::new(&self.cli_binary);
        if let Some(args) = &self.shell_args {
            connector = connector.with_shell_args(args.clone());
        }
        if let Some(args) = &self.log_args {
            connector = connector.with_log_args(args.clone());
        }
        connector
    }
}

fn parse_or<T: FromStr>(conn: &Connection, key: &str, default: T) -> rusqlite::Result<T> {
    let Some(raw) = settings::get(conn, key)? else {
        return Ok(default);
    };
    match raw.trim().parse() {
        Ok(value) => Ok(value),
        Err(_) => {
            log::warn!("ignoring malformed setting {key}={raw:?}");
            Ok(default)
        }
    }
}

fn parse_positive<T>(conn: &Connection, key: &str, default: T) -> rusqlite::Result<T>
where
    T: FromStr + PartialOrd + Default + Copy,
{
    let value = parse_or(conn, key, default)?;
    if value > T::default() {
        Ok(value)
    } else {
        log::warn!("setting {key} must be positive, using default");
        Ok(default)
    }
}

fn parse_args(conn: &Connection, key: &str) -> rusqlite::Result<Option<Vec<String>>> {
    let Some(raw) = settings::get(conn, key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(args) => Ok(Some(args)),
        Err(e) => {
            log::warn!("ignoring malformed setting {key}: {e}");
            Ok(None)
        }
    }
}
