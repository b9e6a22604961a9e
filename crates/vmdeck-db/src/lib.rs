pub mod runs;
pub mod schema;
pub mod settings;

use rusqlite::Connection;
use std::path::Path;

pub use runs::{Run, RunStatus};

pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open a private in-memory database with the full schema.
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    schema::initialize(conn)?;
    settings::seed_defaults(conn)?;
    Ok(())
}
