//! Database schema migrations for recall.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use indoc::indoc;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    let version = conn
        .query_row("SELECT version FROM schema_version", [], |row| {
            row.get::<_, i32>(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: containers and cards.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(indoc! {"
        CREATE TABLE IF NOT EXISTS containers (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            parent_id   TEXT REFERENCES containers(id)
        );

        CREATE TABLE IF NOT EXISTS cards (
            id                   TEXT PRIMARY KEY,
            container_id         TEXT NOT NULL REFERENCES containers(id),
            stage                INTEGER NOT NULL DEFAULT 0,
            is_mastered          INTEGER NOT NULL DEFAULT 0,
            master_cycles        INTEGER NOT NULL DEFAULT 0,
            mastered_at          TEXT,
            correct_total        INTEGER NOT NULL DEFAULT 0,
            wrong_total          INTEGER NOT NULL DEFAULT 0,
            last_reviewed_at     TEXT,
            next_review_at       TEXT,
            waiting_until        TEXT,
            is_from_wrong_answer INTEGER NOT NULL DEFAULT 0,
            is_overdue           INTEGER NOT NULL DEFAULT 0,
            overdue_deadline     TEXT,
            frozen_until         TEXT,
            created_at           TEXT NOT NULL,
            version              INTEGER NOT NULL DEFAULT 0
        );
    "})?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: indexes for scope queries.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(indoc! {"
        CREATE INDEX IF NOT EXISTS idx_cards_container ON cards(container_id);
        CREATE INDEX IF NOT EXISTS idx_cards_container_mastered ON cards(container_id, is_mastered);
        CREATE INDEX IF NOT EXISTS idx_containers_parent ON containers(parent_id);
    "})?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
