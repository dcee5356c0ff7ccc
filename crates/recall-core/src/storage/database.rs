//! SQLite-based card and container storage.
//!
//! Implements [`CardStore`] and [`ContainerHierarchy`] over a single
//! connection. Timestamps are stored as RFC 3339 text; every card write
//! bumps the `version` column inside the same transaction that checks it.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use super::migrations;
use crate::card::{Card, ContainerId};
use crate::error::{CoreError, DatabaseError, EntityKind, Result};
use crate::store::{
    CardQuery, CardScan, CardStore, CardUpdate, Container, ContainerHierarchy, UnreadableCard,
};

const CARD_COLUMNS: &str = "id, container_id, stage, is_mastered, master_cycles, mastered_at,
    correct_total, wrong_total, last_reviewed_at, next_review_at, waiting_until,
    is_from_wrong_answer, is_overdue, overdue_deadline, frozen_until, created_at, version";

// === Helper Functions ===

fn format_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn parse_ts(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                CoreError::Database(DatabaseError::CorruptRow {
                    table: "cards",
                    message: format!("{column}: {e}"),
                })
            })
    })
    .transpose()
}

/// Raw column values of a `cards` row, decoded into a [`Card`] afterwards so
/// timestamp parse failures surface as [`DatabaseError::CorruptRow`].
struct CardRow {
    id: String,
    container_id: String,
    stage: u8,
    is_mastered: bool,
    master_cycles: u32,
    mastered_at: Option<String>,
    correct_total: u32,
    wrong_total: u32,
    last_reviewed_at: Option<String>,
    next_review_at: Option<String>,
    waiting_until: Option<String>,
    is_from_wrong_answer: bool,
    is_overdue: bool,
    overdue_deadline: Option<String>,
    frozen_until: Option<String>,
    created_at: String,
    version: u64,
}

impl CardRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            container_id: row.get(1)?,
            stage: row.get(2)?,
            is_mastered: row.get(3)?,
            master_cycles: row.get(4)?,
            mastered_at: row.get(5)?,
            correct_total: row.get(6)?,
            wrong_total: row.get(7)?,
            last_reviewed_at: row.get(8)?,
            next_review_at: row.get(9)?,
            waiting_until: row.get(10)?,
            is_from_wrong_answer: row.get(11)?,
            is_overdue: row.get(12)?,
            overdue_deadline: row.get(13)?,
            frozen_until: row.get(14)?,
            created_at: row.get(15)?,
            version: row.get(16)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        let created_at = parse_ts(Some(self.created_at), "created_at")?
            .ok_or_else(|| CoreError::Database(DatabaseError::CorruptRow {
                table: "cards",
                message: "created_at missing".into(),
            }))?;
        Ok(Card {
            id: self.id,
            container_id: self.container_id,
            stage: self.stage,
            is_mastered: self.is_mastered,
            master_cycles: self.master_cycles,
            mastered_at: parse_ts(self.mastered_at, "mastered_at")?,
            correct_total: self.correct_total,
            wrong_total: self.wrong_total,
            last_reviewed_at: parse_ts(self.last_reviewed_at, "last_reviewed_at")?,
            next_review_at: parse_ts(self.next_review_at, "next_review_at")?,
            waiting_until: parse_ts(self.waiting_until, "waiting_until")?,
            is_from_wrong_answer: self.is_from_wrong_answer,
            is_overdue: self.is_overdue,
            overdue_deadline: parse_ts(self.overdue_deadline, "overdue_deadline")?,
            frozen_until: parse_ts(self.frozen_until, "frozen_until")?,
            created_at,
            version: self.version,
        })
    }
}

fn load_card(conn: &Connection, id: &str) -> Result<Option<Card>> {
    let sql = format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id], CardRow::from_row)
        .optional()?;
    row.map(CardRow::into_card).transpose()
}

fn card_query_sql(query: &CardQuery) -> String {
    let placeholders = vec!["?"; query.containers.len()].join(", ");
    let mut sql = format!(
        "SELECT {CARD_COLUMNS} FROM cards WHERE container_id IN ({placeholders})"
    );
    if !query.include_mastered {
        sql.push_str(" AND is_mastered = 0");
    }
    sql.push_str(" ORDER BY id");
    sql
}

fn container_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM containers WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// SQLite database for card storage.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and migrate it.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if migration fails.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn acquire(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CardStore for Database {
    fn get_card(&self, id: &str) -> Result<Card> {
        let conn = self.acquire();
        load_card(&conn, id)?.ok_or_else(|| CoreError::card_not_found(id))
    }

    fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>> {
        if query.containers.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.acquire();
        let mut stmt = conn.prepare(&card_query_sql(query))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(query.containers.iter()), CardRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(CardRow::into_card).collect()
    }

    fn scan_cards(&self, query: &CardQuery) -> Result<CardScan> {
        let mut scan = CardScan::default();
        if query.containers.is_empty() {
            return Ok(scan);
        }
        let conn = self.acquire();
        let mut stmt = conn.prepare(&card_query_sql(query))?;
        // The id is read on its own so a row whose other columns fail to
        // decode can still be named.
        let rows = stmt.query_map(rusqlite::params_from_iter(query.containers.iter()), |row| {
            Ok((row.get::<_, String>(0)?, CardRow::from_row(row)))
        })?;
        for row in rows {
            let (card_id, decoded) = row?;
            let card = decoded
                .map_err(|e| e.to_string())
                .and_then(|raw| raw.into_card().map_err(|e| e.to_string()));
            match card {
                Ok(card) => scan.cards.push(card),
                Err(message) => {
                    warn!(%card_id, %message, "skipping unreadable card row");
                    scan.unreadable.push(UnreadableCard { card_id, message });
                }
            }
        }
        Ok(scan)
    }

    fn update_card(&self, id: &str, update: &CardUpdate) -> Result<Card> {
        let conn = self.acquire();
        let tx = conn.unchecked_transaction()?;
        let mut card = load_card(&tx, id)?.ok_or_else(|| CoreError::card_not_found(id))?;
        if let Some(expected) = update.expected_version {
            if card.version != expected {
                return Err(CoreError::WriteConflict {
                    card_id: id.to_string(),
                    expected,
                    actual: card.version,
                });
            }
        }
        update.apply_to(&mut card);
        card.version += 1;
        tx.execute(
            "UPDATE cards SET
                stage = ?2, is_mastered = ?3, master_cycles = ?4, mastered_at = ?5,
                correct_total = ?6, wrong_total = ?7, last_reviewed_at = ?8,
                next_review_at = ?9, waiting_until = ?10, is_from_wrong_answer = ?11,
                is_overdue = ?12, overdue_deadline = ?13, frozen_until = ?14, version = ?15
             WHERE id = ?1",
            params![
                card.id,
                card.stage,
                card.is_mastered,
                card.master_cycles,
                format_ts(card.mastered_at),
                card.correct_total,
                card.wrong_total,
                format_ts(card.last_reviewed_at),
                format_ts(card.next_review_at),
                format_ts(card.waiting_until),
                card.is_from_wrong_answer,
                card.is_overdue,
                format_ts(card.overdue_deadline),
                format_ts(card.frozen_until),
                card.version,
            ],
        )?;
        tx.commit()?;
        Ok(card)
    }

    fn insert_card(&self, card: &Card) -> Result<()> {
        let conn = self.acquire();
        if !container_exists(&conn, &card.container_id)? {
            return Err(CoreError::container_not_found(&card.container_id));
        }
        if load_card(&conn, &card.id)?.is_some() {
            return Err(CoreError::AlreadyExists {
                kind: EntityKind::Card,
                id: card.id.clone(),
            });
        }
        let sql = format!(
            "INSERT INTO cards ({CARD_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        );
        conn.execute(
            &sql,
            params![
                card.id,
                card.container_id,
                card.stage,
                card.is_mastered,
                card.master_cycles,
                format_ts(card.mastered_at),
                card.correct_total,
                card.wrong_total,
                format_ts(card.last_reviewed_at),
                format_ts(card.next_review_at),
                format_ts(card.waiting_until),
                card.is_from_wrong_answer,
                card.is_overdue,
                format_ts(card.overdue_deadline),
                format_ts(card.frozen_until),
                card.created_at.to_rfc3339(),
                card.version,
            ],
        )?;
        Ok(())
    }
}

impl ContainerHierarchy for Database {
    fn child_containers_of(&self, scope_id: &str) -> Result<Vec<ContainerId>> {
        let conn = self.acquire();
        if !container_exists(&conn, scope_id)? {
            return Err(CoreError::container_not_found(scope_id));
        }
        let mut stmt = conn.prepare("SELECT id FROM containers WHERE parent_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map([scope_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn container_of(&self, card_id: &str) -> Result<ContainerId> {
        let conn = self.acquire();
        conn.query_row(
            "SELECT container_id FROM cards WHERE id = ?1",
            [card_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| CoreError::card_not_found(card_id))
    }

    fn parent_of(&self, container_id: &str) -> Result<Option<ContainerId>> {
        let conn = self.acquire();
        conn.query_row(
            "SELECT parent_id FROM containers WHERE id = ?1",
            [container_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .ok_or_else(|| CoreError::container_not_found(container_id))
    }

    fn sync_scopes(&self) -> Result<Vec<ContainerId>> {
        let conn = self.acquire();
        let mut stmt = conn.prepare("SELECT id FROM containers WHERE parent_id IS NULL ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn insert_container(&self, container: &Container) -> Result<()> {
        let conn = self.acquire();
        if container_exists(&conn, &container.id)? {
            return Err(CoreError::AlreadyExists {
                kind: EntityKind::Container,
                id: container.id.clone(),
            });
        }
        if let Some(parent) = &container.parent_id {
            if !container_exists(&conn, parent)? {
                return Err(CoreError::container_not_found(parent));
            }
        }
        conn.execute(
            "INSERT INTO containers (id, name, parent_id) VALUES (?1, ?2, ?3)",
            params![container.id, container.name, container.parent_id],
        )?;
        Ok(())
    }

    fn containers(&self) -> Result<Vec<Container>> {
        let conn = self.acquire();
        let mut stmt = conn.prepare("SELECT id, name, parent_id FROM containers ORDER BY id")?;
        let containers = stmt
            .query_map([], |row| {
                Ok(Container {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_id: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(containers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::TimerPatch;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn seeded() -> Database {
        let db = Database::open_memory().unwrap();
        db.insert_container(&Container::new("lang", "Languages")).unwrap();
        db.insert_container(&Container::new("fr", "French").child_of("lang"))
            .unwrap();
        db
    }

    #[test]
    fn card_roundtrip_preserves_fields() {
        let db = seeded();
        let mut card = Card::with_id("c1", "fr", now());
        card.stage = 3;
        card.waiting_until = Some(now() + Duration::minutes(75));
        card.is_from_wrong_answer = true;
        db.insert_card(&card).unwrap();

        let loaded = db.get_card("c1").unwrap();
        assert_eq!(loaded, card);
    }

    #[test]
    fn missing_card_is_not_found() {
        let db = seeded();
        assert!(db.get_card("nope").unwrap_err().is_not_found());
        assert!(db.container_of("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn timer_update_checks_version() {
        let db = seeded();
        db.insert_card(&Card::with_id("c1", "fr", now())).unwrap();
        let frozen = now() + Duration::hours(3);
        let patch = TimerPatch {
            frozen_until: Some(frozen),
            ..TimerPatch::default()
        };

        let updated = db.update_card("c1", &CardUpdate::timers(patch, 0)).unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(db.get_card("c1").unwrap().frozen_until, Some(frozen));

        let err = db.update_card("c1", &CardUpdate::timers(patch, 0)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::WriteConflict { expected: 0, actual: 1, .. }
        ));
    }

    #[test]
    fn query_by_scope_containers() {
        let db = seeded();
        db.insert_card(&Card::with_id("a", "fr", now())).unwrap();
        db.insert_card(&Card::with_id("b", "lang", now())).unwrap();
        let mut mastered = Card::with_id("m", "fr", now());
        mastered.stage = 6;
        mastered.is_mastered = true;
        mastered.master_cycles = 1;
        db.insert_card(&mastered).unwrap();

        let scope = db.containers_in_scope("lang").unwrap();
        let ids: Vec<_> = db
            .query_cards(&CardQuery::active_in(scope.clone()))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        let all = db
            .query_cards(&CardQuery {
                containers: scope,
                include_mastered: true,
            })
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn scan_sets_aside_corrupt_rows() {
        let db = seeded();
        for id in ["a", "b", "c"] {
            db.insert_card(&Card::with_id(id, "fr", now())).unwrap();
        }
        db.acquire()
            .execute("UPDATE cards SET waiting_until = 'soon' WHERE id = 'b'", [])
            .unwrap();
        db.acquire()
            .execute("UPDATE cards SET stage = 300 WHERE id = 'c'", [])
            .unwrap();

        let query = CardQuery::all_in(vec!["fr".into()]);
        assert!(db.query_cards(&query).is_err());

        let scan = db.scan_cards(&query).unwrap();
        let ids: Vec<_> = scan.cards.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        let bad: Vec<_> = scan.unreadable.iter().map(|u| u.card_id.as_str()).collect();
        assert_eq!(bad, vec!["b", "c"]);
        assert!(scan.unreadable[0].message.contains("waiting_until"));
    }

    #[test]
    fn hierarchy_queries() {
        let db = seeded();
        assert_eq!(db.sync_scopes().unwrap(), vec!["lang"]);
        assert_eq!(db.child_containers_of("lang").unwrap(), vec!["fr"]);
        assert_eq!(db.parent_of("fr").unwrap().as_deref(), Some("lang"));
        assert!(db
            .insert_container(&Container::new("x", "X").child_of("ghost"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn reopen_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recall.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_container(&Container::new("lang", "Languages")).unwrap();
            db.insert_card(&Card::with_id("c1", "lang", now())).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_card("c1").unwrap().container_id, "lang");
    }
}
