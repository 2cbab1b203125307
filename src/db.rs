use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{FinanceError, Result};
use crate::gateway::Gateway;
use crate::models::{
    format_timestamp, Category, NewRecord, Record, RecordPatch, User, Wallet, Window,
};

const RECORD_COLUMNS: &str =
    "id, description, value, timestamp, wallet_id, category_id, owner, external_reference";

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            owner TEXT NOT NULL REFERENCES users(username),
            UNIQUE(owner, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            owner TEXT NOT NULL REFERENCES users(username),
            UNIQUE(owner, name)
        )",
        [],
    )?;

    // value is stored as decimal text; timestamp as fixed-width RFC 3339 UTC
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            value TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            wallet_id INTEGER NOT NULL REFERENCES wallets(id),
            category_id INTEGER NOT NULL REFERENCES categories(id),
            owner TEXT NOT NULL REFERENCES users(username),
            external_reference TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS month_closures (
            owner TEXT NOT NULL REFERENCES users(username),
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            closed_at TEXT NOT NULL,
            PRIMARY KEY (owner, year, month)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    // NULL references never collide, so manual entries are unconstrained
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_owner_reference
         ON records(owner, external_reference)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_owner_timestamp ON records(owner, timestamp)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_owner_wallet ON records(owner, wallet_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let value_text: String = row.get(2)?;
    let value = Decimal::from_str(&value_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    let timestamp_text: String = row.get(3)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(Record {
        id: row.get(0)?,
        description: row.get(1)?,
        value,
        timestamp,
        wallet_id: row.get(4)?,
        category_id: row.get(5)?,
        owner: row.get(6)?,
        external_reference: row.get(7)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_text: String = row.get(1)?;
    let created_at = DateTime::parse_from_rfc3339(&created_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    Ok(User {
        username: row.get(0)?,
        created_at,
    })
}

/// Turn uniqueness violations into `Conflict`; everything else stays a database error.
fn map_constraint(err: rusqlite::Error, conflict: impl FnOnce() -> String) -> FinanceError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) =>
        {
            FinanceError::Conflict(conflict())
        }
        _ => err.into(),
    }
}

// ============================================================================
// OWNERSHIP CHECKS
// ============================================================================

fn ensure_user(conn: &Connection, owner: &str) -> Result<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?1",
            params![owner],
            |_| Ok(()),
        )
        .optional()?;
    found.ok_or_else(|| FinanceError::not_found("user", owner))
}

fn ensure_owned(conn: &Connection, table: Owned, owner: &str, id: i64) -> Result<()> {
    let sql = match table {
        Owned::Wallet => "SELECT 1 FROM wallets WHERE id = ?1 AND owner = ?2",
        Owned::Category => "SELECT 1 FROM categories WHERE id = ?1 AND owner = ?2",
    };
    let found = conn
        .query_row(sql, params![id, owner], |_| Ok(()))
        .optional()?;
    found.ok_or_else(|| FinanceError::not_found(table.entity(), id))
}

#[derive(Clone, Copy)]
enum Owned {
    Wallet,
    Category,
}

impl Owned {
    fn entity(&self) -> &'static str {
        match self {
            Owned::Wallet => "wallet",
            Owned::Category => "category",
        }
    }
}

fn get_record(conn: &Connection, owner: &str, id: i64) -> Result<Record> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1 AND owner = ?2");
    conn.query_row(&sql, params![id, owner], record_from_row)
        .optional()?
        .ok_or_else(|| FinanceError::not_found("record", id))
}

fn insert_record(conn: &Connection, owner: &str, record: &NewRecord) -> Result<Record> {
    ensure_owned(conn, Owned::Wallet, owner, record.wallet_id)?;
    ensure_owned(conn, Owned::Category, owner, record.category_id)?;

    conn.execute(
        "INSERT INTO records (
            description, value, timestamp, wallet_id, category_id, owner, external_reference
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.description,
            record.value.to_string(),
            format_timestamp(&record.timestamp),
            record.wallet_id,
            record.category_id,
            owner,
            record.external_reference,
        ],
    )
    .map_err(|e| {
        map_constraint(e, || {
            format!(
                "external reference '{}' already exists",
                record.external_reference.as_deref().unwrap_or_default()
            )
        })
    })?;

    get_record(conn, owner, conn.last_insert_rowid())
}

// ============================================================================
// SQLITE GATEWAY
// ============================================================================

/// SQLite-backed `Gateway`. Every statement is parameterized.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        info!(path = %path.display(), "database opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FinanceError::Internal("database lock poisoned".into()))
    }
}

impl Gateway for SqliteGateway {
    fn list(&self, owner: &str, window: Window) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        let records = match window.bounds()? {
            None => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM records
                     WHERE owner = ?1
                     ORDER BY timestamp DESC, id DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![owner], record_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some((start, end)) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM records
                     WHERE owner = ?1 AND timestamp >= ?2 AND timestamp < ?3
                     ORDER BY timestamp DESC, id DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![owner, format_timestamp(&start), format_timestamp(&end)],
                    record_from_row,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        debug!(owner, count = records.len(), ?window, "listed records");
        Ok(records)
    }

    fn list_page(&self, owner: &str, from: u32, count: u32) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE owner = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner, count, from], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_by_wallet(&self, owner: &str, wallet_id: i64) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;
        ensure_owned(&conn, Owned::Wallet, owner, wallet_id)?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE owner = ?1 AND wallet_id = ?2
             ORDER BY timestamp DESC, id DESC"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![owner, wallet_id], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get(&self, owner: &str, id: i64) -> Result<Record> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;
        get_record(&conn, owner, id)
    }

    fn existing_references(&self, owner: &str, references: &[String]) -> Result<Vec<String>> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        let mut stmt = conn.prepare_cached(
            "SELECT 1 FROM records WHERE owner = ?1 AND external_reference = ?2",
        )?;

        let mut existing: Vec<String> = Vec::new();
        for reference in references {
            if existing.contains(reference) {
                continue;
            }
            if stmt.exists(params![owner, reference])? {
                existing.push(reference.clone());
            }
        }
        Ok(existing)
    }

    fn create(&self, owner: &str, record: &NewRecord) -> Result<Record> {
        record.validate()?;
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;
        insert_record(&conn, owner, record)
    }

    fn create_many(&self, owner: &str, records: &[NewRecord]) -> Result<Vec<Record>> {
        for record in records {
            record.validate()?;
        }

        let mut conn = self.conn()?;
        ensure_user(&conn, owner)?;

        // Dropping the transaction on error rolls the whole batch back
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(records.len());
        for record in records {
            created.push(insert_record(&tx, owner, record)?);
        }
        tx.commit()?;

        info!(owner, inserted = created.len(), "records created");
        Ok(created)
    }

    fn update(&self, owner: &str, id: i64, patch: &RecordPatch) -> Result<Record> {
        patch.validate()?;
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;
        get_record(&conn, owner, id)?;

        if let Some(wallet_id) = patch.wallet_id {
            ensure_owned(&conn, Owned::Wallet, owner, wallet_id)?;
        }
        if let Some(category_id) = patch.category_id {
            ensure_owned(&conn, Owned::Category, owner, category_id)?;
        }

        conn.execute(
            "UPDATE records SET
                description = COALESCE(?1, description),
                value = COALESCE(?2, value),
                timestamp = COALESCE(?3, timestamp),
                wallet_id = COALESCE(?4, wallet_id),
                category_id = COALESCE(?5, category_id)
             WHERE id = ?6 AND owner = ?7",
            params![
                patch.description,
                patch.value.map(|v| v.to_string()),
                patch.timestamp.as_ref().map(format_timestamp),
                patch.wallet_id,
                patch.category_id,
                id,
                owner,
            ],
        )?;

        get_record(&conn, owner, id)
    }

    fn delete(&self, owner: &str, id: i64) -> Result<()> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        let deleted = conn.execute(
            "DELETE FROM records WHERE id = ?1 AND owner = ?2",
            params![id, owner],
        )?;
        if deleted == 0 {
            return Err(FinanceError::not_found("record", id));
        }
        Ok(())
    }

    fn list_wallets(&self, owner: &str) -> Result<Vec<Wallet>> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        let mut stmt =
            conn.prepare("SELECT id, name, owner FROM wallets WHERE owner = ?1 ORDER BY id")?;
        let wallets = stmt
            .query_map(params![owner], |row| {
                Ok(Wallet {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    owner: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(wallets)
    }

    fn create_wallet(&self, owner: &str, name: &str) -> Result<Wallet> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FinanceError::invalid("name", "must not be empty"));
        }
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        conn.execute(
            "INSERT INTO wallets (name, owner) VALUES (?1, ?2)",
            params![name, owner],
        )
        .map_err(|e| map_constraint(e, || format!("wallet '{name}' already exists")))?;

        Ok(Wallet {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }

    fn list_categories(&self, owner: &str) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        let mut stmt =
            conn.prepare("SELECT id, name, owner FROM categories WHERE owner = ?1 ORDER BY id")?;
        let categories = stmt
            .query_map(params![owner], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    owner: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    fn create_category(&self, owner: &str, name: &str) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FinanceError::invalid("name", "must not be empty"));
        }
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        conn.execute(
            "INSERT INTO categories (name, owner) VALUES (?1, ?2)",
            params![name, owner],
        )
        .map_err(|e| map_constraint(e, || format!("category '{name}' already exists")))?;

        Ok(Category {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }

    fn create_user(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(FinanceError::invalid("username", "must not be empty"));
        }
        let conn = self.conn()?;
        let user = User {
            username: username.to_string(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
            params![user.username, format_timestamp(&user.created_at)],
        )
        .map_err(|e| map_constraint(e, || format!("user '{username}' already exists")))?;

        info!(username, "user created");
        Ok(user)
    }

    fn get_user(&self, username: &str) -> Result<User> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT username, created_at FROM users WHERE username = ?1",
            params![username],
            user_from_row,
        )
        .optional()?
        .ok_or_else(|| FinanceError::not_found("user", username))
    }

    fn set_month_closed(&self, owner: &str, year: i32, month: u32, closed: bool) -> Result<()> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        if closed {
            conn.execute(
                "INSERT OR IGNORE INTO month_closures (owner, year, month, closed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![owner, year, month, format_timestamp(&Utc::now())],
            )?;
        } else {
            conn.execute(
                "DELETE FROM month_closures WHERE owner = ?1 AND year = ?2 AND month = ?3",
                params![owner, year, month],
            )?;
        }
        Ok(())
    }

    fn is_month_marked_closed(&self, owner: &str, year: i32, month: u32) -> Result<bool> {
        let conn = self.conn()?;
        ensure_user(&conn, owner)?;

        let mut stmt = conn.prepare_cached(
            "SELECT 1 FROM month_closures WHERE owner = ?1 AND year = ?2 AND month = ?3",
        )?;
        Ok(stmt.exists(params![owner, year, month])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Gateway with user "alice", one wallet and one category.
    fn seeded() -> (SqliteGateway, i64, i64) {
        let gw = SqliteGateway::open_in_memory().unwrap();
        gw.create_user("alice").unwrap();
        let wallet = gw.create_wallet("alice", "Checking").unwrap();
        let category = gw.create_category("alice", "Groceries").unwrap();
        (gw, wallet.id, category.id)
    }

    fn new_record(
        wallet_id: i64,
        category_id: i64,
        day: u32,
        value: &str,
        reference: Option<&str>,
    ) -> NewRecord {
        NewRecord {
            description: format!("Purchase on day {day}"),
            value: dec(value),
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap(),
            wallet_id,
            category_id,
            external_reference: reference.map(str::to_string),
        }
    }

    #[test]
    fn test_list_by_wallet() {
        let (gw, wallet, category) = seeded();
        let savings = gw.create_wallet("alice", "Savings").unwrap().id;
        gw.create("alice", &new_record(wallet, category, 1, "-5", None)).unwrap();
        gw.create("alice", &new_record(savings, category, 2, "100", None)).unwrap();
        gw.create("alice", &new_record(wallet, category, 3, "-7", None)).unwrap();

        let checking = gw.list_by_wallet("alice", wallet).unwrap();
        assert_eq!(checking.len(), 2);
        assert!(checking.iter().all(|r| r.wallet_id == wallet));
        assert_eq!(checking[0].value, dec("-7"), "newest first");

        gw.create_user("bob").unwrap();
        let err = gw.list_by_wallet("bob", wallet).unwrap_err();
        assert!(matches!(err, FinanceError::NotFound { entity: "wallet", .. }));
        let err = gw.list_by_wallet("mallory", wallet).unwrap_err();
        assert!(matches!(err, FinanceError::NotFound { entity: "user", .. }));
    }

    #[test]
    fn test_create_and_get_record() {
        let (gw, wallet, category) = seeded();
        let created = gw
            .create("alice", &new_record(wallet, category, 1, "-12.34", None))
            .unwrap();

        assert!(created.id > 0);
        assert_eq!(created.owner, "alice");
        assert_eq!(created.value, dec("-12.34"));

        let fetched = gw.get("alice", created.id).unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_unknown_owner_is_not_found() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let err = gw.list("nobody", Window::All).unwrap_err();
        assert!(matches!(err, FinanceError::NotFound { entity: "user", .. }));
    }

    #[test]
    fn test_foreign_record_is_not_found() {
        let (gw, wallet, category) = seeded();
        gw.create_user("bob").unwrap();
        let created = gw
            .create("alice", &new_record(wallet, category, 1, "5", None))
            .unwrap();

        let err = gw.get("bob", created.id).unwrap_err();
        assert!(matches!(err, FinanceError::NotFound { entity: "record", .. }));

        let err = gw.delete("bob", created.id).unwrap_err();
        assert!(matches!(err, FinanceError::NotFound { entity: "record", .. }));
        assert!(gw.get("alice", created.id).is_ok());
    }

    #[test]
    fn test_foreign_wallet_is_rejected() {
        let (gw, _wallet, category) = seeded();
        gw.create_user("bob").unwrap();
        let bobs_wallet = gw.create_wallet("bob", "Cash").unwrap();

        let err = gw
            .create("alice", &new_record(bobs_wallet.id, category, 1, "5", None))
            .unwrap_err();
        assert!(matches!(err, FinanceError::NotFound { entity: "wallet", .. }));
    }

    #[test]
    fn test_list_window_filters_and_orders() {
        let (gw, wallet, category) = seeded();
        gw.create("alice", &new_record(wallet, category, 1, "1", None)).unwrap();
        gw.create("alice", &new_record(wallet, category, 20, "2", None)).unwrap();
        let mut april = new_record(wallet, category, 1, "3", None);
        april.timestamp = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        gw.create("alice", &april).unwrap();

        let march = gw
            .list("alice", Window::Month { year: 2024, month: 3 })
            .unwrap();
        assert_eq!(march.len(), 2);
        assert_eq!(march[0].value, dec("2"), "newest first");

        assert_eq!(gw.list("alice", Window::Year(2024)).unwrap().len(), 3);
        assert_eq!(gw.list("alice", Window::Year(2023)).unwrap().len(), 0);
    }

    #[test]
    fn test_list_page() {
        let (gw, wallet, category) = seeded();
        for day in 1..=5 {
            gw.create("alice", &new_record(wallet, category, day, "1", None))
                .unwrap();
        }
        let page = gw.list_page("alice", 1, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].description, "Purchase on day 4");
        assert_eq!(page[1].description, "Purchase on day 3");
    }

    #[test]
    fn test_existing_references() {
        let (gw, wallet, category) = seeded();
        gw.create("alice", &new_record(wallet, category, 1, "1", Some("ref-a")))
            .unwrap();

        let found = gw
            .existing_references(
                "alice",
                &["ref-a".to_string(), "ref-b".to_string(), "ref-a".to_string()],
            )
            .unwrap();
        assert_eq!(found, vec!["ref-a".to_string()]);

        gw.create_user("bob").unwrap();
        assert!(gw
            .existing_references("bob", &["ref-a".to_string()])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_create_many_conflict_rolls_back() {
        let (gw, wallet, category) = seeded();
        gw.create("alice", &new_record(wallet, category, 1, "1", Some("dup")))
            .unwrap();

        let batch = vec![
            new_record(wallet, category, 2, "2", Some("fresh")),
            new_record(wallet, category, 3, "3", Some("dup")),
        ];
        let err = gw.create_many("alice", &batch).unwrap_err();
        assert!(matches!(err, FinanceError::Conflict(_)));

        // "fresh" must not have survived the failed batch
        assert_eq!(gw.list("alice", Window::All).unwrap().len(), 1);
    }

    #[test]
    fn test_create_many_inserts_all() {
        let (gw, wallet, category) = seeded();
        let batch = vec![
            new_record(wallet, category, 2, "2", Some("a")),
            new_record(wallet, category, 3, "3", Some("b")),
            new_record(wallet, category, 4, "4", None),
            new_record(wallet, category, 5, "5", None),
        ];
        let created = gw.create_many("alice", &batch).unwrap();
        assert_eq!(created.len(), 4);
        assert!(created.iter().all(|r| r.owner == "alice"));
    }

    #[test]
    fn test_update_changes_only_supplied_fields() {
        let (gw, wallet, category) = seeded();
        let created = gw
            .create("alice", &new_record(wallet, category, 1, "-9.99", Some("r1")))
            .unwrap();

        let patch = RecordPatch {
            value: Some(Decimal::ZERO),
            ..RecordPatch::default()
        };
        let updated = gw.update("alice", created.id, &patch).unwrap();

        assert_eq!(updated.value, Decimal::ZERO);
        assert_eq!(updated.description, created.description);
        assert_eq!(updated.timestamp, created.timestamp);
        assert_eq!(updated.external_reference, created.external_reference);
    }

    #[test]
    fn test_millisecond_timestamps_survive_storage() {
        let (gw, wallet, category) = seeded();
        let mut record = new_record(wallet, category, 1, "1", None);
        record.timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        let created = gw.create("alice", &record).unwrap();
        assert_eq!(created.timestamp, record.timestamp);

        let later = record.timestamp + chrono::Duration::milliseconds(500);
        let patch = RecordPatch {
            timestamp: Some(later),
            ..RecordPatch::default()
        };
        assert_eq!(gw.update("alice", created.id, &patch).unwrap().timestamp, later);
    }

    #[test]
    fn test_update_rejects_blank_description() {
        let (gw, wallet, category) = seeded();
        let created = gw
            .create("alice", &new_record(wallet, category, 1, "1", None))
            .unwrap();
        let patch = RecordPatch {
            description: Some(String::new()),
            ..RecordPatch::default()
        };
        assert!(matches!(
            gw.update("alice", created.id, &patch),
            Err(FinanceError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_duplicate_user_and_wallet_conflict() {
        let (gw, _, _) = seeded();
        assert!(matches!(gw.create_user("alice"), Err(FinanceError::Conflict(_))));
        assert!(matches!(
            gw.create_wallet("alice", "Checking"),
            Err(FinanceError::Conflict(_))
        ));
    }

    #[test]
    fn test_month_close_markers() {
        let (gw, _, _) = seeded();
        assert!(!gw.is_month_marked_closed("alice", 2024, 3).unwrap());

        gw.set_month_closed("alice", 2024, 3, true).unwrap();
        gw.set_month_closed("alice", 2024, 3, true).unwrap();
        assert!(gw.is_month_marked_closed("alice", 2024, 3).unwrap());
        assert!(!gw.is_month_marked_closed("alice", 2024, 4).unwrap());

        gw.set_month_closed("alice", 2024, 3, false).unwrap();
        assert!(!gw.is_month_marked_closed("alice", 2024, 3).unwrap());
    }

    #[test]
    fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finance.db");
        {
            let gw = SqliteGateway::open(&path).unwrap();
            gw.create_user("alice").unwrap();
        }
        let gw = SqliteGateway::open(&path).unwrap();
        assert_eq!(gw.get_user("alice").unwrap().username, "alice");
    }
}
