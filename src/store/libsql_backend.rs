//! libSQL backend for letters and users.
//!
//! Write transactions run on their own connection with `BEGIN IMMEDIATE`, so
//! the SQLite write lock is taken up front. In-process writers queue on an
//! async mutex first; `busy_timeout` covers writers in other processes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::letters::{Letter, LetterId, LetterType, Role, User, UserId};
use crate::store::migrations;
use crate::store::traits::{LetterStore, LetterTransaction, UserDirectory};

/// libSQL database backend.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
    /// Shared connection for reads and user management.
    conn: Connection,
    write_lock: Arc<Mutex<()>>,
    lock_timeout: Duration,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path, lock_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        configure_connection(&conn, lock_timeout).await?;
        pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: Arc::new(Mutex::new(())),
            lock_timeout,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn pragma(conn: &Connection, sql: &str) -> Result<(), DatabaseError> {
    conn.query(sql, ())
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?;
    Ok(())
}

async fn configure_connection(
    conn: &Connection,
    lock_timeout: Duration,
) -> Result<(), DatabaseError> {
    pragma(
        conn,
        &format!("PRAGMA busy_timeout = {}", lock_timeout.as_millis()),
    )
    .await
}

/// SQLITE_BUSY and SQLITE_LOCKED, including extended codes.
fn is_lock_error(e: &libsql::Error) -> bool {
    if let libsql::Error::SqliteFailure(code, _) = e
        && matches!(code & 0xff, 5 | 6)
    {
        return true;
    }
    let msg = e.to_string();
    msg.contains("database is locked") || msg.contains("database table is locked")
}

/// Map a write-path error, surfacing lock contention as `LockTimeout`.
fn write_error(op: &str, e: libsql::Error, waited: Duration) -> DatabaseError {
    if is_lock_error(&e) {
        DatabaseError::LockTimeout { waited }
    } else if e.to_string().contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {e}"))
    } else {
        DatabaseError::Query(format!("{op}: {e}"))
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn opt_date(d: Option<NaiveDate>) -> libsql::Value {
    opt_text(d.map(|d| d.format("%Y-%m-%d").to_string()).as_deref())
}

fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

const LETTER_COLUMNS: &str = "id, letter_type, scope, status, priority, agenda_number, sender, letter_number, title, body, summary, letter_date, received_date, file_path, disposition, disposition_target, disposed_at, created_by, verified_by, disposed_by, assigned_verifier, needs_reply, in_reply_to, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, role, position";

/// Map a libsql Row to a Letter. Column order matches LETTER_COLUMNS.
fn row_to_letter(row: &libsql::Row) -> Result<Letter, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("letter row parse: {e}"));

    let type_str: String = row.get(1).map_err(col)?;
    let scope_str: String = row.get(2).map_err(col)?;
    let status_str: String = row.get(3).map_err(col)?;
    let priority_str: String = row.get(4).map_err(col)?;
    let disposed_at: Option<String> = row.get(16).ok();
    let created_str: String = row.get(23).map_err(col)?;
    let updated_str: String = row.get(24).map_err(col)?;

    Ok(Letter {
        id: row.get(0).map_err(col)?,
        letter_type: parse_enum(&type_str)?,
        scope: parse_enum(&scope_str)?,
        status: parse_enum(&status_str)?,
        priority: parse_enum(&priority_str)?,
        agenda_number: row.get(5).map_err(col)?,
        sender: row.get(6).map_err(col)?,
        letter_number: row.get(7).map_err(col)?,
        title: row.get(8).map_err(col)?,
        body: row.get(9).map_err(col)?,
        summary: row.get(10).ok(),
        letter_date: row.get::<String>(11).ok().and_then(|s| parse_date(&s)),
        received_date: row.get::<String>(12).ok().and_then(|s| parse_date(&s)),
        file_path: row.get(13).ok(),
        disposition: row.get(14).ok(),
        disposition_target: row.get(15).ok(),
        disposed_at: disposed_at.as_deref().map(parse_datetime),
        created_by: row.get(17).map_err(col)?,
        verified_by: row.get(18).ok(),
        disposed_by: row.get(19).ok(),
        assigned_verifier: row.get(20).ok(),
        needs_reply: row.get::<i64>(21).map_err(col)? != 0,
        in_reply_to: row.get(22).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("user row parse: {e}"));
    let role_str: String = row.get(2).map_err(col)?;
    Ok(User {
        id: row.get(0).map_err(col)?,
        username: row.get(1).map_err(col)?,
        role: parse_enum(&role_str)?,
        position: row.get(3).ok(),
    })
}

async fn query_letter(
    conn: &Connection,
    id: LetterId,
    op: &str,
) -> Result<Option<Letter>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {LETTER_COLUMNS} FROM letters WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row_to_letter(&row).map(Some),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl LetterStore for LibSqlBackend {
    async fn begin(&self) -> Result<Box<dyn LetterTransaction>, DatabaseError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.write_lock.clone().lock_owned())
            .await
            .map_err(|_| DatabaseError::LockTimeout {
                waited: self.lock_timeout,
            })?;

        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        configure_connection(&conn, self.lock_timeout).await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| write_error("begin", e, self.lock_timeout))?;

        Ok(Box::new(LibSqlTransaction {
            conn,
            _guard: guard,
            lock_timeout: self.lock_timeout,
        }))
    }

    async fn fetch_letter(&self, id: LetterId) -> Result<Option<Letter>, DatabaseError> {
        query_letter(self.conn(), id, "fetch_letter").await
    }
}

/// An open `BEGIN IMMEDIATE` transaction.
///
/// Dropping it closes the connection, which rolls back anything uncommitted.
struct LibSqlTransaction {
    // Declared before the guard so the connection closes first.
    conn: Connection,
    _guard: OwnedMutexGuard<()>,
    lock_timeout: Duration,
}

#[async_trait]
impl LetterTransaction for LibSqlTransaction {
    async fn get_letter(&mut self, id: LetterId) -> Result<Option<Letter>, DatabaseError> {
        query_letter(&self.conn, id, "get_letter").await
    }

    async fn insert_letter(&mut self, letter: &Letter) -> Result<LetterId, DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO letters (letter_type, scope, status, priority, agenda_number, sender, letter_number, title, body, summary, letter_date, received_date, file_path, disposition, disposition_target, disposed_at, created_by, verified_by, disposed_by, assigned_verifier, needs_reply, in_reply_to, created_year, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
                params![
                    letter.letter_type.as_str(),
                    letter.scope.as_str(),
                    letter.status.as_str(),
                    letter.priority.as_str(),
                    letter.agenda_number.as_str(),
                    letter.sender.as_str(),
                    letter.letter_number.as_str(),
                    letter.title.as_str(),
                    letter.body.as_str(),
                    opt_text(letter.summary.as_deref()),
                    opt_date(letter.letter_date),
                    opt_date(letter.received_date),
                    opt_text(letter.file_path.as_deref()),
                    opt_text(letter.disposition.as_deref()),
                    opt_text(letter.disposition_target.as_deref()),
                    opt_text(letter.disposed_at.map(|t| t.to_rfc3339()).as_deref()),
                    letter.created_by,
                    opt_int(letter.verified_by),
                    opt_int(letter.disposed_by),
                    opt_int(letter.assigned_verifier),
                    letter.needs_reply as i64,
                    opt_int(letter.in_reply_to),
                    letter.created_at.year() as i64,
                    letter.created_at.to_rfc3339(),
                    letter.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_letter", e, self.lock_timeout))?;

        let id = self.conn.last_insert_rowid();
        debug!(letter_id = id, letter_type = %letter.letter_type, "Letter inserted into DB");
        Ok(id)
    }

    async fn update_letter(&mut self, letter: &Letter) -> Result<(), DatabaseError> {
        let changed = self
            .conn
            .execute(
                "UPDATE letters SET scope = ?1, status = ?2, priority = ?3, agenda_number = ?4, sender = ?5, letter_number = ?6, title = ?7, body = ?8, summary = ?9, letter_date = ?10, received_date = ?11, file_path = ?12, disposition = ?13, disposition_target = ?14, disposed_at = ?15, verified_by = ?16, disposed_by = ?17, assigned_verifier = ?18, needs_reply = ?19, in_reply_to = ?20, updated_at = ?21 WHERE id = ?22",
                params![
                    letter.scope.as_str(),
                    letter.status.as_str(),
                    letter.priority.as_str(),
                    letter.agenda_number.as_str(),
                    letter.sender.as_str(),
                    letter.letter_number.as_str(),
                    letter.title.as_str(),
                    letter.body.as_str(),
                    opt_text(letter.summary.as_deref()),
                    opt_date(letter.letter_date),
                    opt_date(letter.received_date),
                    opt_text(letter.file_path.as_deref()),
                    opt_text(letter.disposition.as_deref()),
                    opt_text(letter.disposition_target.as_deref()),
                    opt_text(letter.disposed_at.map(|t| t.to_rfc3339()).as_deref()),
                    opt_int(letter.verified_by),
                    opt_int(letter.disposed_by),
                    opt_int(letter.assigned_verifier),
                    letter.needs_reply as i64,
                    opt_int(letter.in_reply_to),
                    letter.updated_at.to_rfc3339(),
                    letter.id,
                ],
            )
            .await
            .map_err(|e| write_error("update_letter", e, self.lock_timeout))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "letter".into(),
                id: letter.id.to_string(),
            });
        }
        debug!(letter_id = letter.id, status = %letter.status, "Letter updated in DB");
        Ok(())
    }

    async fn delete_letter(&mut self, id: LetterId) -> Result<bool, DatabaseError> {
        let changed = self
            .conn
            .execute("DELETE FROM letters WHERE id = ?1", params![id])
            .await
            .map_err(|e| write_error("delete_letter", e, self.lock_timeout))?;
        debug!(letter_id = id, deleted = changed > 0, "Letter delete");
        Ok(changed > 0)
    }

    async fn max_agenda_number(
        &mut self,
        letter_type: LetterType,
        year: i32,
    ) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(CAST(agenda_number AS INTEGER)), 0) FROM letters WHERE letter_type = ?1 AND created_year = ?2 AND agenda_number != ''",
                params![letter_type.as_str(), year as i64],
            )
            .await
            .map_err(|e| write_error("max_agenda_number", e, self.lock_timeout))?;

        let max: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("max_agenda_number: {e}")))?,
            Ok(None) => 0,
            Err(e) => return Err(DatabaseError::Query(format!("max_agenda_number: {e}"))),
        };
        Ok(u64::try_from(max).unwrap_or(0))
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| write_error("commit", e, self.lock_timeout))?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("rollback: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for LibSqlBackend {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE role = ?1 ORDER BY id"),
                params![role.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("users_with_role: {e}")))?;

        let mut users = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("users_with_role: {e}")))?
        {
            users.push(row_to_user(&row)?);
        }
        Ok(users)
    }

    async fn upsert_user(&self, user: &User) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO users (id, username, role, position) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username, role = excluded.role, position = excluded.position",
                params![
                    user.id,
                    user.username.as_str(),
                    user.role.as_str(),
                    opt_text(user.position.as_deref()),
                ],
            )
            .await
            .map_err(|e| write_error("upsert_user", e, self.lock_timeout))?;

        debug!(user_id = user.id, role = %user.role, "User upserted");
        Ok(())
    }
}
