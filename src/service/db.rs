use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Task, TaskId, TaskPatch, TaskStatus, User, UserId};

/// Async-safe handle to the task store.
///
/// Wraps `TaskDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TaskDb>>,
}

impl DbHandle {
    pub fn new(db: TaskDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| ServiceError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// SQLite-backed record store for users, sessions and tasks.
///
/// Every task query is filtered by owner: a task that belongs to someone
/// else is indistinguishable from one that does not exist.
pub struct TaskDb {
    conn: Connection,
}

impl TaskDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'To Do',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users & sessions ──────────────────────────────────────────────

    /// Insert a new user. Emails are compared case-insensitively.
    pub fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let email = normalize_email(email);
        let taken: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .context("Failed to check email uniqueness")?;
        if taken {
            return Err(ServiceError::EmailTaken { email }.into());
        }

        let id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO users (id, name, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    name.trim(),
                    email,
                    password_hash,
                    now_timestamp()
                ],
            )
            .context("Failed to insert user")?;
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                UserRow::from_row,
            )
            .optional()
            .context("Failed to query user")?;
        row.map(UserRow::into_user).transpose()
    }

    /// Look up a user and their stored credential hash by email.
    pub fn find_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, email, created_at, password_hash FROM users WHERE email = ?1",
                params![normalize_email(email)],
                |row| Ok((UserRow::from_row(row)?, row.get::<_, String>(4)?)),
            )
            .optional()
            .context("Failed to query credentials")?;
        match row {
            Some((user, hash)) => Ok(Some((user.into_user()?, hash))),
            None => Ok(None),
        }
    }

    /// Issue a fresh opaque bearer token for `user_id`.
    pub fn create_session(&self, user_id: UserId) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![token, user_id.to_string(), now_timestamp()],
            )
            .context("Failed to insert session")?;
        Ok(token)
    }

    pub fn user_for_token(&self, token: &str) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                "SELECT u.id, u.name, u.email, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1",
                params![token],
                UserRow::from_row,
            )
            .optional()
            .context("Failed to resolve session")?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    // ── Task CRUD (owner-scoped) ──────────────────────────────────────

    pub fn list_tasks(&self, owner_id: UserId) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, owner_id, title, description, status, created_at, updated_at
                 FROM tasks WHERE owner_id = ?1 ORDER BY created_at, id",
            )
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![owner_id.to_string()], TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    pub fn get_task(&self, owner_id: UserId, id: TaskId) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, owner_id, title, description, status, created_at, updated_at
                 FROM tasks WHERE id = ?1 AND owner_id = ?2",
                params![id.to_string(), owner_id.to_string()],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    pub fn create_task(
        &self,
        owner_id: UserId,
        title: &str,
        description: Option<&str>,
        status: TaskStatus,
    ) -> Result<Task> {
        let id = Uuid::new_v4();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO tasks (id, owner_id, title, description, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id.to_string(),
                    owner_id.to_string(),
                    title,
                    description,
                    status.as_str(),
                    now
                ],
            )
            .context("Failed to insert task")?;
        self.get_task(owner_id, id)?
            .context("Task not found after insert")
    }

    /// Apply the supplied fields of `patch`. Returns `None` when the task is
    /// absent or owned by someone else; nothing is written in that case.
    pub fn update_task(
        &self,
        owner_id: UserId,
        id: TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<Task>> {
        let count = self
            .conn
            .execute(
                "UPDATE tasks SET
                    title = COALESCE(?1, title),
                    description = CASE WHEN ?7 THEN ?2 ELSE description END,
                    status = COALESCE(?3, status),
                    updated_at = ?4
                 WHERE id = ?5 AND owner_id = ?6",
                params![
                    patch.title.as_deref(),
                    patch.description.clone().flatten(),
                    patch.status.map(|s| s.as_str()),
                    now_timestamp(),
                    id.to_string(),
                    owner_id.to_string(),
                    patch.description.is_some()
                ],
            )
            .context("Failed to update task")?;
        if count == 0 {
            return Ok(None);
        }
        self.get_task(owner_id, id)
    }

    pub fn delete_task(&self, owner_id: UserId, id: TaskId) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND owner_id = ?2",
                params![id.to_string(), owner_id.to_string()],
            )
            .context("Failed to delete task")?;
        Ok(count > 0)
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp '{}'", raw))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Failed to parse id '{}'", raw))
}

/// Intermediate row struct for users.
struct UserRow {
    id: String,
    name: String,
    email: String,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            name: self.name,
            email: self.email,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Intermediate row struct for tasks.
struct TaskRow {
    id: String,
    owner_id: String,
    title: String,
    description: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        Ok(Task {
            id: parse_uuid(&self.id)?,
            title: self.title,
            description: self.description,
            status,
            owner_id: parse_uuid(&self.owner_id)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user(email: &str) -> Result<(TaskDb, User)> {
        let db = TaskDb::new_in_memory()?;
        let user = db.create_user("Ada", email, "salt$hash")?;
        Ok((db, user))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = TaskDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('users', 'sessions', 'tasks')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 3, "Expected 3 tables to exist");
        Ok(())
    }

    #[test]
    fn test_file_database_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("board.db");
        let owner = {
            let db = TaskDb::new(&path)?;
            let user = db.create_user("Ada", "ada@example.com", "h")?;
            db.create_task(user.id, "Persist me", None, TaskStatus::ToDo)?;
            user.id
        };
        let reopened = TaskDb::new(&path)?;
        let tasks = reopened.list_tasks(owner)?;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Persist me");
        Ok(())
    }

    #[test]
    fn test_create_user_rejects_duplicate_email_case_insensitively() -> Result<()> {
        let (db, _) = db_with_user("ada@example.com")?;
        let err = db
            .create_user("Other", "  ADA@example.com ", "x")
            .expect_err("duplicate email must be rejected");
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::EmailTaken { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_find_credentials_returns_hash() -> Result<()> {
        let (db, user) = db_with_user("ada@example.com")?;
        let (found, hash) = db
            .find_credentials("Ada@Example.com")?
            .expect("user should be found");
        assert_eq!(found.id, user.id);
        assert_eq!(hash, "salt$hash");
        assert!(db.find_credentials("nobody@example.com")?.is_none());
        Ok(())
    }

    #[test]
    fn test_session_lifecycle() -> Result<()> {
        let (db, user) = db_with_user("ada@example.com")?;
        let token = db.create_session(user.id)?;
        assert_eq!(db.user_for_token(&token)?.map(|u| u.id), Some(user.id));

        assert!(db.delete_session(&token)?);
        assert!(db.user_for_token(&token)?.is_none());
        assert!(!db.delete_session(&token)?);
        Ok(())
    }

    #[test]
    fn test_create_task_assigns_id_and_timestamps() -> Result<()> {
        let (db, user) = db_with_user("ada@example.com")?;
        let task = db.create_task(user.id, "Buy milk", Some("2 litres"), TaskStatus::ToDo)?;
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.description.as_deref(), Some("2 litres"));
        assert_eq!(task.status, TaskStatus::ToDo);
        assert_eq!(task.owner_id, user.id);
        assert_eq!(task.created_at, task.updated_at);
        Ok(())
    }

    #[test]
    fn test_list_tasks_only_returns_owned() -> Result<()> {
        let (db, ada) = db_with_user("ada@example.com")?;
        let bob = db.create_user("Bob", "bob@example.com", "h")?;
        db.create_task(ada.id, "Ada 1", None, TaskStatus::ToDo)?;
        db.create_task(ada.id, "Ada 2", None, TaskStatus::Done)?;
        db.create_task(bob.id, "Bob 1", None, TaskStatus::ToDo)?;

        let titles: Vec<String> = db.list_tasks(ada.id)?.into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["Ada 1", "Ada 2"]);
        assert_eq!(db.list_tasks(bob.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_update_task_applies_only_supplied_fields() -> Result<()> {
        let (db, user) = db_with_user("ada@example.com")?;
        let task = db.create_task(user.id, "Old", Some("keep me"), TaskStatus::ToDo)?;

        let updated = db
            .update_task(user.id, task.id, &TaskPatch::status(TaskStatus::InProgress))?
            .expect("owned task should update");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.title, "Old");
        assert_eq!(updated.description.as_deref(), Some("keep me"));
        assert!(updated.updated_at >= task.updated_at);
        Ok(())
    }

    #[test]
    fn test_update_task_clears_description_on_null() -> Result<()> {
        let (db, user) = db_with_user("ada@example.com")?;
        let task = db.create_task(user.id, "Old", Some("stale"), TaskStatus::ToDo)?;

        let patch = TaskPatch {
            description: Some(None),
            ..TaskPatch::default()
        };
        let cleared = db
            .update_task(user.id, task.id, &patch)?
            .expect("owned task should update");
        assert_eq!(cleared.description, None);
        assert_eq!(cleared.title, "Old");

        let patch = TaskPatch {
            description: Some(Some("fresh".into())),
            ..TaskPatch::default()
        };
        let replaced = db
            .update_task(user.id, task.id, &patch)?
            .expect("owned task should update");
        assert_eq!(replaced.description.as_deref(), Some("fresh"));
        Ok(())
    }

    #[test]
    fn test_foreign_owner_cannot_read_update_or_delete() -> Result<()> {
        let (db, ada) = db_with_user("ada@example.com")?;
        let mallory = db.create_user("Mallory", "mallory@example.com", "h")?;
        let task = db.create_task(ada.id, "Private", None, TaskStatus::ToDo)?;

        assert!(db.get_task(mallory.id, task.id)?.is_none());
        let patch = TaskPatch {
            title: Some("pwned".into()),
            ..TaskPatch::default()
        };
        assert!(db.update_task(mallory.id, task.id, &patch)?.is_none());
        assert!(!db.delete_task(mallory.id, task.id)?);

        let still = db.get_task(ada.id, task.id)?.expect("task must survive");
        assert_eq!(still.title, "Private");
        Ok(())
    }

    #[test]
    fn test_delete_task() -> Result<()> {
        let (db, user) = db_with_user("ada@example.com")?;
        let task = db.create_task(user.id, "Delete me", None, TaskStatus::ToDo)?;
        assert!(db.delete_task(user.id, task.id)?);
        assert!(db.get_task(user.id, task.id)?.is_none());
        assert!(!db.delete_task(user.id, task.id)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_runs_closures_off_thread() -> Result<()> {
        let handle = DbHandle::new(TaskDb::new_in_memory()?);
        let user = handle
            .call(|db| db.create_user("Ada", "ada@example.com", "h"))
            .await?;
        let owner = user.id;
        let tasks = handle.call(move |db| db.list_tasks(owner)).await?;
        assert!(tasks.is_empty());
        Ok(())
    }
}
