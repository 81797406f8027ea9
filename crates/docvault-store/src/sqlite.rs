//! SQLite-backed metadata store for files and users.
//!
//! Files are never physically removed: deletion stamps `delete_date` and every
//! "active" query filters on `delete_date IS NULL`.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::schema::SCHEMA_SQL;
use crate::types::*;
use docvault_core::{Error, Result};

/// SQLite store holding file metadata and owner storage accounting.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create the SQLite store.
    ///
    /// `db_dir` is the directory (e.g., `data/db/`). The file will be `db_dir/docvault.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("docvault.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        info!(
            "SqliteStore initialized: {} active files, path={}",
            store.count_active_files()?,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------

    /// Create a user with a freshly generated private key.
    pub fn create_user(&self, username: &str, storage_quota: i64) -> Result<User> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            private_key: generate_private_key(),
            storage_quota,
            storage_current: 0,
            create_date: now_millis(),
        };

        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO users (id, username, private_key, storage_quota, storage_current, create_date) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![
            user.id,
            user.username,
            user.private_key,
            user.storage_quota,
            user.storage_current,
            user.create_date,
        ])
        .map_err(|e| Error::Database(e.to_string()))?;

        debug!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Get a user by ID.
    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM users WHERE id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![user_id], |row| Ok(Self::row_to_user(row)))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    /// Get a user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM users WHERE username = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![username], |row| Ok(Self::row_to_user(row)))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    /// Atomically add `bytes` to a user's consumed storage. Returns the new total.
    pub fn add_storage_usage(&self, user_id: &str, bytes: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let current: Option<i64> = conn
            .prepare_cached(
                "UPDATE users SET storage_current = storage_current + ?1 \
                 WHERE id = ?2 RETURNING storage_current",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![bytes, user_id], |row| row.get(0))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        current.ok_or_else(|| Error::NotFound(format!("user {}", user_id)))
    }

    /// Sum of consumed storage across all users.
    pub fn global_storage_usage(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let total: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(storage_current), 0) FROM users",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(total)
    }

    // ---------------------------------------------------------------
    // Files
    // ---------------------------------------------------------------

    /// Insert a file row with a new UUID and the current timestamp.
    pub fn create_file(&self, file: NewFile) -> Result<StoredFile> {
        let stored = StoredFile {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: file.document_id,
            user_id: file.user_id,
            name: file.name,
            mime_type: file.mime_type,
            content: None,
            order: file.order,
            create_date: now_millis(),
            delete_date: None,
        };

        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO files (id, document_id, user_id, name, mime_type, file_order, create_date) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![
            stored.id,
            stored.document_id,
            stored.user_id,
            stored.name,
            stored.mime_type,
            stored.order,
            stored.create_date,
        ])
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(stored)
    }

    /// Get a file regardless of its deletion status.
    pub fn get_file(&self, id: &str) -> Result<Option<StoredFile>> {
        self.query_file("SELECT * FROM files WHERE id = ?1", params![id])
    }

    /// Get an active file.
    pub fn get_active_file(&self, id: &str) -> Result<Option<StoredFile>> {
        self.query_file(
            "SELECT * FROM files WHERE id = ?1 AND delete_date IS NULL",
            params![id],
        )
    }

    /// Get an active file owned by `user_id`.
    pub fn get_active_file_for_user(&self, id: &str, user_id: &str) -> Result<Option<StoredFile>> {
        self.query_file(
            "SELECT * FROM files WHERE id = ?1 AND user_id = ?2 AND delete_date IS NULL",
            params![id, user_id],
        )
    }

    /// Active files of a document, or the user's orphan files when
    /// `document_id` is `None`. Both are ordered by stored position.
    pub fn get_by_document(
        &self,
        user_id: &str,
        document_id: Option<&str>,
    ) -> Result<Vec<StoredFile>> {
        match document_id {
            Some(document_id) => self.query_files(
                "SELECT * FROM files WHERE document_id = ?1 AND delete_date IS NULL \
                 ORDER BY file_order ASC, create_date ASC, rowid ASC",
                params![document_id],
            ),
            None => self.query_files(
                "SELECT * FROM files WHERE document_id IS NULL AND user_id = ?1 \
                 AND delete_date IS NULL ORDER BY file_order ASC, create_date ASC, rowid ASC",
                params![user_id],
            ),
        }
    }

    /// Update the mutable fields of an active file.
    pub fn update_file(&self, file: &StoredFile) -> Result<StoredFile> {
        let conn = self.conn.lock();
        let count = conn
            .prepare_cached(
                "UPDATE files SET document_id = ?1, name = ?2, content = ?3, file_order = ?4, \
                 mime_type = ?5 WHERE id = ?6 AND delete_date IS NULL",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .execute(params![
                file.document_id,
                file.name,
                file.content,
                file.order,
                file.mime_type,
                file.id,
            ])
            .map_err(|e| Error::Database(e.to_string()))?;
        if count == 0 {
            return Err(Error::NotFound(format!("file {}", file.id)));
        }
        Ok(file.clone())
    }

    /// Persist a batch of `(file_id, order)` pairs in one transaction.
    pub fn update_file_orders(&self, orders: &[(String, i32)]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare_cached("UPDATE files SET file_order = ?1 WHERE id = ?2")
                .map_err(|e| Error::Database(e.to_string()))?;
            for (id, order) in orders {
                stmt.execute(params![order, id])
                    .map_err(|e| Error::Database(e.to_string()))?;
            }
        }
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Store extracted text for a file. Returns false if the file is not active.
    pub fn update_file_content(&self, id: &str, content: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE files SET content = ?1 WHERE id = ?2 AND delete_date IS NULL",
                params![content, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Soft-delete a file. Returns false if it was not active.
    pub fn delete_file(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE files SET delete_date = ?1 WHERE id = ?2 AND delete_date IS NULL",
                params![now_millis(), id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Count active files.
    pub fn count_active_files(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM files WHERE delete_date IS NULL",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count)
    }

    fn query_file(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<StoredFile>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached(sql)
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params, Self::row_to_file)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    fn query_files(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StoredFile>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params, Self::row_to_file)
            .map_err(|e| Error::Database(e.to_string()))?;
        let files = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(files)
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    /// A row without an id or owner is an error, not an empty file.
    fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredFile> {
        Ok(StoredFile {
            id: row.get("id")?,
            document_id: row.get("document_id").ok().flatten(),
            user_id: row.get("user_id")?,
            name: row.get("name").ok().flatten(),
            mime_type: row.get("mime_type").unwrap_or_default(),
            content: row.get("content").ok().flatten(),
            order: row.get("file_order").unwrap_or(0),
            create_date: row.get("create_date").unwrap_or(0),
            delete_date: row.get("delete_date").ok().flatten(),
        })
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> User {
        User {
            id: row.get("id").unwrap_or_default(),
            username: row.get("username").unwrap_or_default(),
            private_key: row.get("private_key").unwrap_or_default(),
            storage_quota: row.get("storage_quota").unwrap_or(0),
            storage_current: row.get("storage_current").unwrap_or(0),
            create_date: row.get("create_date").unwrap_or(0),
        }
    }
}

/// 32 random bytes, hex encoded.
fn generate_private_key() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    hex::encode(bytes)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
