//! Database schema SQL.

/// Core tables: users, files.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    private_key TEXT NOT NULL,
    storage_quota INTEGER NOT NULL,
    storage_current INTEGER NOT NULL DEFAULT 0,
    create_date INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    document_id TEXT,
    user_id TEXT NOT NULL REFERENCES users(id),
    name TEXT,
    mime_type TEXT NOT NULL,
    content TEXT,
    file_order INTEGER NOT NULL DEFAULT 0,
    create_date INTEGER NOT NULL,
    delete_date INTEGER
);

CREATE INDEX IF NOT EXISTS idx_files_document ON files(document_id, delete_date);
CREATE INDEX IF NOT EXISTS idx_files_user ON files(user_id, delete_date);
"#;
