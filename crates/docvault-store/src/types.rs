//! Row types for files and their owners.

use serde::{Deserialize, Serialize};

/// A file row from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub order: i32,
    pub create_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_date: Option<i64>,
}

impl StoredFile {
    pub fn is_active(&self) -> bool {
        self.delete_date.is_none()
    }
}

/// Fields supplied when inserting a file; id and dates are generated.
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub document_id: Option<String>,
    pub user_id: String,
    pub name: Option<String>,
    pub mime_type: String,
    pub order: i32,
}

/// A user row: owner identity, encryption key and storage accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub storage_quota: i64,
    pub storage_current: i64,
    pub create_date: i64,
}
