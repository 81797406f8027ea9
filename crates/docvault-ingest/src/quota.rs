//! Per-user and global storage ceilings.

use std::sync::Arc;

use tracing::debug;

use docvault_core::{Error, QuotaScope, Result};
use docvault_store::{SqliteStore, User};

/// Checks storage ceilings before a write and records usage after it.
///
/// Check and commit are separate calls, so two concurrent uploads from the
/// same user can both pass the check. The commit itself is an atomic
/// increment in the store and never loses an update.
pub struct QuotaTracker {
    store: Arc<SqliteStore>,
    global_quota: Option<u64>,
}

impl QuotaTracker {
    pub fn new(store: Arc<SqliteStore>, global_quota: Option<u64>) -> Self {
        Self {
            store,
            global_quota,
        }
    }

    /// Fails when `user` would exceed their own ceiling.
    pub fn check_user(&self, user: &User, additional_bytes: u64) -> Result<()> {
        let projected = (user.storage_current.max(0) as u64).saturating_add(additional_bytes);
        if projected > user.storage_quota.max(0) as u64 {
            debug!(
                "User {} quota reached: {} + {} > {}",
                user.id, user.storage_current, additional_bytes, user.storage_quota
            );
            return Err(Error::QuotaExceeded(QuotaScope::User));
        }
        Ok(())
    }

    /// Fails when the whole system would exceed the global ceiling.
    /// Always passes when no global ceiling is configured.
    pub fn check_global(&self, additional_bytes: u64) -> Result<()> {
        let Some(ceiling) = self.global_quota else {
            return Ok(());
        };
        let current = self.store.global_storage_usage()?.max(0) as u64;
        if current.saturating_add(additional_bytes) > ceiling {
            debug!(
                "Global quota reached: {} + {} > {}",
                current, additional_bytes, ceiling
            );
            return Err(Error::QuotaExceeded(QuotaScope::Global));
        }
        Ok(())
    }

    /// Record `additional_bytes` against the user. Returns their new usage.
    pub fn commit(&self, user_id: &str, additional_bytes: u64) -> Result<i64> {
        let bytes = i64::try_from(additional_bytes)
            .map_err(|_| Error::Internal(format!("size {} out of range", additional_bytes)))?;
        self.store.add_storage_usage(user_id, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path()).unwrap());
        (store, dir)
    }

    #[test]
    fn test_user_ceiling() {
        let (store, _dir) = test_store();
        let quota = QuotaTracker::new(store.clone(), None);
        let user = store.create_user("alice", 100).unwrap();

        assert!(quota.check_user(&user, 100).is_ok());
        assert!(matches!(
            quota.check_user(&user, 101),
            Err(Error::QuotaExceeded(QuotaScope::User))
        ));
    }

    #[test]
    fn test_global_skipped_when_unset() {
        let (store, _dir) = test_store();
        let quota = QuotaTracker::new(store, None);
        assert!(quota.check_global(u64::MAX).is_ok());
    }

    #[test]
    fn test_global_ceiling_counts_all_users() {
        let (store, _dir) = test_store();
        let quota = QuotaTracker::new(store.clone(), Some(150));
        let alice = store.create_user("alice", 1000).unwrap();
        let bob = store.create_user("bob", 1000).unwrap();

        quota.commit(&alice.id, 100).unwrap();
        quota.commit(&bob.id, 40).unwrap();

        assert!(quota.check_global(10).is_ok());
        assert!(matches!(
            quota.check_global(11),
            Err(Error::QuotaExceeded(QuotaScope::Global))
        ));
    }

    #[test]
    fn test_commit_increments() {
        let (store, _dir) = test_store();
        let quota = QuotaTracker::new(store.clone(), None);
        let user = store.create_user("alice", 1000).unwrap();

        assert_eq!(quota.commit(&user.id, 10).unwrap(), 10);
        assert_eq!(quota.commit(&user.id, 5).unwrap(), 15);
        assert_eq!(store.get_user(&user.id).unwrap().unwrap().storage_current, 15);
    }
}
