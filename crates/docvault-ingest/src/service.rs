//! File ingestion: detect → check quota → order → persist → encrypt → publish.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::OperationContext;
use crate::crypto::{CipherReader, EncryptionProvider};
use crate::events::{AsyncEvent, DocumentUpdated, FileCreated};
use crate::mime;
use crate::quota::QuotaTracker;
use crate::registry::ProcessingRegistry;
use crate::storage::StoragePaths;
use docvault_core::{Error, Result};
use docvault_store::{NewFile, SqliteStore, StoredFile};

/// Longest display name kept, in characters.
pub const MAX_NAME_LEN: usize = 200;

/// Input to [`FileService::create_file`].
#[derive(Debug, Clone)]
pub struct NewFileRequest {
    pub name: Option<String>,
    /// Unencrypted source. Left in place; the `FileCreated` consumer reads it.
    pub source: PathBuf,
    pub size: u64,
    /// OCR language hint, only meaningful for files in a document.
    pub language: Option<String>,
    pub user_id: String,
    pub document_id: Option<String>,
}

/// Changes applied by [`FileService::update_file`].
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub name: Option<String>,
    /// `Some(Some(doc))` moves into `doc`, `Some(None)` detaches to the orphan set.
    pub move_to: Option<Option<String>>,
}

/// Creates, updates and deletes stored files.
pub struct FileService {
    store: Arc<SqliteStore>,
    paths: StoragePaths,
    quota: QuotaTracker,
    registry: Arc<ProcessingRegistry>,
    encryption: EncryptionProvider,
    /// One lock per ordering scope (a document, or a user's orphans).
    scope_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileService {
    pub fn new(
        store: Arc<SqliteStore>,
        paths: StoragePaths,
        global_quota: Option<u64>,
        registry: Arc<ProcessingRegistry>,
    ) -> Self {
        let quota = QuotaTracker::new(store.clone(), global_quota);
        Self {
            store,
            paths,
            quota,
            registry,
            encryption: EncryptionProvider,
            scope_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn registry(&self) -> &Arc<ProcessingRegistry> {
        &self.registry
    }

    /// Store a new file and queue its post-processing. Returns the file ID.
    ///
    /// Mime and quota failures happen before anything is written. After the
    /// metadata row exists, a failed encrypted write or quota commit is
    /// reported but not rolled back.
    pub fn create_file(&self, ctx: &mut OperationContext, req: NewFileRequest) -> Result<String> {
        let mime_type = mime::guess_mime_type(&req.source, req.name.as_deref())?;

        let user = self
            .store
            .get_user(&req.user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {}", req.user_id)))?;
        self.quota.check_user(&user, req.size)?;
        self.quota.check_global(req.size)?;
        let cipher = self.encryption.cipher_for(&user.private_key)?;

        let file = {
            let lock = self.scope_lock(&user.id, req.document_id.as_deref());
            let _guard = lock.lock();
            let order = self.renumber_siblings(&user.id, req.document_id.as_deref())?;
            self.store.create_file(NewFile {
                document_id: req.document_id.clone(),
                user_id: user.id.clone(),
                name: req.name.as_deref().map(abbreviate_name),
                mime_type,
                order,
            })?
        };

        let dest = self.paths.original(&file.id);
        if let Err(e) = cipher.encrypt_to_path(&req.source, &dest) {
            error!(
                "File {} recorded but encrypted write to {} failed: {}",
                file.id,
                dest.display(),
                e
            );
            return Err(e);
        }

        if let Err(e) = self.quota.commit(&user.id, req.size) {
            error!("File {} stored but quota commit failed: {}", file.id, e);
            return Err(e);
        }

        self.registry.start(&file.id);
        info!(
            "Created file {} ({}, {} bytes, order {}) for user {}",
            file.id, file.mime_type, req.size, file.order, user.id
        );

        let file_id = file.id.clone();
        let created = FileCreated::new(ctx, user.id.clone(), req.language, file, req.source);
        ctx.add_async_event(AsyncEvent::FileCreated(created));
        if let Some(document_id) = req.document_id {
            ctx.add_async_event(AsyncEvent::DocumentUpdated(DocumentUpdated {
                user_id: user.id,
                document_id,
            }));
        }

        Ok(file_id)
    }

    /// Soft-delete a file owned by `user_id` and remove its stored bytes.
    ///
    /// Storage usage is left as is.
    pub fn delete_file(&self, ctx: &mut OperationContext, file_id: &str, user_id: &str) -> Result<()> {
        let file = self
            .store
            .get_active_file_for_user(file_id, user_id)?
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;

        if !self.store.delete_file(&file.id)? {
            return Err(Error::NotFound(format!("file {}", file_id)));
        }

        for path in self.paths.all(&file.id) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        if let Some(document_id) = file.document_id {
            ctx.add_async_event(AsyncEvent::DocumentUpdated(DocumentUpdated {
                user_id: user_id.to_string(),
                document_id,
            }));
        }

        info!("Deleted file {} for user {}", file.id, user_id);
        Ok(())
    }

    /// Rename a file and/or move it to another document (or to the orphan set).
    /// A moved file is placed after the destination's existing files.
    pub fn update_file(
        &self,
        ctx: &mut OperationContext,
        file_id: &str,
        user_id: &str,
        update: FileUpdate,
    ) -> Result<StoredFile> {
        let mut file = self
            .store
            .get_active_file_for_user(file_id, user_id)?
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;

        if let Some(name) = update.name.as_deref() {
            file.name = Some(abbreviate_name(name));
        }

        let previous_document = file.document_id.clone();
        let updated = match update.move_to {
            Some(target) if target != file.document_id => {
                let lock = self.scope_lock(user_id, target.as_deref());
                let _guard = lock.lock();
                file.order = self.renumber_siblings(user_id, target.as_deref())?;
                file.document_id = target;
                self.store.update_file(&file)?
            }
            _ => self.store.update_file(&file)?,
        };

        let mut touched: Vec<String> = Vec::new();
        for document_id in [previous_document, updated.document_id.clone()]
            .into_iter()
            .flatten()
        {
            if !touched.contains(&document_id) {
                touched.push(document_id);
            }
        }
        for document_id in touched {
            ctx.add_async_event(AsyncEvent::DocumentUpdated(DocumentUpdated {
                user_id: user_id.to_string(),
                document_id,
            }));
        }

        debug!("Updated file {}", updated.id);
        Ok(updated)
    }

    /// Active files of a document in position order, or the user's orphans.
    pub fn list_files(&self, user_id: &str, document_id: Option<&str>) -> Result<Vec<StoredFile>> {
        self.store.get_by_document(user_id, document_id)
    }

    /// Open the decrypted content of an active file owned by `user_id`.
    pub fn open_file(&self, file_id: &str, user_id: &str) -> Result<CipherReader<File>> {
        let file = self
            .store
            .get_active_file_for_user(file_id, user_id)?
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;

        let path = self.paths.original(&file.id);
        let stored = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("stored bytes for file {}", file.id))
            }
            _ => Error::Storage(format!("{}: {}", path.display(), e)),
        })?;
        self.encryption.cipher_for(&user.private_key)?.decrypt(stored)
    }

    fn scope_lock(&self, user_id: &str, document_id: Option<&str>) -> Arc<Mutex<()>> {
        let key = match document_id {
            Some(document_id) => format!("document:{}", document_id),
            None => format!("orphans:{}", user_id),
        };
        self.scope_locks.entry(key).or_default().clone()
    }

    /// Renumber the scope's active files densely from 0 and return the
    /// position for a file appended after them. Caller holds the scope lock.
    fn renumber_siblings(&self, user_id: &str, document_id: Option<&str>) -> Result<i32> {
        let siblings = self.store.get_by_document(user_id, document_id)?;
        let changed: Vec<(String, i32)> = siblings
            .iter()
            .enumerate()
            .filter(|(position, file)| file.order != *position as i32)
            .map(|(position, file)| (file.id.clone(), position as i32))
            .collect();
        if !changed.is_empty() {
            debug!("Renumbering {} sibling files", changed.len());
            self.store.update_file_orders(&changed)?;
        }
        Ok(siblings.len() as i32)
    }
}

/// Truncate a display name to [`MAX_NAME_LEN`] characters, ending in `...`
/// when shortened.
pub fn abbreviate_name(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let mut short: String = name.chars().take(MAX_NAME_LEN - 3).collect();
    short.push_str("...");
    short
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use docvault_core::QuotaScope;
    use docvault_store::User;
    use std::io::Read;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub service: FileService,
        pub dir: TempDir,
    }

    impl Fixture {
        pub fn ctx(&self) -> OperationContext {
            OperationContext::new(&self.dir.path().join("tmp")).unwrap()
        }

        pub fn user(&self, name: &str, quota: i64) -> User {
            self.service.store().create_user(name, quota).unwrap()
        }

        pub fn source(&self, name: &str, data: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, data).unwrap();
            path
        }

        pub fn request(&self, user: &User, name: &str, data: &[u8], doc: Option<&str>) -> NewFileRequest {
            NewFileRequest {
                name: Some(name.to_string()),
                source: self.source(name, data),
                size: data.len() as u64,
                language: Some("eng".into()),
                user_id: user.id.clone(),
                document_id: doc.map(str::to_string),
            }
        }
    }

    pub(crate) fn fixture(global_quota: Option<u64>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("db")).unwrap());
        let storage = dir.path().join("storage");
        std::fs::create_dir_all(&storage).unwrap();
        let service = FileService::new(
            store,
            StoragePaths::new(storage),
            global_quota,
            Arc::new(ProcessingRegistry::new()),
        );
        Fixture { service, dir }
    }

    #[test]
    fn test_create_file_stores_encrypted_and_publishes() {
        let fx = fixture(None);
        let user = fx.user("alice", 1000);
        let mut ctx = fx.ctx();

        let id = fx
            .service
            .create_file(&mut ctx, fx.request(&user, "notes.txt", b"hello vault", Some("doc-1")))
            .unwrap();

        let stored = std::fs::read(fx.service.paths().original(&id)).unwrap();
        assert!(!stored.windows(5).any(|w| w == b"hello"));

        let mut plain = String::new();
        fx.service
            .open_file(&id, &user.id)
            .unwrap()
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain, "hello vault");

        let file = fx.service.store().get_active_file(&id).unwrap().unwrap();
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(file.order, 0);

        let user = fx.service.store().get_user(&user.id).unwrap().unwrap();
        assert_eq!(user.storage_current, 11);
        assert!(fx.service.registry().is_processing(&id));

        let kinds: Vec<_> = ctx.pending_events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["file_created", "document_updated"]);
    }

    #[test]
    fn test_orphan_publishes_only_file_created() {
        let fx = fixture(None);
        let user = fx.user("alice", 1000);
        let mut ctx = fx.ctx();
        fx.service
            .create_file(&mut ctx, fx.request(&user, "a.txt", b"a", None))
            .unwrap();
        assert_eq!(ctx.pending_events().len(), 1);
    }

    #[test]
    fn test_user_quota_exceeded_leaves_no_trace() {
        let fx = fixture(None);
        let user = fx.user("alice", 10);
        let mut ctx = fx.ctx();

        let result = fx
            .service
            .create_file(&mut ctx, fx.request(&user, "big.txt", &[b'x'; 11], Some("doc")));
        assert!(matches!(result, Err(Error::QuotaExceeded(QuotaScope::User))));

        let user = fx.service.store().get_user(&user.id).unwrap().unwrap();
        assert_eq!(user.storage_current, 0);
        assert_eq!(fx.service.store().count_active_files().unwrap(), 0);
        assert!(ctx.pending_events().is_empty());
        assert!(fx.service.registry().is_empty());
    }

    #[test]
    fn test_global_quota_exceeded() {
        let fx = fixture(Some(15));
        let alice = fx.user("alice", 1000);
        let bob = fx.user("bob", 1000);
        let mut ctx = fx.ctx();

        fx.service
            .create_file(&mut ctx, fx.request(&alice, "a.txt", &[b'a'; 10], None))
            .unwrap();
        let result = fx
            .service
            .create_file(&mut ctx, fx.request(&bob, "b.txt", &[b'b'; 6], None));
        assert!(matches!(result, Err(Error::QuotaExceeded(QuotaScope::Global))));
    }

    #[test]
    fn test_mime_failure_before_side_effects() {
        let fx = fixture(None);
        let user = fx.user("alice", 1000);
        let mut ctx = fx.ctx();
        let req = NewFileRequest {
            name: Some("ghost.txt".into()),
            source: fx.dir.path().join("does-not-exist"),
            size: 1,
            language: None,
            user_id: user.id.clone(),
            document_id: None,
        };
        assert!(matches!(
            fx.service.create_file(&mut ctx, req),
            Err(Error::MimeDetection(_))
        ));
        assert_eq!(fx.service.store().count_active_files().unwrap(), 0);
    }

    #[test]
    fn test_unknown_user() {
        let fx = fixture(None);
        let mut ctx = fx.ctx();
        let req = NewFileRequest {
            name: None,
            source: fx.source("x", b"x"),
            size: 1,
            language: None,
            user_id: "nobody".into(),
            document_id: None,
        };
        assert!(matches!(
            fx.service.create_file(&mut ctx, req),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_positions_dense_after_creation() {
        let fx = fixture(None);
        let user = fx.user("alice", 10_000);
        let mut ctx = fx.ctx();

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(
                fx.service
                    .create_file(&mut ctx, fx.request(&user, &format!("f{}.txt", i), b"x", Some("doc")))
                    .unwrap(),
            );
        }
        // Open a gap, then create again.
        fx.service.delete_file(&mut ctx, &ids[1], &user.id).unwrap();
        fx.service
            .create_file(&mut ctx, fx.request(&user, "last.txt", b"x", Some("doc")))
            .unwrap();

        let orders: Vec<i32> = fx
            .service
            .list_files(&user.id, Some("doc"))
            .unwrap()
            .iter()
            .map(|f| f.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_concurrent_creations_keep_positions_dense() {
        let fx = Arc::new(fixture(None));
        let user = fx.user("alice", 1_000_000);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let fx = fx.clone();
                let user = user.clone();
                std::thread::spawn(move || {
                    let mut ctx = fx.ctx();
                    for i in 0..5 {
                        let name = format!("t{}-{}.txt", t, i);
                        fx.service
                            .create_file(&mut ctx, fx.request(&user, &name, b"data", Some("shared")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut orders: Vec<i32> = fx
            .service
            .list_files(&user.id, Some("shared"))
            .unwrap()
            .iter()
            .map(|f| f.order)
            .collect();
        orders.sort_unstable();
        assert_eq!(orders, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_delete_is_soft_and_removes_bytes() {
        let fx = fixture(None);
        let user = fx.user("alice", 1000);
        let mut ctx = fx.ctx();
        let id = fx
            .service
            .create_file(&mut ctx, fx.request(&user, "a.txt", b"abc", Some("doc")))
            .unwrap();
        std::fs::write(fx.service.paths().thumbnail(&id), b"thumb").unwrap();
        ctx.take_async_events();

        fx.service.delete_file(&mut ctx, &id, &user.id).unwrap();

        for path in fx.service.paths().all(&id) {
            assert!(!path.exists());
        }
        let store = fx.service.store();
        assert!(store.get_active_file(&id).unwrap().is_none());
        assert!(store.get_file(&id).unwrap().unwrap().delete_date.is_some());
        assert_eq!(store.get_user(&user.id).unwrap().unwrap().storage_current, 3);
        assert_eq!(ctx.pending_events().len(), 1);

        assert!(matches!(
            fx.service.delete_file(&mut ctx, &id, &user.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_scoped_to_owner() {
        let fx = fixture(None);
        let alice = fx.user("alice", 1000);
        let bob = fx.user("bob", 1000);
        let mut ctx = fx.ctx();
        let id = fx
            .service
            .create_file(&mut ctx, fx.request(&alice, "a.txt", b"abc", None))
            .unwrap();
        assert!(matches!(
            fx.service.delete_file(&mut ctx, &id, &bob.id),
            Err(Error::NotFound(_))
        ));
        assert!(fx.service.store().get_active_file(&id).unwrap().is_some());
    }

    #[test]
    fn test_update_moves_to_tail_of_target() {
        let fx = fixture(None);
        let user = fx.user("alice", 10_000);
        let mut ctx = fx.ctx();
        fx.service
            .create_file(&mut ctx, fx.request(&user, "d1.txt", b"x", Some("target")))
            .unwrap();
        let orphan = fx
            .service
            .create_file(&mut ctx, fx.request(&user, "o.txt", b"x", None))
            .unwrap();
        ctx.take_async_events();

        let updated = fx
            .service
            .update_file(
                &mut ctx,
                &orphan,
                &user.id,
                FileUpdate {
                    name: Some("renamed.txt".into()),
                    move_to: Some(Some("target".into())),
                },
            )
            .unwrap();
        assert_eq!(updated.document_id.as_deref(), Some("target"));
        assert_eq!(updated.order, 1);
        assert_eq!(updated.name.as_deref(), Some("renamed.txt"));
        assert_eq!(ctx.pending_events().len(), 1);
        assert!(fx.service.list_files(&user.id, None).unwrap().is_empty());
    }

    #[test]
    fn test_move_to_orphans_keeps_scope_order() {
        let fx = fixture(None);
        let user = fx.user("alice", 10_000);
        let mut ctx = fx.ctx();
        let older = fx
            .service
            .create_file(&mut ctx, fx.request(&user, "old.txt", b"x", Some("doc")))
            .unwrap();
        for name in ["o1.txt", "o2.txt"] {
            fx.service
                .create_file(&mut ctx, fx.request(&user, name, b"x", None))
                .unwrap();
        }

        let moved = fx
            .service
            .update_file(
                &mut ctx,
                &older,
                &user.id,
                FileUpdate {
                    name: None,
                    move_to: Some(None),
                },
            )
            .unwrap();
        assert_eq!(moved.order, 2);

        let orphans = fx.service.list_files(&user.id, None).unwrap();
        let orders: Vec<_> = orphans.iter().map(|f| f.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(orphans[2].id, older);

        let newest = fx
            .service
            .create_file(&mut ctx, fx.request(&user, "o3.txt", b"x", None))
            .unwrap();
        let ids: Vec<_> = fx
            .service
            .list_files(&user.id, None)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids[2], older);
        assert_eq!(ids[3], newest);
    }

    #[test]
    fn test_abbreviate_name() {
        assert_eq!(abbreviate_name("short.pdf"), "short.pdf");
        let long = "é".repeat(250);
        let short = abbreviate_name(&long);
        assert_eq!(short.chars().count(), MAX_NAME_LEN);
        assert!(short.ends_with("..."));
        assert_eq!(abbreviate_name(&"a".repeat(200)).len(), 200);
    }

    #[test]
    fn test_long_name_truncated_on_create() {
        let fx = fixture(None);
        let user = fx.user("alice", 1000);
        let mut ctx = fx.ctx();
        let mut req = fx.request(&user, "n.txt", b"x", None);
        req.name = Some("n".repeat(300));
        let id = fx.service.create_file(&mut ctx, req).unwrap();
        let file = fx.service.store().get_active_file(&id).unwrap().unwrap();
        assert_eq!(file.name.unwrap().chars().count(), MAX_NAME_LEN);
    }
}
