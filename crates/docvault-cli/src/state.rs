//! Shared application state.

use std::sync::Arc;

use anyhow::Context;
use docvault_core::VaultConfig;
use docvault_ingest::{
    AsyncEvent, EventDispatcher, FileService, OcrExtractor, OperationContext, ProcessingRegistry,
    ProcessingWorker, StoragePaths,
};
use docvault_store::{SqliteStore, User};
use tokio::sync::mpsc;

/// Everything a command needs: configuration, store, file service and the
/// sending half of the async event queue.
pub struct AppState {
    pub config: VaultConfig,
    pub store: Arc<SqliteStore>,
    pub files: FileService,
    pub dispatcher: EventDispatcher,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<AsyncEvent>>>,
}

impl AppState {
    pub fn open(config: VaultConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            SqliteStore::open(&config.data_paths.db)
                .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?,
        );
        let registry = Arc::new(ProcessingRegistry::new());
        let files = FileService::new(
            store.clone(),
            StoragePaths::new(&config.data_paths.storage),
            config.global_quota,
            registry.clone(),
        );
        let (dispatcher, rx) = EventDispatcher::channel(registry);

        Ok(Self {
            config,
            store,
            files,
            dispatcher,
            events_rx: parking_lot::Mutex::new(Some(rx)),
        })
    }

    /// Take the event receiver (can only be called once, by the worker).
    pub fn take_events_rx(&self) -> Option<mpsc::UnboundedReceiver<AsyncEvent>> {
        self.events_rx.lock().take()
    }

    /// Worker consuming this state's events.
    pub fn processing_worker(&self) -> ProcessingWorker {
        ProcessingWorker::new(
            self.store.clone(),
            self.files.paths().clone(),
            self.files.registry().clone(),
            OcrExtractor::new(self.config.ocr.clone()),
            self.config.data_paths.tmp.clone(),
        )
    }

    pub fn new_context(&self) -> anyhow::Result<OperationContext> {
        OperationContext::new(&self.config.data_paths.tmp)
            .context("Failed to create operation context")
    }

    pub fn find_user(&self, username: &str) -> anyhow::Result<User> {
        self.store
            .get_user_by_username(username)?
            .with_context(|| format!("No such user: {}", username))
    }
}
