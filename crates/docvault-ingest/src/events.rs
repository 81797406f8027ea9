//! Events handed to out-of-band consumers once a unit of work commits.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::OperationContext;
use crate::registry::ProcessingRegistry;
use docvault_core::{Error, Result};
use docvault_store::StoredFile;

/// A new file was stored; its plaintext source is still on disk.
#[derive(Debug, Clone)]
pub struct FileCreated {
    pub user_id: String,
    pub language: Option<String>,
    pub file: StoredFile,
    /// Unencrypted copy the file was created from.
    pub source: PathBuf,
    /// Keeps the originating operation's scratch directory alive until the
    /// consumer is done with `source`.
    _scratch: Arc<TempDir>,
}

impl FileCreated {
    pub fn new(
        ctx: &OperationContext,
        user_id: impl Into<String>,
        language: Option<String>,
        file: StoredFile,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            language,
            file,
            source: source.into(),
            _scratch: ctx.scratch(),
        }
    }
}

/// The set or order of a document's files changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpdated {
    pub user_id: String,
    pub document_id: String,
}

#[derive(Debug, Clone)]
pub enum AsyncEvent {
    FileCreated(FileCreated),
    DocumentUpdated(DocumentUpdated),
}

impl AsyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileCreated(_) => "file_created",
            Self::DocumentUpdated(_) => "document_updated",
        }
    }
}

/// Sending half of the async event queue.
///
/// A `FileCreated` event that cannot be delivered releases its file from
/// `registry`, since no consumer will ever end it.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<AsyncEvent>,
    registry: Arc<ProcessingRegistry>,
}

impl EventDispatcher {
    /// Create a dispatcher and the receiver its consumer will drain.
    pub fn channel(
        registry: Arc<ProcessingRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<AsyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, registry }, rx)
    }

    pub fn dispatch(&self, event: AsyncEvent) -> Result<()> {
        debug!("Dispatching {} event", event.kind());
        self.tx.send(event).map_err(|e| {
            if let AsyncEvent::FileCreated(created) = &e.0 {
                self.registry.end(&created.file.id);
            }
            Error::Internal(format!("event consumer gone: {} dropped", e.0.kind()))
        })
    }

    /// Send every event pending on `ctx`. Call after the caller's unit of
    /// work has committed. Returns how many events were delivered.
    pub fn flush(&self, ctx: &mut OperationContext) -> usize {
        let mut delivered = 0;
        for event in ctx.take_async_events() {
            match self.dispatch(event) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("{}", e),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::fixture;

    #[test]
    fn test_flush_drains_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = OperationContext::new(dir.path()).unwrap();
        ctx.add_async_event(AsyncEvent::DocumentUpdated(DocumentUpdated {
            user_id: "u".into(),
            document_id: "d".into(),
        }));

        let (dispatcher, mut rx) = EventDispatcher::channel(Arc::new(ProcessingRegistry::new()));
        assert_eq!(dispatcher.flush(&mut ctx), 1);
        assert!(ctx.pending_events().is_empty());

        match rx.try_recv().unwrap() {
            AsyncEvent::DocumentUpdated(e) => assert_eq!(e.document_id, "d"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_without_consumer_fails() {
        let (dispatcher, rx) = EventDispatcher::channel(Arc::new(ProcessingRegistry::new()));
        drop(rx);
        let result = dispatcher.dispatch(AsyncEvent::DocumentUpdated(DocumentUpdated {
            user_id: "u".into(),
            document_id: "d".into(),
        }));
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_undelivered_file_created_ends_processing() {
        let fx = fixture(None);
        let user = fx.user("alice", 1000);
        let mut ctx = fx.ctx();
        let id = fx
            .service
            .create_file(&mut ctx, fx.request(&user, "notes.txt", b"plain text", None))
            .unwrap();
        assert!(fx.service.registry().is_processing(&id));

        let (dispatcher, rx) = EventDispatcher::channel(fx.service.registry().clone());
        drop(rx);
        assert_eq!(dispatcher.flush(&mut ctx), 0);
        assert!(!fx.service.registry().is_processing(&id));
        assert!(fx.service.registry().is_empty());
    }
}
