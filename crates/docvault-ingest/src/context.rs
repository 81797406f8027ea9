//! Per-operation state: scratch files and events awaiting commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::events::AsyncEvent;
use docvault_core::{Error, Result};

/// Passed explicitly into every pipeline operation.
///
/// Temporary files live in a scratch directory removed when the context and
/// every event referencing it are dropped, whichever way the operation ends.
/// Events accumulate here until the caller flushes them through
/// [`EventDispatcher::flush`](crate::events::EventDispatcher::flush).
#[derive(Debug)]
pub struct OperationContext {
    scratch: Arc<TempDir>,
    pending: Vec<AsyncEvent>,
}

impl OperationContext {
    /// Create a context whose scratch directory lives under `tmp_root`.
    pub fn new(tmp_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(tmp_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("op-")
            .tempdir_in(tmp_root)
            .map_err(|e| Error::Storage(format!("scratch dir in {}: {}", tmp_root.display(), e)))?;
        Ok(Self {
            scratch: Arc::new(scratch),
            pending: Vec::new(),
        })
    }

    /// Create an empty temporary file scoped to this operation.
    pub fn create_temporary_file(&self) -> Result<PathBuf> {
        let path = self
            .scratch
            .path()
            .join(format!("tmp-{}", uuid::Uuid::new_v4()));
        std::fs::File::create(&path)?;
        Ok(path)
    }

    pub(crate) fn scratch(&self) -> Arc<TempDir> {
        self.scratch.clone()
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn add_async_event(&mut self, event: AsyncEvent) {
        self.pending.push(event);
    }

    pub fn pending_events(&self) -> &[AsyncEvent] {
        &self.pending
    }

    pub fn take_async_events(&mut self) -> Vec<AsyncEvent> {
        std::mem::take(&mut self.pending)
    }
}
