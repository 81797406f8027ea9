//! DocVault Ingest — quota, encryption, zip decomposition, OCR and background processing.

pub mod archive;
pub mod context;
pub mod crypto;
pub mod deskew;
pub mod events;
pub mod mime;
pub mod ocr;
pub mod process;
pub mod processing;
pub mod quota;
pub mod registry;
pub mod service;
pub mod storage;

pub use archive::{ArchiveChild, ArchiveImport};
pub use context::OperationContext;
pub use crypto::{CipherReader, EncryptionProvider, FileCipher};
pub use events::{AsyncEvent, DocumentUpdated, EventDispatcher, FileCreated};
pub use ocr::OcrExtractor;
pub use processing::{start_processing_worker, ProcessingWorker};
pub use quota::QuotaTracker;
pub use registry::ProcessingRegistry;
pub use service::{FileService, FileUpdate, NewFileRequest};
pub use storage::StoragePaths;
