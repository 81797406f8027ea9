//! Background consumer of async events: renditions and OCR for new files.

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, ImageReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::context::OperationContext;
use crate::crypto::{EncryptionProvider, FileCipher};
use crate::events::{AsyncEvent, FileCreated};
use crate::mime;
use crate::ocr::OcrExtractor;
use crate::registry::ProcessingRegistry;
use crate::storage::StoragePaths;
use docvault_core::{Error, Result};
use docvault_store::SqliteStore;

/// Longest side of the web rendition.
pub const WEB_MAX_DIMENSION: u32 = 1280;
/// Longest side of the thumbnail.
pub const THUMBNAIL_MAX_DIMENSION: u32 = 256;

pub struct ProcessingWorker {
    store: Arc<SqliteStore>,
    paths: StoragePaths,
    registry: Arc<ProcessingRegistry>,
    ocr: OcrExtractor,
    tmp_root: PathBuf,
    encryption: EncryptionProvider,
}

impl ProcessingWorker {
    pub fn new(
        store: Arc<SqliteStore>,
        paths: StoragePaths,
        registry: Arc<ProcessingRegistry>,
        ocr: OcrExtractor,
        tmp_root: PathBuf,
    ) -> Self {
        Self {
            store,
            paths,
            registry,
            ocr,
            tmp_root,
            encryption: EncryptionProvider,
        }
    }

    /// Handle one event. A file leaves the processing registry once handled,
    /// whether or not its processing succeeded.
    pub async fn handle(&self, event: AsyncEvent) {
        match event {
            AsyncEvent::FileCreated(created) => {
                let file_id = created.file.id.clone();
                match self.process_file(&created).await {
                    Ok(()) => debug!("Processed file {}", file_id),
                    Err(e) => error!("Processing file {} failed: {}", file_id, e),
                }
                self.registry.end(&file_id);
            }
            AsyncEvent::DocumentUpdated(updated) => {
                info!(
                    "Document {} of user {} changed; reindex requested",
                    updated.document_id, updated.user_id
                );
            }
        }
    }

    async fn process_file(&self, event: &FileCreated) -> Result<()> {
        let file = &event.file;
        if !mime::is_raster_image(&file.mime_type) {
            debug!("No processing for {} ({})", file.id, file.mime_type);
            return Ok(());
        }

        let user = self
            .store
            .get_user(&event.user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {}", event.user_id)))?;
        let cipher = self.encryption.cipher_for(&user.private_key)?;

        let source = event.source.clone();
        let web = self.paths.web(&file.id);
        let thumbnail = self.paths.thumbnail(&file.id);
        let image = tokio::task::spawn_blocking(move || -> Result<DynamicImage> {
            let image = decode_image(&source)?;
            write_rendition(&cipher, &image, WEB_MAX_DIMENSION, &web)?;
            write_rendition(&cipher, &image, THUMBNAIL_MAX_DIMENSION, &thumbnail)?;
            Ok(image)
        })
        .await
        .map_err(|e| Error::Internal(format!("rendition task: {}", e)))??;
        debug!("Wrote renditions for {}", file.id);

        let Some(language) = event.language.as_deref().filter(|l| !l.trim().is_empty()) else {
            return Ok(());
        };
        let ctx = OperationContext::new(&self.tmp_root)?;
        let text = self.ocr.extract_text(&ctx, language, image).await?;
        self.store.update_file_content(&file.id, &text)?;
        info!("Stored {} characters of OCR text for {}", text.len(), file.id);
        Ok(())
    }
}

/// Start the background processing worker. It runs until every
/// [`EventDispatcher`](crate::events::EventDispatcher) is dropped.
pub fn start_processing_worker(
    worker: Arc<ProcessingWorker>,
    mut rx: UnboundedReceiver<AsyncEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Background processing worker started");
        while let Some(event) = rx.recv().await {
            worker.handle(event).await;
        }
        info!("Background processing worker stopped");
    })
}

fn decode_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| Error::Image(format!("{}: {}", path.display(), e)))
}

/// Encode `image` as JPEG, bounded by `max_dimension`, and store it encrypted.
fn write_rendition(
    cipher: &FileCipher,
    image: &DynamicImage,
    max_dimension: u32,
    dest: &Path,
) -> Result<()> {
    let resized = if image.width() > max_dimension || image.height() > max_dimension {
        image.thumbnail(max_dimension, max_dimension)
    } else {
        image.clone()
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut jpeg = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| Error::Image(e.to_string()))?;

    let out = File::create(dest)
        .map_err(|e| Error::Storage(format!("{}: {}", dest.display(), e)))?;
    cipher.encrypt(jpeg.as_slice(), BufWriter::new(out))?;
    Ok(())
}
