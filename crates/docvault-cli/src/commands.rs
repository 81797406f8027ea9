//! Command implementations. Each one runs a single operation against the
//! vault and publishes its events once the operation has succeeded.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use anyhow::Context;
use docvault_ingest::{mime, ArchiveImport, NewFileRequest, OcrExtractor, OperationContext};
use docvault_store::{StoredFile, User};
use tracing::{info, warn};

use crate::state::AppState;

/// Placement and OCR language for imported files.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub document_id: Option<String>,
    pub language: Option<String>,
}

pub fn add_user(state: &AppState, username: &str, quota: Option<u64>) -> anyhow::Result<User> {
    let quota = quota.unwrap_or(state.config.default_user_quota);
    let quota = i64::try_from(quota).context("Quota out of range")?;
    let user = state.store.create_user(username, quota)?;
    info!("Created user {} ({})", user.username, user.id);
    Ok(user)
}

pub fn import_file(
    state: &AppState,
    username: &str,
    path: &Path,
    options: &ImportOptions,
) -> anyhow::Result<String> {
    let user = state.find_user(username)?;
    let size = std::fs::metadata(path)
        .with_context(|| format!("Cannot read {}", path.display()))?
        .len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let mut ctx = state.new_context()?;
    let file_id = state.files.create_file(
        &mut ctx,
        NewFileRequest {
            name,
            source: path.to_path_buf(),
            size,
            language: options.language.clone(),
            user_id: user.id,
            document_id: options.document_id.clone(),
        },
    )?;
    publish(state, &mut ctx);
    Ok(file_id)
}

/// Children stored before a failure stay stored, so events are published
/// whether or not the import completed.
pub fn import_zip(
    state: &AppState,
    username: &str,
    path: &Path,
    options: &ImportOptions,
) -> anyhow::Result<ArchiveImport> {
    let user = state.find_user(username)?;
    let archive = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;

    let mut ctx = state.new_context()?;
    let import = state.files.create_files_from_zip(
        &mut ctx,
        BufReader::new(archive),
        options.language.as_deref(),
        &user.id,
        options.document_id.as_deref(),
    );
    publish(state, &mut ctx);
    Ok(import)
}

/// True when `path` is a zip whose name matches the configured
/// auto-separate pattern, so `import` should split it by group.
pub fn auto_separates(state: &AppState, path: &Path) -> anyhow::Result<bool> {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return Ok(false);
    };
    if !state.config.auto_separates(&name) {
        return Ok(false);
    }
    Ok(mime::guess_mime_type(path, None)? == mime::APPLICATION_ZIP)
}

pub fn list(state: &AppState, username: &str, document_id: Option<&str>) -> anyhow::Result<Vec<StoredFile>> {
    let user = state.find_user(username)?;
    Ok(state.files.list_files(&user.id, document_id)?)
}

pub fn delete(state: &AppState, username: &str, file_id: &str) -> anyhow::Result<()> {
    let user = state.find_user(username)?;
    let mut ctx = state.new_context()?;
    state.files.delete_file(&mut ctx, file_id, &user.id)?;
    publish(state, &mut ctx);
    Ok(())
}

/// Write the decrypted content of a file to `out`. Returns bytes written.
pub fn cat(state: &AppState, username: &str, file_id: &str, out: &mut impl Write) -> anyhow::Result<u64> {
    let user = state.find_user(username)?;
    let mut reader = state.files.open_file(file_id, &user.id)?;
    let copied = io::copy(&mut reader, out)?;
    out.flush()?;
    Ok(copied)
}

/// Run OCR on a local image without storing anything.
pub async fn ocr(state: &AppState, image_path: &Path, language: &str) -> anyhow::Result<String> {
    let image = image_from_path(image_path)?;
    let ctx = state.new_context()?;
    let extractor = OcrExtractor::new(state.config.ocr.clone());
    Ok(extractor.extract_text(&ctx, language, image).await?)
}

fn image_from_path(path: &Path) -> anyhow::Result<image::DynamicImage> {
    image::ImageReader::open(path)
        .with_context(|| format!("Cannot open {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("Cannot decode {}", path.display()))
}

fn publish(state: &AppState, ctx: &mut OperationContext) {
    let pending = ctx.pending_events().len();
    let delivered = state.dispatcher.flush(ctx);
    if delivered < pending {
        warn!("{} of {} events were not delivered", pending - delivered, pending);
    }
}
