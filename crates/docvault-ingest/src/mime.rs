//! Mime type detection from content, with the file name as a fallback hint.
//!
//! Zip containers are opened so office documents and e-books keep their own
//! types instead of collapsing to `application/zip`.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use docvault_core::{Error, Result};
use tracing::debug;
use zip::ZipArchive;

pub const APPLICATION_ZIP: &str = "application/zip";
pub const APPLICATION_PDF: &str = "application/pdf";
pub const IMAGE_JPEG: &str = "image/jpeg";
pub const IMAGE_PNG: &str = "image/png";
pub const IMAGE_GIF: &str = "image/gif";
pub const IMAGE_TIFF: &str = "image/tiff";
pub const IMAGE_BMP: &str = "image/bmp";
pub const IMAGE_WEBP: &str = "image/webp";
pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_CSV: &str = "text/csv";
pub const DEFAULT: &str = "application/octet-stream";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Bytes of header inspected for magic numbers.
const HEADER_LEN: usize = 64;

/// Longest `mimetype` entry accepted from an ODF or EPUB container.
const MIMETYPE_ENTRY_MAX: u64 = 128;

/// Guess the mime type of the file at `path`, using `name` when the content
/// is not recognised. Unreadable content is a detection failure.
pub fn guess_mime_type(path: &Path, name: Option<&str>) -> Result<String> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    File::open(path)
        .and_then(|f| f.take(HEADER_LEN as u64).read_to_end(&mut header))
        .map_err(|e| Error::MimeDetection(format!("{}: {}", path.display(), e)))?;

    let guessed = guess_from_header(&header, name);
    if guessed != APPLICATION_ZIP {
        return Ok(guessed.to_string());
    }
    let container = File::open(path)
        .map_err(|e| Error::MimeDetection(format!("{}: {}", path.display(), e)))?;
    match container_type(container) {
        Some(mime) => {
            debug!("Zip container {} detected as {}", path.display(), mime);
            Ok(mime)
        }
        None => Ok(APPLICATION_ZIP.to_string()),
    }
}

/// Mime type declared by a zip-based document format: the leading
/// `mimetype` entry of ODF and EPUB, or the part layout of OOXML.
/// `None` for a plain archive or one that cannot be read.
pub fn container_type<R: Read + Seek>(reader: R) -> Option<String> {
    let mut archive = ZipArchive::new(reader).ok()?;

    if let Ok(mut first) = archive.by_index(0) {
        if first.name() == "mimetype" {
            let mut declared = String::new();
            (&mut first)
                .take(MIMETYPE_ENTRY_MAX)
                .read_to_string(&mut declared)
                .ok()?;
            let declared = declared.trim();
            if declared.starts_with("application/") && !declared.contains(char::is_whitespace) {
                return Some(declared.to_string());
            }
        }
    }

    let names: Vec<&str> = archive.file_names().collect();
    if !names.contains(&"[Content_Types].xml") {
        return None;
    }
    [("word/", DOCX), ("xl/", XLSX), ("ppt/", PPTX)]
        .into_iter()
        .find(|(prefix, _)| names.iter().any(|n| n.starts_with(prefix)))
        .map(|(_, mime)| mime.to_string())
}

/// Guess from the first bytes of a stream and an optional name hint.
pub fn guess_from_header(header: &[u8], name: Option<&str>) -> &'static str {
    if let Some(mime) = sniff(header) {
        return mime;
    }
    name.and_then(|n| mime_guess::from_path(n).first_raw())
        .unwrap_or(DEFAULT)
}

fn sniff(header: &[u8]) -> Option<&'static str> {
    if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        Some(APPLICATION_ZIP)
    } else if header.starts_with(b"%PDF") {
        Some(APPLICATION_PDF)
    } else if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(IMAGE_JPEG)
    } else if header.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(IMAGE_PNG)
    } else if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        Some(IMAGE_GIF)
    } else if header.starts_with(b"II*\x00") || header.starts_with(b"MM\x00*") {
        Some(IMAGE_TIFF)
    } else if header.starts_with(b"BM") && header.len() >= 14 {
        Some(IMAGE_BMP)
    } else if header.starts_with(b"RIFF") && header.get(8..12) == Some(&b"WEBP"[..]) {
        Some(IMAGE_WEBP)
    } else {
        None
    }
}

/// Raster formats the processing worker can decode.
pub fn is_raster_image(mime_type: &str) -> bool {
    matches!(
        mime_type,
        IMAGE_JPEG | IMAGE_PNG | IMAGE_GIF | IMAGE_TIFF | IMAGE_BMP | IMAGE_WEBP
    )
}
