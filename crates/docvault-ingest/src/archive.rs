//! Zip decomposition: one stored child archive per top-level group.
//!
//! Entries are grouped by their first path segment; a file at the archive
//! root forms a group of its own. A group ends at a directory entry, when the
//! next file belongs to another group, or at the end of the archive. Each
//! finished group is re-zipped with flattened entry names and stored through
//! [`FileService::create_file`] as `<group>.zip`.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::context::OperationContext;
use crate::service::{FileService, NewFileRequest};
use docvault_core::{Error, Result};

/// A stored child archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveChild {
    pub id: String,
    pub name: String,
    /// Size in bytes of the rebuilt child archive.
    pub size: u64,
}

/// Outcome of [`FileService::create_files_from_zip`].
///
/// Children stored before a failure stay stored and are listed in `files`.
#[derive(Debug, Default)]
pub struct ArchiveImport {
    pub files: Vec<ArchiveChild>,
    pub error: Option<Error>,
}

impl ArchiveImport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Children on success, the first error otherwise.
    pub fn into_result(self) -> Result<Vec<ArchiveChild>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.files),
        }
    }
}

/// Child archive being rebuilt in a scoped temporary file.
struct GroupBuilder {
    key: String,
    path: PathBuf,
    writer: ZipWriter<BufWriter<File>>,
    entries: usize,
    /// Flattened names already written to this child.
    names: HashSet<String>,
}

impl GroupBuilder {
    fn create(ctx: &OperationContext, key: String) -> Result<Self> {
        let path = ctx.create_temporary_file()?;
        let file = File::create(&path)?;
        Ok(Self {
            key,
            path,
            writer: ZipWriter::new(BufWriter::new(file)),
            entries: 0,
            names: HashSet::new(),
        })
    }

    fn add_entry<R: Read>(&mut self, name: &str, reader: &mut R) -> Result<()> {
        let name = self.unique_name(name);
        self.writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .map_err(|e| Error::ArchiveEntryIo(format!("{}: {}", name, e)))?;
        io::copy(reader, &mut self.writer)
            .map_err(|e| Error::ArchiveEntryIo(format!("{}: {}", name, e)))?;
        self.entries += 1;
        Ok(())
    }

    /// `name`, or `stem (n).ext` with the lowest free `n` when entries from
    /// different subdirectories flatten to the same name.
    fn unique_name(&mut self, name: &str) -> String {
        if self.names.insert(name.to_string()) {
            return name.to_string();
        }
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
        let mut n = 2;
        loop {
            let candidate = match &ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            if self.names.insert(candidate.clone()) {
                debug!("Renamed duplicate entry {} to {}", name, candidate);
                return candidate;
            }
            n += 1;
        }
    }

    /// Display name of the stored child.
    fn child_name(&self) -> String {
        format!("{}.zip", self.key.trim_end_matches('/').replace('/', "_"))
    }

    /// Finish the archive and return its path and size.
    fn finish(self) -> Result<(PathBuf, u64)> {
        let mut out = self
            .writer
            .finish()
            .map_err(|e| Error::ArchiveEntryIo(e.to_string()))?;
        io::Write::flush(&mut out)?;
        drop(out);
        let size = std::fs::metadata(&self.path)?.len();
        Ok((self.path, size))
    }
}

/// Group key and flattened entry name for an archive path.
fn split_entry(entry_name: &str) -> (String, String) {
    let trimmed = entry_name.trim_start_matches('/');
    let file_name = trimmed.rsplit('/').next().unwrap_or(trimmed).to_string();
    match trimmed.split_once('/') {
        Some((top, _)) => (format!("{}/", top), file_name),
        None => (trimmed.to_string(), file_name),
    }
}

impl FileService {
    /// Split a zip stream into one stored child archive per group.
    ///
    /// The stream is spooled to a scoped temporary file before reading.
    /// Processing stops at the first failure; see [`ArchiveImport`].
    pub fn create_files_from_zip<R: Read>(
        &self,
        ctx: &mut OperationContext,
        reader: R,
        language: Option<&str>,
        user_id: &str,
        document_id: Option<&str>,
    ) -> ArchiveImport {
        let mut import = ArchiveImport::default();
        if let Err(e) = self.decompose(ctx, reader, language, user_id, document_id, &mut import.files)
        {
            warn!(
                "Zip import stopped after {} child archives: {}",
                import.files.len(),
                e
            );
            import.error = Some(e);
        }
        import
    }

    fn decompose<R: Read>(
        &self,
        ctx: &mut OperationContext,
        mut reader: R,
        language: Option<&str>,
        user_id: &str,
        document_id: Option<&str>,
        created: &mut Vec<ArchiveChild>,
    ) -> Result<()> {
        let spool = ctx.create_temporary_file()?;
        {
            let mut out = BufWriter::new(File::create(&spool)?);
            io::copy(&mut reader, &mut out)
                .map_err(|e| Error::ArchiveEntryIo(format!("read archive: {}", e)))?;
            io::Write::flush(&mut out)?;
        }

        let mut archive = ZipArchive::new(File::open(&spool)?)
            .map_err(|e| Error::ArchiveEntryIo(format!("open archive: {}", e)))?;
        debug!("Decomposing archive with {} entries", archive.len());

        let mut current: Option<GroupBuilder> = None;
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| Error::ArchiveEntryIo(format!("entry {}: {}", i, e)))?;

            if entry.is_dir() {
                if let Some(group) = current.take() {
                    created.push(self.store_group(ctx, group, language, user_id, document_id)?);
                }
                continue;
            }

            let (key, file_name) = split_entry(entry.name());
            if current.as_ref().is_some_and(|g| g.key != key) {
                if let Some(group) = current.take() {
                    created.push(self.store_group(ctx, group, language, user_id, document_id)?);
                }
            }
            if current.is_none() {
                current = Some(GroupBuilder::create(ctx, key)?);
            }
            if let Some(group) = current.as_mut() {
                group.add_entry(&file_name, &mut entry)?;
            }
        }

        if let Some(group) = current.take() {
            created.push(self.store_group(ctx, group, language, user_id, document_id)?);
        }
        Ok(())
    }

    fn store_group(
        &self,
        ctx: &mut OperationContext,
        group: GroupBuilder,
        language: Option<&str>,
        user_id: &str,
        document_id: Option<&str>,
    ) -> Result<ArchiveChild> {
        let name = group.child_name();
        let entries = group.entries;
        let (path, size) = group.finish()?;

        let id = self.create_file(
            ctx,
            NewFileRequest {
                name: Some(name.clone()),
                source: path,
                size,
                language: language.map(str::to_string),
                user_id: user_id.to_string(),
                document_id: document_id.map(str::to_string),
            },
        )?;
        info!(
            "Stored child archive {} as {} ({} entries, {} bytes)",
            name, id, entries, size
        );
        Ok(ArchiveChild { id, name, size })
    }
}
