//! Configuration and data directory management.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable holding the global storage ceiling in bytes.
pub const GLOBAL_QUOTA_ENV: &str = "DOCS_GLOBAL_QUOTA";

/// Environment variable holding the pattern of zip upload names that are
/// split into one child archive per group on import.
pub const AUTO_SEPARATE_ZIP_ENV: &str = "DOCVAULT_AUTO_SEPARATE_ZIP_REGEX";

/// Default per-user ceiling when none is given at user creation (10 GB).
pub const DEFAULT_USER_QUOTA: u64 = 10_000_000_000;

/// Paths to all DocVault data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Encrypted file storage (`data/storage/`).
    pub storage: PathBuf,
    /// SQLite database directory (`data/db/`).
    pub db: PathBuf,
    /// Parent of per-operation scratch directories (`data/tmp/`).
    pub tmp: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            storage: root.join("storage"),
            db: root.join("db"),
            tmp: root.join("tmp"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.storage)?;
        std::fs::create_dir_all(&self.db)?;
        std::fs::create_dir_all(&self.tmp)?;
        Ok(())
    }
}

/// External OCR tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Executable invoked as `<binary> <image> stdout -l <lang>`.
    pub binary: String,
    /// Upper bound on a single OCR run.
    pub timeout_secs: u64,
    /// Width images are scaled to before recognition.
    pub target_width: u32,
}

impl OcrSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            timeout_secs: 300,
            target_width: 3500,
        }
    }
}

/// Top-level DocVault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// System-wide storage ceiling in bytes; `None` disables the global check.
    pub global_quota: Option<u64>,
    /// Ceiling given to new users.
    pub default_user_quota: u64,
    pub ocr: OcrSettings,
    /// Zip uploads whose name matches are imported group by group.
    #[serde(skip)]
    pub auto_separate_zip: Option<Regex>,
}

impl VaultConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Create configuration reading variables through `lookup`.
    pub fn from_lookup(
        data_dir: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let global_quota = parse_bytes(GLOBAL_QUOTA_ENV, lookup(GLOBAL_QUOTA_ENV))?;
        let default_user_quota = parse_bytes(
            "DOCVAULT_DEFAULT_QUOTA",
            lookup("DOCVAULT_DEFAULT_QUOTA"),
        )?
        .unwrap_or(DEFAULT_USER_QUOTA);

        let mut ocr = OcrSettings::default();
        if let Some(binary) = lookup("DOCVAULT_OCR_BINARY").filter(|b| !b.trim().is_empty()) {
            ocr.binary = binary;
        }
        if let Some(secs) = parse_bytes(
            "DOCVAULT_OCR_TIMEOUT_SECS",
            lookup("DOCVAULT_OCR_TIMEOUT_SECS"),
        )? {
            ocr.timeout_secs = secs;
        }

        let auto_separate_zip = match lookup(AUTO_SEPARATE_ZIP_ENV).filter(|p| !p.trim().is_empty()) {
            Some(pattern) => Some(Regex::new(&pattern).map_err(|e| {
                Error::Config(format!("{}={:?}: {}", AUTO_SEPARATE_ZIP_ENV, pattern, e))
            })?),
            None => None,
        };

        let data_paths = DataPaths::new(data_dir)?;
        tracing::debug!(
            "Config: data={}, global_quota={:?}, ocr={}",
            data_paths.root.display(),
            global_quota,
            ocr.binary
        );

        Ok(Self {
            data_paths,
            global_quota,
            default_user_quota,
            ocr,
            auto_separate_zip,
        })
    }

    /// True when a zip upload called `name` should be split on import.
    pub fn auto_separates(&self, name: &str) -> bool {
        self.auto_separate_zip
            .as_ref()
            .is_some_and(|re| re.is_match(name))
    }
}

/// Empty values count as absent.
fn parse_bytes(key: &str, value: Option<String>) -> Result<Option<u64>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, v, e))),
    }
}
