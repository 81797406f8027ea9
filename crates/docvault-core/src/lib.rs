//! DocVault Core — error kinds, configuration, data directory layout.

pub mod config;
pub mod error;

pub use config::{DataPaths, OcrSettings, VaultConfig};
pub use error::{Error, QuotaScope, Result};
