//! Per-folder persistence of calibration corners and session parameters
//!
//! Both records live next to the footage, one file per experiment folder.
//! A missing file is not an error: it means the folder has not been set up
//! yet and the caller falls back to prompting or defaults.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::config::{CalibrationPoints, SessionParameters};

/// Load/save a single record keyed by experiment folder
pub trait RecordStore<T> {
    fn load(&self, folder: &Path) -> Result<Option<T>>;
    fn save(&self, folder: &Path, record: &T) -> Result<()>;
    /// Remove the record; returns whether one existed
    fn delete(&self, folder: &Path) -> Result<bool>;
}

/// On-disk encoding of a record file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

/// A record stored as `<folder>/<file_name>`
#[derive(Debug, Clone)]
pub struct FileStore<T> {
    file_name: String,
    format: Format,
    _record: PhantomData<fn() -> T>,
}

/// Calibration corners, stored as JSON
pub type CornerStore = FileStore<CalibrationPoints>;
/// Session parameters, stored as TOML so they can be edited by hand
pub type ParameterStore = FileStore<SessionParameters>;

impl<T> FileStore<T> {
    pub fn new(file_name: impl Into<String>, format: Format) -> Self {
        Self {
            file_name: file_name.into(),
            format,
            _record: PhantomData,
        }
    }

    pub fn path(&self, folder: &Path) -> PathBuf {
        folder.join(&self.file_name)
    }
}

impl CornerStore {
    pub fn corners(file_name: impl Into<String>) -> Self {
        Self::new(file_name, Format::Json)
    }
}

impl ParameterStore {
    pub fn parameters(file_name: impl Into<String>) -> Self {
        Self::new(file_name, Format::Toml)
    }
}

impl<T> RecordStore<T> for FileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self, folder: &Path) -> Result<Option<T>> {
        let path = self.path(folder);
        if !path.exists() {
            tracing::debug!("No saved record at {:?}", path);
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let record = match self.format {
            Format::Toml => toml::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", path))?,
            Format::Json => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", path))?,
        };

        tracing::info!("Loaded {:?}", path);
        Ok(Some(record))
    }

    fn save(&self, folder: &Path, record: &T) -> Result<()> {
        let path = self.path(folder);
        let content = match self.format {
            Format::Toml => toml::to_string_pretty(record)
                .with_context(|| format!("Failed to serialize {:?}", path))?,
            Format::Json => serde_json::to_string_pretty(record)
                .with_context(|| format!("Failed to serialize {:?}", path))?,
        };

        std::fs::create_dir_all(folder)
            .with_context(|| format!("Failed to create folder {:?}", folder))?;

        // Write to a sibling file first so an interrupted save never leaves
        // a truncated record behind
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {:?} into place", path))?;

        tracing::info!("Saved {:?}", path);
        Ok(())
    }

    fn delete(&self, folder: &Path) -> Result<bool> {
        let path = self.path(folder);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {:?}", path))?;
        tracing::info!("Removed {:?}", path);
        Ok(true)
    }
}
