//! Where the sibling data files of a dictionary come from.

use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::{error::Result, write::WrittenArchive};

/// Provides the contents of the data file with a given extension
pub trait DataSource {
    /// Load the whole file, `Ok(None)` if it does not exist
    fn load(&self, extension: &str) -> Result<Option<Bytes>>;
}

/// Data files next to a `.dict` file on disk
#[derive(Debug, Clone)]
pub struct FsSource {
    dict_path: PathBuf,
}

impl FsSource {
    pub fn new(dict_path: impl AsRef<Path>) -> Self {
        Self {
            dict_path: dict_path.as_ref().to_path_buf(),
        }
    }

    /// `level.dict` with `.data` becomes `level.data`
    pub fn path_for(&self, extension: &str) -> PathBuf {
        self.dict_path
            .with_extension(extension.trim_start_matches('.'))
    }
}

impl DataSource for FsSource {
    #[instrument(skip(self), err)]
    fn load(&self, extension: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(extension);
        match fs::read(&path) {
            Ok(data) => {
                debug!(path = %path.display(), size = data.len(), "loaded data file");
                Ok(Some(data.into()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "data file does not exist");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Data files held in memory, keyed by extension
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<String, Bytes>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, extension: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(extension.into(), data.into());
    }

    pub fn with(mut self, extension: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(extension, data);
        self
    }
}

impl DataSource for MemorySource {
    fn load(&self, extension: &str) -> Result<Option<Bytes>> {
        Ok(self.files.get(extension).cloned())
    }
}

impl From<WrittenArchive> for MemorySource {
    fn from(value: WrittenArchive) -> Self {
        Self {
            files: value
                .files
                .into_iter()
                .map(|(extension, data)| (extension, data.into()))
                .collect(),
        }
    }
}
