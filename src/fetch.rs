//! Byte-fetch collaborator used when an instance is not cached.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Unknown instance {0}")]
    UnknownInstance(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Returns the raw Part 10 bytes of an instance.
///
/// Retries are the implementation's business; a returned error is final.
#[async_trait]
pub trait ByteFetch: Send + Sync {
    async fn fetch(&self, instance_id: &str) -> Result<Vec<u8>, FetchError>;
}

/// Serves instances from files on disk.
#[derive(Debug, Default, Clone)]
pub struct DirectoryFetcher {
    paths: HashMap<String, PathBuf>,
}

impl DirectoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance_id: impl Into<String>, path: impl AsRef<Path>) {
        self.paths
            .insert(instance_id.into(), path.as_ref().to_path_buf());
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[async_trait]
impl ByteFetch for DirectoryFetcher {
    async fn fetch(&self, instance_id: &str) -> Result<Vec<u8>, FetchError> {
        let path = self
            .paths
            .get(instance_id)
            .ok_or_else(|| FetchError::UnknownInstance(instance_id.to_owned()))?;
        Ok(tokio::fs::read(path).await?)
    }
}

#[async_trait]
impl ByteFetch for HashMap<String, Vec<u8>> {
    async fn fetch(&self, instance_id: &str) -> Result<Vec<u8>, FetchError> {
        self.get(instance_id)
            .cloned()
            .ok_or_else(|| FetchError::UnknownInstance(instance_id.to_owned()))
    }
}
