use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use super::CartLine;

#[derive(Debug, thiserror::Error)]
pub enum CartStorageError {
    #[error("cart storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cart payload is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where a cart lives between page loads.
pub trait CartStorage {
    /// Returns `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<CartLine>>, CartStorageError>;
    fn save(&mut self, items: &[CartLine]) -> Result<(), CartStorageError>;
}

/// Keeps the serialized cart in memory. Useful for tests and server-side previews.
#[derive(Debug, Default, Clone)]
pub struct MemoryCartStorage {
    payload: Option<String>,
}

impl MemoryCartStorage {
    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

impl CartStorage for MemoryCartStorage {
    fn load(&self) -> Result<Option<Vec<CartLine>>, CartStorageError> {
        self.payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(CartStorageError::from)
    }

    fn save(&mut self, items: &[CartLine]) -> Result<(), CartStorageError> {
        self.payload = Some(serde_json::to_string(items)?);
        Ok(())
    }
}

/// Stores the cart as a JSON array in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileCartStorage {
    path: PathBuf,
}

impl JsonFileCartStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CartStorage for JsonFileCartStorage {
    fn load(&self) -> Result<Option<Vec<CartLine>>, CartStorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, items: &[CartLine]) -> Result<(), CartStorageError> {
        // Write-then-rename so a crash never leaves a truncated cart behind
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
