use std::fs;
use std::path::{Path, PathBuf};

use sim_core::{Program, SimConfig};
use thiserror::Error;

/// A program or config file could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("{}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The file is not valid JSON for the expected type.
    #[error("{}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Reads a JSON-serialized [`Program`].
///
/// # Errors
///
/// Returns [`LoadError`] when the file cannot be read or parsed.
pub fn load_program(path: &Path) -> Result<Program, LoadError> {
    read_json(path)
}

/// Reads a JSON [`SimConfig`]; missing fields take their defaults.
///
/// # Errors
///
/// Returns [`LoadError`] when the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<SimConfig, LoadError> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
