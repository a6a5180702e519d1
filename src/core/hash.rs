use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

use crate::config::DEFAULT_LARGE_FILE_THRESHOLD;

const STREAM_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error hashing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Hash task failed: {message}")]
    TaskFailed { message: String },
}

/// Whole-file SHA-256 used to detect unchanged and byte-identical content.
#[derive(Debug, Clone)]
pub struct IdentityHasher {
    large_file_threshold: u64,
}

impl IdentityHasher {
    pub fn new(large_file_threshold: u64) -> Self {
        Self {
            large_file_threshold,
        }
    }

    /// Hex SHA-256 of the file at `file_path`. Files above the size
    /// threshold are streamed; smaller ones are read in one go.
    pub fn compute(&self, file_path: &Path) -> Result<String, HashError> {
        let io_err = |source| HashError::Io {
            path: file_path.display().to_string(),
            source,
        };

        let size = fs::metadata(file_path).map_err(io_err)?.len();
        let mut hasher = Sha256::new();

        if size > self.large_file_threshold {
            let file = File::open(file_path).map_err(io_err)?;
            let mut reader = BufReader::with_capacity(STREAM_BUFFER_SIZE, file);
            let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];

            loop {
                let bytes_read = reader.read(&mut buffer).map_err(io_err)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
        } else {
            let bytes = fs::read(file_path).map_err(io_err)?;
            hasher.update(&bytes);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// `compute` on the blocking pool.
    pub async fn compute_async(&self, file_path: &Path) -> Result<String, HashError> {
        let hasher = self.clone();
        let path = file_path.to_path_buf();

        tokio::task::spawn_blocking(move || hasher.compute(&path))
            .await
            .map_err(|e| HashError::TaskFailed {
                message: e.to_string(),
            })?
    }
}

impl Default for IdentityHasher {
    fn default() -> Self {
        Self::new(DEFAULT_LARGE_FILE_THRESHOLD)
    }
}
