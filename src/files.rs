use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors reading an audio file from the shared volume.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("audio file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read the whole file at `path` into memory.
pub async fn read_audio(path: &Path) -> Result<Vec<u8>, FileError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(FileError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(FileError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !metadata.is_file() {
        return Err(FileError::NotAFile(path.to_path_buf()));
    }

    let data = tokio::fs::read(path).await.map_err(|source| FileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), bytes = data.len(), "📂 audio file read");
    Ok(data)
}

/// Best-effort removal. Returns whether the file was actually deleted; every
/// failure is logged, never returned.
pub async fn delete(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "🗑️  audio file deleted");
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "file to delete is already gone");
            false
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "❌ failed to delete audio file");
            false
        }
    }
}

/// What is known about a path, for log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileInfo {
    Missing,
    Present {
        name: String,
        size: u64,
        extension: Option<String>,
        is_file: bool,
    },
}

pub async fn file_info(path: &Path) -> FileInfo {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return FileInfo::Missing;
    };

    FileInfo::Present {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: metadata.len(),
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase()),
        is_file: metadata.is_file(),
    }
}
