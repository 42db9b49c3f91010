use std::fs;
use std::path::{Path, PathBuf};

use nlq_core::export::ExportArtifact;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SaveExportError {
    #[error("failed to create export directory at {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes the artifact into `dir` under its own file name and returns the final path.
/// An existing file is never overwritten; a numeric suffix is added instead.
pub fn save_artifact(dir: &Path, artifact: &ExportArtifact) -> Result<PathBuf, SaveExportError> {
    fs::create_dir_all(dir).map_err(|source| SaveExportError::CreateDir {
        path: dir.display().to_string(),
        source,
    })?;

    let path = available_path(dir, &artifact.file_name);
    fs::write(&path, &artifact.content).map_err(|source| SaveExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), bytes = artifact.content.len(), "export saved");
    Ok(path)
}

fn available_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (file_name, None),
    };
    let mut counter = 1_u32;
    loop {
        let name = match extension {
            Some(extension) => format!("{stem}_{counter}.{extension}"),
            None => format!("{stem}_{counter}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
