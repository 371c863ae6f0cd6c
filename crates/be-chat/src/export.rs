use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use be_core::domain::{Clock, SystemClock, Thread};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write export {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// On-disk shape of an exported thread: the denormalized thread, the export
/// time and caller-supplied metadata.
#[derive(Serialize)]
struct ExportDocument<'a> {
    #[serde(flatten)]
    thread: &'a Thread,
    #[serde(rename = "_exported_")]
    exported: String,
    meta: &'a Map<String, Value>,
}

/// Writes completed threads as JSON files under
/// `<data_dir>/<YYYYMMDD>/<YYYYMMDD-HHMMSS>-<topic_id>_<thread_id>.json`.
pub struct FileExportService {
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileExportService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(data_dir, Arc::new(SystemClock))
    }

    pub fn with_clock(data_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            data_dir: data_dir.into(),
            clock,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn export_thread(
        &self,
        thread: &Thread,
        meta: &Map<String, Value>,
    ) -> Result<PathBuf, ExportError> {
        let now = self.clock.now();
        let path = export_path(&self.data_dir, &now, thread);
        tracing::info!(thread_id = %thread.id, path = %path.display(), "exporting thread");

        let document = ExportDocument {
            thread,
            exported: now.to_rfc3339(),
            meta,
        };
        let json = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ExportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, json).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

pub fn export_path(data_dir: &Path, at: &DateTime<Local>, thread: &Thread) -> PathBuf {
    let file_name = format!(
        "{}-{}_{}.json",
        at.format("%Y%m%d-%H%M%S"),
        thread.topic_id,
        thread.id
    );
    data_dir
        .join(at.format("%Y%m%d").to_string())
        .join(file_name)
}
