use std::path::{Path, PathBuf};

use be_core::domain::{Topic, TopicId};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read topic catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("topic catalog {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("topic catalog {path} must be a JSON array")]
    NotAnArray { path: PathBuf },
    #[error("topic #{index} in catalog: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// Reads the topic catalog: a JSON array whose elements carry `id`, `name`
/// and a conversation, either under `data.conversation` or at the top level.
pub fn load_catalog(path: &Path) -> Result<Vec<Topic>, CatalogError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Array(entries) = value else {
        return Err(CatalogError::NotAnArray {
            path: path.to_path_buf(),
        });
    };

    tracing::info!(count = entries.len(), path = %path.display(), "found topics in catalog");
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| topic_from_entry(index, entry))
        .collect()
}

fn topic_from_entry(index: usize, entry: Value) -> Result<Topic, CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidEntry {
        index,
        reason: reason.to_owned(),
    };

    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid("missing string field `id`"))?
        .to_owned();
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing string field `name`"))?
        .to_owned();

    let data = match entry.get("data") {
        Some(data @ Value::Object(_)) => data.clone(),
        Some(_) => return Err(invalid("`data` must be an object")),
        None => entry,
    };
    let topic = Topic {
        id: TopicId::new(id),
        name,
        data,
    };
    topic
        .conversation()
        .map_err(|e| invalid(&format!("malformed conversation: {e}")))?;
    Ok(topic)
}
