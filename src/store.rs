use crate::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// On-disk layout: identity label → raw embedding components.
pub type EmbeddingFile = BTreeMap<String, Vec<f32>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("reading {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {}", .path.display(), .source)]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("decoding {}: {}", .path.display(), .source)]
    Postcard {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },

    #[error("no usable embeddings in {}", .0.display())]
    Empty(PathBuf),
}

/// Where the session's store came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreSource {
    Primary(PathBuf),
    Fallback(PathBuf),
    Empty,
}

/// Enrolled reference embeddings, keyed by identity label.
///
/// Iteration is in lexicographic label order. Every vector is stored
/// L2-normalized and all of them share one dimension.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    entries: BTreeMap<String, Embedding>,
    dim: Option<usize>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file_map(map: EmbeddingFile) -> Self {
        let mut store = Self::new();
        for (label, values) in map {
            store.insert(label, values);
        }
        store
    }

    /// Add an identity. Returns `false` (and logs) when the entry is unusable:
    /// empty label, empty vector, or a dimension that differs from the
    /// entries already loaded.
    pub fn insert(&mut self, label: impl Into<String>, values: Vec<f32>) -> bool {
        let label = label.into();
        if label.is_empty() {
            log::warn!("skipping embedding with empty label");
            return false;
        }
        if values.is_empty() {
            log::warn!("skipping empty embedding for {}", label);
            return false;
        }
        match self.dim {
            Some(dim) if dim != values.len() => {
                log::warn!(
                    "skipping {}: dimension {} does not match store dimension {}",
                    label,
                    values.len(),
                    dim
                );
                return false;
            }
            _ => self.dim = Some(values.len()),
        }

        let embedding = Embedding::from_vec(values).normalized();
        if embedding.is_degenerate() {
            log::warn!("embedding for {} is degenerate and will never match", label);
        }
        self.entries.insert(label, embedding);
        true
    }

    pub fn get(&self, label: &str) -> Option<&Embedding> {
        self.entries.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }
}

fn is_postcard(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("bin") | Some("postcard")
    )
}

/// Load one embedding file. JSON unless the extension says postcard.
pub fn load_file(path: &Path) -> Result<EmbeddingStore, StoreError> {
    if !path.exists() {
        return Err(StoreError::Missing(path.to_path_buf()));
    }

    let data = std::fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let map: EmbeddingFile = if is_postcard(path) {
        postcard::from_bytes(&data).map_err(|source| StoreError::Postcard {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_json::from_slice(&data).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?
    };

    let store = EmbeddingStore::from_file_map(map);
    if store.is_empty() {
        return Err(StoreError::Empty(path.to_path_buf()));
    }
    Ok(store)
}

/// Load the session store: primary, then the bundled fallback, then empty.
/// Never fails; a degraded store is only logged.
pub fn load(primary: &Path, fallback: &Path) -> (EmbeddingStore, StoreSource) {
    match load_file(primary) {
        Ok(store) => {
            log::info!("Loaded {} embeddings from {}", store.len(), primary.display());
            return (store, StoreSource::Primary(primary.to_path_buf()));
        }
        Err(e) => log::warn!("{}; trying bundled embeddings", e),
    }

    match load_file(fallback) {
        Ok(store) => {
            log::info!(
                "Loaded {} bundled embeddings from {}",
                store.len(),
                fallback.display()
            );
            (store, StoreSource::Fallback(fallback.to_path_buf()))
        }
        Err(e) => {
            log::warn!("{}; continuing with an empty store, every face is Unknown", e);
            (EmbeddingStore::new(), StoreSource::Empty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_normalizes() {
        let mut store = EmbeddingStore::new();
        assert!(store.insert("alice", vec![0.0, 3.0, 4.0]));
        let emb = store.get("alice").unwrap();
        assert!((emb.norm() - 1.0).abs() < 1e-6);
        assert_eq!(store.dim(), Some(3));
    }

    #[test]
    fn test_insert_rejects_bad_entries() {
        let mut store = EmbeddingStore::new();
        assert!(!store.insert("", vec![1.0]));
        assert!(!store.insert("bob", vec![]));
        assert!(store.insert("carol", vec![1.0, 0.0]));
        assert!(!store.insert("dave", vec![1.0, 0.0, 0.0]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_iteration_is_lexicographic() {
        let mut store = EmbeddingStore::new();
        store.insert("zed", vec![1.0]);
        store.insert("amy", vec![1.0]);
        store.insert("max", vec![1.0]);
        let labels: Vec<&str> = store.labels().collect();
        assert_eq!(labels, vec!["amy", "max", "zed"]);
    }
}
