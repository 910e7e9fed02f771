//! Load-once cache for the vector index shared by every chat session.
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{LoadError, VectorStore};

/// Something that can produce an opened [`VectorStore`].
///
/// Loading is blocking work; [`StoreCache`] runs it on the blocking pool.
pub trait StoreLoader: Send + Sync {
    fn load(&self) -> Result<VectorStore, LoadError>;
}

/// Loads an index directory from disk.
#[derive(Debug, Clone)]
pub struct DiskLoader {
    pub path: PathBuf,
    pub dimensions: usize,
}

impl DiskLoader {
    pub fn new(path: impl Into<PathBuf>, dimensions: usize) -> Self {
        Self {
            path: path.into(),
            dimensions,
        }
    }
}

impl StoreLoader for DiskLoader {
    fn load(&self) -> Result<VectorStore, LoadError> {
        VectorStore::load(&self.path, self.dimensions)
    }
}

/// Memoizes the first successful load.
///
/// Concurrent first callers wait on the same in-flight load instead of each
/// starting their own. A failed load leaves the cell empty so a later caller
/// can try again.
pub struct StoreCache {
    loader: Arc<dyn StoreLoader>,
    cell: OnceCell<Arc<VectorStore>>,
}

impl StoreCache {
    pub fn new(loader: Arc<dyn StoreLoader>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Return the cached store, loading it on first use.
    pub async fn get(&self) -> Result<Arc<VectorStore>, LoadError> {
        self.cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let store = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| LoadError::Worker(e.to_string()))?
                    .inspect_err(|e| warn!("Error loading vector store: {e}"))?;
                info!("Vector store cached");
                Ok(Arc::new(store))
            })
            .await
            .map(Arc::clone)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}
