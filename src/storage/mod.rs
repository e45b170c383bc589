//! Fragment storage.
//!
//! `FragmentStore` is the persistence boundary for the clustering pipeline.
//! `MemoryStore` is the in-process implementation used by the CLI and tests.

mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::*;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;

/// Create a store from configuration, loading the configured fragments file
/// when one is set and exists.
pub async fn create_store(config: &Config) -> Result<Arc<MemoryStore>> {
    let store = MemoryStore::new();
    if let Some(path) = config.fragments_file()? {
        if path.exists() {
            store.load_jsonl(&path).await?;
        } else {
            tracing::warn!("Fragments file {} not found, starting empty", path.display());
        }
    }
    Ok(Arc::new(store))
}
