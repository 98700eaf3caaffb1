use std::sync::Arc;

use super::{GraphStore, MetadataStore, StorageResult, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoragesStatus {
    #[default]
    Created,
    Initialized,
}

enum ManagedStorage {
    Metadata(Arc<dyn MetadataStore>),
    Vector(Arc<dyn VectorIndex>),
    Graph(Arc<dyn GraphStore>),
}

impl ManagedStorage {
    async fn initialize(&self) -> StorageResult<()> {
        match self {
            ManagedStorage::Metadata(storage) => storage.initialize().await,
            ManagedStorage::Vector(storage) => storage.initialize().await,
            ManagedStorage::Graph(storage) => storage.initialize().await,
        }
    }

    async fn finalize(&self) -> StorageResult<()> {
        match self {
            ManagedStorage::Metadata(storage) => storage.finalize().await,
            ManagedStorage::Vector(storage) => storage.finalize().await,
            ManagedStorage::Graph(storage) => storage.finalize().await,
        }
    }
}

/// sequentially initializes registered backends to avoid deadlocks
pub struct StorageManager {
    status: StoragesStatus,
    storages: Vec<ManagedStorage>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            status: StoragesStatus::Created,
            storages: Vec::new(),
        }
    }

    pub fn status(&self) -> StoragesStatus {
        self.status
    }

    pub fn register_metadata<T>(&mut self, storage: Arc<T>)
    where
        T: MetadataStore + 'static,
    {
        self.storages.push(ManagedStorage::Metadata(storage));
    }

    pub fn register_vector<T>(&mut self, storage: Arc<T>)
    where
        T: VectorIndex + 'static,
    {
        self.storages.push(ManagedStorage::Vector(storage));
    }

    pub fn register_graph<T>(&mut self, storage: Arc<T>)
    where
        T: GraphStore + 'static,
    {
        self.storages.push(ManagedStorage::Graph(storage));
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    pub async fn initialize_all(&mut self) -> StorageResult<()> {
        if self.status == StoragesStatus::Initialized {
            return Ok(());
        }

        for storage in &self.storages {
            storage.initialize().await?;
        }

        self.status = StoragesStatus::Initialized;
        Ok(())
    }

    pub async fn finalize_all(&self) -> StorageResult<()> {
        for storage in &self.storages {
            storage.finalize().await?;
        }
        Ok(())
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}
