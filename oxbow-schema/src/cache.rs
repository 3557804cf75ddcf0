//! Process-wide schema cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use oxbow_core::SchemaId;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::codec::CompiledCodec;
use crate::error::SchemaResult;
use crate::registry::RegistryClient;

type CodecCell = Arc<OnceCell<Arc<CompiledCodec>>>;

/// Grow-only cache mapping schema ids to compiled codecs.
///
/// Each id gets its own single-flight cell: concurrent misses for the same
/// id coalesce into one registry round-trip, while lookups for unrelated ids
/// proceed independently. A failed fetch leaves the cell empty so the next
/// caller retries; a successful fetch is cached for the process lifetime and
/// never performs network I/O again.
pub struct SchemaCache {
    registry: Arc<dyn RegistryClient>,
    cells: Mutex<HashMap<SchemaId, CodecCell>>,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("cached", &self.len())
            .finish_non_exhaustive()
    }
}

impl SchemaCache {
    /// Creates a cache fronting the given registry.
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the compiled codec for a schema id, fetching it on first use.
    ///
    /// # Errors
    /// `SchemaNotFound` if the registry has no such id, `RegistryUnavailable`
    /// if the registry cannot be reached, `InvalidSchema` if the fetched
    /// definition does not compile.
    pub async fn get_or_fetch(&self, id: SchemaId) -> SchemaResult<Arc<CompiledCodec>> {
        let cell = self.cell_for(id);
        cell.get_or_try_init(|| async {
            debug!(schema_id = %id, "schema cache miss, fetching from registry");
            let definition = self.registry.schema_by_id(id).await?;
            Ok(Arc::new(CompiledCodec::compile(&definition)?))
        })
        .await
        .cloned()
    }

    /// Registers a schema under a subject, caching its codec.
    ///
    /// # Errors
    /// `InvalidSchema` if the definition does not compile or the registry
    /// rejects it, `RegistryUnavailable` on transport failure.
    pub async fn register(&self, subject: &str, definition: &str) -> SchemaResult<SchemaId> {
        // Compile before the network call so a bad definition never reaches
        // the registry.
        let codec = Arc::new(CompiledCodec::compile(definition)?);
        let id = self.registry.register_schema(subject, definition).await?;
        debug!(schema_id = %id, subject, "schema registered");

        let cell = self.cell_for(id);
        // Another task may have fetched the same id concurrently; the cell
        // keeps whichever codec landed first. Both were compiled from the
        // registry's definition for this id, so the loser is equivalent.
        let _ = cell.set(codec);
        Ok(id)
    }

    /// Returns true if a codec for this id is already cached.
    #[must_use]
    pub fn contains(&self, id: SchemaId) -> bool {
        self.lock_cells()
            .get(&id)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of cached codecs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_cells()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Returns true if nothing is cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, id: SchemaId) -> CodecCell {
        self.lock_cells()
            .entry(id)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn lock_cells(&self) -> std::sync::MutexGuard<'_, HashMap<SchemaId, CodecCell>> {
        self.cells
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::SchemaError;

    const SCHEMA: &str = r#"{
        "type": "record",
        "name": "Event",
        "fields": [{"name": "id", "type": "int"}]
    }"#;

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        let registry = Arc::new(InMemoryRegistry::new());
        let id = registry.register_schema("events-value", SCHEMA).await.unwrap();

        let cache = SchemaCache::new(Arc::clone(&registry) as Arc<dyn RegistryClient>);
        cache.get_or_fetch(id).await.unwrap();
        assert_eq!(registry.fetch_count(), 1);

        cache.get_or_fetch(id).await.unwrap();
        cache.get_or_fetch(id).await.unwrap();
        assert_eq!(registry.fetch_count(), 1);
        assert!(cache.contains(id));
    }

    #[tokio::test]
    async fn test_register_caches_codec() {
        let registry = Arc::new(InMemoryRegistry::new());
        let cache = SchemaCache::new(Arc::clone(&registry) as Arc<dyn RegistryClient>);

        let id = cache.register("events-value", SCHEMA).await.unwrap();
        assert!(cache.contains(id));

        cache.get_or_fetch(id).await.unwrap();
        assert_eq!(registry.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let registry = Arc::new(InMemoryRegistry::new());
        let id = registry.register_schema("events-value", SCHEMA).await.unwrap();
        let cache = SchemaCache::new(Arc::clone(&registry) as Arc<dyn RegistryClient>);

        registry.set_unavailable(true);
        let err = cache.get_or_fetch(id).await.unwrap_err();
        assert!(matches!(err, SchemaError::RegistryUnavailable { .. }));
        assert!(!cache.contains(id));

        // Registry recovers; the next lookup succeeds and caches.
        registry.set_unavailable(false);
        cache.get_or_fetch(id).await.unwrap();
        assert!(cache.contains(id));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = Arc::new(InMemoryRegistry::new());
        let cache = SchemaCache::new(registry as Arc<dyn RegistryClient>);
        let err = cache.get_or_fetch(SchemaId::new(99)).await.unwrap_err();
        assert!(matches!(err, SchemaError::SchemaNotFound { .. }));
    }
}
