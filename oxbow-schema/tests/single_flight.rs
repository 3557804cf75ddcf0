//! Concurrency behavior of the schema cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oxbow_core::SchemaId;
use oxbow_schema::{
    InMemoryRegistry, RegisteredSchema, RegistryClient, SchemaCache, SchemaResult,
};

const SCHEMA: &str = r#"{
    "type": "record",
    "name": "Message",
    "fields": [
        {"name": "id", "type": "int"},
        {"name": "content", "type": "string"}
    ]
}"#;

/// Registry that stalls each fetch long enough for callers to pile up.
struct SlowRegistry {
    inner: InMemoryRegistry,
    delay: Duration,
}

#[async_trait]
impl RegistryClient for SlowRegistry {
    async fn schema_by_id(&self, id: SchemaId) -> SchemaResult<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.schema_by_id(id).await
    }

    async fn latest_schema(&self, subject: &str) -> SchemaResult<RegisteredSchema> {
        self.inner.latest_schema(subject).await
    }

    async fn register_schema(&self, subject: &str, definition: &str) -> SchemaResult<SchemaId> {
        self.inner.register_schema(subject, definition).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_misses_fetch_once() {
    let registry = Arc::new(SlowRegistry {
        inner: InMemoryRegistry::new(),
        delay: Duration::from_millis(50),
    });
    let id = registry
        .inner
        .register_schema("messages-value", SCHEMA)
        .await
        .unwrap();

    let cache = Arc::new(SchemaCache::new(
        Arc::clone(&registry) as Arc<dyn RegistryClient>
    ));

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            cache.get_or_fetch(id).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(registry.inner.fetch_count(), 1);
    assert!(cache.contains(id));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_distinct_ids_fetch_independently() {
    let registry = Arc::new(SlowRegistry {
        inner: InMemoryRegistry::new(),
        delay: Duration::from_millis(10),
    });
    let first = registry
        .inner
        .register_schema("a-value", SCHEMA)
        .await
        .unwrap();
    let second = registry
        .inner
        .register_schema("b-value", r#"{"type": "string"}"#)
        .await
        .unwrap();

    let cache = Arc::new(SchemaCache::new(
        Arc::clone(&registry) as Arc<dyn RegistryClient>
    ));

    let (a, b) = tokio::join!(cache.get_or_fetch(first), cache.get_or_fetch(second));
    a.unwrap();
    b.unwrap();

    assert_eq!(registry.inner.fetch_count(), 2);
    assert!(cache.contains(first));
    assert!(cache.contains(second));
}
