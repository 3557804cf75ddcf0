//! Schema-registry client abstraction.
//!
//! The registry HTTP service itself is an external collaborator; this module
//! defines the trait the cache consumes plus an in-memory implementation for
//! tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use oxbow_core::SchemaId;

use crate::error::{SchemaError, SchemaResult};

/// A schema definition together with its registry-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSchema {
    /// Registry-assigned id.
    pub id: SchemaId,
    /// Schema definition JSON.
    pub definition: String,
}

/// External schema-registry service.
///
/// Implementations are expected to enforce their own request timeouts; the
/// cache treats any transport failure as `RegistryUnavailable`.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetches the definition registered under `id`.
    ///
    /// # Errors
    /// `SchemaNotFound` if no schema has this id, `RegistryUnavailable` on
    /// transport failure.
    async fn schema_by_id(&self, id: SchemaId) -> SchemaResult<String>;

    /// Fetches the latest schema version for a subject.
    ///
    /// # Errors
    /// `SchemaNotFound` if the subject has no versions, `RegistryUnavailable`
    /// on transport failure.
    async fn latest_schema(&self, subject: &str) -> SchemaResult<RegisteredSchema>;

    /// Registers a schema under a subject and returns its id.
    ///
    /// Registering an identical definition for the same subject is
    /// idempotent and returns the existing id (registry policy).
    ///
    /// # Errors
    /// `InvalidSchema` if the registry rejects the definition,
    /// `RegistryUnavailable` on transport failure.
    async fn register_schema(&self, subject: &str, definition: &str) -> SchemaResult<SchemaId>;
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<SchemaId, String>,
    subjects: HashMap<String, Vec<SchemaId>>,
    next_id: u32,
}

/// In-memory registry for tests and local runs.
///
/// Counts fetches so tests can assert the cache's exactly-once discipline.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
    fetch_count: AtomicU64,
    unavailable: std::sync::atomic::AtomicBool,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `schema_by_id` calls served so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Makes every subsequent call fail with `RegistryUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> SchemaResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchemaError::RegistryUnavailable {
                message: "registry offline".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn schema_by_id(&self, id: SchemaId) -> SchemaResult<String> {
        self.check_available()?;
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(SchemaError::SchemaNotFound { id })
    }

    async fn latest_schema(&self, subject: &str) -> SchemaResult<RegisteredSchema> {
        self.check_available()?;
        let state = self.lock();
        let id = state
            .subjects
            .get(subject)
            .and_then(|versions| versions.last().copied())
            .ok_or(SchemaError::SchemaNotFound {
                id: SchemaId::new(0),
            })?;
        Ok(RegisteredSchema {
            id,
            definition: state.by_id[&id].clone(),
        })
    }

    async fn register_schema(&self, subject: &str, definition: &str) -> SchemaResult<SchemaId> {
        self.check_available()?;
        let mut state = self.lock();

        // Identical (subject, definition) pairs keep their original id.
        if let Some(versions) = state.subjects.get(subject) {
            for id in versions {
                if state.by_id[id] == definition {
                    return Ok(*id);
                }
            }
        }

        state.next_id += 1;
        let id = SchemaId::new(state.next_id);
        state.by_id.insert(id, definition.to_string());
        state
            .subjects
            .entry(subject.to_string())
            .or_default()
            .push(id);
        Ok(id)
    }
}
