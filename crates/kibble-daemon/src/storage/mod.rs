//! Storage layer using Turso (libSQL)
//!
//! The pet is one opaque JSON record behind a single-key get/set
//! interface. The store is shared by every running context and can be
//! edited (or half-written) by any of them, so readers always repair
//! what they load and writers repair what they persist.

mod turso;

pub use turso::TursoStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::{config::StorageConfig, pet::PetState};

pub const DEFAULT_PET_KEY: &str = "pet.primary";

/// The durable layer being down is routine, not exceptional. Callers
/// log, keep their in-memory state, and retry later.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            reason: err.to_string(),
        }
    }
}

/// Atomic single-key get/set. No cross-key transactions, no
/// compare-and-swap tokens - concurrent writers can clobber each other
/// between broadcasts, which the sync protocol accepts.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn StateStore>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The store already holds this revision or a newer one from
    /// another context; the write was skipped.
    Stale,
}

/// High-level storage wrapper that each context binds its engine to.
/// Clones share one backing store and one health flag.
#[derive(Clone)]
pub struct Storage {
    store: SharedStore,
    healthy: Arc<AtomicBool>,
}

impl Storage {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let token = std::env::var(&config.auth_token_env).ok();
        let store = TursoStore::connect(&config.url, token.as_deref()).await?;
        store.initialize_schema().await?;
        Ok(Self::new(Arc::new(store)))
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Cheap reachability probe for the periodic retry loop.
    pub async fn health_check(&self, key: &str) -> bool {
        let reachable = self.store.get(key).await.is_ok();
        self.mark(reachable);
        reachable
    }

    fn mark(&self, healthy: bool) {
        let was = self.healthy.swap(healthy, Ordering::SeqCst);
        if healthy && !was {
            info!("store reachable again");
        }
    }

    /// Load and normalize the pet record. An unparseable blob counts
    /// as absent - the caller re-creates the pet rather than crashing
    /// every context on one bad write.
    pub async fn load_pet(&self, key: &str, now: i64) -> Result<Option<PetState>, StoreError> {
        let raw = match self.store.get(key).await {
            Ok(raw) => {
                self.mark(true);
                raw
            }
            Err(err) => {
                self.mark(false);
                return Err(err);
            }
        };
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<PetState>(&raw) {
            Ok(mut state) => {
                state.repair(now);
                Ok(Some(state))
            }
            Err(err) => {
                warn!(%err, key, "discarding unreadable pet record");
                Ok(None)
            }
        }
    }

    /// Write the record exactly as passed. Callers have already
    /// repaired the state and advanced its revision stamp.
    pub async fn write_pet(&self, key: &str, state: &PetState) -> Result<(), StoreError> {
        let body = serde_json::to_string(state).map_err(StoreError::unavailable)?;
        let result = self.store.set(key, &body).await;
        self.mark(result.is_ok());
        result
    }

    /// Write only when the store is not already at (or past) this
    /// revision. Lets a lagging context's opportunistic persists yield
    /// to authoritative writes it has not reloaded yet.
    pub async fn write_pet_if_fresh(
        &self,
        key: &str,
        state: &PetState,
    ) -> Result<SaveOutcome, StoreError> {
        if let Some(raw) = self.store.get(key).await?
            && let Ok(stored) = serde_json::from_str::<PetState>(&raw)
            && stored.revision >= state.revision
        {
            return Ok(SaveOutcome::Stale);
        }
        self.write_pet(key, state).await?;
        Ok(SaveOutcome::Saved)
    }

    /// Repair, stamp the next revision, and write.
    pub async fn save_pet(&self, key: &str, state: &mut PetState) -> Result<(), StoreError> {
        state.repair(Utc::now().timestamp());
        state.revision += 1;
        self.write_pet(key, state).await
    }
}

/// In-process store double for tests and offline runs.
#[derive(Default)]
pub struct MemoryStore {
    records: std::sync::Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    /// Flip the store into (or out of) a simulated outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store offline"));
        }
        Ok(self.records.lock().expect("store lock").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store offline"));
        }
        self.records
            .lock()
            .expect("store lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::pet::Archetype;

    use super::*;

    #[tokio::test]
    async fn load_missing_record_is_none() {
        let storage = Storage::new(MemoryStore::shared());
        let loaded = storage.load_pet(DEFAULT_PET_KEY, 1_000).await.expect("store up");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_with_repair() {
        let storage = Storage::new(MemoryStore::shared());
        let mut state = PetState::new(Archetype::Bunny, "Clover", 1_000);
        state.happiness = -40.0; // simulate a prior arithmetic bug
        storage.save_pet(DEFAULT_PET_KEY, &mut state).await.expect("saved");

        let loaded = storage
            .load_pet(DEFAULT_PET_KEY, 2_000)
            .await
            .expect("store up")
            .expect("record present");
        assert_eq!(loaded.display_name, "Clover");
        assert_eq!(loaded.happiness, 50.0);
        assert_eq!(loaded.revision, 1);
    }

    #[tokio::test]
    async fn unreadable_record_counts_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.set(DEFAULT_PET_KEY, "{not json").await.expect("set ok");
        let storage = Storage::new(store);
        let loaded = storage.load_pet(DEFAULT_PET_KEY, 1_000).await.expect("store up");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn stale_revision_write_is_skipped() {
        let storage = Storage::new(MemoryStore::shared());

        let mut authoritative = PetState::new(Archetype::Cat, "Miso", 1_000);
        storage
            .save_pet(DEFAULT_PET_KEY, &mut authoritative)
            .await
            .expect("saved");
        storage
            .save_pet(DEFAULT_PET_KEY, &mut authoritative)
            .await
            .expect("saved");
        assert_eq!(authoritative.revision, 2);

        // A context that loaded revision 0 stamps revision 1 and tries
        // an opportunistic write; the store is already at 2.
        let mut lagging = PetState::new(Archetype::Cat, "Miso", 1_000);
        lagging.revision += 1;
        let outcome = storage
            .write_pet_if_fresh(DEFAULT_PET_KEY, &lagging)
            .await
            .expect("store up");
        assert_eq!(outcome, SaveOutcome::Stale);

        let stored = storage
            .load_pet(DEFAULT_PET_KEY, 2_000)
            .await
            .expect("store up")
            .expect("record present");
        assert_eq!(stored.revision, 2);
    }

    #[tokio::test]
    async fn fresh_revision_write_lands() {
        let storage = Storage::new(MemoryStore::shared());
        let mut state = PetState::new(Archetype::Dog, "Biscuit", 1_000);
        storage.save_pet(DEFAULT_PET_KEY, &mut state).await.expect("saved");

        state.add_happiness(5.0);
        state.revision += 1;
        let outcome = storage
            .write_pet_if_fresh(DEFAULT_PET_KEY, &state)
            .await
            .expect("store up");
        assert_eq!(outcome, SaveOutcome::Saved);
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable_and_flips_health() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let storage = Storage::new(store.clone());

        let err = storage.load_pet(DEFAULT_PET_KEY, 1_000).await.expect_err("offline");
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(!storage.is_healthy());

        store.set_failing(false);
        assert!(storage.health_check(DEFAULT_PET_KEY).await);
        assert!(storage.is_healthy());
    }
}
