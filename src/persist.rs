//! Persistence collaborator seam for the progress document.
//!
//! Saves are fire-and-forget from the core's point of view: failures are
//! logged by the caller and the in-memory aggregate stays authoritative
//! until the next debounced attempt. Remote synchronization is whole-
//! document last-writer-wins; there is no field-level merge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::progress::AppProgress;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<AppProgress>, PersistError>;
    async fn save(&self, user_id: &str, progress: &AppProgress) -> Result<(), PersistError>;
}

/// In-process repository used in tests and offline mode.
#[derive(Default)]
pub struct MemoryRepository {
    documents: Mutex<HashMap<String, AppProgress>>,
    saves: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed save calls; used to observe debouncing.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn stored(&self, user_id: &str) -> Option<AppProgress> {
        self.documents.lock().get(user_id).cloned()
    }

    pub fn insert(&self, user_id: &str, progress: AppProgress) {
        self.documents.lock().insert(user_id.to_string(), progress);
    }
}

#[async_trait]
impl ProgressRepository for MemoryRepository {
    async fn load(&self, user_id: &str) -> Result<Option<AppProgress>, PersistError> {
        Ok(self.documents.lock().get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, progress: &AppProgress) -> Result<(), PersistError> {
        self.documents
            .lock()
            .insert(user_id.to_string(), progress.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
