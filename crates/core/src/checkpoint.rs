//! Checkpoint storage of conversation state, keyed by thread identifier.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::State;

/// Errors from a checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The requested kind of storage does not exist yet.
    #[error("{0} is not implemented")]
    Unsupported(&'static str),
    /// A storage backend failed to read or write a checkpoint.
    #[error("checkpoint backend failed: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
}

/// A store for the state of conversation threads.
///
/// Each thread identifier scopes its own state, stores must never return
/// the state of one thread for another. Durable backends (e.g. a database)
/// implement this trait and report failures as
/// [`CheckpointError::Backend`].
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Loads the latest checkpoint of a thread.
    async fn get(&self, thread_id: &str)
    -> Result<Option<State>, CheckpointError>;

    /// Replaces the checkpoint of a thread.
    async fn put(
        &self,
        thread_id: &str,
        state: State,
    ) -> Result<(), CheckpointError>;
}

/// An in-memory checkpoint store, lost when the process exits.
#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<String, State>>,
}

impl MemoryCheckpointer {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn get(
        &self,
        thread_id: &str,
    ) -> Result<Option<State>, CheckpointError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn put(
        &self,
        thread_id: &str,
        state: State,
    ) -> Result<(), CheckpointError> {
        trace!(thread_id, messages = state.len(), "saving checkpoint");
        self.threads.write().await.insert(thread_id.to_owned(), state);
        Ok(())
    }
}

/// The kind of memory backing a checkpoint store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Process-lifetime memory.
    #[default]
    ShortTerm,
    /// Memory that survives restarts.
    LongTerm,
}

/// Opens a checkpoint store of the given kind.
///
/// Only short-term memory is available, asking for long-term memory always
/// fails with [`CheckpointError::Unsupported`].
pub fn open_checkpointer(
    kind: MemoryKind,
) -> Result<Arc<dyn Checkpointer>, CheckpointError> {
    match kind {
        MemoryKind::ShortTerm => Ok(Arc::new(MemoryCheckpointer::new())),
        MemoryKind::LongTerm => {
            Err(CheckpointError::Unsupported("long-term memory"))
        }
    }
}
