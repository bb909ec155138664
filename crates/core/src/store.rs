//! Conversation store trait.
//!
//! The store maps a [`ThreadId`] to its ordered message history and the
//! continuation checkpoint. Turns on different threads never contend;
//! turns on the same thread are serialized through [`TurnGuard`].

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::StoreError;
use crate::message::{Checkpoint, Message, Thread, ThreadId};

/// Exclusive right to run a turn on one thread.
///
/// Dropping the guard lets the next queued turn on the same thread proceed.
#[derive(Debug)]
pub struct TurnGuard {
    thread_id: ThreadId,
    _lock: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn new(thread_id: ThreadId, lock: OwnedMutexGuard<()>) -> Self {
        Self {
            thread_id,
            _lock: lock,
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a thread, creating an empty one on first use.
    async fn get_or_create(&self, thread_id: &ThreadId) -> std::result::Result<Thread, StoreError>;

    /// Append a message. Rejects messages that break thread ordering rules.
    async fn append(
        &self,
        thread_id: &ThreadId,
        message: Message,
    ) -> std::result::Result<(), StoreError>;

    /// The last saved continuation state.
    async fn checkpoint_of(&self, thread_id: &ThreadId)
    -> std::result::Result<Checkpoint, StoreError>;

    async fn save_checkpoint(
        &self,
        thread_id: &ThreadId,
        checkpoint: Checkpoint,
    ) -> std::result::Result<(), StoreError>;

    /// Wait for exclusive access to a thread for the duration of a turn.
    async fn begin_turn(&self, thread_id: &ThreadId) -> std::result::Result<TurnGuard, StoreError>;

    /// Number of live threads.
    async fn thread_count(&self) -> usize;
}
