//! In-memory conversation store.
//!
//! Each thread lives in its own slot. The map lock is only held to find or
//! create a slot; message appends lock the slot, and turns lock the slot's
//! turn mutex, so different threads never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use scholarly_config::StoreConfig;
use scholarly_core::error::StoreError;
use scholarly_core::message::{Checkpoint, Message, Thread, ThreadId};
use scholarly_core::store::{ConversationStore, TurnGuard};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

struct SlotState {
    thread: Thread,
    last_used: Instant,
}

struct Slot {
    state: Mutex<SlotState>,
    turn: Arc<Mutex<()>>,
}

impl Slot {
    fn new(id: ThreadId) -> Self {
        Self {
            state: Mutex::new(SlotState {
                thread: Thread::new(id),
                last_used: Instant::now(),
            }),
            turn: Arc::new(Mutex::new(())),
        }
    }
}

/// Last use of a slot nobody else is holding, or `None` while it is in use.
///
/// Callers hold the map write lock, so no new references can appear.
fn idle_since(slot: &Arc<Slot>) -> Option<Instant> {
    if Arc::strong_count(slot) > 1 || Arc::strong_count(&slot.turn) > 1 {
        return None;
    }
    slot.state.try_lock().ok().map(|s| s.last_used)
}

/// Process-memory store; history is lost on restart.
pub struct InMemoryStore {
    threads: RwLock<HashMap<ThreadId, Arc<Slot>>>,
    max_threads: Option<usize>,
    idle_ttl: Option<Duration>,
}

impl InMemoryStore {
    /// Unbounded store: threads live until the process exits.
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            max_threads: None,
            idle_ttl: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let mut store = Self::new();
        if config.max_threads > 0 {
            store = store.with_max_threads(config.max_threads);
        }
        if config.idle_ttl_secs > 0 {
            store = store.with_idle_ttl(Duration::from_secs(config.idle_ttl_secs));
        }
        store
    }

    /// Evict the least recently used thread when more than `max` are live.
    pub fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = Some(max.max(1));
        self
    }

    /// Threads idle for `ttl` become eligible for [`evict_idle`](Self::evict_idle).
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    async fn slot(&self, thread_id: &ThreadId) -> Option<Arc<Slot>> {
        self.threads.read().await.get(thread_id).cloned()
    }

    async fn slot_or_create(&self, thread_id: &ThreadId) -> Arc<Slot> {
        if let Some(slot) = self.slot(thread_id).await {
            return slot;
        }

        let mut threads = self.threads.write().await;
        if let Some(slot) = threads.get(thread_id) {
            return slot.clone();
        }

        let slot = Arc::new(Slot::new(thread_id.clone()));
        threads.insert(thread_id.clone(), slot.clone());
        debug!(thread_id = %thread_id, "Created thread");

        if let Some(max) = self.max_threads {
            while threads.len() > max {
                let victim = threads
                    .iter()
                    .filter(|(id, _)| *id != thread_id)
                    .filter_map(|(id, s)| idle_since(s).map(|t| (t, id.clone())))
                    .min()
                    .map(|(_, id)| id);
                let Some(victim) = victim else {
                    break;
                };
                threads.remove(&victim);
                info!(thread_id = %victim, max_threads = max, "Evicted least recently used thread");
            }
        }
        slot
    }

    async fn existing(&self, thread_id: &ThreadId) -> Result<Arc<Slot>, StoreError> {
        self.slot(thread_id)
            .await
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.to_string()))
    }

    /// Drop threads idle longer than the configured TTL. Returns how many went.
    ///
    /// Threads with a turn in flight or queued are kept.
    pub async fn evict_idle(&self) -> usize {
        let Some(ttl) = self.idle_ttl else {
            return 0;
        };
        let now = Instant::now();
        let mut threads = self.threads.write().await;
        let before = threads.len();
        threads.retain(|id, slot| match idle_since(slot) {
            Some(last_used) if now.duration_since(last_used) >= ttl => {
                debug!(thread_id = %id, "Evicted idle thread");
                false
            }
            _ => true,
        });
        before - threads.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let evicted = store.evict_idle().await;
                if evicted > 0 {
                    let remaining = store.thread_count().await;
                    info!(evicted, remaining, "Swept idle threads");
                }
            }
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_or_create(&self, thread_id: &ThreadId) -> Result<Thread, StoreError> {
        let slot = self.slot_or_create(thread_id).await;
        let mut state = slot.state.lock().await;
        state.last_used = Instant::now();
        Ok(state.thread.clone())
    }

    async fn append(&self, thread_id: &ThreadId, message: Message) -> Result<(), StoreError> {
        let slot = self.existing(thread_id).await?;
        let mut state = slot.state.lock().await;
        message
            .validate_append(&state.thread.messages)
            .map_err(|reason| StoreError::InvalidMessage {
                thread_id: thread_id.to_string(),
                reason,
            })?;
        state.thread.push(message);
        state.last_used = Instant::now();
        Ok(())
    }

    async fn checkpoint_of(&self, thread_id: &ThreadId) -> Result<Checkpoint, StoreError> {
        let slot = self.existing(thread_id).await?;
        let state = slot.state.lock().await;
        Ok(state.thread.checkpoint.clone())
    }

    async fn save_checkpoint(
        &self,
        thread_id: &ThreadId,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        let slot = self.existing(thread_id).await?;
        let mut state = slot.state.lock().await;
        state.thread.checkpoint = checkpoint;
        state.last_used = Instant::now();
        Ok(())
    }

    async fn begin_turn(&self, thread_id: &ThreadId) -> Result<TurnGuard, StoreError> {
        let turn = self.slot_or_create(thread_id).await.turn.clone();
        let guard = turn.lock_owned().await;
        Ok(TurnGuard::new(thread_id.clone(), guard))
    }

    async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholarly_core::message::{InvocationRequest, Role};
    use serde_json::json;

    #[tokio::test]
    async fn threads_are_isolated() {
        let store = InMemoryStore::new();
        let a = ThreadId::from("a");
        let b = ThreadId::from("b");
        store.get_or_create(&a).await.unwrap();
        store.get_or_create(&b).await.unwrap();

        store.append(&a, Message::user("my name is Alex")).await.unwrap();
        store.append(&b, Message::user("hello")).await.unwrap();

        let thread_a = store.get_or_create(&a).await.unwrap();
        assert_eq!(thread_a.messages.len(), 1);
        assert_eq!(thread_a.messages[0].content, "my name is Alex");
        assert_eq!(store.get_or_create(&b).await.unwrap().messages[0].content, "hello");
        assert_eq!(store.thread_count().await, 2);
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = InMemoryStore::new();
        let t = ThreadId::from("t");
        store.get_or_create(&t).await.unwrap();

        let call = InvocationRequest::new("c1", "search_papers", json!({ "topic": "rl" }));
        store.append(&t, Message::user("find rl papers")).await.unwrap();
        store
            .append(&t, Message::assistant_with_calls("", vec![call]))
            .await
            .unwrap();
        store.append(&t, Message::tool_result("c1", "3 papers")).await.unwrap();
        store.append(&t, Message::assistant("Here they are")).await.unwrap();

        let roles: Vec<Role> = store
            .get_or_create(&t)
            .await
            .unwrap()
            .messages
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn malformed_messages_are_rejected() {
        let store = InMemoryStore::new();
        let t = ThreadId::from("t");
        store.get_or_create(&t).await.unwrap();

        let err = store.append(&t, Message::tool_result("nope", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessage { .. }));
        assert!(store.append(&t, Message::system("be terse")).await.is_err());
        assert!(store.append(&t, Message::user("   ")).await.is_err());
        assert!(store.get_or_create(&t).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn unknown_thread_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .append(&ThreadId::from("ghost"), Message::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ThreadNotFound(_)));
        assert!(store.checkpoint_of(&ThreadId::from("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = InMemoryStore::new();
        let t = ThreadId::from("t");
        store.get_or_create(&t).await.unwrap();
        assert_eq!(store.checkpoint_of(&t).await.unwrap(), Checkpoint::default());

        let checkpoint = Checkpoint {
            turns: 1,
            message_count: 2,
            last_model: Some("gemini-2.5-flash".into()),
            ..Default::default()
        };
        store.save_checkpoint(&t, checkpoint.clone()).await.unwrap();
        assert_eq!(store.checkpoint_of(&t).await.unwrap(), checkpoint);
    }

    #[tokio::test(start_paused = true)]
    async fn same_thread_turns_are_serialized() {
        let store = InMemoryStore::new();
        let t = ThreadId::from("t");

        let first = store.begin_turn(&t).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_secs(5), store.begin_turn(&t)).await;
        assert!(blocked.is_err());

        // A different thread is unaffected
        let other = tokio::time::timeout(
            Duration::from_secs(5),
            store.begin_turn(&ThreadId::from("u")),
        )
        .await;
        assert!(other.is_ok());

        drop(first);
        let second = store.begin_turn(&t).await.unwrap();
        assert_eq!(second.thread_id(), &t);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_threads_expire() {
        let store = InMemoryStore::new().with_idle_ttl(Duration::from_secs(60));
        store.get_or_create(&ThreadId::from("old")).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        store.get_or_create(&ThreadId::from("fresh")).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(store.evict_idle().await, 1);
        assert_eq!(store.thread_count().await, 1);
        assert!(store.checkpoint_of(&ThreadId::from("fresh")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn turn_in_flight_is_never_evicted() {
        let store = InMemoryStore::new().with_idle_ttl(Duration::from_secs(10));
        let t = ThreadId::from("busy");
        let guard = store.begin_turn(&t).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(store.evict_idle().await, 0);
        drop(guard);
        assert_eq!(store.evict_idle().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_thread_goes_first() {
        let store = InMemoryStore::new().with_max_threads(2);
        store.get_or_create(&ThreadId::from("a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        store.get_or_create(&ThreadId::from("b")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        store.get_or_create(&ThreadId::from("a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        store.get_or_create(&ThreadId::from("c")).await.unwrap();

        assert_eq!(store.thread_count().await, 2);
        assert!(store.checkpoint_of(&ThreadId::from("a")).await.is_ok());
        assert!(store.checkpoint_of(&ThreadId::from("b")).await.is_err());
    }

    #[tokio::test]
    async fn unbounded_by_default() {
        let store = InMemoryStore::from_config(&StoreConfig::default());
        for i in 0..50 {
            store.get_or_create(&ThreadId(format!("t{i}"))).await.unwrap();
        }
        assert_eq!(store.thread_count().await, 50);
        assert_eq!(store.evict_idle().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_in_background() {
        let store = Arc::new(InMemoryStore::new().with_idle_ttl(Duration::from_secs(30)));
        store.get_or_create(&ThreadId::from("t")).await.unwrap();
        let sweeper = store.spawn_sweeper(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.thread_count().await, 0);

        drop(store);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(sweeper.is_finished());
    }
}
