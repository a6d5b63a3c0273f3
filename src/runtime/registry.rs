//! SessionRegistry - Spawns and manages background sessions
//!
//! The `SessionRegistry` is responsible for:
//! - Spawning one actor task per session and tracking its handle
//! - Routing input, interrupts and observer changes to sessions
//! - Maintaining the watch graph and the watcher observation loops
//! - Tearing sessions down, including their watch relationships

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::actor::SessionActor;
use super::channels::{create_input_channel, WatchStream};
use super::graph::WatchGraph;
use super::handle::SessionHandle;
use super::observer::Observer;
use super::shared::SessionShared;
use super::watcher::{ParentLink, WatchLoop};
use crate::compaction::CompactionResult;
use crate::config::RuntimeConfig;
use crate::core::sync::{lock, read, write};
use crate::core::{
    OutputChunk, RuntimeError, RuntimeResult, SessionCommand, SessionId, SessionRole,
    SessionStatus, TokenState, WatcherMessage,
};
use crate::llm::{LlmProvider, ThinkingConfig};
use crate::session::PersistenceStore;

/// Summary of one session, as returned by `SessionRegistry::list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub persistence_id: Option<String>,
    pub status: SessionStatus,
    pub buffered_item_count: usize,
    pub watcher_count: usize,
    /// Session this one watches, if any
    pub parent: Option<SessionId>,
    /// Watcher role name, if created as a watcher
    pub role: Option<String>,
    pub tokens: TokenState,
    pub attached: bool,
    pub created_at: DateTime<Utc>,
}

/// Registry of running sessions
///
/// Sessions are spawned as tokio tasks, so every method that creates one
/// must be called from within a tokio runtime. Ids of destroyed sessions
/// are remembered: operations on them fail with `ChannelClosed` rather
/// than `SessionNotFound`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    destroyed: RwLock<HashSet<SessionId>>,
    graph: WatchGraph,
    /// Stop tokens of running observation loops, keyed by watcher id
    watch_loops: Mutex<HashMap<SessionId, CancellationToken>>,
    next_ordinal: AtomicU64,
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn PersistenceStore>,
    config: Arc<RuntimeConfig>,
}

impl SessionRegistry {
    /// Create a registry whose sessions share `provider` and `store`
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn PersistenceStore>,
        config: RuntimeConfig,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            destroyed: RwLock::new(HashSet::new()),
            graph: WatchGraph::new(),
            watch_loops: Mutex::new(HashMap::new()),
            next_ordinal: AtomicU64::new(0),
            provider,
            store,
            config: Arc::new(config),
        })
    }

    /// Get the configuration shared by all sessions
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create and start a session
    ///
    /// With a `persistence_id`, the session restores the history stored
    /// under it before processing input and appends every turn to it.
    pub fn create(&self, persistence_id: Option<String>) -> SessionId {
        self.spawn_session(persistence_id, None).id()
    }

    /// Create a session that watches `parent_id` in the given role
    ///
    /// The watcher evaluates the parent's output at breakpoints and after
    /// quiet periods. With `role.auto_inject`, its interjections are sent
    /// to the parent.
    pub fn create_watcher(
        &self,
        parent_id: SessionId,
        persistence_id: Option<String>,
        role: SessionRole,
    ) -> RuntimeResult<SessionId> {
        self.get(parent_id)?;
        let watcher_id = self.spawn_session(persistence_id, Some(role)).id();
        if let Err(e) = self.add_watcher(parent_id, watcher_id) {
            // The parent went away while the watcher was being created.
            let _ = self.destroy(watcher_id);
            return Err(e);
        }
        Ok(watcher_id)
    }

    /// Stop a session and drop it from the registry
    ///
    /// Watchers of the session stay alive but lose their parent. The
    /// in-flight turn, if any, is abandoned.
    pub fn destroy(&self, id: SessionId) -> RuntimeResult<()> {
        let handle = {
            let mut sessions = write(&self.sessions);
            match sessions.remove(&id) {
                Some(handle) => {
                    write(&self.destroyed).insert(id);
                    handle
                }
                None => {
                    drop(sessions);
                    return Err(self.missing(id));
                }
            }
        };

        for watcher_id in self.graph.remove_parent(id) {
            self.stop_watch_loop(watcher_id);
        }
        self.graph.remove_watcher(id);
        self.stop_watch_loop(id);
        handle.shutdown();

        tracing::info!(session_id = %id, "Session destroyed");
        Ok(())
    }

    /// Destroy every session
    pub fn shutdown_all(&self) {
        let ids: Vec<SessionId> = read(&self.sessions).keys().copied().collect();
        for id in ids {
            // Concurrent destroys are fine; the session is gone either way.
            let _ = self.destroy(id);
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get a handle to a live session
    pub fn get(&self, id: SessionId) -> RuntimeResult<SessionHandle> {
        if let Some(handle) = read(&self.sessions).get(&id) {
            return Ok(handle.clone());
        }
        Err(self.missing(id))
    }

    /// Check if a session is live
    pub fn contains(&self, id: SessionId) -> bool {
        read(&self.sessions).contains_key(&id)
    }

    /// Get the number of live sessions
    pub fn count(&self) -> usize {
        read(&self.sessions).len()
    }

    /// Summaries of all live sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut handles: Vec<SessionHandle> = read(&self.sessions).values().cloned().collect();
        handles.sort_by_key(SessionHandle::ordinal);
        handles.iter().map(|handle| self.info(handle)).collect()
    }

    /// Summary of one session
    pub fn info_for(&self, id: SessionId) -> RuntimeResult<SessionInfo> {
        let handle = self.get(id)?;
        Ok(self.info(&handle))
    }

    /// Current status of a session
    pub fn status(&self, id: SessionId) -> RuntimeResult<SessionStatus> {
        Ok(self.get(id)?.status())
    }

    fn info(&self, handle: &SessionHandle) -> SessionInfo {
        SessionInfo {
            id: handle.id(),
            persistence_id: handle.persistence_id().map(str::to_string),
            status: handle.status(),
            buffered_item_count: handle.buffered_item_count(),
            watcher_count: self.graph.watcher_count(handle.id()),
            parent: self.graph.get_parent(handle.id()),
            role: handle.role().map(|role| role.name.clone()),
            tokens: handle.tokens(),
            attached: handle.is_attached(),
            created_at: handle.created_at(),
        }
    }

    fn missing(&self, id: SessionId) -> RuntimeError {
        if read(&self.destroyed).contains(&id) {
            RuntimeError::ChannelClosed
        } else {
            RuntimeError::SessionNotFound(id)
        }
    }

    // =========================================================================
    // Input and control
    // =========================================================================

    /// Queue a prompt for a session
    pub fn send_input(
        &self,
        id: SessionId,
        message: impl Into<String>,
        thinking: Option<ThinkingConfig>,
    ) -> RuntimeResult<()> {
        self.get(id)?.send_input(message, thinking)
    }

    /// Request cancellation of a session's in-flight turn
    pub fn interrupt(&self, id: SessionId) -> RuntimeResult<()> {
        self.get(id)?.interrupt()
    }

    /// Compact a session's history now
    pub async fn compact(&self, id: SessionId) -> RuntimeResult<CompactionResult> {
        let handle = self.get(id)?;
        handle.compact().await
    }

    /// Replace a session's token state, e.g. with figures stored by a host
    pub fn restore_tokens(&self, id: SessionId, tokens: TokenState) -> RuntimeResult<()> {
        self.get(id)?
            .try_send(SessionCommand::RestoreTokens(tokens))
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Install an observer on a session, replacing any previous one
    pub fn attach(&self, id: SessionId, observer: Arc<dyn Observer>) -> RuntimeResult<()> {
        self.get(id)?.attach(observer);
        Ok(())
    }

    /// Install an observer and return what the session buffered so far
    pub fn attach_with_replay(
        &self,
        id: SessionId,
        observer: Arc<dyn Observer>,
    ) -> RuntimeResult<Vec<OutputChunk>> {
        Ok(self.get(id)?.attach_with_replay(observer))
    }

    /// Remove a session's observer; output keeps accumulating in the buffer
    pub fn detach(&self, id: SessionId) -> RuntimeResult<()> {
        self.get(id)?.detach();
        Ok(())
    }

    /// The last `limit` buffered items of a session, or all of them
    pub fn buffered_output(
        &self,
        id: SessionId,
        limit: Option<usize>,
    ) -> RuntimeResult<Vec<OutputChunk>> {
        Ok(self.get(id)?.buffered_output(limit))
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Subscribe to a session's output from the next item on
    pub fn subscribe_to_stream(&self, id: SessionId) -> RuntimeResult<WatchStream> {
        Ok(self.get(id)?.subscribe())
    }

    /// Buffer snapshot plus a live stream continuing right after it
    pub fn subscribe_with_snapshot(
        &self,
        id: SessionId,
    ) -> RuntimeResult<(Vec<OutputChunk>, WatchStream)> {
        Ok(self.get(id)?.subscribe_with_snapshot())
    }

    // =========================================================================
    // Watch relationships
    // =========================================================================

    /// Make `watcher_id` watch `parent_id`
    ///
    /// A watcher created with a role also starts evaluating the parent's
    /// output.
    pub fn add_watcher(&self, parent_id: SessionId, watcher_id: SessionId) -> RuntimeResult<()> {
        // destroy removes a session under the write lock before dropping its
        // edges, so holding the read lock here keeps both ends alive until
        // the edge and the loop are in place.
        let sessions = read(&self.sessions);
        let parent = sessions.get(&parent_id).ok_or_else(|| self.missing(parent_id))?;
        let watcher = sessions.get(&watcher_id).ok_or_else(|| self.missing(watcher_id))?;
        self.graph.add_watcher(parent_id, watcher_id)?;

        if let Some(role) = watcher.role() {
            self.start_watch_loop(parent, watcher, role.clone());
        }
        drop(sessions);
        tracing::debug!(parent_id = %parent_id, watcher_id = %watcher_id, "Watcher added");
        Ok(())
    }

    /// Detach a watcher from its parent; returns the former parent
    pub fn remove_watcher(&self, watcher_id: SessionId) -> Option<SessionId> {
        self.stop_watch_loop(watcher_id);
        let parent = self.graph.remove_watcher(watcher_id);
        if let Some(parent_id) = parent {
            tracing::debug!(parent_id = %parent_id, watcher_id = %watcher_id, "Watcher removed");
        }
        parent
    }

    /// Watchers of a session, in the order they were added
    pub fn get_watchers(&self, parent_id: SessionId) -> Vec<SessionId> {
        self.graph.get_watchers(parent_id)
    }

    /// The session a watcher watches
    pub fn get_parent(&self, watcher_id: SessionId) -> Option<SessionId> {
        self.graph.get_parent(watcher_id)
    }

    /// Send a message from a watcher to its parent
    ///
    /// The parent shows the message as a watcher-input item and runs a turn
    /// on it.
    pub fn watcher_inject(
        &self,
        watcher_id: SessionId,
        message: impl Into<String>,
    ) -> RuntimeResult<()> {
        let watcher = self.get(watcher_id)?;
        let parent_id = self
            .graph
            .get_parent(watcher_id)
            .ok_or(RuntimeError::NotWatching(watcher_id))?;
        let parent = self.get(parent_id)?;

        parent.try_send(SessionCommand::WatcherInput(WatcherMessage {
            watcher_id,
            role: watcher.role().cloned(),
            text: message.into(),
        }))
    }

    // =========================================================================
    // Spawning
    // =========================================================================

    fn spawn_session(
        &self,
        persistence_id: Option<String>,
        role: Option<SessionRole>,
    ) -> SessionHandle {
        let id = Uuid::new_v4();
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(SessionShared::new(self.config.fanout_capacity));
        let (input_tx, input_rx) = create_input_channel(self.config.input_queue_capacity);
        let shutdown = CancellationToken::new();

        let actor = SessionActor::new(
            id,
            persistence_id.clone(),
            shared.clone(),
            input_rx,
            shutdown.clone(),
            self.provider.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        let handle = SessionHandle::new(id, ordinal, persistence_id, role, shared, input_tx, shutdown);

        write(&self.sessions).insert(id, handle.clone());
        tokio::spawn(actor.run());

        tracing::info!(
            session_id = %id,
            persistence_id = ?handle.persistence_id(),
            role = ?handle.role().map(|r| r.name.as_str()),
            "Session created"
        );
        handle
    }

    fn start_watch_loop(&self, parent: &SessionHandle, watcher: &SessionHandle, role: SessionRole) {
        // Ends with the watcher session, or earlier through stop_watch_loop.
        let stop = watcher.shutdown_token().child_token();
        let watch_loop = WatchLoop {
            watcher_id: watcher.id(),
            role,
            watcher_commands: watcher.input_sender(),
            parent: ParentLink {
                id: parent.id(),
                commands: parent.input_sender(),
                shared: parent.downgrade(),
            },
            stream: parent.subscribe(),
            silence_timeout: self.config.watcher_silence_timeout(),
            stop: stop.clone(),
        };

        if let Some(previous) = lock(&self.watch_loops).insert(watcher.id(), stop) {
            previous.cancel();
        }
        tokio::spawn(watch_loop.run());
    }

    fn stop_watch_loop(&self, watcher_id: SessionId) {
        if let Some(stop) = lock(&self.watch_loops).remove(&watcher_id) {
            stop.cancel();
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for handle in write(&self.sessions).values() {
            handle.shutdown();
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.count())
            .field("provider", &self.provider.provider_name())
            .finish()
    }
}
