//! Session registry: store, single-active policy, event fan-out
//!
//! The registry is handed around as an `Arc` and injected into the
//! websocket ingress, the HTTP ingress, and every Activity Driver, so tests
//! can instantiate isolated registries per case. All mutable state lives
//! behind one mutex; the single-active policy's scan-and-stop and the
//! driver's mutate-then-broadcast both complete under a single lock
//! acquisition, which is what keeps two drivers from ever both claiming a
//! running session.

use std::collections::HashMap;
use std::sync::Arc;

use applywatch_protocol::{ServerMessage, SessionStatus};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::driver;
use crate::session::Session;

/// Identity of a persistent (websocket) connection
pub type ConnectionId = u64;

const BROADCAST_CAPACITY: usize = 256;

pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,

    /// Fan-out to every connected observer, regardless of which session
    /// produced the event. Sending with zero subscribers is a no-op.
    events_tx: broadcast::Sender<ServerMessage>,

    driver_config: DriverConfig,
}

struct RegistryInner {
    /// Per-connection session records
    sessions: HashMap<ConnectionId, Session>,

    /// The globally active session, visible to channels that carry no
    /// connection identity
    active_session: Option<String>,

    /// Targeted per-connection senders, for events addressed to one owner
    /// (stop confirmations, pre-emption notices)
    clients: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl SessionRegistry {
    pub fn new(driver_config: DriverConfig) -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                active_session: None,
                clients: HashMap::new(),
            }),
            events_tx,
            driver_config,
        }
    }

    pub fn driver_config(&self) -> &DriverConfig {
        &self.driver_config
    }

    /// Subscribe to the observer event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.events_tx.subscribe()
    }

    /// Best-effort fan-out to all connected observers.
    pub fn broadcast(&self, msg: ServerMessage) {
        let _ = self.events_tx.send(msg);
    }

    /// Register the targeted-event sender for a connection.
    pub async fn register_client(
        &self,
        connection_id: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
    ) {
        self.inner.lock().await.clients.insert(connection_id, tx);
    }

    /// Start a new run for `connection_id`, enforcing the single-active
    /// policy: the issuer's own running session is stopped first, then every
    /// other running session is stopped and its owner notified with a plain
    /// `stopped` status. Returns the new session id.
    pub async fn start_session(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        job_url: &str,
    ) -> String {
        let mut preempted: Vec<(mpsc::Sender<ServerMessage>, ServerMessage)> = Vec::new();
        let session_id;
        {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;

            // Idempotent self-supersession: the issuer's old run stops
            // silently before its replacement exists.
            if let Some(existing) = inner.sessions.get_mut(&connection_id) {
                existing.mark_stopped();
            }

            // Every other running session stops before the new one is
            // installed. The owner gets a stopped status, never an error.
            for (cid, session) in inner.sessions.iter_mut() {
                if *cid == connection_id || session.status() != SessionStatus::Running {
                    continue;
                }
                session.mark_stopped();
                info!(
                    component = "registry",
                    event = "session.preempted",
                    session_id = %session.session_id(),
                    connection_id = *cid,
                    "Running session pre-empted by a newer start"
                );
                if let Some(tx) = inner.clients.get(cid) {
                    preempted.push((
                        tx.clone(),
                        ServerMessage::AgentStatus {
                            status: SessionStatus::Stopped,
                            current_page: session.current_page(),
                            progress: session.progress(self.driver_config.action_limit),
                        },
                    ));
                }
            }

            let mut session = Session::new(Some(connection_id), job_url);
            session_id = session.session_id().to_string();
            let started_at = session.started_at().to_string();
            session.attach_driver(driver::spawn(
                Arc::clone(self),
                connection_id,
                session_id.clone(),
            ));
            inner.active_session = Some(session_id.clone());
            inner.sessions.insert(connection_id, session);

            info!(
                component = "registry",
                event = "session.started",
                session_id = %session_id,
                connection_id = connection_id,
                job_url = %job_url,
                started_at = %started_at,
                "Session started"
            );
            let _ = self.events_tx.send(ServerMessage::AgentStatus {
                status: SessionStatus::Running,
                current_page: 1,
                progress: 0,
            });
        }

        for (tx, msg) in preempted {
            let _ = tx.send(msg).await;
        }
        session_id
    }

    /// Operator stop. Only a live run transitions (to `idle`); the returned
    /// status event is addressed to the issuer alone. `None` means there was
    /// nothing to stop, and nothing is emitted.
    pub async fn stop_session(&self, connection_id: ConnectionId) -> Option<ServerMessage> {
        let mut guard = self.inner.lock().await;
        let session = guard.sessions.get_mut(&connection_id)?;
        if !session.mark_idle() {
            return None;
        }
        info!(
            component = "registry",
            event = "session.stopped",
            session_id = %session.session_id(),
            connection_id = connection_id,
            "Session stopped by its owner"
        );
        Some(ServerMessage::AgentStatus {
            status: SessionStatus::Idle,
            current_page: session.current_page(),
            progress: session.progress(self.driver_config.action_limit),
        })
    }

    /// Connection teardown: evict the session record, cancel its driver, and
    /// release the active pointer unless a newer session already owns it.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.lock().await;
        guard.clients.remove(&connection_id);
        if let Some(mut session) = guard.sessions.remove(&connection_id) {
            session.mark_stopped();
            if guard.active_session.as_deref() == Some(session.session_id()) {
                guard.active_session = None;
            }
            debug!(
                component = "registry",
                event = "session.evicted",
                session_id = %session.session_id(),
                connection_id = connection_id,
                "Session evicted on disconnect"
            );
        }
    }

    /// Run `f` against the session owned by `connection_id`, provided it is
    /// still the one the caller knows. Events returned by `f` are broadcast
    /// before the registry lock is released, so every broadcast reflects the
    /// full state as of that mutation.
    pub(crate) async fn mutate_session<R>(
        &self,
        connection_id: ConnectionId,
        session_id: &str,
        f: impl FnOnce(&mut Session, &DriverConfig) -> (R, Vec<ServerMessage>),
    ) -> Option<R> {
        let mut guard = self.inner.lock().await;
        let session = guard.sessions.get_mut(&connection_id)?;
        if session.session_id() != session_id {
            return None;
        }
        let (result, events) = f(session, &self.driver_config);
        for msg in events {
            let _ = self.events_tx.send(msg);
        }
        Some(result)
    }
}

/// Read-side instrumentation for tests.
#[cfg(test)]
impl SessionRegistry {
    pub(crate) async fn session_status(
        &self,
        connection_id: ConnectionId,
    ) -> Option<SessionStatus> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&connection_id)
            .map(|s| s.status())
    }

    pub(crate) async fn active_session_id(&self) -> Option<String> {
        self.inner.lock().await.active_session.clone()
    }

    pub(crate) async fn running_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.status() == SessionStatus::Running)
            .count()
    }

    pub(crate) async fn session_actions_len(&self, connection_id: ConnectionId) -> Option<usize> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&connection_id)
            .map(|s| s.actions().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Registry whose drivers effectively never tick, so policy transitions
    /// can be observed in isolation.
    fn quiet_registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(DriverConfig {
            min_tick_ms: 60_000,
            max_tick_ms: 120_000,
            action_limit: 5,
        }))
    }

    #[tokio::test]
    async fn at_most_one_session_runs_across_connections() {
        let registry = quiet_registry();

        registry.start_session(1, "https://jobs.lever.co/a/1").await;
        let second = registry.start_session(2, "https://jobs.lever.co/b/2").await;

        assert_eq!(registry.running_count().await, 1);
        assert_eq!(
            registry.session_status(1).await,
            Some(SessionStatus::Stopped)
        );
        assert_eq!(
            registry.session_status(2).await,
            Some(SessionStatus::Running)
        );
        assert_eq!(registry.active_session_id().await, Some(second));
    }

    #[tokio::test]
    async fn preempted_owner_gets_stopped_status_and_no_error() {
        let registry = quiet_registry();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        registry.register_client(1, tx1).await;
        registry.register_client(2, tx2).await;

        registry.start_session(1, "https://jobs.lever.co/a/1").await;
        registry.start_session(2, "https://jobs.lever.co/b/2").await;

        match rx1.try_recv() {
            Ok(ServerMessage::AgentStatus { status, .. }) => {
                assert_eq!(status, SessionStatus::Stopped);
            }
            other => panic!("expected stopped status for pre-empted owner, got {:?}", other),
        }
        assert!(rx1.try_recv().is_err(), "exactly one targeted event");
        assert!(rx2.try_recv().is_err(), "new owner gets no targeted event");
    }

    #[tokio::test]
    async fn restart_on_same_connection_supersedes_silently() {
        let registry = quiet_registry();
        let (tx1, mut rx1) = mpsc::channel(8);
        registry.register_client(1, tx1).await;

        let first = registry.start_session(1, "https://jobs.lever.co/a/1").await;
        let second = registry.start_session(1, "https://jobs.lever.co/a/1").await;

        assert_ne!(first, second);
        assert_eq!(registry.running_count().await, 1);
        assert_eq!(registry.active_session_id().await, Some(second));
        assert!(rx1.try_recv().is_err(), "self-supersession is silent");
    }

    #[tokio::test]
    async fn start_broadcasts_running_status() {
        let registry = quiet_registry();
        let mut rx = registry.subscribe();

        registry.start_session(1, "https://jobs.lever.co/a/1").await;

        match rx.recv().await {
            Ok(ServerMessage::AgentStatus {
                status,
                current_page,
                progress,
            }) => {
                assert_eq!(status, SessionStatus::Running);
                assert_eq!(current_page, 1);
                assert_eq!(progress, 0);
            }
            other => panic!("expected running status broadcast, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let registry = quiet_registry();
        registry.start_session(1, "https://jobs.lever.co/a/1").await;

        let first = registry.stop_session(1).await;
        match first {
            Some(ServerMessage::AgentStatus { status, .. }) => {
                assert_eq!(status, SessionStatus::Idle);
            }
            other => panic!("expected idle status, got {:?}", other),
        }

        assert!(registry.stop_session(1).await.is_none());
        assert_eq!(registry.session_status(1).await, Some(SessionStatus::Idle));
    }

    #[tokio::test]
    async fn stop_without_session_is_a_noop() {
        let registry = quiet_registry();
        assert!(registry.stop_session(7).await.is_none());
    }

    #[tokio::test]
    async fn disconnect_evicts_and_releases_active_pointer() {
        let registry = quiet_registry();
        registry.start_session(1, "https://jobs.lever.co/a/1").await;

        registry.disconnect(1).await;

        assert!(registry.session_status(1).await.is_none());
        assert!(registry.active_session_id().await.is_none());

        // Disconnecting again is harmless
        registry.disconnect(1).await;
    }

    #[tokio::test]
    async fn disconnect_keeps_a_superseding_session_active() {
        let registry = quiet_registry();
        registry.start_session(1, "https://jobs.lever.co/a/1").await;
        let second = registry.start_session(2, "https://jobs.lever.co/b/2").await;

        registry.disconnect(1).await;

        assert_eq!(registry.active_session_id().await, Some(second));
        assert_eq!(registry.running_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_with_zero_observers_is_a_noop() {
        let registry = quiet_registry();
        registry.broadcast(ServerMessage::PageTransition { page: 2 });
    }
}
