//! Fan-out hub for connected sessions.
//!
//! The set of live sessions is owned by a single control loop. Handles talk
//! to it over three channels (register, unregister, broadcast), which the
//! loop drains in that priority order, so a registration queued before a
//! broadcast is always applied before the broadcast is delivered.

use crate::session::{Session, SessionId};
use edgelink_types::ResponseEnvelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RealtimeError;

/// Recipients of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Every registered session.
    All,
    /// The session most recently registered under this id.
    To(SessionId),
}

#[derive(Debug)]
struct Outbound {
    delivery: Delivery,
    envelope: ResponseEnvelope,
}

#[derive(Debug, Default)]
struct Counters {
    active_sessions: AtomicUsize,
    total_sessions: AtomicU64,
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to the hub. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RealtimeHub {
    register: mpsc::UnboundedSender<Arc<Session>>,
    unregister: mpsc::UnboundedSender<Arc<Session>>,
    broadcast: mpsc::UnboundedSender<Outbound>,
    counters: Arc<Counters>,
}

impl RealtimeHub {
    /// Create a hub and the control loop that serves it.
    ///
    /// Nothing is delivered until [`HubLoop::run`] is polled.
    pub fn new() -> (Self, HubLoop) {
        let (register, register_rx) = mpsc::unbounded_channel();
        let (unregister, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast, broadcast_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let hub = Self {
            register,
            unregister,
            broadcast,
            counters: counters.clone(),
        };
        let control = HubLoop {
            register_rx,
            unregister_rx,
            broadcast_rx,
            sessions: HashMap::new(),
            by_id: HashMap::new(),
            counters,
        };
        (hub, control)
    }

    /// Create a hub with its control loop running on the current runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (hub, control) = Self::new();
        (hub, tokio::spawn(control.run()))
    }

    /// Add a session to the live set.
    pub fn register(&self, session: Arc<Session>) {
        if self.register.send(session).is_err() {
            warn!("Hub stopped, registration ignored");
        }
    }

    /// Remove a session from the live set.
    pub fn unregister(&self, session: Arc<Session>) {
        let _ = self.unregister.send(session);
    }

    /// Deliver a message to every live session.
    pub fn broadcast(&self, envelope: ResponseEnvelope) -> Result<(), RealtimeError> {
        self.submit(Delivery::All, envelope)
    }

    /// Deliver a message to one session by id.
    pub fn send_to(
        &self,
        session_id: impl Into<SessionId>,
        envelope: ResponseEnvelope,
    ) -> Result<(), RealtimeError> {
        self.submit(Delivery::To(session_id.into()), envelope)
    }

    /// Queue a message for delivery.
    pub fn submit(&self, delivery: Delivery, envelope: ResponseEnvelope) -> Result<(), RealtimeError> {
        self.broadcast
            .send(Outbound { delivery, envelope })
            .map_err(|_| RealtimeError::ChannelClosed)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.counters.active_sessions.load(Ordering::Relaxed)
    }

    /// Whether the control loop is still accepting work.
    pub fn is_running(&self) -> bool {
        !self.broadcast.is_closed()
    }

    /// Snapshot of hub statistics.
    pub fn stats(&self) -> HubStats {
        HubStats {
            active_sessions: self.counters.active_sessions.load(Ordering::Relaxed),
            total_sessions: self.counters.total_sessions.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// The hub's control loop. Owns every live session.
pub struct HubLoop {
    register_rx: mpsc::UnboundedReceiver<Arc<Session>>,
    unregister_rx: mpsc::UnboundedReceiver<Arc<Session>>,
    broadcast_rx: mpsc::UnboundedReceiver<Outbound>,
    sessions: HashMap<u64, Arc<Session>>,
    by_id: HashMap<SessionId, Arc<Session>>,
    counters: Arc<Counters>,
}

impl HubLoop {
    /// Serve until every hub handle is dropped.
    pub async fn run(mut self) {
        info!("Realtime hub started");
        loop {
            tokio::select! {
                biased;
                Some(session) = self.register_rx.recv() => self.add(session),
                Some(session) = self.unregister_rx.recv() => self.remove(&session),
                Some(outbound) = self.broadcast_rx.recv() => self.deliver(outbound),
                else => break,
            }
        }
        for session in self.sessions.values() {
            session.close();
        }
        info!("Realtime hub stopped");
    }

    fn add(&mut self, session: Arc<Session>) {
        if session.is_closed() {
            debug!(session_id = %session.id, "Skipping closed session");
            return;
        }
        if let Some(previous) = self.by_id.insert(session.id.clone(), session.clone()) {
            debug!(
                session_id = %session.id,
                previous = previous.serial(),
                "Session id now targets the newest connection"
            );
        }
        if self.sessions.insert(session.serial(), session.clone()).is_none() {
            self.counters.total_sessions.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .active_sessions
            .store(self.sessions.len(), Ordering::Relaxed);
        info!(session_id = %session.id, serial = session.serial(), "Session registered");
    }

    fn remove(&mut self, session: &Arc<Session>) {
        if self.sessions.remove(&session.serial()).is_none() {
            return;
        }
        if self
            .by_id
            .get(&session.id)
            .is_some_and(|current| current.serial() == session.serial())
        {
            self.by_id.remove(&session.id);
        }
        self.counters
            .active_sessions
            .store(self.sessions.len(), Ordering::Relaxed);
        info!(session_id = %session.id, serial = session.serial(), "Session unregistered");
    }

    fn deliver(&mut self, outbound: Outbound) {
        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        match outbound.delivery {
            Delivery::All => {
                for session in self.sessions.values() {
                    offer(&self.counters, session, outbound.envelope.clone());
                }
            }
            Delivery::To(id) => match self.by_id.get(&id) {
                Some(session) => offer(&self.counters, session, outbound.envelope),
                None => debug!(session_id = %id, "No session for targeted message"),
            },
        }
    }
}

/// Hand a message to a session without waiting; a full buffer drops it.
fn offer(counters: &Counters, session: &Session, envelope: ResponseEnvelope) {
    match session.try_send(envelope) {
        Ok(()) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(RealtimeError::BufferFull) => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(session_id = %session.id, "Send buffer full, message dropped");
        }
        Err(_) => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(session_id = %session.id, "Session closing, message dropped");
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Currently registered sessions.
    pub active_sessions: usize,
    /// Sessions registered since start.
    pub total_sessions: u64,
    /// Broadcast requests processed.
    pub broadcasts: u64,
    /// Messages handed to session buffers.
    pub delivered: u64,
    /// Messages dropped on full or closing sessions.
    pub dropped: u64,
}
