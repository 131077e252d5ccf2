//! Client session management.

use crate::error::RealtimeError;
use crate::services::RequestContext;
use edgelink_types::{ResponseEnvelope, DEFAULT_LANGUAGE};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Default number of messages buffered per session before pushes are dropped.
pub const DEFAULT_SEND_BUFFER: usize = 256;

/// Identifier of a session, derived from the peer address and user.
pub type SessionId = String;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier.
    pub sub: String,
    /// Display name, if the token carried one.
    #[serde(default)]
    pub name: Option<String>,
}

/// Derives the session id from the peer address and the authenticated user.
///
/// Two connections from the same address and user share an id; the most
/// recently registered one receives targeted messages.
pub fn derive_session_id(ip: IpAddr, user_id: Option<&str>) -> SessionId {
    match user_id {
        Some(user) if !user.is_empty() => format!("{}_{}", ip, user),
        _ => ip.to_string(),
    }
}

/// Per-connection metadata.
#[derive(Debug)]
pub struct SessionContext {
    /// Authenticated claims, if any.
    pub claims: Option<Claims>,
    /// Remote peer address.
    pub remote_addr: Option<SocketAddr>,
    /// When the session was opened (Unix millis).
    pub connected_at: u64,
    language: RwLock<String>,
}

impl SessionContext {
    /// Create a context with the default language.
    pub fn new(claims: Option<Claims>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            claims,
            remote_addr,
            connected_at: edgelink_types::now_millis(),
            language: RwLock::new(DEFAULT_LANGUAGE.to_string()),
        }
    }

    /// Set the initial language.
    pub fn with_language(self, language: impl Into<String>) -> Self {
        *self.language.write() = language.into();
        self
    }

    /// Authenticated user id.
    pub fn user_id(&self) -> Option<&str> {
        self.claims.as_ref().map(|c| c.sub.as_str())
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// A connected WebSocket client.
///
/// Everything addressed to the client goes through a bounded channel drained
/// by the session's write loop. The hub never blocks on it; direct replies
/// from handlers wait for room.
#[derive(Debug)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    serial: u64,
    sender: mpsc::Sender<ResponseEnvelope>,
    context: SessionContext,
    closed: CancellationToken,
}

/// Receiving half of a session's outbound channel.
pub type SessionReceiver = mpsc::Receiver<ResponseEnvelope>;

impl Session {
    /// Create a session with a send buffer of `buffer` messages.
    pub fn new(
        id: impl Into<SessionId>,
        context: SessionContext,
        buffer: usize,
    ) -> (Arc<Self>, SessionReceiver) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let session = Arc::new(Self {
            id: id.into(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            sender,
            context,
            closed: CancellationToken::new(),
        });
        (session, receiver)
    }

    /// Process-unique serial; distinguishes sessions sharing an id.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Connection metadata.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Current display language.
    pub fn language(&self) -> String {
        self.context.language.read().clone()
    }

    /// Change the display language for subsequent messages.
    pub fn set_language(&self, language: impl Into<String>) {
        *self.context.language.write() = language.into();
    }

    /// Queue a message, waiting for room in the buffer.
    pub async fn send(&self, envelope: ResponseEnvelope) -> Result<(), RealtimeError> {
        if self.is_closed() {
            return Err(RealtimeError::ChannelClosed);
        }
        tokio::select! {
            res = self.sender.send(envelope) => res.map_err(|_| RealtimeError::ChannelClosed),
            _ = self.closed.cancelled() => Err(RealtimeError::ChannelClosed),
        }
    }

    /// Queue a message without waiting.
    pub fn try_send(&self, envelope: ResponseEnvelope) -> Result<(), RealtimeError> {
        self.sender.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(_) => RealtimeError::BufferFull,
            TrySendError::Closed(_) => RealtimeError::ChannelClosed,
        })
    }

    /// Mark the session closed; both loops wind down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Context handed to domain services for a single request.
    pub fn request_context(&self) -> RequestContext {
        RequestContext {
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: self.id.clone(),
            session_serial: self.serial,
            claims: self.context.claims.clone(),
            language: self.language(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(buffer: usize) -> (Arc<Session>, SessionReceiver) {
        Session::new("10.0.0.1", SessionContext::default(), buffer)
    }

    #[test]
    fn test_derive_session_id() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(derive_session_id(ip, None), "10.0.0.1");
        assert_eq!(derive_session_id(ip, Some("")), "10.0.0.1");
        assert_eq!(derive_session_id(ip, Some("alice")), "10.0.0.1_alice");
    }

    #[test]
    fn test_serials_are_unique() {
        let (a, _ra) = session(1);
        let (b, _rb) = session(1);
        assert_eq!(a.id, b.id);
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn test_try_send_reports_full_buffer() {
        let (session, mut rx) = session(1);
        session.try_send(ResponseEnvelope::ok(1u32, json!(1))).unwrap();
        assert!(matches!(
            session.try_send(ResponseEnvelope::ok(1u32, json!(2))),
            Err(RealtimeError::BufferFull)
        ));

        assert_eq!(rx.try_recv().unwrap().data.result(), &json!(1));
    }

    #[test]
    fn test_try_send_after_receiver_dropped() {
        let (session, rx) = session(4);
        drop(rx);
        assert!(matches!(
            session.try_send(ResponseEnvelope::ok(1u32, json!(null))),
            Err(RealtimeError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_fails_once_closed() {
        let (session, _rx) = session(1);
        session.try_send(ResponseEnvelope::ok(1u32, json!(1))).unwrap();

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.send(ResponseEnvelope::ok(1u32, json!(2))).await })
        };
        session.close();

        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(RealtimeError::ChannelClosed)));
        assert!(session.is_closed());
    }

    #[test]
    fn test_language_and_request_context() {
        let claims = Claims {
            sub: "alice".to_string(),
            name: None,
        };
        let ctx = SessionContext::new(Some(claims), None).with_language("zh");
        let (session, _rx) = Session::new("s", ctx, 4);

        assert_eq!(session.language(), "zh");
        session.set_language("en");

        let req = session.request_context();
        assert_eq!(req.language, "en");
        assert_eq!(req.session_id, "s");
        assert_eq!(req.session_serial, session.serial());
        assert_eq!(req.claims.unwrap().sub, "alice");
        assert!(!req.request_id.is_empty());
    }
}
