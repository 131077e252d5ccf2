//! Per-connection read and write loops.
//!
//! A connection is served by two tasks. The read loop decodes inbound
//! commands and hands them to the dispatcher; it owns the liveness deadline,
//! which only a pong extends. The write loop drains the session's outbound
//! channel, renders error text in the session's current language and sends
//! a ping every `ping_period`. Either side ending closes the session.
//!
//! The loops work on [`Frame`]s so any WebSocket implementation can be
//! plugged in by mapping its message type.

use crate::dispatch::Dispatcher;
use crate::hub::RealtimeHub;
use crate::i18n::Translator;
use crate::session::{Session, SessionReceiver};
use bytes::Bytes;
use edgelink_types::{CommandEnvelope, ResponseEnvelope};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::RealtimeError;

/// A WebSocket frame, independent of the server library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

/// Timing and size limits for one connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between pings sent to the client.
    pub ping_period: Duration,
    /// How long the client may stay silent before the session is closed.
    pub pong_wait: Duration,
    /// Deadline for a single outbound write.
    pub write_wait: Duration,
    /// Largest accepted inbound frame, in bytes.
    pub max_frame_size: usize,
    /// Outbound buffer per session.
    pub send_buffer: usize,
    /// Close after this many consecutive undecodable frames. Unlimited if unset.
    pub max_decode_failures: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_frame_size: 64 * 1024,
            send_buffer: crate::session::DEFAULT_SEND_BUFFER,
            max_decode_failures: None,
        }
    }
}

/// Shared services every connection needs.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub hub: RealtimeHub,
    pub dispatcher: Arc<Dispatcher>,
    pub translator: Arc<dyn Translator>,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame.
    ClientClosed,
    /// The inbound stream ended.
    StreamEnded,
    /// Reading failed.
    Transport(String),
    /// No pong arrived within the liveness deadline.
    DeadlineExpired,
    /// An inbound frame exceeded the size limit.
    FrameTooLarge(usize),
    /// Too many consecutive undecodable frames.
    DecodeFailures(u32),
    /// The session was closed from the write side.
    WriterStopped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::StreamEnded => write!(f, "stream ended"),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
            CloseReason::DeadlineExpired => write!(f, "liveness deadline expired"),
            CloseReason::FrameTooLarge(size) => write!(f, "frame of {} bytes too large", size),
            CloseReason::DecodeFailures(n) => write!(f, "{} undecodable frames", n),
            CloseReason::WriterStopped => write!(f, "writer stopped"),
        }
    }
}

/// Serve a session until either side of the connection ends.
///
/// Registers the session with the hub, runs the write loop on its own task
/// and the read loop on the caller's. When reading stops the session is
/// unregistered first and closed second.
pub async fn serve_connection<St, E, Si>(
    session: Arc<Session>,
    receiver: SessionReceiver,
    stream: St,
    sink: Si,
    deps: ConnectionDeps,
    config: SessionConfig,
) -> CloseReason
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
    Si: Sink<Frame> + Unpin + Send + 'static,
    Si::Error: fmt::Display,
{
    info!(session_id = %session.id, serial = session.serial(), "Session opened");
    deps.hub.register(session.clone());

    let writer = tokio::spawn(write_loop(
        session.clone(),
        receiver,
        sink,
        deps.translator.clone(),
        config.clone(),
    ));

    let reason = read_loop(&session, stream, &deps.dispatcher, &config).await;

    deps.hub.unregister(session.clone());
    session.close();
    if let Err(e) = writer.await {
        error!(session_id = %session.id, error = %e, "Write loop panicked");
    }

    info!(session_id = %session.id, reason = %reason, "Session closed");
    reason
}

async fn read_loop<St, E>(
    session: &Arc<Session>,
    mut stream: St,
    dispatcher: &Dispatcher,
    config: &SessionConfig,
) -> CloseReason
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    let deadline = tokio::time::sleep(config.pong_wait);
    tokio::pin!(deadline);
    let mut failures = 0u32;

    loop {
        let frame = tokio::select! {
            _ = session.closed() => return CloseReason::WriterStopped,
            _ = &mut deadline => return CloseReason::DeadlineExpired,
            frame = stream.next() => frame,
        };

        let text = match frame {
            None => return CloseReason::StreamEnded,
            Some(Err(e)) => return CloseReason::Transport(e.to_string()),
            Some(Ok(Frame::Close)) => return CloseReason::ClientClosed,
            Some(Ok(Frame::Pong(_))) => {
                deadline.as_mut().reset(Instant::now() + config.pong_wait);
                continue;
            }
            Some(Ok(Frame::Ping(_))) => continue,
            Some(Ok(Frame::Text(text))) => {
                if text.len() > config.max_frame_size {
                    return CloseReason::FrameTooLarge(text.len());
                }
                Ok(text)
            }
            Some(Ok(Frame::Binary(data))) => {
                if data.len() > config.max_frame_size {
                    return CloseReason::FrameTooLarge(data.len());
                }
                String::from_utf8(data.to_vec())
                    .map_err(|e| RealtimeError::Decode(e.to_string()))
            }
        };

        match text.and_then(|t| decode_command(&t)) {
            Ok(envelope) => {
                failures = 0;
                dispatcher.dispatch(session.clone(), envelope);
            }
            Err(e) => {
                failures += 1;
                warn!(session_id = %session.id, error = %e, "Skipping undecodable frame");
                if config.max_decode_failures.is_some_and(|max| failures >= max) {
                    return CloseReason::DecodeFailures(failures);
                }
            }
        }
    }
}

/// Decode a command envelope from a text frame.
pub fn decode_command(text: &str) -> Result<CommandEnvelope, RealtimeError> {
    serde_json::from_str(text).map_err(|e| RealtimeError::Decode(e.to_string()))
}

/// Serialize an outbound message, filling in the error text for failures.
pub fn render(
    mut envelope: ResponseEnvelope,
    language: &str,
    translator: &dyn Translator,
) -> Result<String, RealtimeError> {
    if !envelope.data.success() && envelope.data.error_msg().is_empty() {
        let text = translator.translate_error_code(
            language,
            envelope.data.error_code(),
            envelope.data.error_params(),
        );
        envelope.data.set_error_msg(text);
    }
    Ok(serde_json::to_string(&envelope)?)
}

async fn write_loop<Si>(
    session: Arc<Session>,
    mut receiver: SessionReceiver,
    mut sink: Si,
    translator: Arc<dyn Translator>,
    config: SessionConfig,
) where
    Si: Sink<Frame> + Unpin,
    Si::Error: fmt::Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            envelope = receiver.recv() => {
                let Some(envelope) = envelope else {
                    let _ = send_frame(&mut sink, Frame::Close, config.write_wait).await;
                    break;
                };
                let text = match render(envelope, &session.language(), translator.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(session_id = %session.id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = send_frame(&mut sink, Frame::Text(text), config.write_wait).await {
                    debug!(session_id = %session.id, error = %e, "Write failed");
                    break;
                }
            }
            _ = session.closed() => {
                let _ = send_frame(&mut sink, Frame::Close, config.write_wait).await;
                break;
            }
            _ = ping.tick() => {
                if let Err(e) = send_frame(&mut sink, Frame::Ping(Bytes::new()), config.write_wait).await {
                    debug!(session_id = %session.id, error = %e, "Ping failed");
                    break;
                }
            }
        }
    }

    session.close();
    debug!(session_id = %session.id, "Write loop ended");
}

async fn send_frame<Si>(sink: &mut Si, frame: Frame, deadline: Duration) -> Result<(), String>
where
    Si: Sink<Frame> + Unpin,
    Si::Error: fmt::Display,
{
    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write deadline of {:?} exceeded", deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CommandHandler;
    use crate::i18n::Catalog;
    use crate::session::SessionContext;
    use async_trait::async_trait;
    use edgelink_types::{error_code, CommandCode, DomainError, WsResult};
    use futures::channel::mpsc;
    use futures::FutureExt;
    use serde_json::{json, Value};

    /// Fails `DeleteDriverInstance`, echoes everything else.
    struct Stub(CommandCode);

    #[async_trait]
    impl CommandHandler for Stub {
        fn code(&self) -> CommandCode {
            self.0
        }

        async fn handle(&self, _session: &Arc<Session>, payload: Value) -> WsResult {
            match self.0 {
                CommandCode::DeleteDriverInstance => {
                    WsResult::from_error(DomainError::not_found("Instance i9"))
                }
                _ => WsResult::ok(payload),
            }
        }
    }

    struct Harness {
        hub: RealtimeHub,
        session: Arc<Session>,
        client_tx: mpsc::UnboundedSender<Result<Frame, String>>,
        client_rx: mpsc::UnboundedReceiver<Frame>,
        served: tokio::task::JoinHandle<CloseReason>,
    }

    fn start(language: &str, config: SessionConfig) -> Harness {
        let (hub, _) = RealtimeHub::spawn();
        let dispatcher = CommandCode::ALL
            .into_iter()
            .fold(Dispatcher::builder(), |b, code| b.handler(Stub(code)))
            .build()
            .unwrap();
        let deps = ConnectionDeps {
            hub: hub.clone(),
            dispatcher: Arc::new(dispatcher),
            translator: Arc::new(Catalog::builtin()),
        };

        let context = SessionContext::default().with_language(language);
        let (session, receiver) = Session::new("10.0.0.1", context, config.send_buffer);
        let (client_tx, inbound) = mpsc::unbounded();
        let (outbound, client_rx) = mpsc::unbounded();
        let served = tokio::spawn(serve_connection(
            session.clone(),
            receiver,
            inbound,
            outbound,
            deps,
            config,
        ));

        Harness {
            hub,
            session,
            client_tx,
            client_rx,
            served,
        }
    }

    async fn next_text(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Value {
        loop {
            match rx.next().await.expect("connection closed") {
                Frame::Text(text) => return serde_json::from_str(&text).unwrap(),
                Frame::Ping(_) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    fn text(value: Value) -> Result<Frame, String> {
        Ok(Frame::Text(value.to_string()))
    }

    #[tokio::test]
    async fn test_command_reply() {
        let mut h = start("en", SessionConfig::default());
        h.client_tx
            .unbounded_send(text(json!({"code": 10003, "data": {"lang": "zh"}})))
            .unwrap();

        let reply = next_text(&mut h.client_rx).await;
        assert_eq!(reply["code"], 10003);
        assert_eq!(reply["data"]["success"], true);
        assert_eq!(reply["data"]["errorCode"], 0);
        assert_eq!(reply["data"]["result"]["lang"], "zh");
    }

    #[tokio::test]
    async fn test_error_text_uses_session_language() {
        let mut h = start("zh", SessionConfig::default());
        h.client_tx
            .unbounded_send(text(json!({"code": 10005, "data": {"id": "i9"}})))
            .unwrap();

        let reply = next_text(&mut h.client_rx).await;
        assert_eq!(reply["data"]["success"], false);
        assert_eq!(reply["data"]["errorCode"], error_code::RECORD_NOT_FOUND);
        assert_eq!(reply["data"]["errorMsg"], "Instance i9 不存在");
    }

    #[tokio::test]
    async fn test_bad_frames_skipped_and_session_stays_open() {
        let mut h = start("en", SessionConfig::default());
        h.client_tx
            .unbounded_send(Ok(Frame::Text("{not json".to_string())))
            .unwrap();
        h.client_tx
            .unbounded_send(text(json!({"code": 77777, "data": {}})))
            .unwrap();
        h.client_tx
            .unbounded_send(Ok(Frame::Binary(Bytes::from_static(b"{\"code\":10004,\"data\":{\"id\":\"i1\"}}"))))
            .unwrap();

        let reply = next_text(&mut h.client_rx).await;
        assert_eq!(reply["code"], 10004);
        assert!(!h.session.is_closed());
    }

    #[tokio::test]
    async fn test_hub_pushes_reach_client() {
        let mut h = start("en", SessionConfig::default());
        let hub = h.hub.clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.session_count() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        h.hub
            .broadcast(ResponseEnvelope::ok(20002u32, json!({"deviceId": "d1"})))
            .unwrap();
        let push = next_text(&mut h.client_rx).await;
        assert_eq!(push["code"], 20002);
    }

    #[tokio::test]
    async fn test_client_close_unregisters() {
        let h = start("en", SessionConfig::default());
        h.client_tx.unbounded_send(Ok(Frame::Close)).unwrap();

        let reason = h.served.await.unwrap();
        assert_eq!(reason, CloseReason::ClientClosed);
        assert!(h.session.is_closed());

        let hub = h.hub.clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.stats().total_sessions == 0 || hub.session_count() != 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_closes() {
        let config = SessionConfig {
            max_frame_size: 16,
            ..SessionConfig::default()
        };
        let h = start("en", config);
        h.client_tx
            .unbounded_send(Ok(Frame::Text("x".repeat(17))))
            .unwrap();
        assert_eq!(h.served.await.unwrap(), CloseReason::FrameTooLarge(17));
    }

    #[tokio::test]
    async fn test_decode_failure_limit() {
        let config = SessionConfig {
            max_decode_failures: Some(2),
            ..SessionConfig::default()
        };
        let h = start("en", config);
        h.client_tx.unbounded_send(Ok(Frame::Text("?".into()))).unwrap();
        h.client_tx.unbounded_send(Ok(Frame::Text("?".into()))).unwrap();
        assert_eq!(h.served.await.unwrap(), CloseReason::DecodeFailures(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_times_out() {
        let mut h = start("en", SessionConfig::default());

        let reason = h.served.await.unwrap();
        assert_eq!(reason, CloseReason::DeadlineExpired);

        // The writer pinged once before the deadline, then sent a close.
        let mut frames = Vec::new();
        while let Some(Some(frame)) = h.client_rx.next().now_or_never() {
            frames.push(frame);
        }
        assert_eq!(frames.first(), Some(&Frame::Ping(Bytes::new())));
        assert_eq!(frames.last(), Some(&Frame::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_extends_deadline() {
        let h = start("en", SessionConfig::default());

        tokio::time::sleep(Duration::from_secs(50)).await;
        h.client_tx.unbounded_send(Ok(Frame::Pong(Bytes::new()))).unwrap();
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(!h.session.is_closed());

        let started = Instant::now();
        assert_eq!(h.served.await.unwrap(), CloseReason::DeadlineExpired);
        assert!(started.elapsed() <= Duration::from_secs(10));
    }
}
