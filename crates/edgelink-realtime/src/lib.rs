//! # Edgelink Real-time
//!
//! WebSocket side of the Edgelink gateway: the fan-out hub, per-connection
//! session loops and the command dispatch table.
//!
//! ## Features
//!
//! - **Realtime Hub**: one control loop owns every live session and fans
//!   messages out without ever blocking on a slow client
//! - **Client Sessions**: bounded outbound buffers, ping/pong liveness and
//!   per-session display language
//! - **Command Dispatch**: a closed table from command code to handler,
//!   checked for completeness at startup
//! - **Translation**: error and success text rendered in the session's
//!   language
//!
//! ## Example
//!
//! ```rust
//! use edgelink_realtime::{RealtimeHub, Session, SessionContext};
//! use edgelink_types::ResponseEnvelope;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (hub, _control) = RealtimeHub::spawn();
//!
//! let (session, mut outbound) = Session::new("10.0.0.7", SessionContext::default(), 16);
//! hub.register(session);
//!
//! hub.broadcast(ResponseEnvelope::ok(20002u32, serde_json::json!({"deviceId": "d1"})))
//!     .unwrap();
//! let push = outbound.recv().await.unwrap();
//! assert_eq!(push.code, 20002);
//! # }
//! ```
//!
//! ## WebSocket Protocol
//!
//! ```json
//! // client -> gateway
//! {"code": 10002, "data": {"id": "modbus-1", "runStatus": "running"}}
//!
//! // gateway -> client (reply)
//! {"code": 10002, "data": {"success": true, "errorCode": 0, "errorMsg": "",
//!                          "successMsg": "Driver instance Modbus 1 is now running",
//!                          "result": {...}}}
//!
//! // gateway -> client (push)
//! {"code": 20001, "data": {"success": true, "errorCode": 0, ..., "result": {...}}}
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  handles ──register/unregister/broadcast──► HubLoop ──try_send──► Session buffers
//!                                                                        │
//!  socket ──► read loop ──► Dispatcher ──► handler ──reply──► Session ───┤
//!                                                                        ▼
//!                                                           write loop ──► socket
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handlers;
pub mod hub;
pub mod i18n;
pub mod services;
pub mod session;

// Re-export main types
pub use connection::{serve_connection, CloseReason, ConnectionDeps, Frame, SessionConfig};
pub use dispatch::{AfterReply, CommandHandler, Dispatcher, DispatcherBuilder, HandlerDeps};
pub use error::RealtimeError;
pub use event::{event_channel, spawn_event_pump, EventEmitter, EventKind, EventStream, RealtimeEvent};
pub use hub::{Delivery, HubLoop, HubStats, RealtimeHub};
pub use i18n::{Catalog, Translator};
pub use services::{
    DriverApp, DriverInstance, DriverLibrary, DriverServiceApp, LogTailApp, RequestContext,
    ServiceRegistry,
};
pub use session::{derive_session_id, Claims, Session, SessionContext, SessionId, SessionReceiver};
