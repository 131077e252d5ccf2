//! WebSocket endpoint.
//!
//! `GET /ws` upgrades to a session. Clients send command envelopes
//! (`{"code": 10001, "data": {...}}`) and receive exactly one response per
//! recognized command, plus server pushes (`code` >= 20000).
//!
//! Upgrade parameters:
//! - `Authorization: Bearer <jwt>` or `?token=<jwt>`: identifies the user
//! - `?lang=zh` or `Accept-Language`: initial display language

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use edgelink_realtime::{
    derive_session_id, serve_connection, Claims, Frame, Session, SessionContext, SessionId,
    Translator,
};
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::api::AppState;
use crate::auth::{bearer_token, AuthError};

/// Create the WebSocket routes.
pub fn realtime_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// Query parameters accepted on upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
    pub lang: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, AuthError> {
    let claims = authenticate(&state, &headers, params.token.as_deref())?;
    let language = negotiate_language(
        state.translator.as_ref(),
        params.lang.as_deref(),
        &headers,
        &state.default_language,
    );

    let id = derive_session_id(addr.ip(), claims.as_ref().map(|c| c.sub.as_str()));
    let context = SessionContext::new(claims, Some(addr)).with_language(language);
    debug!(session_id = %id, remote = %addr, "Upgrading connection");

    // Oversized messages are refused while reading, before they are buffered.
    let limit = state.session.max_frame_size;
    Ok(ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, id, context, state))
        .into_response())
}

/// Resolve the caller's identity.
///
/// Without a configured secret, tokens are ignored and every caller is
/// anonymous.
pub(crate) fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Option<Claims>, AuthError> {
    let token = bearer_token(headers).or(query_token.filter(|t| !t.is_empty()));
    match (&state.verifier, token) {
        (Some(verifier), Some(token)) => verifier.verify(token).map(Some),
        (_, None) if state.auth_required => Err(AuthError::Missing),
        _ => Ok(None),
    }
}

/// Pick the session language: query parameter, then `Accept-Language`,
/// then the gateway default. Unsupported candidates are skipped.
fn negotiate_language(
    translator: &dyn Translator,
    requested: Option<&str>,
    headers: &HeaderMap,
    default_language: &str,
) -> String {
    let accepted = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    requested
        .into_iter()
        .chain(
            accepted
                .split(',')
                .map(|entry| entry.split(';').next().unwrap_or_default().trim()),
        )
        .filter(|lang| !lang.is_empty() && *lang != "*")
        .find(|lang| translator.supports(lang))
        .unwrap_or(default_language)
        .to_string()
}

async fn handle_socket(socket: WebSocket, id: SessionId, context: SessionContext, state: AppState) {
    let config = state.session.clone();
    let (session, receiver) = Session::new(id, context, config.send_buffer);
    let session_id = session.id.clone();

    let (sink, stream) = socket.split();
    let stream = stream.map(|message| message.map(into_frame));
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_message(frame))));

    let reason = serve_connection(session, receiver, stream, sink, state.connection_deps(), config).await;
    info!(session_id = %session_id, reason = %reason, "WebSocket closed");
}

fn into_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(_) => Frame::Close,
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use edgelink_realtime::Catalog;

    fn headers(accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(accept));
        headers
    }

    #[test]
    fn test_language_query_wins() {
        let catalog = Catalog::builtin();
        let lang = negotiate_language(&catalog, Some("zh"), &headers("en-US"), "en");
        assert_eq!(lang, "zh");
    }

    #[test]
    fn test_language_from_accept_header() {
        let catalog = Catalog::builtin();
        let lang = negotiate_language(&catalog, Some("fr"), &headers("de;q=0.9, zh-CN;q=0.8, en;q=0.5"), "en");
        assert_eq!(lang, "zh-CN");
    }

    #[test]
    fn test_language_falls_back_to_default() {
        let catalog = Catalog::builtin();
        let lang = negotiate_language(&catalog, None, &HeaderMap::new(), "en");
        assert_eq!(lang, "en");

        let lang = negotiate_language(&catalog, None, &headers("*"), "zh");
        assert_eq!(lang, "zh");
    }

    #[test]
    fn test_frame_conversion() {
        assert_eq!(
            into_frame(into_message(Frame::Text("hi".to_string()))),
            Frame::Text("hi".to_string())
        );
        assert_eq!(into_frame(Message::Close(None)), Frame::Close);
    }
}
