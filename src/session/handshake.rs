//! The four-step handshake: connect, version-check + authenticate, register, and receive the
//! initial status push.

use serde_json::{json, Value};

use crate::error::{AuthFailure, ProtocolError, SessionError, VersionMismatch};
use crate::protocol::{Message, PayloadType};
use crate::transport::{Transport, BUFSIZE};

use super::dispatch::handle_status;
use super::rts::{now_seconds, respond_cts};
use super::{teardown_locked, ConnectionState, Session, SessionState};

/// Run the full handshake under exclusivity from start to finish. Any failure along the way
/// closes the transport, leaves the session `Idle`, and returns the failure.
pub(super) async fn initialize(session: &Session) -> Result<(), SessionError> {
    let mut guard = session.inner.lock().await;
    guard.state = SessionState::Handshaking;

    match run(&mut guard, session).await {
        Ok(()) => {
            guard.state = SessionState::Connected;
            guard.last_recv = std::time::Instant::now();
            drop(guard);
            session.event_handler.handle_event().await;
            Ok(())
        }
        Err(err) => {
            teardown_locked(&mut guard).await;
            Err(err)
        }
    }
}

async fn run(guard: &mut ConnectionState, session: &Session) -> Result<(), SessionError> {
    let transport = Transport::connect(&session.config.host, session.config.port, &session.tls).await?;
    guard.transport = Some(transport);

    authenticate(guard, session).await?;
    register(guard, session).await?;
    initial_status(guard, session).await?;

    Ok(())
}

async fn authenticate(guard: &mut ConnectionState, session: &Session) -> Result<(), SessionError> {
    let config = &session.config;
    let request = Message::client_payload(
        now_seconds(),
        "authentication",
        PayloadType::Request,
        json_map(json!({
            "version": config.identity.version,
            "rev": config.identity.rev,
            "username": config.username,
            "password": config.password,
        })),
    );

    let response = send_and_recv(guard, &request, config.handshake_timeout).await?;

    if response.is_error() {
        return Err(ProtocolError::PeerError(
            response.error_text().unwrap_or_default().to_string(),
        )
        .into());
    }
    if !response.label_is("authentication") {
        return Err(ProtocolError::UnexpectedLabel {
            expected: "authentication".to_string(),
            got: response.label.clone(),
        }
        .into());
    }
    let payload = response.expect_payload_type(PayloadType::Response)?;

    let server_version = payload
        .get("version")
        .and_then(Value::as_f64)
        .ok_or(ProtocolError::MissingField("version"))?;
    if (config.identity.version * 10.0).floor() as i64 != (server_version * 10.0).floor() as i64 {
        best_effort_error(guard, "authentication", "version not compatible").await;
        return Err(VersionMismatch.into());
    }

    let ok = payload
        .get("result")
        .and_then(Value::as_str)
        .map(|r| r == "ok")
        .unwrap_or(false);
    if !ok {
        best_effort_error(guard, "authentication", "authentication failed").await;
        return Err(AuthFailure.into());
    }

    Ok(())
}

async fn register(guard: &mut ConnectionState, session: &Session) -> Result<(), SessionError> {
    let config = &session.config;
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let request = Message::client_payload(
        now_seconds(),
        "registration",
        PayloadType::Request,
        json_map(json!({
            "hostname": hostname,
            "nodeType": config.identity.node_type,
            "instance": config.identity.instance,
            "persistent": config.identity.persistent,
            "manager": { "description": config.identity.description },
        })),
    );

    let response = send_and_recv(guard, &request, config.handshake_timeout).await?;

    if response.is_error() || !response.label_is("registration") {
        best_effort_error(guard, "registration", "registration failed").await;
        return Err(ProtocolError::InvalidPayload("registration").into());
    }
    response.expect_payload_type(PayloadType::Response)?;
    if response.expect_result_ok().is_err() {
        best_effort_error(guard, "registration", "registration failed").await;
        return Err(ProtocolError::InvalidPayload("registration").into());
    }

    Ok(())
}

async fn initial_status(guard: &mut ConnectionState, session: &Session) -> Result<(), SessionError> {
    let config = &session.config;
    let transport = guard.transport.as_mut().ok_or(SessionError::NotConnected)?;
    let raw = transport.recv(BUFSIZE, config.handshake_timeout).await?;
    if raw.is_empty() {
        return Err(ProtocolError::PeerClosed.into());
    }
    let rts = Message::decode(&raw)?;
    let rts_id = rts
        .payload()?
        .get("id")
        .and_then(Value::as_u64)
        .ok_or(ProtocolError::MissingField("payload.id"))? as u32;
    rts.expect_payload_type(PayloadType::Rts)?;

    respond_cts(guard, &rts.label, rts_id).await?;

    let transport = guard.transport.as_mut().ok_or(SessionError::NotConnected)?;
    let raw = transport.recv(BUFSIZE, config.handshake_timeout).await?;
    if raw.is_empty() {
        return Err(ProtocolError::PeerClosed.into());
    }
    let status_request = Message::decode(&raw)?;
    if !status_request.label_is("status") {
        best_effort_error(guard, &status_request.label, "unknown command/message type").await;
        return Err(ProtocolError::UnknownMessage.into());
    }
    status_request.expect_payload_type(PayloadType::Request)?;

    handle_status(guard, session, &status_request).await
}

async fn send_and_recv(
    guard: &mut ConnectionState,
    request: &Message,
    timeout: std::time::Duration,
) -> Result<Message, SessionError> {
    let transport = guard.transport.as_mut().ok_or(SessionError::NotConnected)?;
    transport.send(&request.encode()).await?;
    let raw = transport.recv(BUFSIZE, timeout).await?;
    if raw.is_empty() {
        return Err(ProtocolError::PeerClosed.into());
    }
    Ok(Message::decode(&raw)?)
}

/// Send a best-effort error reply, echoing the given label. Failures are swallowed: a broken
/// transport cannot be relied on to deliver the explanation for its own breakage.
pub(super) async fn best_effort_error(guard: &mut ConnectionState, label: &str, text: &str) {
    if let Some(transport) = guard.transport.as_mut() {
        let msg = Message::client_error(now_seconds(), label, text);
        let _ = transport.send(&msg.encode()).await;
    }
}

fn json_map(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
