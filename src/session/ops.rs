//! Client-initiated operations: `sendOption`, `sendKeepalive`, `reconnect`, `close`. Each follows
//! the canonical RTS → CTS → request → response → validate pattern via [`rts::transact`].

use serde_json::{json, Map, Value};

use crate::error::{ProtocolError, SessionError};
use crate::protocol::PayloadType;

use super::handshake::initialize;
use super::rts::transact;
use super::{teardown_locked, Session};

pub(super) async fn send_option(
    session: &Session,
    option_type: &str,
    option_value: f64,
    option_delay: i64,
) -> Result<(), SessionError> {
    let mut fields = Map::new();
    fields.insert("optionType".to_string(), Value::String(option_type.to_string()));
    fields.insert("value".to_string(), json!(option_value));
    fields.insert("timeDelay".to_string(), json!(option_delay));

    let response = transact(session, "option", fields).await?;
    if !response.label_is("option") {
        return Err(ProtocolError::UnexpectedLabel {
            expected: "option".to_string(),
            got: response.label.clone(),
        }
        .into());
    }
    response.expect_payload_type(PayloadType::Response)?;
    response.expect_result_ok()?;
    Ok(())
}

pub(super) async fn send_keepalive(session: &Session) -> Result<(), SessionError> {
    let response = transact(session, "ping", Map::new()).await?;
    if !response.label_is("ping") {
        return Err(ProtocolError::UnexpectedLabel {
            expected: "ping".to_string(),
            got: response.label.clone(),
        }
        .into());
    }
    response.expect_payload_type(PayloadType::Response)?;
    response.expect_result_ok()?;

    let mut guard = session.inner.lock().await;
    guard.last_recv = std::time::Instant::now();
    Ok(())
}

pub(super) async fn reconnect(session: &Session) -> Result<(), SessionError> {
    {
        let mut guard = session.inner.lock().await;
        teardown_locked(&mut guard).await;
    }
    session.event_handler.handle_event().await;
    initialize(session).await
}

pub(super) async fn close(session: &Session) {
    let mut guard = session.inner.lock().await;
    teardown_locked(&mut guard).await;
    drop(guard);
    session.event_handler.handle_event().await;
}
