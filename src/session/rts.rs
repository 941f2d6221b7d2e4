//! Request-To-Send / Clear-To-Send transaction initiation: the two-way handshake that arbitrates
//! the single half-duplex stream before every client-initiated exchange.

use std::time::Duration;

use rand::Rng;
use serde_json::{Map, Value};

use crate::error::{ProtocolError, SessionError};
use crate::protocol::{rts_cts_fields, Message, PayloadType};
use crate::transport::BUFSIZE;

use super::{teardown_locked, ConnectionState, Session};

pub(super) fn now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A single RTS/CTS round either matched and produced the server's response, needs to be
/// retried with a fresh txid after backing off, or failed fatally.
enum RoundOutcome {
    Retry,
    Fatal(SessionError),
}

/// Run one full client-initiated transaction: generate a fresh txid, RTS, await matching CTS,
/// send `request_fields` as the `request` payload, and return the server's response. Retries
/// internally (fresh txid, released lock, 0–1 s backoff) on CTS mismatch, an error reply, or a
/// receive timeout. Any other transport/protocol failure is fatal and marks the session
/// disconnected before returning.
pub(super) async fn transact(
    session: &Session,
    label: &str,
    request_fields: Map<String, Value>,
) -> Result<Message, SessionError> {
    loop {
        let mut guard = session.inner.lock().await;

        if guard.tx_initiating {
            drop(guard);
            tokio::time::sleep(Duration::from_millis(500)).await;
            continue;
        }
        if guard.transport.is_none() {
            return Err(SessionError::NotConnected);
        }

        guard.tx_initiating = true;
        let txid: u32 = rand::thread_rng().gen();
        let result = run_round(&mut guard, label, txid, &request_fields, session.config.response_timeout).await;
        guard.tx_initiating = false;

        match result {
            Ok(response) => return Ok(response),
            Err(RoundOutcome::Retry) => {
                drop(guard);
                let backoff_ms = rand::thread_rng().gen_range(0..1000);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                continue;
            }
            Err(RoundOutcome::Fatal(err)) => {
                teardown_locked(&mut guard).await;
                return Err(err);
            }
        }
    }
}

async fn run_round(
    guard: &mut ConnectionState,
    label: &str,
    txid: u32,
    request_fields: &Map<String, Value>,
    timeout: Duration,
) -> Result<Message, RoundOutcome> {
    let transport = guard
        .transport
        .as_mut()
        .ok_or(RoundOutcome::Fatal(SessionError::NotConnected))?;

    let rts = Message::client_payload(now_seconds(), label, PayloadType::Rts, rts_cts_fields(txid));
    transport
        .send(&rts.encode())
        .await
        .map_err(|e| RoundOutcome::Fatal(e.into()))?;

    let raw = match transport.recv(BUFSIZE, timeout).await {
        Ok(bytes) => bytes,
        Err(_timeout_or_io) => return Err(RoundOutcome::Retry),
    };
    if raw.is_empty() {
        return Err(RoundOutcome::Fatal(ProtocolError::PeerClosed.into()));
    }

    let cts = match Message::decode(&raw) {
        Ok(m) => m,
        Err(_) => return Err(RoundOutcome::Retry),
    };

    let id_matches = cts
        .payload()
        .ok()
        .and_then(|p| p.get("id"))
        .and_then(Value::as_u64)
        .map(|id| id as u32 == txid)
        .unwrap_or(false);

    let type_matches = matches!(cts.payload_type(), Ok(t) if t == PayloadType::Cts.as_str());
    if cts.is_error() || !cts.label_is(label) || !type_matches || !id_matches {
        return Err(RoundOutcome::Retry);
    }

    // Matched: send the actual request within the same exclusivity hold.
    let request = Message::client_payload(now_seconds(), label, PayloadType::Request, request_fields.clone());
    let transport = guard
        .transport
        .as_mut()
        .ok_or(RoundOutcome::Fatal(SessionError::NotConnected))?;
    transport
        .send(&request.encode())
        .await
        .map_err(|e| RoundOutcome::Fatal(e.into()))?;

    let response_raw = transport
        .recv(BUFSIZE, timeout)
        .await
        .map_err(|e| RoundOutcome::Fatal(e.into()))?;
    if response_raw.is_empty() {
        return Err(RoundOutcome::Fatal(ProtocolError::PeerClosed.into()));
    }
    let response = Message::decode(&response_raw).map_err(|e| RoundOutcome::Fatal(e.into()))?;
    if response.is_error() {
        let text = response.error_text().unwrap_or_default().to_string();
        return Err(RoundOutcome::Fatal(ProtocolError::PeerError(text).into()));
    }
    Ok(response)
}

/// Respond to a server-initiated RTS: echo the id as a CTS within the same exclusivity hold. The
/// caller already holds the lock and has already read the RTS message.
pub(super) async fn respond_cts(
    guard: &mut ConnectionState,
    label: &str,
    id: u32,
) -> Result<(), SessionError> {
    let transport = guard.transport.as_mut().ok_or(SessionError::NotConnected)?;
    let cts = Message::client_payload(now_seconds(), label, PayloadType::Cts, rts_cts_fields(id));
    transport.send(&cts.encode()).await.map_err(SessionError::from)
}
