//! Server-initiated message handling: the receive loop driven by the Receiver activity, and the
//! three dispatchable handlers (status, sensoralert, statechange).

use std::time::Duration;

use serde_json::Value;

use crate::error::{HandlerFailure, ProtocolError, SessionError};
use crate::model::{self, Alert, AlertLevel, Manager, Node, Option_, Sensor};
use crate::protocol::{Message, PayloadType};
use crate::transport::BUFSIZE;

use super::handshake::best_effort_error;
use super::rts::respond_cts;
use super::{teardown_locked, ConnectionState, Session, SessionState};

/// Repeat the receive-dispatch cycle until the connection ends. Invoked once per reconnect epoch
/// by the Receiver task; each iteration acquires exclusivity for one recv plus (on a server RTS)
/// one full dispatch.
pub(super) async fn run_receive_loop(session: &Session) -> Result<(), SessionError> {
    loop {
        let mut guard = session.inner.lock().await;
        if guard.state != SessionState::Connected {
            return Ok(());
        }

        let transport = guard.transport.as_mut().ok_or(SessionError::NotConnected)?;
        let recv = transport.recv(BUFSIZE, session.config.idle_recv_timeout).await;

        let raw = match recv {
            Ok(raw) => raw,
            Err(crate::error::RecvError::Timeout(_)) => {
                drop(guard);
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
            Err(crate::error::RecvError::Io(e)) => {
                teardown_locked(&mut guard).await;
                return Err(e.into());
            }
        };

        if raw.is_empty() {
            teardown_locked(&mut guard).await;
            return Err(ProtocolError::PeerClosed.into());
        }

        let incoming = match Message::decode(&raw) {
            Ok(m) => m,
            Err(e) => {
                teardown_locked(&mut guard).await;
                return Err(e.into());
            }
        };

        if incoming.is_error() {
            teardown_locked(&mut guard).await;
            return Err(ProtocolError::PeerError(
                incoming.error_text().unwrap_or_default().to_string(),
            )
            .into());
        }

        let rts_id = match incoming.expect_payload_type(PayloadType::Rts) {
            Ok(payload) => payload.get("id").and_then(Value::as_u64).map(|id| id as u32),
            Err(_) => None,
        };
        let rts_id = match rts_id {
            Some(id) => id,
            None => {
                best_effort_error(&mut guard, &incoming.label, "unknown command/message type").await;
                teardown_locked(&mut guard).await;
                return Err(ProtocolError::UnexpectedPayloadType {
                    expected: "rts",
                    got: incoming.payload_type().unwrap_or("?").to_string(),
                }
                .into());
            }
        };

        if let Err(e) = respond_cts(&mut guard, &incoming.label, rts_id).await {
            teardown_locked(&mut guard).await;
            return Err(e);
        }

        let transport = match guard.transport.as_mut() {
            Some(t) => t,
            None => return Err(SessionError::NotConnected),
        };
        let followup_raw = match transport.recv(BUFSIZE, session.config.response_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                teardown_locked(&mut guard).await;
                return Err(e.into());
            }
        };
        if followup_raw.is_empty() {
            teardown_locked(&mut guard).await;
            return Err(ProtocolError::PeerClosed.into());
        }
        let followup = match Message::decode(&followup_raw) {
            Ok(m) => m,
            Err(e) => {
                teardown_locked(&mut guard).await;
                return Err(e.into());
            }
        };
        if followup.is_error() || followup.expect_payload_type(PayloadType::Request).is_err() {
            best_effort_error(&mut guard, &followup.label, "unknown command/message type").await;
            teardown_locked(&mut guard).await;
            return Err(ProtocolError::UnknownMessage.into());
        }

        let dispatch_result = match followup.label.to_ascii_lowercase().as_str() {
            "sensoralert" => handle_sensor_alert(&mut guard, session, &followup).await,
            "status" => handle_status(&mut guard, session, &followup).await,
            "statechange" => handle_state_change(&mut guard, session, &followup).await,
            _ => {
                best_effort_error(&mut guard, &followup.label, "unknown command/message type").await;
                Err(ProtocolError::UnknownMessage.into())
            }
        };

        match dispatch_result {
            Ok(()) => {
                guard.last_recv = std::time::Instant::now();
                drop(guard);
                session.event_handler.handle_event().await;
            }
            Err(err) => {
                teardown_locked(&mut guard).await;
                return Err(err);
            }
        }
    }
}

/// Validate and deliver a `status` push: six sequences (options, nodes, sensors, managers,
/// alerts, alertLevels), replying `status response ok` on success. Also used for the handshake's
/// initial status push.
pub(super) async fn handle_status(
    guard: &mut ConnectionState,
    session: &Session,
    incoming: &Message,
) -> Result<(), SessionError> {
    let payload = match incoming.payload() {
        Ok(p) => p,
        Err(e) => return Err(e.into()),
    };

    let result = parse_status(payload);
    let status = match result {
        Ok(status) => status,
        Err(kind) => {
            best_effort_error(guard, "status", &format!("received {} invalid", kind)).await;
            return Err(ProtocolError::InvalidPayload(kind).into());
        }
    };

    let server_time = incoming.stamp.seconds();
    let ok = session
        .event_handler
        .received_status_update(
            server_time,
            status.options,
            status.nodes,
            status.sensors,
            status.managers,
            status.alerts,
            status.alert_levels,
        )
        .await;
    if !ok {
        best_effort_error(guard, "status", "handling received data failed").await;
        return Err(HandlerFailure.into());
    }

    reply_ok(guard, "status").await
}

async fn handle_sensor_alert(
    guard: &mut ConnectionState,
    session: &Session,
    incoming: &Message,
) -> Result<(), SessionError> {
    let payload = incoming.payload()?;
    let alert_levels = match payload.get("alertLevels") {
        Some(v) => match model::validate_alert_levels(v) {
            Ok(levels) => levels,
            Err(e) => {
                tracing::warn!(error = %e, "malformed sensoralert alertLevels");
                best_effort_error(guard, "sensoralert", "received sensoralert invalid").await;
                return Err(ProtocolError::InvalidPayload("sensoralert").into());
            }
        },
        None => {
            best_effort_error(guard, "sensoralert", "received sensoralert invalid").await;
            return Err(ProtocolError::MissingField("alertLevels").into());
        }
    };

    let mut alert: crate::model::SensorAlert = match serde_json::from_value(payload.clone()) {
        Ok(a) => a,
        Err(_) => {
            best_effort_error(guard, "sensoralert", "received sensoralert invalid").await;
            return Err(ProtocolError::InvalidPayload("sensoralert").into());
        }
    };
    alert.alert_levels = alert_levels;

    // Reply before delivering to the handler: only validation failures get a best-effort error
    // reply, not handler-side failures.
    reply_ok(guard, "sensoralert").await?;

    let server_time = incoming.stamp.seconds();
    let ok = session
        .event_handler
        .received_sensor_alert(server_time, alert)
        .await;
    if !ok {
        return Err(HandlerFailure.into());
    }
    Ok(())
}

async fn handle_state_change(
    guard: &mut ConnectionState,
    session: &Session,
    incoming: &Message,
) -> Result<(), SessionError> {
    let payload = incoming.payload()?;
    let sensor_id = payload.get("sensorId").and_then(Value::as_i64);
    let state = payload.get("state").and_then(Value::as_i64);
    let (sensor_id, state) = match (sensor_id, state) {
        (Some(s), Some(st)) => (s, st),
        _ => {
            best_effort_error(guard, "statechange", "received statechange invalid").await;
            return Err(ProtocolError::InvalidPayload("statechange").into());
        }
    };

    reply_ok(guard, "statechange").await?;

    let server_time = incoming.stamp.seconds();
    let ok = session
        .event_handler
        .received_state_change(server_time, sensor_id, state)
        .await;
    if !ok {
        return Err(HandlerFailure.into());
    }
    Ok(())
}

async fn reply_ok(guard: &mut ConnectionState, label: &str) -> Result<(), SessionError> {
    let transport = guard.transport.as_mut().ok_or(SessionError::NotConnected)?;
    let mut fields = serde_json::Map::new();
    fields.insert("result".to_string(), Value::String("ok".to_string()));
    let response = Message::client_payload(super::rts::now_seconds(), label, PayloadType::Response, fields);
    transport.send(&response.encode()).await?;
    Ok(())
}

struct ParsedStatus {
    options: Vec<Option_>,
    nodes: Vec<Node>,
    sensors: Vec<Sensor>,
    managers: Vec<Manager>,
    alerts: Vec<Alert>,
    alert_levels: Vec<AlertLevel>,
}

fn parse_status(payload: &Value) -> Result<ParsedStatus, &'static str> {
    let options = parse_plain_array::<Option_>(payload, "options")?;
    let nodes = parse_plain_array::<Node>(payload, "nodes")?;
    let managers = parse_plain_array::<Manager>(payload, "managers")?;
    let alert_levels = parse_plain_array::<AlertLevel>(payload, "alertLevels")?;
    let sensors = parse_nested_alert_levels_array::<Sensor>(payload, "sensors")?;
    let alerts = parse_nested_alert_levels_array::<Alert>(payload, "alerts")?;

    Ok(ParsedStatus {
        options,
        nodes,
        sensors,
        managers,
        alerts,
        alert_levels,
    })
}

fn parse_plain_array<T: serde::de::DeserializeOwned>(
    payload: &Value,
    key: &'static str,
) -> Result<Vec<T>, &'static str> {
    let items = payload.get(key).and_then(Value::as_array).ok_or(key)?;
    items
        .iter()
        .map(|v| serde_json::from_value(v.clone()).map_err(|_| key))
        .collect()
}

/// Parse an array of entities that each carry a nested `alertLevels: [int]` field, validating
/// that nested field with the reusable alertLevels validator before deserializing the rest of
/// the entity (so a malformed nested `alertLevels` surfaces the precise underlying reason in the
/// logs even though the wire reply is always the generic `"received <kind> invalid"`).
fn parse_nested_alert_levels_array<T: serde::de::DeserializeOwned>(
    payload: &Value,
    key: &'static str,
) -> Result<Vec<T>, &'static str> {
    let items = payload.get(key).and_then(Value::as_array).ok_or(key)?;
    items
        .iter()
        .map(|item| {
            let nested = item.get("alertLevels").ok_or(key)?;
            model::validate_alert_levels(nested).map_err(|e| {
                tracing::warn!(kind = key, error = %e, "malformed nested alertLevels");
                key
            })?;
            serde_json::from_value(item.clone()).map_err(|_| key)
        })
        .collect()
}
