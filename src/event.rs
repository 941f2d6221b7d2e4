//! The external collaborator capabilities the session delivers parsed state to: an event handler
//! that consumes decoded world-state updates, and an optional notifier the watchdog uses to
//! escalate repeated reconnect failures. Both are out of scope for this crate's own logic; it
//! consumes them only at their interface.

use async_trait::async_trait;

use crate::model::{Alert, AlertLevel, Manager, Node, Option_, Sensor, SensorAlert};

/// Consumes decoded, validated payloads and lifecycle signals. A `false` return from any of the
/// three data-delivery methods is treated as handler failure and terminates the session.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn received_status_update(
        &self,
        server_time: i64,
        options: Vec<Option_>,
        nodes: Vec<Node>,
        sensors: Vec<Sensor>,
        managers: Vec<Manager>,
        alerts: Vec<Alert>,
        alert_levels: Vec<AlertLevel>,
    ) -> bool;

    async fn received_sensor_alert(&self, server_time: i64, sensor_alert: SensorAlert) -> bool;

    async fn received_state_change(&self, server_time: i64, sensor_id: i64, state: i64) -> bool;

    /// A lifecycle-relevant event occurred: connection established, connection closed, or any
    /// message successfully handled.
    async fn handle_event(&self);
}

/// The watchdog's outbound alerting capability, invoked after repeated reconnect failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_communication_alert(&self, retry_count: u32);
    async fn send_communication_alert_clear(&self);
}

/// A log-only event handler and notifier, wired by the demonstration binary in place of a real
/// higher-level consumer (out of scope for this crate).
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn received_status_update(
        &self,
        server_time: i64,
        options: Vec<Option_>,
        nodes: Vec<Node>,
        sensors: Vec<Sensor>,
        managers: Vec<Manager>,
        alerts: Vec<Alert>,
        alert_levels: Vec<AlertLevel>,
    ) -> bool {
        tracing::info!(
            server_time,
            options = options.len(),
            nodes = nodes.len(),
            sensors = sensors.len(),
            managers = managers.len(),
            alerts = alerts.len(),
            alert_levels = alert_levels.len(),
            "received status update"
        );
        true
    }

    async fn received_sensor_alert(&self, server_time: i64, sensor_alert: SensorAlert) -> bool {
        tracing::info!(server_time, ?sensor_alert, "received sensor alert");
        true
    }

    async fn received_state_change(&self, server_time: i64, sensor_id: i64, state: i64) -> bool {
        tracing::info!(server_time, sensor_id, state, "received state change");
        true
    }

    async fn handle_event(&self) {
        tracing::debug!("lifecycle event");
    }
}

pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_communication_alert(&self, retry_count: u32) {
        tracing::warn!(retry_count, "communication alert: repeated reconnect failures");
    }

    async fn send_communication_alert_clear(&self) {
        tracing::info!("communication alert cleared");
    }
}
