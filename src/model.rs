//! The replicated world-state entities: options, nodes, sensors, managers, alerts and alert
//! levels. These are owned by the external event handler; the session only parses and delivers
//! them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Option_ {
    #[serde(rename = "type")]
    pub option_type: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: i64,
    pub hostname: String,
    pub node_type: String,
    pub instance: String,
    pub connected: i64,
    pub version: f64,
    pub rev: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub node_id: i64,
    pub sensor_id: i64,
    pub remote_sensor_id: i64,
    pub alert_delay: i64,
    pub alert_levels: Vec<i64>,
    pub description: String,
    pub last_state_updated: i64,
    pub state: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manager {
    pub node_id: i64,
    pub manager_id: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub node_id: i64,
    pub alert_id: i64,
    pub remote_alert_id: i64,
    pub alert_levels: Vec<i64>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertLevel {
    pub level: i64,
    pub name: String,
    pub trigger_always: i64,
    pub rules_activated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorAlert {
    pub time_received: i64,
    pub rules_activated: bool,
    /// `-1` denotes "no responsible sensor".
    pub sensor_id: i64,
    pub state: i64,
    pub alert_levels: Vec<i64>,
    pub description: String,
    pub data_transfer: bool,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub change_state: bool,
}

/// The full world-state snapshot delivered by the status-update handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub options: Vec<Option_>,
    pub nodes: Vec<Node>,
    pub sensors: Vec<Sensor>,
    pub managers: Vec<Manager>,
    pub alerts: Vec<Alert>,
    pub alert_levels: Vec<AlertLevel>,
}

/// Validate that a JSON value is a sequence of integers, matching the literal error messages
/// `"alertLevels not of type list"` and `"alertLevels items not of type int"` bit-for-bit.
///
/// A single reusable validator replaces the duplicated is-list-of-ints checks that would
/// otherwise be repeated in every Sensor and Alert deserialization path.
pub fn validate_alert_levels(value: &serde_json::Value) -> Result<Vec<i64>, ProtocolError> {
    let items = value
        .as_array()
        .ok_or(ProtocolError::AlertLevelsNotList)?;
    items
        .iter()
        .map(|item| item.as_i64().ok_or(ProtocolError::AlertLevelsItemNotInt))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_list_of_ints() {
        let value = json!([1, 2, 3]);
        assert_eq!(validate_alert_levels(&value).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn rejects_non_list() {
        let value = json!("not a list");
        let err = validate_alert_levels(&value).unwrap_err();
        assert_eq!(err.to_string(), "alertLevels not of type list");
    }

    #[test]
    fn rejects_non_int_items() {
        let value = json!([1, "two", 3]);
        let err = validate_alert_levels(&value).unwrap_err();
        assert_eq!(err.to_string(), "alertLevels items not of type int");
    }

    #[test]
    fn sensor_alert_data_defaults_empty_when_no_transfer() {
        let raw = json!({
            "timeReceived": 1700000000,
            "rulesActivated": false,
            "sensorId": -1,
            "state": 1,
            "alertLevels": [1, 2],
            "description": "test",
            "dataTransfer": false,
            "changeState": false
        });
        let alert: SensorAlert = serde_json::from_value(raw).unwrap();
        assert!(alert.data.is_empty());
        assert_eq!(alert.sensor_id, -1);
    }
}
