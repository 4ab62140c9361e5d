//! Home Assistant MQTT discovery payloads.

use serde::Serialize;

use crate::{
    command::Command,
    config::PlacementConfig,
    topics::{DeviceTopics, PAYLOAD_OFFLINE, PAYLOAD_ONLINE},
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceBlock {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityConfig<'a> {
    pub name: &'a str,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_press: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<&'a str>,
    pub availability_topic: &'a str,
    pub payload_available: &'a str,
    pub payload_not_available: &'a str,
    pub icon: &'a str,
    pub device: &'a DeviceBlock,
}

/// A ready-to-publish retained discovery message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: String,
}

pub fn device_block(placement: &PlacementConfig) -> DeviceBlock {
    DeviceBlock {
        identifiers: vec![placement.device_id()],
        name: placement.display_name.clone(),
        manufacturer: placement.manufacturer.clone(),
        model: placement.model.clone(),
    }
}

/// One `button` per command plus one `sensor` mirroring the status topic.
pub fn build_discovery(
    placement: &PlacementConfig,
    topics: &DeviceTopics,
) -> Result<Vec<DiscoveryMessage>, serde_json::Error> {
    let device = device_block(placement);
    let device_id = topics.device_id();
    let mut messages = Vec::with_capacity(Command::ALL.len() + 1);

    for command in Command::ALL {
        let object_id = command.as_str();
        let entity = EntityConfig {
            name: command.label(),
            unique_id: format!("{device_id}_{object_id}"),
            object_id: format!("{device_id}_{object_id}"),
            command_topic: Some(&topics.command),
            payload_press: Some(object_id),
            state_topic: None,
            availability_topic: &topics.availability,
            payload_available: PAYLOAD_ONLINE,
            payload_not_available: PAYLOAD_OFFLINE,
            icon: command.icon(),
            device: &device,
        };
        messages.push(DiscoveryMessage {
            topic: topics.discovery("button", object_id),
            payload: serde_json::to_string(&entity)?,
        });
    }

    let status = EntityConfig {
        name: "Status",
        unique_id: format!("{device_id}_status"),
        object_id: format!("{device_id}_status"),
        command_topic: None,
        payload_press: None,
        state_topic: Some(&topics.status),
        availability_topic: &topics.availability,
        payload_available: PAYLOAD_ONLINE,
        payload_not_available: PAYLOAD_OFFLINE,
        icon: "mdi:information-outline",
        device: &device,
    };
    messages.push(DiscoveryMessage {
        topic: topics.discovery("sensor", "status"),
        payload: serde_json::to_string(&status)?,
    });

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn messages() -> Vec<DiscoveryMessage> {
        let placement = PlacementConfig::default();
        build_discovery(&placement, &DeviceTopics::new(&placement)).unwrap()
    }

    #[test]
    fn eight_buttons_and_one_sensor() {
        let messages = messages();
        assert_eq!(messages.len(), 9);

        let buttons = messages
            .iter()
            .filter(|m| m.topic.starts_with("homeassistant/button/bathroom_geyser/"))
            .count();
        assert_eq!(buttons, 8);
        assert_eq!(
            messages.last().unwrap().topic,
            "homeassistant/sensor/bathroom_geyser/status/config"
        );
    }

    #[test]
    fn button_payload_references_topics() {
        let messages = messages();
        let temp_up = messages
            .iter()
            .find(|m| m.topic == "homeassistant/button/bathroom_geyser/temp_up/config")
            .unwrap();
        let json: Value = serde_json::from_str(&temp_up.payload).unwrap();

        assert_eq!(json["command_topic"], "hvac/bathroom/geyser/command");
        assert_eq!(json["payload_press"], "temp_up");
        assert_eq!(json["availability_topic"], "hvac/bathroom/geyser/availability");
        assert_eq!(json["unique_id"], "bathroom_geyser_temp_up");
        assert!(json.get("state_topic").is_none());
    }

    #[test]
    fn all_entities_share_one_device() {
        let devices: Vec<Value> = messages()
            .iter()
            .map(|m| serde_json::from_str::<Value>(&m.payload).unwrap()["device"].clone())
            .collect();

        assert_eq!(devices[0]["identifiers"][0], "bathroom_geyser");
        assert_eq!(devices[0]["manufacturer"], "Olimpia Splendid");
        assert!(devices.iter().all(|d| d == &devices[0]));
    }

    #[test]
    fn sensor_reads_status_topic() {
        let sensor = messages().pop().unwrap();
        let json: Value = serde_json::from_str(&sensor.payload).unwrap();

        assert_eq!(json["state_topic"], "hvac/bathroom/geyser/status");
        assert!(json.get("command_topic").is_none());
    }
}
