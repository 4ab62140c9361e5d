use crate::config::PlacementConfig;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Topic set for one bridged device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    pub command: String,
    pub status: String,
    pub availability: String,
    discovery_prefix: String,
    device_id: String,
}

impl DeviceTopics {
    pub fn new(placement: &PlacementConfig) -> Self {
        let base = format!(
            "{}/{}/{}",
            placement.namespace, placement.area, placement.device
        );
        Self {
            command: format!("{base}/command"),
            status: format!("{base}/status"),
            availability: format!("{base}/availability"),
            discovery_prefix: placement.discovery_prefix.clone(),
            device_id: placement.device_id(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn discovery(&self, component: &str, object_id: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix, component, self.device_id, object_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builds_topics_from_placement() {
        let topics = DeviceTopics::new(&PlacementConfig::default());

        assert_eq!(topics.command, "hvac/bathroom/geyser/command");
        assert_eq!(topics.status, "hvac/bathroom/geyser/status");
        assert_eq!(topics.availability, "hvac/bathroom/geyser/availability");
        assert_eq!(
            topics.discovery("button", "temp_up"),
            "homeassistant/button/bathroom_geyser/temp_up/config"
        );
    }
}
