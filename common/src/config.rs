use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Logical placement used to build MQTT topics: `<namespace>/<area>/<device>/...`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlacementConfig {
    pub namespace: String,
    pub area: String,
    pub device: String,
    pub discovery_prefix: String,
    pub display_name: String,
    pub manufacturer: String,
    pub model: String,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            namespace: "hvac".to_string(),
            area: "bathroom".to_string(),
            device: "geyser".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            display_name: "Bathroom Heater".to_string(),
            manufacturer: "Olimpia Splendid".to_string(),
            model: "IR heater bridge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PinConfig {
    pub ir_tx: i32,
    pub restore_button: i32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            ir_tx: 18,
            restore_button: 27,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub boot_delay_ms: u64,
    pub manual_delay_ms: u64,
    pub temp_steps: u16,
    pub ir_gap_ms: u64,
    pub ir_repeat_pause_ms: u64,
    pub debounce_ms: u64,
    pub wifi_retry_ms: u64,
    pub mqtt_retry_ms: u64,
    pub loop_yield_ms: u64,
    pub wait_slice_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            boot_delay_ms: 15_000,
            manual_delay_ms: 500,
            temp_steps: 20,
            ir_gap_ms: 180,
            ir_repeat_pause_ms: 40,
            debounce_ms: 50,
            wifi_retry_ms: 10_000,
            mqtt_retry_ms: 5_000,
            loop_yield_ms: 5,
            wait_slice_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IrConfig {
    pub rmt_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            rmt_channel: 0,
            carrier_khz: 38,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub ir: IrConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub ota_password: String,
    pub hostname: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            ota_password: String::new(),
            hostname: "esp32-olimpia-ir".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parses a JSON override; missing sections fall back to defaults.
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        config.placement.validate()?;
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.timing.sanitize();
        self.ir.sanitize();
        self.pins.sanitize();
    }

    pub fn client_id(&self) -> String {
        format!("heater-bridge-{}", self.placement.device_id())
    }
}

impl PlacementConfig {
    pub fn device_id(&self) -> String {
        format!("{}_{}", self.area, self.device)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("namespace", &self.namespace),
            ("area", &self.area),
            ("device", &self.device),
            ("discovery_prefix", &self.discovery_prefix),
        ] {
            if !is_topic_segment(value) {
                return Err(ConfigError::InvalidSegment {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

impl PinConfig {
    pub fn sanitize(&mut self) {
        if self.ir_tx < 0 {
            self.ir_tx = 18;
        }
        if self.restore_button < 0 {
            self.restore_button = 27;
        }
    }
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.temp_steps = self.temp_steps.min(40);
        self.ir_gap_ms = self.ir_gap_ms.clamp(50, 2_000);
        self.ir_repeat_pause_ms = self.ir_repeat_pause_ms.clamp(10, 500);
        self.debounce_ms = self.debounce_ms.clamp(5, 1_000);
        self.wifi_retry_ms = self.wifi_retry_ms.max(1_000);
        self.mqtt_retry_ms = self.mqtt_retry_ms.max(1_000);
        self.loop_yield_ms = self.loop_yield_ms.clamp(1, 100);
        self.wait_slice_ms = self.wait_slice_ms.clamp(1, 100);
    }
}

impl IrConfig {
    pub fn sanitize(&mut self) {
        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(30, 60);
    }
}

/// Lowercase letters, digits and underscore only.
fn is_topic_segment(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_device_configuration() {
        let config = BridgeConfig::default();

        assert_eq!(config.timing.boot_delay_ms, 15_000);
        assert_eq!(config.timing.manual_delay_ms, 500);
        assert_eq!(config.timing.temp_steps, 20);
        assert_eq!(config.timing.ir_gap_ms, 180);
        assert_eq!(config.pins, PinConfig { ir_tx: 18, restore_button: 27 });
        assert_eq!(config.placement.device_id(), "bathroom_geyser");
    }

    #[test]
    fn sanitize_clamps_timing() {
        let mut config = BridgeConfig::default();
        config.timing.ir_gap_ms = 0;
        config.timing.mqtt_retry_ms = 10;
        config.timing.wait_slice_ms = 0;
        config.ir.carrier_khz = 500;
        config.ir.rmt_channel = 9;

        config.sanitize();

        assert_eq!(config.timing.ir_gap_ms, 50);
        assert_eq!(config.timing.mqtt_retry_ms, 1_000);
        assert_eq!(config.timing.wait_slice_ms, 1);
        assert_eq!(config.ir.carrier_khz, 60);
        assert_eq!(config.ir.rmt_channel, 0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            BridgeConfig::from_json(br#"{"timing": {"boot_delay_ms": 20000, "temp_steps": 10}}"#)
                .unwrap();

        assert_eq!(config.timing.boot_delay_ms, 20_000);
        assert_eq!(config.timing.temp_steps, 10);
        assert_eq!(config.timing.ir_gap_ms, 180);
        assert_eq!(config.placement, PlacementConfig::default());
    }

    #[test]
    fn rejects_unsafe_topic_segments() {
        let err = BridgeConfig::from_json(
            br#"{"placement": {"area": "Bath Room"}}"#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidSegment { field: "area", .. }));
    }
}
