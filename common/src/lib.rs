pub mod boot;
pub mod button;
pub mod codes;
pub mod command;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod platform;
pub mod restore;
pub mod status;
pub mod supervisor;
pub mod topics;
pub mod transmitter;

#[cfg(test)]
pub(crate) mod testing;

pub use boot::{BootRecovery, ResetReason};
pub use button::{DebouncedButton, Level};
pub use codes::{IrProtocol, PulseCode};
pub use command::{Command, CommandAction};
pub use config::{
    BridgeConfig, IrConfig, NetworkConfig, PinConfig, PlacementConfig, TimingConfig,
};
pub use error::{ConfigError, TransportError};
pub use platform::{
    Board, InboundMessage, IrEmitter, LastWill, Maintenance, MqttSession, NetworkLink,
};
pub use status::{MaintenanceEvent, OtaError, RestoreTrigger, StatusEvent};
pub use supervisor::{Backends, Supervisor, SupervisorState};
pub use topics::*;
