use crate::codes::{self, PulseCode};

/// Every operation the bridge accepts on its command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    PowerToggle,
    PowerLevel,
    OscillationToggle,
    SleepTimer,
    TempMode,
    TempUp,
    TempDown,
    RestoreState,
}

/// What a command does once dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Send(PulseCode),
    Restore,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Self::PowerToggle,
        Self::PowerLevel,
        Self::OscillationToggle,
        Self::SleepTimer,
        Self::TempMode,
        Self::TempUp,
        Self::TempDown,
        Self::RestoreState,
    ];

    /// Trims and lower-cases `raw`, then looks it up.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|cmd| cmd.as_str() == token)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerToggle => "power_toggle",
            Self::PowerLevel => "power_level",
            Self::OscillationToggle => "oscillation_toggle",
            Self::SleepTimer => "sleep_timer",
            Self::TempMode => "temp_mode",
            Self::TempUp => "temp_up",
            Self::TempDown => "temp_down",
            Self::RestoreState => "restore_state",
        }
    }

    pub fn action(self) -> CommandAction {
        match self {
            Self::PowerToggle => CommandAction::Send(codes::IR_POWER_TOGGLE),
            Self::PowerLevel => CommandAction::Send(codes::IR_POWER_LEVEL),
            Self::OscillationToggle => CommandAction::Send(codes::IR_OSCILLATION_TOGGLE),
            Self::SleepTimer => CommandAction::Send(codes::IR_SLEEP_TIMER),
            Self::TempMode => CommandAction::Send(codes::IR_TEMP_MODE),
            Self::TempUp => CommandAction::Send(codes::IR_TEMP_UP),
            Self::TempDown => CommandAction::Send(codes::IR_TEMP_DOWN),
            Self::RestoreState => CommandAction::Restore,
        }
    }

    /// Human-readable entity name used in discovery.
    pub fn label(self) -> &'static str {
        match self {
            Self::PowerToggle => "Power",
            Self::PowerLevel => "Power Level",
            Self::OscillationToggle => "Oscillation",
            Self::SleepTimer => "Sleep Timer",
            Self::TempMode => "Temperature Mode",
            Self::TempUp => "Temperature Up",
            Self::TempDown => "Temperature Down",
            Self::RestoreState => "Restore State",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::PowerToggle => "mdi:power",
            Self::PowerLevel => "mdi:fire",
            Self::OscillationToggle => "mdi:arrow-oscillating",
            Self::SleepTimer => "mdi:timer-outline",
            Self::TempMode => "mdi:thermometer",
            Self::TempUp => "mdi:thermometer-plus",
            Self::TempDown => "mdi:thermometer-minus",
            Self::RestoreState => "mdi:backup-restore",
        }
    }
}
