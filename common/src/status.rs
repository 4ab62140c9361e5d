use core::fmt;

use crate::boot::ResetReason;

/// Cause of a restore macro run, reported in `restore:*` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTrigger {
    Button,
    Mqtt,
    BootPowerLoss,
}

impl RestoreTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Mqtt => "mqtt",
            Self::BootPowerLoss => "boot_powerloss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceEvent {
    Start,
    Progress { percent: u8 },
    End,
    Error(OtaError),
}

/// Conventional OTA failure numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    Auth,
    Begin,
    Connect,
    Receive,
    End,
}

impl OtaError {
    pub fn code(self) -> u8 {
        match self {
            Self::Auth => 0,
            Self::Begin => 1,
            Self::Connect => 2,
            Self::Receive => 3,
            Self::End => 4,
        }
    }
}

/// One token published on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Sent(&'static str),
    RestoreStart(RestoreTrigger),
    RestoreDone(RestoreTrigger),
    UnknownCommand,
    ResetReason(ResetReason),
    Online,
    Ready,
    DiscoveryPublished,
    OtaStart,
    OtaEnd,
    OtaError(OtaError),
    PowerLossRestoreRun,
    RestoreButtonPressed,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent(tag) => write!(f, "sent:{tag}"),
            Self::RestoreStart(trigger) => write!(f, "restore:start:{}", trigger.as_str()),
            Self::RestoreDone(trigger) => write!(f, "restore:done:{}", trigger.as_str()),
            Self::UnknownCommand => f.write_str("error:unknown_cmd"),
            Self::ResetReason(reason) => write!(f, "boot:reset_reason:{}", reason.as_str()),
            Self::Online => f.write_str("online"),
            Self::Ready => f.write_str("ready"),
            Self::DiscoveryPublished => f.write_str("discovery:published"),
            Self::OtaStart => f.write_str("ota:start"),
            Self::OtaEnd => f.write_str("ota:end"),
            Self::OtaError(err) => write!(f, "ota:error:{}", err.code()),
            Self::PowerLossRestoreRun => f.write_str("boot:powerloss_restore:run"),
            Self::RestoreButtonPressed => f.write_str("button:restore_pressed"),
        }
    }
}
