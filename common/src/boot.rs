use core::str::FromStr;

/// Why the chip last restarted, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    PowerOn,
    Brownout,
    Software,
    Panic,
    InterruptWatchdog,
    TaskWatchdog,
    Watchdog,
    DeepSleep,
    External,
    Sdio,
    Unknown,
}

impl ResetReason {
    pub const ALL: [ResetReason; 11] = [
        Self::PowerOn,
        Self::Brownout,
        Self::Software,
        Self::Panic,
        Self::InterruptWatchdog,
        Self::TaskWatchdog,
        Self::Watchdog,
        Self::DeepSleep,
        Self::External,
        Self::Sdio,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerOn => "poweron",
            Self::Brownout => "brownout",
            Self::Software => "sw",
            Self::Panic => "panic",
            Self::InterruptWatchdog => "int_wdt",
            Self::TaskWatchdog => "task_wdt",
            Self::Watchdog => "wdt",
            Self::DeepSleep => "deepsleep",
            Self::External => "ext",
            Self::Sdio => "sdio",
            Self::Unknown => "unknown",
        }
    }

    /// Cold power-on and brownout both mean the heater lost mains power too.
    pub fn is_power_loss(self) -> bool {
        matches!(self, Self::PowerOn | Self::Brownout)
    }
}

impl FromStr for ResetReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str() == token)
            .ok_or(())
    }
}

/// One-shot delayed trigger for the power-loss restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecovery {
    reason: ResetReason,
    fire_at_ms: Option<u64>,
}

impl BootRecovery {
    /// Arms only for the power-loss class of reset reasons.
    pub fn arm(reason: ResetReason, now_ms: u64, delay_ms: u64) -> Self {
        let fire_at_ms = reason
            .is_power_loss()
            .then(|| now_ms.saturating_add(delay_ms));
        Self { reason, fire_at_ms }
    }

    pub fn reason(&self) -> ResetReason {
        self.reason
    }

    pub fn is_scheduled(&self) -> bool {
        self.fire_at_ms.is_some()
    }

    pub fn fire_at_ms(&self) -> Option<u64> {
        self.fire_at_ms
    }

    /// Returns true exactly once, on the first poll at or after the deadline.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.fire_at_ms {
            Some(fire_at) if now_ms >= fire_at => {
                self.fire_at_ms = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arms_only_for_power_loss_reasons() {
        for reason in ResetReason::ALL {
            let recovery = BootRecovery::arm(reason, 0, 15_000);
            let expected = matches!(reason, ResetReason::PowerOn | ResetReason::Brownout);
            assert_eq!(recovery.is_scheduled(), expected, "{reason:?}");
        }
    }

    #[test]
    fn fires_exactly_once_at_deadline() {
        let mut recovery = BootRecovery::arm(ResetReason::Brownout, 0, 15_000);
        assert_eq!(recovery.fire_at_ms(), Some(15_000));

        assert!(!recovery.poll(14_999));
        assert!(recovery.poll(15_000));
        assert!(!recovery.poll(15_001));
        assert!(!recovery.poll(u64::MAX));
        assert!(!recovery.is_scheduled());
    }

    #[test]
    fn late_poll_still_fires() {
        let mut recovery = BootRecovery::arm(ResetReason::PowerOn, 200, 1_000);
        assert!(recovery.poll(5_000));
    }

    #[test]
    fn unarmed_never_fires() {
        let mut recovery = BootRecovery::arm(ResetReason::TaskWatchdog, 0, 0);
        assert!(!recovery.poll(0));
        assert!(!recovery.poll(1_000_000));
    }

    #[test]
    fn parses_reason_tokens() {
        for reason in ResetReason::ALL {
            assert_eq!(reason.as_str().parse::<ResetReason>(), Ok(reason));
        }
        assert_eq!(" BROWNOUT ".parse::<ResetReason>(), Ok(ResetReason::Brownout));
        assert!("cosmic_ray".parse::<ResetReason>().is_err());
    }
}
