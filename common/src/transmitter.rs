use crate::{codes::PulseCode, config::TimingConfig, status::StatusEvent};

/// Side effects available to a running command or macro.
pub trait Effects {
    fn fire(&mut self, code: PulseCode);

    /// Cooperative wait: background upkeep keeps running meanwhile.
    fn wait_ms(&mut self, ms: u64);

    fn report(&mut self, event: StatusEvent);
}

/// Sends each frame twice, since nothing tells us the heater heard it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTransmitter {
    repeat_pause_ms: u64,
    gap_ms: u64,
}

impl SignalTransmitter {
    pub fn new(repeat_pause_ms: u64, gap_ms: u64) -> Self {
        Self {
            repeat_pause_ms,
            gap_ms,
        }
    }

    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self::new(timing.ir_repeat_pause_ms, timing.ir_gap_ms)
    }

    pub fn transmit<F: Effects + ?Sized>(&self, fx: &mut F, code: PulseCode) {
        fx.fire(code);
        fx.wait_ms(self.repeat_pause_ms);
        fx.fire(code);
    }

    /// Transmits, leaves the receiver the inter-command gap, then reports
    /// `sent:<tag>`.
    pub fn send_labeled<F: Effects + ?Sized>(
        &self,
        fx: &mut F,
        code: PulseCode,
        tag: &'static str,
    ) {
        self.transmit(fx, code);
        fx.wait_ms(self.gap_ms);
        fx.report(StatusEvent::Sent(tag));
    }
}
