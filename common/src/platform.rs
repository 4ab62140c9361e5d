//! Seams between the supervisor and the hardware/network it drives.
//!
//! Every backend is used from the supervisor thread only. Backends that need
//! background work (an MQTT event loop, an HTTP server) keep it internal and
//! hand results over through the non-blocking `poll_*` methods.

use crate::{
    button::Level, codes::PulseCode, error::TransportError, status::MaintenanceEvent,
};

/// Clock, sleep and GPIO input of the board the supervisor runs on.
pub trait Board {
    fn now_ms(&self) -> u64;

    /// Sleeps for `ms`, letting the platform run its own housekeeping
    /// (RTOS idle task, watchdog feed) meanwhile.
    fn sleep_ms(&mut self, ms: u64);

    fn button_level(&mut self) -> Level;
}

/// Fire-and-forget IR output. There is no feedback path from the heater.
pub trait IrEmitter {
    fn emit(&mut self, code: PulseCode);
}

pub trait NetworkLink {
    fn is_up(&self) -> bool;

    /// Starts a connection attempt without waiting for it to complete.
    fn begin_connect(&mut self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub payload: &'a str,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub trait MqttSession {
    fn is_connected(&self) -> bool;

    /// Starts a session carrying `will`. The session may come up
    /// asynchronously; callers observe it through [`MqttSession::is_connected`].
    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), TransportError>;

    fn disconnect(&mut self);

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool)
        -> Result<(), TransportError>;

    fn poll_inbound(&mut self) -> Option<InboundMessage>;

    /// Session upkeep run after every wait slice. Clients that run their own
    /// event loop task (rumqttc, the ESP-IDF MQTT task) leave this empty.
    fn service(&mut self) {}
}

/// Remote firmware update service.
pub trait Maintenance {
    fn begin(&mut self) -> Result<(), TransportError>;

    fn poll_event(&mut self) -> Option<MaintenanceEvent>;
}

/// Splits a wait into `slice_ms` sleeps and runs `tick` after each one, so
/// background upkeep never stalls for longer than a slice.
pub fn cooperative_wait(
    total_ms: u64,
    slice_ms: u64,
    mut sleep: impl FnMut(u64),
    mut tick: impl FnMut(),
) {
    let slice_ms = slice_ms.max(1);
    let mut remaining = total_ms;
    while remaining > 0 {
        let step = remaining.min(slice_ms);
        sleep(step);
        remaining -= step;
        tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_is_sliced_and_ticks_after_each_slice() {
        let mut sleeps = Vec::new();
        let mut ticks = 0;

        cooperative_wait(25, 10, |ms| sleeps.push(ms), || ticks += 1);

        assert_eq!(sleeps, vec![10, 10, 5]);
        assert_eq!(ticks, 3);
    }

    #[test]
    fn zero_wait_does_nothing() {
        let mut ticks = 0;
        cooperative_wait(0, 10, |_| panic!("no sleep expected"), || ticks += 1);
        assert_eq!(ticks, 0);
    }
}
