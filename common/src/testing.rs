//! In-memory backends for exercising the bridge without hardware.

use std::{cell::Cell, collections::VecDeque, rc::Rc};

use crate::{
    boot::ResetReason,
    button::Level,
    codes::PulseCode,
    config::BridgeConfig,
    error::TransportError,
    platform::{
        Board, InboundMessage, IrEmitter, LastWill, Maintenance, MqttSession, NetworkLink,
    },
    status::{MaintenanceEvent, StatusEvent},
    supervisor::{Backends, Supervisor},
    transmitter::Effects,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Frame { at_ms: u64, code: PulseCode },
    Status(String),
}

/// Effects sink with a virtual clock advanced by `wait_ms`.
#[derive(Debug, Default)]
pub struct RecordingEffects {
    pub now_ms: u64,
    pub log: Vec<Recorded>,
}

impl RecordingEffects {
    pub fn frames_at(&self) -> Vec<(u64, PulseCode)> {
        self.log
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Frame { at_ms, code } => Some((*at_ms, *code)),
                Recorded::Status(_) => None,
            })
            .collect()
    }

    pub fn frames(&self) -> Vec<PulseCode> {
        self.frames_at().into_iter().map(|(_, code)| code).collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.log
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Status(token) => Some(token.clone()),
                Recorded::Frame { .. } => None,
            })
            .collect()
    }
}

impl Effects for RecordingEffects {
    fn fire(&mut self, code: PulseCode) {
        self.log.push(Recorded::Frame {
            at_ms: self.now_ms,
            code,
        });
    }

    fn wait_ms(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    fn report(&mut self, event: StatusEvent) {
        self.log.push(Recorded::Status(event.to_string()));
    }
}

pub type Clock = Rc<Cell<u64>>;

pub struct SimBoard {
    pub clock: Clock,
    pub button: Level,
    pub slept_ms: u64,
}

impl Board for SimBoard {
    fn now_ms(&self) -> u64 {
        self.clock.get()
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.slept_ms += ms;
        self.clock.set(self.clock.get() + ms);
    }

    fn button_level(&mut self) -> Level {
        self.button
    }
}

pub struct RecordingIr {
    pub clock: Clock,
    pub frames: Vec<(u64, PulseCode)>,
}

impl IrEmitter for RecordingIr {
    fn emit(&mut self, code: PulseCode) {
        self.frames.push((self.clock.get(), code));
    }
}

/// Link that is either up, or comes up on the next attempt when
/// `up_on_connect` is set.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    pub up: bool,
    pub up_on_connect: bool,
    pub attempts: Vec<u64>,
    pub clock: Clock,
}

impl NetworkLink for ScriptedLink {
    fn is_up(&self) -> bool {
        self.up
    }

    fn begin_connect(&mut self) -> Result<(), TransportError> {
        self.attempts.push(self.clock.get());
        if self.up_on_connect {
            self.up = true;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Default)]
pub struct ScriptedSession {
    pub connected: bool,
    pub accept: bool,
    pub attempts: Vec<u64>,
    pub will: Option<Published>,
    pub subscriptions: Vec<String>,
    pub published: Vec<Published>,
    pub inbound: VecDeque<InboundMessage>,
    pub disconnects: u32,
    pub service_calls: u32,
    /// Publishing here fails with a publish error.
    pub reject_topic: Option<String>,
    /// Publishing here drops the connection.
    pub drop_on_topic: Option<String>,
    pub clock: Clock,
}

impl ScriptedSession {
    pub fn push_inbound(&mut self, topic: &str, payload: &str) {
        self.inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.published
            .iter()
            .filter(|p| p.topic.starts_with(prefix))
            .count()
    }
}

impl MqttSession for ScriptedSession {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), TransportError> {
        self.attempts.push(self.clock.get());
        self.will = Some(Published {
            topic: will.topic.to_string(),
            payload: will.payload.to_string(),
            retain: will.retain,
        });
        if !self.accept {
            return Err(TransportError::Connect("broker refused".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.drop_on_topic.as_deref() == Some(topic) {
            self.connected = false;
            return Err(TransportError::NotConnected);
        }
        if self.reject_topic.as_deref() == Some(topic) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "outgoing queue full".into(),
            });
        }
        self.published.push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }

    fn poll_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound.pop_front()
    }

    fn service(&mut self) {
        self.service_calls += 1;
    }
}

#[derive(Debug, Default)]
pub struct ScriptedMaintenance {
    pub begins: u32,
    pub fail_begin: bool,
    pub events: VecDeque<MaintenanceEvent>,
}

impl Maintenance for ScriptedMaintenance {
    fn begin(&mut self) -> Result<(), TransportError> {
        self.begins += 1;
        if self.fail_begin {
            return Err(TransportError::Maintenance("port in use".into()));
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<MaintenanceEvent> {
        self.events.pop_front()
    }
}

pub type SimSupervisor =
    Supervisor<SimBoard, RecordingIr, ScriptedLink, ScriptedSession, ScriptedMaintenance>;

/// Supervisor on simulated backends with the clock at t=0. The link starts
/// in `link_up` and the broker accepts connections.
pub fn sim_supervisor(reason: ResetReason, link_up: bool) -> (SimSupervisor, Clock) {
    sim_supervisor_with(BridgeConfig::default(), reason, link_up)
}

pub fn sim_supervisor_with(
    config: BridgeConfig,
    reason: ResetReason,
    link_up: bool,
) -> (SimSupervisor, Clock) {
    let clock = Clock::default();
    let backends = Backends {
        board: SimBoard {
            clock: clock.clone(),
            button: Level::High,
            slept_ms: 0,
        },
        ir: RecordingIr {
            clock: clock.clone(),
            frames: Vec::new(),
        },
        link: ScriptedLink {
            up: link_up,
            clock: clock.clone(),
            ..ScriptedLink::default()
        },
        session: ScriptedSession {
            accept: true,
            clock: clock.clone(),
            ..ScriptedSession::default()
        },
        maintenance: ScriptedMaintenance::default(),
    };

    let supervisor = Supervisor::new(config, reason, backends).unwrap();
    (supervisor, clock)
}
