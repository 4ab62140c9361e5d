//! Cooperative control loop tying the bridge together.
//!
//! [`Supervisor::poll`] is called forever from the main loop. Each call
//! advances the network link, maintenance service, MQTT session, inbound
//! commands, discovery, the boot recovery trigger and the restore button.
//! Every step is idempotent and none of them waits on the network. The only
//! multi-millisecond waits are the IR pauses and the macro pre-delay, and those
//! keep servicing the session and maintenance backends between slices.

use log::{debug, info, warn};

use crate::{
    boot::{BootRecovery, ResetReason},
    button::DebouncedButton,
    codes::PulseCode,
    config::BridgeConfig,
    discovery::{build_discovery, DiscoveryMessage},
    dispatch::{dispatch, Dispatched},
    error::TransportError,
    platform::{
        cooperative_wait, Board, IrEmitter, LastWill, Maintenance, MqttSession, NetworkLink,
    },
    restore::{MacroPhase, RestoreMacro},
    status::{MaintenanceEvent, RestoreTrigger, StatusEvent},
    topics::{DeviceTopics, PAYLOAD_OFFLINE, PAYLOAD_ONLINE},
    transmitter::{Effects, SignalTransmitter},
};

/// The backends a supervisor drives.
pub struct Backends<B, I, L, S, M> {
    pub board: B,
    pub ir: I,
    pub link: L,
    pub session: S,
    pub maintenance: M,
}

#[derive(Debug, Clone)]
pub struct SupervisorState {
    link_up: bool,
    last_link_attempt_ms: Option<u64>,
    session_up: bool,
    last_session_attempt_ms: Option<u64>,
    discovery_published: bool,
    maintenance_started: bool,
    boot: BootRecovery,
    button: DebouncedButton,
}

impl SupervisorState {
    pub fn link_up(&self) -> bool {
        self.link_up
    }

    pub fn session_up(&self) -> bool {
        self.session_up
    }

    pub fn discovery_published(&self) -> bool {
        self.discovery_published
    }

    pub fn maintenance_started(&self) -> bool {
        self.maintenance_started
    }

    pub fn boot(&self) -> &BootRecovery {
        &self.boot
    }
}

pub struct Supervisor<B, I, L, S, M> {
    config: BridgeConfig,
    topics: DeviceTopics,
    discovery: Vec<DiscoveryMessage>,
    transmitter: SignalTransmitter,
    restore: RestoreMacro,
    state: SupervisorState,
    backends: Backends<B, I, L, S, M>,
}

impl<B, I, L, S, M> Supervisor<B, I, L, S, M>
where
    B: Board,
    I: IrEmitter,
    L: NetworkLink,
    S: MqttSession,
    M: Maintenance,
{
    /// Builds the supervisor and arms the boot recovery trigger from
    /// `reset_reason`.
    pub fn new(
        config: BridgeConfig,
        reset_reason: ResetReason,
        backends: Backends<B, I, L, S, M>,
    ) -> Result<Self, serde_json::Error> {
        let topics = DeviceTopics::new(&config.placement);
        let discovery = build_discovery(&config.placement, &topics)?;
        let now_ms = backends.board.now_ms();
        let boot = BootRecovery::arm(reset_reason, now_ms, config.timing.boot_delay_ms);

        match boot.fire_at_ms() {
            Some(fire_at) => info!(
                "reset reason `{}`: power-loss restore armed for t={fire_at}ms",
                reset_reason.as_str()
            ),
            None => info!(
                "reset reason `{}`: no power-loss restore",
                reset_reason.as_str()
            ),
        }

        Ok(Self {
            transmitter: SignalTransmitter::from_timing(&config.timing),
            restore: RestoreMacro::new(config.timing.temp_steps),
            state: SupervisorState {
                link_up: false,
                last_link_attempt_ms: None,
                session_up: false,
                last_session_attempt_ms: None,
                discovery_published: false,
                maintenance_started: false,
                boot,
                button: DebouncedButton::active_low(config.timing.debounce_ms, now_ms),
            },
            topics,
            discovery,
            config,
            backends,
        })
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    pub fn restore_phase(&self) -> MacroPhase {
        self.restore.phase()
    }

    pub fn backends(&self) -> &Backends<B, I, L, S, M> {
        &self.backends
    }

    pub fn backends_mut(&mut self) -> &mut Backends<B, I, L, S, M> {
        &mut self.backends
    }

    /// One iteration of the main loop.
    pub fn poll(&mut self) {
        self.service_link();
        self.service_maintenance();
        self.service_session();
        self.drain_commands();
        self.publish_discovery();
        self.check_boot_recovery();
        self.poll_button();

        let yield_ms = self.config.timing.loop_yield_ms;
        self.bus().wait_ms(yield_ms);
    }

    fn bus(&mut self) -> Bus<'_, B, I, L, S, M> {
        Bus {
            backends: &mut self.backends,
            state: &self.state,
            topics: &self.topics,
            slice_ms: self.config.timing.wait_slice_ms,
        }
    }

    fn service_link(&mut self) {
        let now_ms = self.backends.board.now_ms();
        let up = self.backends.link.is_up();

        if up != self.state.link_up {
            if up {
                info!("network link up");
            } else {
                warn!("network link lost");
                self.drop_session();
            }
            self.state.link_up = up;
        }

        let retry_ms = self.config.timing.wifi_retry_ms;
        if up || !cooldown_elapsed(self.state.last_link_attempt_ms, now_ms, retry_ms) {
            return;
        }

        self.state.last_link_attempt_ms = Some(now_ms);
        debug!("network link connect attempt");
        if let Err(err) = self.backends.link.begin_connect() {
            warn!("network link connect attempt failed: {err}");
        }

        if self.backends.link.is_up() {
            info!("network link up");
            self.state.link_up = true;
        }
    }

    fn service_maintenance(&mut self) {
        if !self.state.maintenance_started {
            if !self.state.link_up {
                return;
            }

            // One-shot; a failed start is not retried until the next boot.
            self.state.maintenance_started = true;
            match self.backends.maintenance.begin() {
                Ok(()) => info!("maintenance service started"),
                Err(err) => warn!("{err}"),
            }
        }

        self.bus().service_maintenance();
    }

    fn service_session(&mut self) {
        if !self.state.link_up {
            return;
        }

        let connected = self.backends.session.is_connected();
        if self.state.session_up {
            if connected {
                return;
            }
            warn!("mqtt session lost");
            self.state.session_up = false;
        }

        if connected {
            self.on_session_established();
            return;
        }

        let now_ms = self.backends.board.now_ms();
        let retry_ms = self.config.timing.mqtt_retry_ms;
        if !cooldown_elapsed(self.state.last_session_attempt_ms, now_ms, retry_ms) {
            return;
        }

        self.state.last_session_attempt_ms = Some(now_ms);
        let will = LastWill {
            topic: &self.topics.availability,
            payload: PAYLOAD_OFFLINE,
            retain: true,
        };
        debug!("mqtt connect attempt");
        if let Err(err) = self.backends.session.connect(&will) {
            warn!("{err}");
            return;
        }

        if self.backends.session.is_connected() {
            self.on_session_established();
        }
    }

    fn on_session_established(&mut self) {
        info!("mqtt session established");
        self.state.session_up = true;
        self.state.discovery_published = false;

        let session = &mut self.backends.session;
        if let Err(err) = session.subscribe(&self.topics.command) {
            warn!("{err}");
        }
        if let Err(err) =
            session.publish(&self.topics.availability, PAYLOAD_ONLINE.as_bytes(), true)
        {
            warn!("{err}");
        }

        self.bus().report(StatusEvent::Online);
    }

    fn drop_session(&mut self) {
        if self.state.session_up {
            self.state.session_up = false;
            self.backends.session.disconnect();
        }
    }

    fn drain_commands(&mut self) {
        while let Some(message) = self.backends.session.poll_inbound() {
            if message.topic != self.topics.command {
                debug!("ignoring message on `{}`", message.topic);
                continue;
            }

            let payload = String::from_utf8_lossy(&message.payload).into_owned();
            let manual_delay_ms = self.config.timing.manual_delay_ms;
            let mut bus = Bus {
                backends: &mut self.backends,
                state: &self.state,
                topics: &self.topics,
                slice_ms: self.config.timing.wait_slice_ms,
            };
            let result = dispatch(
                &mut bus,
                &self.transmitter,
                &mut self.restore,
                &payload,
                manual_delay_ms,
            );
            if let Dispatched::Sent(command) = result {
                debug!("command `{}` sent", command.as_str());
            }
        }
    }

    fn publish_discovery(&mut self) {
        if !self.state.session_up || self.state.discovery_published {
            return;
        }

        let mut failed = 0;
        for message in &self.discovery {
            let result =
                self.backends
                    .session
                    .publish(&message.topic, message.payload.as_bytes(), true);
            match result {
                Ok(()) => {}
                Err(TransportError::NotConnected) => {
                    warn!("session dropped during discovery; will republish on reconnect");
                    return;
                }
                Err(err) => {
                    warn!("{err}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!(
                "discovery incomplete ({failed} of {} entities failed); republishing",
                self.discovery.len()
            );
            return;
        }

        info!("discovery published ({} entities)", self.discovery.len());
        let reason = self.state.boot.reason();
        self.state.discovery_published = true;

        let mut bus = self.bus();
        bus.report(StatusEvent::DiscoveryPublished);
        bus.report(StatusEvent::ResetReason(reason));
        bus.report(StatusEvent::Ready);
    }

    fn check_boot_recovery(&mut self) {
        let now_ms = self.backends.board.now_ms();
        if !self.state.boot.poll(now_ms) {
            return;
        }

        info!("power-loss restore firing at t={now_ms}ms");
        self.run_restore(
            RestoreTrigger::BootPowerLoss,
            0,
            StatusEvent::PowerLossRestoreRun,
        );
    }

    fn poll_button(&mut self) {
        let now_ms = self.backends.board.now_ms();
        let level = self.backends.board.button_level();
        if !self.state.button.poll(level, now_ms) {
            return;
        }

        info!("restore button pressed");
        let pre_delay_ms = self.config.timing.manual_delay_ms;
        self.run_restore(
            RestoreTrigger::Button,
            pre_delay_ms,
            StatusEvent::RestoreButtonPressed,
        );
    }

    fn run_restore(
        &mut self,
        trigger: RestoreTrigger,
        pre_delay_ms: u64,
        announce: StatusEvent,
    ) {
        let mut bus = Bus {
            backends: &mut self.backends,
            state: &self.state,
            topics: &self.topics,
            slice_ms: self.config.timing.wait_slice_ms,
        };
        bus.report(announce);
        self.restore.run(&mut bus, &self.transmitter, trigger, pre_delay_ms);
    }
}

fn cooldown_elapsed(last_attempt_ms: Option<u64>, now_ms: u64, cooldown_ms: u64) -> bool {
    last_attempt_ms.map_or(true, |last| now_ms.saturating_sub(last) >= cooldown_ms)
}

fn maintenance_status(event: MaintenanceEvent) -> Option<StatusEvent> {
    match event {
        MaintenanceEvent::Start => Some(StatusEvent::OtaStart),
        MaintenanceEvent::End => Some(StatusEvent::OtaEnd),
        MaintenanceEvent::Error(err) => Some(StatusEvent::OtaError(err)),
        MaintenanceEvent::Progress { .. } => None,
    }
}

/// Borrowed view of the backends handed to commands and macros.
struct Bus<'a, B, I, L, S, M> {
    backends: &'a mut Backends<B, I, L, S, M>,
    state: &'a SupervisorState,
    topics: &'a DeviceTopics,
    slice_ms: u64,
}

impl<B, I, L, S, M> Bus<'_, B, I, L, S, M>
where
    S: MqttSession,
    M: Maintenance,
{
    fn service_maintenance(&mut self) {
        drain_maintenance(
            &mut self.backends.session,
            &mut self.backends.maintenance,
            self.state,
            self.topics,
        );
    }
}

impl<B, I, L, S, M> Effects for Bus<'_, B, I, L, S, M>
where
    B: Board,
    I: IrEmitter,
    S: MqttSession,
    M: Maintenance,
{
    fn fire(&mut self, code: PulseCode) {
        debug!("ir emit {code}");
        self.backends.ir.emit(code);
    }

    fn wait_ms(&mut self, ms: u64) {
        let Backends {
            board,
            session,
            maintenance,
            ..
        } = &mut *self.backends;
        let (state, topics) = (self.state, self.topics);

        cooperative_wait(
            ms,
            self.slice_ms,
            |step| board.sleep_ms(step),
            || {
                session.service();
                drain_maintenance(session, maintenance, state, topics);
            },
        );
    }

    fn report(&mut self, event: StatusEvent) {
        publish_status(&mut self.backends.session, self.state, self.topics, event);
    }
}

fn drain_maintenance<S: MqttSession, M: Maintenance>(
    session: &mut S,
    maintenance: &mut M,
    state: &SupervisorState,
    topics: &DeviceTopics,
) {
    if !state.maintenance_started {
        return;
    }

    while let Some(event) = maintenance.poll_event() {
        match event {
            MaintenanceEvent::Progress { percent } => debug!("ota progress {percent}%"),
            MaintenanceEvent::Error(err) => warn!("ota failed with code {}", err.code()),
            _ => info!("ota event {event:?}"),
        }
        if let Some(status) = maintenance_status(event) {
            publish_status(session, state, topics, status);
        }
    }
}

/// Status is best-effort telemetry: failures are logged, never retried.
fn publish_status<S: MqttSession>(
    session: &mut S,
    state: &SupervisorState,
    topics: &DeviceTopics,
    event: StatusEvent,
) {
    let token = event.to_string();
    info!("status: {token}");

    if !state.session_up {
        debug!("session down, status `{token}` not published");
        return;
    }

    if let Err(err) = session.publish(&topics.status, token.as_bytes(), true) {
        warn!("{err}");
    }
}
