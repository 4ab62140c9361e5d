use std::{
    io::{BufRead, ErrorKind},
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use heater_bridge_common::{
    Backends, Board, BridgeConfig, InboundMessage, IrEmitter, LastWill, Level, Maintenance,
    MaintenanceEvent, MqttSession, NetworkConfig, NetworkLink, OtaError, PulseCode, ResetReason,
    Supervisor, TransportError, PAYLOAD_OFFLINE,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::ota::{
    normalize_sha256, password_matches, EventSink, ImageDigest, OtaFailure, OtaRuntimeState,
    OTA_CHUNK_SIZE,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const MQTT_KEEP_ALIVE_SECS: u64 = 15;
const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_HTTP_PORT: u16 = 8080;
const PRESS_HOLD_MS: u64 = 200;
const IMAGE_FILE_NAME: &str = "firmware.bin";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct OtaUploadResponse {
    accepted: bool,
    #[serde(rename = "bytesWritten")]
    bytes_written: u64,
    sha256: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_bridge_config()?;
    let network = network_from_env(|key| std::env::var(key).ok());
    let reset_reason = reset_reason_from(std::env::var("BRIDGE_RESET_REASON").ok().as_deref());
    let http_port = std::env::var("BRIDGE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_HTTP_PORT);
    let data_dir = std::env::var("BRIDGE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.heater-bridge"));

    info!(
        "bridge `{}` starting: mqtt=`{}:{}`, reset reason `{}`",
        config.placement.device_id(),
        network.mqtt_host,
        network.mqtt_port,
        reset_reason.as_str(),
    );

    let runtime = Handle::current();
    let backends = Backends {
        board: HostBoard::new(),
        ir: LoggingIr::default(),
        link: HostLink::new(runtime.clone(), &network),
        session: HostSession::new(runtime.clone(), &network, config.client_id()),
        maintenance: HostMaintenance::new(
            runtime,
            http_port,
            network.ota_password.clone(),
            data_dir,
        ),
    };
    let mut supervisor = Supervisor::new(config, reset_reason, backends)
        .context("failed to build discovery payloads")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = {
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("supervisor".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    supervisor.poll();
                }

                let availability = supervisor.topics().availability.clone();
                let session = &mut supervisor.backends_mut().session;
                if session.is_connected() {
                    if let Err(err) =
                        session.publish(&availability, PAYLOAD_OFFLINE.as_bytes(), true)
                    {
                        warn!("{err}");
                    }
                }
                session.disconnect();
            })
            .context("failed to spawn supervisor thread")?
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    shutdown.store(true, Ordering::Relaxed);

    tokio::task::spawn_blocking(move || worker.join())
        .await?
        .map_err(|_| anyhow::anyhow!("supervisor thread panicked"))?;
    Ok(())
}

fn load_bridge_config() -> anyhow::Result<BridgeConfig> {
    let Ok(path) = std::env::var("HEATER_BRIDGE_CONFIG") else {
        return Ok(BridgeConfig::default());
    };

    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("config file `{path}` not found, using defaults");
            return Ok(BridgeConfig::default());
        }
        Err(err) => return Err(err).with_context(|| format!("failed to read `{path}`")),
    };

    let config =
        BridgeConfig::from_json(&raw).with_context(|| format!("invalid config in `{path}`"))?;
    info!("loaded bridge config from `{path}`");
    Ok(config)
}

fn network_from_env(lookup: impl Fn(&str) -> Option<String>) -> NetworkConfig {
    let defaults = NetworkConfig::default();
    NetworkConfig {
        mqtt_host: lookup("MQTT_HOST").unwrap_or(defaults.mqtt_host),
        mqtt_port: lookup("MQTT_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(defaults.mqtt_port),
        mqtt_user: lookup("MQTT_USER").unwrap_or(defaults.mqtt_user),
        mqtt_pass: lookup("MQTT_PASS").unwrap_or(defaults.mqtt_pass),
        ota_password: lookup("OTA_PASSWORD").unwrap_or(defaults.ota_password),
        ..defaults
    }
}

/// A host process start is a software restart unless told otherwise.
fn reset_reason_from(raw: Option<&str>) -> ResetReason {
    let Some(raw) = raw else {
        return ResetReason::Software;
    };

    raw.parse().unwrap_or_else(|()| {
        warn!("unrecognized BRIDGE_RESET_REASON `{raw}`");
        ResetReason::Unknown
    })
}

struct HostBoard {
    presses: Receiver<()>,
    held_until_ms: u64,
}

impl HostBoard {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("stdin-button".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    match line.trim() {
                        "" => {}
                        input if input.eq_ignore_ascii_case("press") => {
                            if tx.send(()).is_err() {
                                break;
                            }
                        }
                        input => warn!("unknown console input `{input}`; type `press`"),
                    }
                }
            });
        if let Err(err) = spawned {
            warn!("restore button console unavailable: {err}");
        }

        Self {
            presses: rx,
            held_until_ms: 0,
        }
    }
}

impl Board for HostBoard {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    fn button_level(&mut self) -> Level {
        let now_ms = self.now_ms();
        while self.presses.try_recv().is_ok() {
            info!("simulated restore button press");
            self.held_until_ms = now_ms.saturating_add(PRESS_HOLD_MS);
        }
        held_level(now_ms, self.held_until_ms)
    }
}

fn held_level(now_ms: u64, held_until_ms: u64) -> Level {
    if now_ms < held_until_ms {
        Level::Low
    } else {
        Level::High
    }
}

#[derive(Default)]
struct LoggingIr {
    frames: u64,
}

impl IrEmitter for LoggingIr {
    fn emit(&mut self, code: PulseCode) {
        self.frames = self.frames.saturating_add(1);
        info!(
            frame = self.frames,
            timings = code.timings().len(),
            "ir {code}"
        );
    }
}

/// The host's own network is assumed up once the broker name resolves.
/// Resolution runs on the tokio runtime and flips `resolved` when it succeeds.
struct HostLink {
    runtime: Handle,
    target: String,
    resolved: Arc<AtomicBool>,
    lookup: Option<JoinHandle<()>>,
}

impl HostLink {
    fn new(runtime: Handle, network: &NetworkConfig) -> Self {
        Self {
            runtime,
            target: format!("{}:{}", network.mqtt_host, network.mqtt_port),
            resolved: Arc::new(AtomicBool::new(false)),
            lookup: None,
        }
    }
}

impl NetworkLink for HostLink {
    fn is_up(&self) -> bool {
        self.resolved.load(Ordering::Relaxed)
    }

    fn begin_connect(&mut self) -> Result<(), TransportError> {
        if self.lookup.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("lookup of {} still running", self.target);
            return Ok(());
        }

        let target = self.target.clone();
        let resolved = self.resolved.clone();
        self.lookup = Some(self.runtime.spawn(async move {
            match tokio::net::lookup_host(target.as_str()).await {
                Ok(mut addrs) => {
                    if addrs.next().is_some() {
                        resolved.store(true, Ordering::Relaxed);
                    } else {
                        warn!("{target} has no addresses");
                    }
                }
                Err(err) => warn!("cannot resolve {target}: {err}"),
            }
        }));
        Ok(())
    }
}

/// One rumqttc client per connection attempt. Its event loop runs on the
/// tokio runtime and ends with the connection.
struct HostSession {
    runtime: Handle,
    client_id: String,
    host: String,
    port: u16,
    user: String,
    pass: String,
    client: Option<AsyncClient>,
    event_loop: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    inbound_tx: Sender<InboundMessage>,
    inbound_rx: Receiver<InboundMessage>,
}

impl HostSession {
    fn new(runtime: Handle, network: &NetworkConfig, client_id: String) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        Self {
            runtime,
            client_id,
            host: network.mqtt_host.clone(),
            port: network.mqtt_port,
            user: network.mqtt_user.clone(),
            pass: network.mqtt_pass.clone(),
            client: None,
            event_loop: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbound_tx,
            inbound_rx,
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        match &self.client {
            Some(client) if self.is_connected() => Ok(client),
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl MqttSession for HostSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), TransportError> {
        self.disconnect();

        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(MQTT_KEEP_ALIVE_SECS));
        options.set_last_will(rumqttc::LastWill::new(
            will.topic,
            will.payload,
            QoS::AtLeastOnce,
            will.retain,
        ));
        if !self.user.is_empty() {
            options.set_credentials(&self.user, &self.pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        self.event_loop = Some(self.runtime.spawn(drive_event_loop(
            eventloop,
            connected.clone(),
            self.inbound_tx.clone(),
        )));
        self.connected = connected;
        self.client = Some(client);
        debug!("mqtt connecting to {}:{}", self.host, self.port);
        Ok(())
    }

    fn disconnect(&mut self) {
        let was_connected = self.connected.swap(false, Ordering::Relaxed);
        if let Some(client) = self.client.take() {
            if let Err(err) = client.try_disconnect() {
                debug!("mqtt disconnect: {err}");
            }
        }

        // A live event loop exits on its own once the disconnect is sent.
        if let Some(task) = self.event_loop.take() {
            if !was_connected {
                task.abort();
            }
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|err| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client()?
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|err| TransportError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    fn poll_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound_rx.try_recv().ok()
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    inbound: Sender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("mqtt connected");
                connected.store(true, Ordering::Relaxed);
            }
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                if message.payload.len() > MAX_MQTT_PAYLOAD_BYTES {
                    warn!(
                        "dropping oversized MQTT payload on topic {} ({} bytes)",
                        message.topic,
                        message.payload.len()
                    );
                    continue;
                }

                let inbound_message = InboundMessage {
                    topic: message.topic,
                    payload: message.payload.to_vec(),
                };
                if inbound.send(inbound_message).is_err() {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("mqtt disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt connection error: {err}");
                break;
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
}

#[derive(Clone)]
struct OtaContext {
    state: Arc<Mutex<OtaRuntimeState>>,
    events: EventSink,
    password: Arc<str>,
    data_dir: Arc<PathBuf>,
}

/// Accepts firmware images over HTTP and stores them in the data directory.
struct HostMaintenance {
    runtime: Handle,
    port: u16,
    context: OtaContext,
    events: Receiver<MaintenanceEvent>,
    server: Option<JoinHandle<()>>,
}

impl HostMaintenance {
    fn new(runtime: Handle, port: u16, password: String, data_dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            runtime,
            port,
            context: OtaContext {
                state: Arc::new(Mutex::new(OtaRuntimeState::default())),
                events: EventSink(tx),
                password: password.into(),
                data_dir: Arc::new(data_dir),
            },
            events: rx,
            server: None,
        }
    }
}

impl Maintenance for HostMaintenance {
    fn begin(&mut self) -> Result<(), TransportError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = std::net::TcpListener::bind(addr)
            .map_err(|err| TransportError::Maintenance(format!("bind {addr}: {err}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| TransportError::Maintenance(err.to_string()))?;

        let app = Router::new()
            .route("/api/ota/status", get(handle_get_ota_status))
            .route("/api/ota/apply", post(handle_post_ota_apply))
            .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
            .with_state(self.context.clone());

        self.server = Some(self.runtime.spawn(async move {
            let listener = match TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(err) => {
                    warn!("ota listener setup failed: {err}");
                    return;
                }
            };
            if let Err(err) = axum::serve(listener, app).await {
                warn!("ota server stopped: {err}");
            }
        }));

        info!("ota endpoint listening on http://{addr}/api/ota/apply");
        Ok(())
    }

    fn poll_event(&mut self) -> Option<MaintenanceEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for HostMaintenance {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

async fn handle_get_ota_status(State(ota): State<OtaContext>) -> impl IntoResponse {
    let status = ota
        .state
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .status();
    Json(status)
}

async fn handle_post_ota_apply(
    State(ota): State<OtaContext>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    if !password_matches(&ota.password, header("x-ota-password")) {
        warn!("ota upload rejected: bad password");
        ota.events.emit(MaintenanceEvent::Error(OtaError::Auth));
        return error_response(StatusCode::FORBIDDEN, "invalid OTA password");
    }

    let expected_sha = match header("x-ota-sha256").map(normalize_sha256).transpose() {
        Ok(expected) => expected,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let started = ota
        .state
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .start("upload".to_string(), Some(body.len() as u64));
    if let Err(message) = started {
        return error_response(StatusCode::CONFLICT, message);
    }

    ota.events.emit(MaintenanceEvent::Start);
    match store_image(&ota, &body, expected_sha.as_deref()).await {
        Ok((bytes_written, sha256)) => {
            info!("ota image stored ({bytes_written} bytes, sha256 {sha256})");
            ota.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .finish(bytes_written, sha256.clone());
            ota.events.emit(MaintenanceEvent::End);
            Json(OtaUploadResponse {
                accepted: true,
                bytes_written,
                sha256,
            })
            .into_response()
        }
        Err(failure) => {
            warn!("ota upload failed: {failure}");
            ota.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .fail(failure.to_string());
            ota.events.emit(MaintenanceEvent::Error(failure.stage));
            let status = match failure.stage {
                OtaError::Receive | OtaError::End => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, &failure.to_string())
        }
    }
}

async fn store_image(
    ota: &OtaContext,
    image: &[u8],
    expected_sha: Option<&str>,
) -> Result<(u64, String), OtaFailure> {
    let mut digest = ImageDigest::default();
    for chunk in image.chunks(OTA_CHUNK_SIZE) {
        digest.update(chunk);
        let progress = ota
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_written(digest.bytes());
        if let Some(percent) = progress {
            ota.events.emit(MaintenanceEvent::Progress { percent });
        }
    }

    let bytes_written = digest.bytes();
    let sha256 = digest.verify(expected_sha)?;

    tokio::fs::create_dir_all(ota.data_dir.as_ref())
        .await
        .map_err(|err| OtaFailure::new(OtaError::Begin, err))?;
    tokio::fs::write(ota.data_dir.join(IMAGE_FILE_NAME), image)
        .await
        .map_err(OtaFailure::at(OtaError::End, "failed writing OTA image"))?;

    Ok((bytes_written, sha256))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
