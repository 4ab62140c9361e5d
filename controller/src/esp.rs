use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::{Read, Write},
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::FreeRtos,
    gpio::{AnyIOPin, AnyOutputPin, Input, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals, rmt::RMT},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{EspMqttClient, LwtConfiguration, MqttClientConfiguration},
    nvs::EspDefaultNvsPartition,
    ota::EspOta,
    wifi::EspWifi,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use heater_bridge_common::{
    Backends, Board, BridgeConfig, InboundMessage, LastWill, Level, Maintenance,
    MaintenanceEvent, MqttSession, NetworkConfig, NetworkLink, OtaError, ResetReason, Supervisor,
    TransportError,
};

use crate::{
    ir::IrTransmitter,
    ota::{
        normalize_sha256, password_matches, validate_source_url, EventSink, ImageDigest,
        OtaApplyResponse, OtaFailure, OtaRuntimeState, OTA_CHUNK_SIZE,
    },
};

const MAX_HTTP_BODY: usize = 4096;
const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const OTA_REBOOT_DELAY_MS: u64 = 800;

#[derive(Debug, Deserialize)]
struct OtaApplyRequest {
    url: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    reboot: Option<bool>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = BridgeConfig::default();
    config.sanitize();
    let network = compiled_network_config();
    let reset_reason = read_reset_reason();

    info!(
        "bridge `{}` booting: reset reason `{}`, ssid=`{}`, mqtt=`{}:{}`",
        config.placement.device_id(),
        reset_reason.as_str(),
        network.wifi_ssid,
        network.mqtt_host,
        network.mqtt_port,
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, rmt, .. } = Peripherals::take()?;

    let ir = match init_ir_transmitter(rmt, &config) {
        Ok(transmitter) => {
            info!(
                "IR transmitter initialized on RMT channel{} / GPIO{} @ {}kHz",
                config.ir.rmt_channel, config.pins.ir_tx, config.ir.carrier_khz
            );
            transmitter
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            IrTransmitter::disabled()
        }
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    if let Ok(mut ota) = EspOta::new() {
        if let Err(err) = ota.mark_running_slot_valid() {
            warn!("failed to mark running OTA slot valid: {err:?}");
        }
    }

    let backends = Backends {
        board: EspBoard::new(config.pins.restore_button),
        ir,
        link: WifiLink::new(modem, sys_loop, nvs_partition, &network)
            .context("wifi startup failed")?,
        session: EspSession::new(&network, config.client_id()),
        maintenance: EspMaintenance::new(&network),
    };
    let mut supervisor = Supervisor::new(config, reset_reason, backends)
        .context("failed to build discovery payloads")?;

    loop {
        supervisor.poll();
    }
}

fn compiled_network_config() -> NetworkConfig {
    let defaults = NetworkConfig::default();
    let compiled =
        |value: Option<&str>, fallback: String| value.map(str::to_string).unwrap_or(fallback);

    NetworkConfig {
        wifi_ssid: compiled(option_env!("WIFI_SSID"), defaults.wifi_ssid),
        wifi_pass: compiled(option_env!("WIFI_PASS"), defaults.wifi_pass),
        mqtt_host: compiled(option_env!("MQTT_HOST"), defaults.mqtt_host),
        mqtt_port: option_env!("MQTT_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(defaults.mqtt_port),
        mqtt_user: compiled(option_env!("MQTT_USER"), defaults.mqtt_user),
        mqtt_pass: compiled(option_env!("MQTT_PASS"), defaults.mqtt_pass),
        ota_password: compiled(option_env!("OTA_PASSWORD"), defaults.ota_password),
        hostname: compiled(option_env!("BRIDGE_HOSTNAME"), defaults.hostname),
    }
}

fn read_reset_reason() -> ResetReason {
    use esp_idf_svc::sys;

    match unsafe { sys::esp_reset_reason() } {
        sys::esp_reset_reason_t_ESP_RST_POWERON => ResetReason::PowerOn,
        sys::esp_reset_reason_t_ESP_RST_BROWNOUT => ResetReason::Brownout,
        sys::esp_reset_reason_t_ESP_RST_SW => ResetReason::Software,
        sys::esp_reset_reason_t_ESP_RST_PANIC => ResetReason::Panic,
        sys::esp_reset_reason_t_ESP_RST_INT_WDT => ResetReason::InterruptWatchdog,
        sys::esp_reset_reason_t_ESP_RST_TASK_WDT => ResetReason::TaskWatchdog,
        sys::esp_reset_reason_t_ESP_RST_WDT => ResetReason::Watchdog,
        sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => ResetReason::DeepSleep,
        sys::esp_reset_reason_t_ESP_RST_EXT => ResetReason::External,
        sys::esp_reset_reason_t_ESP_RST_SDIO => ResetReason::Sdio,
        _ => ResetReason::Unknown,
    }
}

fn init_ir_transmitter(rmt: RMT, config: &BridgeConfig) -> anyhow::Result<IrTransmitter> {
    if config.pins.ir_tx < 0 {
        return Err(anyhow!("invalid tx pin: {}", config.pins.ir_tx));
    }

    let pin = config.pins.ir_tx;
    let carrier_khz = config.ir.carrier_khz;

    match config.ir.rmt_channel {
        0 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel0, AnyOutputPin::new(pin), carrier_khz)
        },
        1 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel1, AnyOutputPin::new(pin), carrier_khz)
        },
        2 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel2, AnyOutputPin::new(pin), carrier_khz)
        },
        3 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel3, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel4, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel5, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel6, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel7, AnyOutputPin::new(pin), carrier_khz)
        },
        channel => Err(anyhow!("unsupported RMT channel: {channel}")),
    }
}

/// GPIO button, FreeRTOS delays and the task watchdog.
struct EspBoard {
    button: Option<PinDriver<'static, AnyIOPin, Input>>,
}

impl EspBoard {
    fn new(pin: i32) -> Self {
        let button = match init_button(pin) {
            Ok(driver) => Some(driver),
            Err(err) => {
                warn!("restore button unavailable on GPIO{pin}: {err:#}");
                None
            }
        };
        Self { button }
    }
}

fn init_button(pin: i32) -> anyhow::Result<PinDriver<'static, AnyIOPin, Input>> {
    if pin < 0 {
        return Err(anyhow!("invalid button pin: {pin}"));
    }

    let mut driver = unsafe { PinDriver::input(AnyIOPin::new(pin)) }?;
    driver.set_pull(Pull::Up)?;
    Ok(driver)
}

impl Board for EspBoard {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&mut self, ms: u64) {
        FreeRtos::delay_ms(ms.try_into().unwrap_or(u32::MAX));
        feed_watchdog();
    }

    fn button_level(&mut self) -> Level {
        match &self.button {
            Some(pin) if pin.is_low() => Level::Low,
            _ => Level::High,
        }
    }
}

struct WifiLink {
    wifi: EspWifi<'static>,
    has_credentials: bool,
}

impl WifiLink {
    /// Configures and starts the station; connecting is left to the supervisor.
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> anyhow::Result<Self> {
        let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

        if let Err(err) = wifi.sta_netif_mut().set_hostname(&network.hostname) {
            warn!("failed to set hostname `{}`: {err}", network.hostname);
        }

        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .wifi_pass
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        wifi.start()?;
        disable_wifi_power_save();
        info!("wifi started for `{}`", network.wifi_ssid);

        Ok(Self {
            wifi,
            has_credentials: !network.wifi_ssid.trim().is_empty(),
        })
    }
}

impl NetworkLink for WifiLink {
    fn is_up(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn begin_connect(&mut self) -> Result<(), TransportError> {
        if !self.has_credentials {
            return Err(TransportError::Link("no wifi credentials compiled in".into()));
        }

        self.wifi
            .connect()
            .map_err(|err| TransportError::Link(err.to_string()))
    }
}

/// ESP-IDF MQTT client. The client runs its own task and reports through the
/// event callback; a fresh client is built for every connection attempt.
struct EspSession {
    url: String,
    client_id: String,
    user: String,
    pass: String,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
    inbound_tx: Sender<InboundMessage>,
    inbound_rx: Receiver<InboundMessage>,
}

impl EspSession {
    fn new(network: &NetworkConfig, client_id: String) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        Self {
            url: format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port),
            client_id,
            user: network.mqtt_user.clone(),
            pass: network.mqtt_pass.clone(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbound_tx,
            inbound_rx,
        }
    }

    fn client(&mut self) -> Result<&mut EspMqttClient<'static>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl MqttSession for EspSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn connect(&mut self, will: &LastWill<'_>) -> Result<(), TransportError> {
        self.disconnect();

        let conf = MqttClientConfiguration {
            client_id: Some(&self.client_id),
            username: (!self.user.is_empty()).then_some(self.user.as_str()),
            password: (!self.pass.is_empty()).then_some(self.pass.as_str()),
            lwt: Some(LwtConfiguration {
                topic: will.topic,
                payload: will.payload.as_bytes(),
                qos: QoS::AtLeastOnce,
                retain: will.retain,
            }),
            ..Default::default()
        };

        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();
        let inbound = self.inbound_tx.clone();
        let client = EspMqttClient::new_cb(&self.url, &conf, move |event| {
            let payload = event.payload();
            match payload {
                EventPayload::Connected(_) => {
                    info!("mqtt connected");
                    flag.store(true, Ordering::Relaxed);
                }
                EventPayload::Disconnected => {
                    flag.store(false, Ordering::Relaxed);
                }
                EventPayload::Received {
                    topic: Some(topic),
                    data,
                    details,
                    ..
                } => {
                    // We only process full MQTT payloads.
                    if !matches!(details, Details::Complete) {
                        return;
                    }

                    if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized MQTT payload on topic {} ({} bytes)",
                            topic,
                            data.len()
                        );
                        return;
                    }

                    let _ = inbound.send(InboundMessage {
                        topic: topic.to_string(),
                        payload: data.to_vec(),
                    });
                }
                _ => {}
            }
        })
        .map_err(|err| TransportError::Connect(err.to_string()))?;

        self.connected = connected;
        self.client = Some(client);
        debug!("mqtt connecting to {}", self.url);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Relaxed);
        self.client = None;
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic, QoS::AtLeastOnce)
            .map(|_| ())
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
            .enqueue(topic, QoS::AtLeastOnce, retain, payload)
            .map(|_| ())
            .map_err(|err| TransportError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    fn poll_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound_rx.try_recv().ok()
    }
}

#[derive(Clone)]
struct OtaShared {
    state: Arc<Mutex<OtaRuntimeState>>,
    events: EventSink,
    password: Arc<str>,
}

/// Pull-style OTA: the image is downloaded from a URL posted to the device.
struct EspMaintenance {
    shared: OtaShared,
    events: Receiver<MaintenanceEvent>,
    _server: Option<EspHttpServer<'static>>,
}

impl EspMaintenance {
    fn new(network: &NetworkConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            shared: OtaShared {
                state: Arc::new(Mutex::new(OtaRuntimeState::default())),
                events: EventSink(tx),
                password: network.ota_password.as_str().into(),
            },
            events: rx,
            _server: None,
        }
    }
}

impl Maintenance for EspMaintenance {
    fn begin(&mut self) -> Result<(), TransportError> {
        let server = create_http_server(self.shared.clone())
            .map_err(|err| TransportError::Maintenance(format!("{err:#}")))?;
        self._server = Some(server);
        info!("ota endpoint ready at /api/ota/apply");
        Ok(())
    }

    fn poll_event(&mut self) -> Option<MaintenanceEvent> {
        self.events.try_recv().ok()
    }
}

fn create_http_server(ota: OtaShared) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let ota = ota.clone();
        server.fn_handler("/api/ota/status", Method::Get, move |req| {
            let payload = lock(&ota.state).status();
            write_json(req, &payload)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/ota/apply", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;
        let Ok(update) = serde_json::from_slice::<OtaApplyRequest>(&body) else {
            return write_error(req, 400, "invalid ota payload");
        };

        let expected_sha = match validate_ota_apply_request(&update) {
            Ok(expected_sha) => expected_sha,
            Err(message) => return write_error(req, 400, message),
        };

        if !password_matches(&ota.password, update.password.as_deref()) {
            warn!("ota request rejected: bad password");
            ota.events.emit(MaintenanceEvent::Error(OtaError::Auth));
            return write_error(req, 403, "invalid OTA password");
        }

        match apply_ota_update(&ota, update, expected_sha) {
            Ok(payload) => write_json(req, &payload),
            Err((status_code, message)) => write_error(req, status_code, message),
        }
    })?;

    Ok(server)
}

fn validate_ota_apply_request(update: &OtaApplyRequest) -> Result<Option<String>, &'static str> {
    validate_source_url(&update.url)?;
    update.sha256.as_deref().map(normalize_sha256).transpose()
}

fn apply_ota_update(
    ota: &OtaShared,
    update: OtaApplyRequest,
    expected_sha: Option<String>,
) -> Result<OtaApplyResponse, (u16, &'static str)> {
    lock(&ota.state)
        .start(update.url.clone(), None)
        .map_err(|message| (409, message))?;
    ota.events.emit(MaintenanceEvent::Start);

    let worker = ota.clone();
    let spawn_result = thread::Builder::new()
        .name("ota-apply".into())
        .stack_size(16 * 1024)
        .spawn(move || {
            let reboot_after_apply = update.reboot.unwrap_or(true);
            match download_and_apply_ota(&worker, &update.url, expected_sha.as_deref()) {
                Ok((bytes_written, digest_hex)) => {
                    info!("OTA apply completed successfully ({bytes_written} bytes)");
                    lock(&worker.state).finish(bytes_written, digest_hex);
                    worker.events.emit(MaintenanceEvent::End);

                    if reboot_after_apply {
                        thread::sleep(Duration::from_millis(OTA_REBOOT_DELAY_MS));
                        unsafe { esp_idf_svc::sys::esp_restart() };
                    }
                }
                Err(failure) => {
                    warn!("OTA apply failed: {failure}");
                    lock(&worker.state).fail(failure.to_string());
                    worker.events.emit(MaintenanceEvent::Error(failure.stage));
                }
            }
        });

    if let Err(err) = spawn_result {
        warn!("failed to spawn OTA apply thread: {err}");
        lock(&ota.state).fail(format!("failed to spawn OTA apply thread: {err}"));
        ota.events.emit(MaintenanceEvent::Error(OtaError::Begin));
        return Err((500, "Failed to start OTA apply"));
    }

    Ok(OtaApplyResponse {
        accepted: true,
        in_progress: true,
    })
}

fn download_and_apply_ota(
    ota: &OtaShared,
    url: &str,
    expected_sha256: Option<&str>,
) -> Result<(u64, String), OtaFailure> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(Duration::from_secs(30)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let connection = EspHttpConnection::new(&http_conf)
        .map_err(OtaFailure::at(OtaError::Connect, "failed to create http client"))?;
    let mut client = HttpClient::wrap(connection);
    let request = client
        .request(Method::Get, url, &[])
        .map_err(OtaFailure::at(OtaError::Connect, "failed to open OTA url"))?;
    let mut response = request
        .submit()
        .map_err(OtaFailure::at(OtaError::Connect, "OTA request failed"))?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(OtaFailure::new(
            OtaError::Connect,
            anyhow!("OTA download failed with HTTP {status}"),
        ));
    }

    let content_length = response
        .header("content-length")
        .or_else(|| response.header("Content-Length"))
        .and_then(|value| value.parse::<u64>().ok());
    lock(&ota.state).set_total(content_length);

    let mut esp_ota =
        EspOta::new().map_err(OtaFailure::at(OtaError::Begin, "failed to acquire OTA"))?;
    let mut update = esp_ota
        .initiate_update()
        .map_err(OtaFailure::at(OtaError::Begin, "failed to initiate OTA update"))?;

    let mut digest = ImageDigest::default();
    let mut chunk = [0_u8; OTA_CHUNK_SIZE];

    loop {
        let read = response
            .read(&mut chunk)
            .map_err(OtaFailure::at(OtaError::Receive, "failed reading OTA image"))?;
        if read == 0 {
            break;
        }

        update
            .write(&chunk[..read])
            .map_err(OtaFailure::at(OtaError::Receive, "failed writing OTA data"))?;
        digest.update(&chunk[..read]);

        let progress = lock(&ota.state).record_written(digest.bytes());
        if let Some(percent) = progress {
            ota.events.emit(MaintenanceEvent::Progress { percent });
        }
    }

    let bytes_written = digest.bytes();
    let digest_hex = digest.verify(expected_sha256)?;

    update
        .complete()
        .map_err(OtaFailure::at(OtaError::End, "failed finalizing OTA image"))?;

    Ok((bytes_written, digest_hex))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
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
