use core::ffi::c_void;
use std::{
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::client::Client as HttpClient,
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{delay, task::queue::Queue};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::{self, esp},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use pantry_common::{
    provision::run_session,
    storage::{CredentialStore, StorageError, STORAGE_NAMESPACE},
    Credentials, DebounceEngine, NodeConfig, ProvisioningSession, ReportConfig, ReportScheduler,
    StateReport,
};

use crate::bt;

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const NVS_VALUE_BUF_LEN: usize = 256;
const HTTP_RESPONSE_BUF_LEN: usize = 512;

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl CredentialStore for NvsStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap();
        let nvs = EspNvs::new(self.partition.clone(), STORAGE_NAMESPACE, true)
            .map_err(|err| StorageError::Backend(err.to_string()))?;

        let mut buffer = [0_u8; NVS_VALUE_BUF_LEN];
        let value = nvs
            .get_str(key, &mut buffer)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(value.map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), STORAGE_NAMESPACE, true)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        nvs.set_str(key, value)
            .map_err(|err| StorageError::Backend(err.to_string()))
    }
}

fn millis() -> u64 {
    (unsafe { sys::esp_timer_get_time() } / 1_000) as u64
}

/// Inputs are active-low: electrically low means pressed.
fn pin_is_pressed(pin: u8) -> bool {
    unsafe { sys::gpio_get_level(pin as sys::gpio_num_t) == 0 }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = NodeConfig::default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let mut store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let peripherals = Peripherals::take()?;
    let (wifi_modem, mut bt_modem) = peripherals.modem.split();

    let mut credentials = Credentials::load(&store).context("failed to read stored credentials")?;

    if !credentials.is_provisioned() {
        warn!("credentials incomplete; opening bluetooth provisioning window");
        let mut radio = bt::Bluetooth::new();
        match radio.enable(&mut bt_modem, nvs_partition.clone()) {
            Ok(()) => {
                let mut session = ProvisioningSession::new(config.provisioning.max_attempts);
                let poll_interval = Duration::from_millis(config.provisioning.poll_interval_ms);
                let state = run_session(
                    &mut session,
                    bt::inbound(),
                    &mut store,
                    &mut radio,
                    || thread::sleep(poll_interval),
                );
                info!(
                    "provisioning session finished: {state:?}, radio {:?}",
                    radio.lifecycle()
                );
                credentials = Credentials::load(&store)?;
            }
            Err(err) => {
                // Provisioning stays disabled for this boot; the node keeps
                // reporting with whatever it has.
                warn!("bluetooth bring-up failed: {err:#}");
            }
        }
    }

    let _wifi = match (&credentials.wifi_ssid, &credentials.wifi_pass) {
        (Some(ssid), Some(pass)) => {
            match connect_wifi(wifi_modem, sys_loop.clone(), nvs_partition, ssid, pass) {
                Ok(wifi) => Some(wifi),
                Err(err) => {
                    warn!("wifi startup failed: {err:#}");
                    None
                }
            }
        }
        _ => {
            warn!("no stored wifi credentials; running offline");
            None
        }
    };

    let unit_id = credentials.unit_id.clone().unwrap_or_default();
    if unit_id.is_empty() {
        warn!("no unit id provisioned; reports will carry an empty id");
    }

    let engine = Arc::new(Mutex::new(DebounceEngine::register(
        config.button_mask,
        config.debounce.bounce_window_ms,
        pin_is_pressed,
    )));
    let scheduler = Arc::new(Mutex::new(ReportScheduler::new(&config.report, millis())));

    let queue = init_input_pins(config.button_mask, config.debounce.event_queue_depth)?;
    spawn_debounce_worker(queue, engine.clone(), scheduler.clone())?;

    info!(
        "pantry node up: {} input(s), first report in {}s",
        engine.lock().unwrap().pins().len(),
        config.report.startup_delay_ms / 1_000
    );

    let auth_token = credentials.auth_token.clone();
    loop {
        thread::sleep(Duration::from_millis(config.report.tick_ms));

        let now = millis();
        if !scheduler.lock().unwrap().is_due(now) {
            continue;
        }

        let states = {
            let mut engine = engine.lock().unwrap();
            engine.refresh(pin_is_pressed);
            engine.states()
        };
        let body = StateReport::new(unit_id.clone(), states).to_json();
        info!("send to server: {body}");

        match post_report(&config.report, &body, auth_token.as_deref()) {
            Ok(status) => info!("report delivered, HTTP {status}"),
            // Not retried here; the next periodic tick resends current state.
            Err(err) => warn!("report delivery failed: {err:#}"),
        }

        scheduler.lock().unwrap().mark_sent(millis());
    }
}

/// Queue fed from interrupt context. The ISR handler posts with zero
/// timeout and drops the event when the queue is full; the next aggregation
/// tick resamples live levels anyway.
static EDGE_QUEUE: OnceLock<Queue<u32>> = OnceLock::new();

unsafe extern "C" fn gpio_isr_handler(arg: *mut c_void) {
    let pin = arg as u32;
    if let Some(queue) = EDGE_QUEUE.get() {
        let _ = queue.send_back(pin, 0);
    }
}

fn init_input_pins(mask: u64, queue_depth: usize) -> anyhow::Result<&'static Queue<u32>> {
    let queue = EDGE_QUEUE.get_or_init(|| Queue::new(queue_depth));

    let mut io_conf = sys::gpio_config_t::default();
    io_conf.pin_bit_mask = mask;
    io_conf.mode = sys::gpio_mode_t_GPIO_MODE_INPUT;
    io_conf.pull_up_en = sys::gpio_pullup_t_GPIO_PULLUP_ENABLE;
    io_conf.pull_down_en = sys::gpio_pulldown_t_GPIO_PULLDOWN_DISABLE;
    io_conf.intr_type = sys::gpio_int_type_t_GPIO_INTR_ANYEDGE;

    unsafe {
        esp!(sys::gpio_config(&io_conf)).context("gpio config failed")?;
        esp!(sys::gpio_install_isr_service(0)).context("isr service install failed")?;

        for pin in 0..=pantry_common::debounce::MAX_PIN {
            if mask & (1_u64 << pin) == 0 {
                continue;
            }
            esp!(sys::gpio_isr_handler_add(
                pin as sys::gpio_num_t,
                Some(gpio_isr_handler),
                pin as usize as *mut c_void,
            ))
            .with_context(|| format!("isr handler add failed for GPIO{pin}"))?;
            info!("GPIO{pin} registered, pressed: {}", pin_is_pressed(pin));
        }
    }

    Ok(queue)
}

fn spawn_debounce_worker(
    queue: &'static Queue<u32>,
    engine: Arc<Mutex<DebounceEngine>>,
    scheduler: Arc<Mutex<ReportScheduler>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("debounce".to_string())
        .stack_size(4096)
        .spawn(move || loop {
            let Some((pin, _)) = queue.recv_front(delay::BLOCK) else {
                continue;
            };

            let pin = pin as u8;
            let now = millis();
            let pressed = pin_is_pressed(pin);

            let accepted = engine.lock().unwrap().on_event(pin, pressed, now);
            if accepted {
                scheduler.lock().unwrap().record_activity(now);
            }
        })
        .context("failed to spawn debounce worker")?;
    Ok(())
}

fn connect_wifi<M>(
    modem: M,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    ssid: &str,
    pass: &str,
) -> anyhow::Result<EspWifi<'static>>
where
    M: esp_idf_svc::hal::peripheral::Peripheral + 'static,
    M::P: esp_idf_svc::hal::modem::WifiModemPeripheral,
{
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
        password: pass
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{ssid}`");

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected on attempt {attempt}");
                    last_err = None;
                    break;
                }
                Err(err) => {
                    warn!("wifi netif up failed on attempt {attempt}: {err:#}");
                    last_err = Some(err);
                }
            },
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(esp_wifi),
        Some(err) => Err(anyhow::Error::from(err)
            .context(format!("all {WIFI_CONNECT_ATTEMPTS} connect attempts failed"))),
    }
}

/// POSTs one report body. `Authorization: Bearer <token>` is attached when a
/// token is provisioned.
fn post_report(
    config: &ReportConfig,
    body: &str,
    auth_token: Option<&str>,
) -> anyhow::Result<u16> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(Duration::from_secs(30)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);

    let url = format!("https://{}{}", config.host, config.path);
    let auth_header = auth_token.map(|token| format!("Bearer {token}"));

    let mut headers: Vec<(&str, &str)> = vec![("Content-Type", "application/json")];
    if let Some(value) = auth_header.as_deref() {
        headers.push(("Authorization", value));
    }

    let mut request = client.post(&url, &headers)?;
    request.write_all(body.as_bytes())?;
    let mut response = request.submit().map_err(|err| anyhow!("{err:?}"))?;

    let status = response.status();
    let mut buffer = [0_u8; HTTP_RESPONSE_BUF_LEN];
    let read = response.read(&mut buffer).unwrap_or(0);
    if read > 0 {
        info!("server response: {}", String::from_utf8_lossy(&buffer[..read]));
    }

    Ok(status)
}
