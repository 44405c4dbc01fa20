use std::time::{Duration, Instant};

use pantry_common::{
    provision::run_session, Credentials, DebounceEngine, Mailbox, MemoryStore, NodeConfig,
    ProvisioningSession, RadioControl, ReportScheduler, StateReport,
};
use tracing::{info, warn};

struct SimulatedRadio;

impl RadioControl for SimulatedRadio {
    fn shutdown(&mut self) {
        info!("simulated provisioning radio disabled");
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = NodeConfig::default();
    // Simulation pacing; the device defaults are far too slow to watch.
    config.report.startup_delay_ms = 2_000;
    config.report.periodic_interval_ms = 60_000;

    let mut store = MemoryStore::new();

    // Hardware integration point: on the ESP target the message arrives over
    // the Bluetooth SPP channel. Here it can be injected via PROVISION_MSG,
    // e.g. `username{net}username password{pw}password authkey{t}authkey id{u}id`.
    if let Ok(message) = std::env::var("PROVISION_MSG") {
        let inbound = Mailbox::new();
        inbound.publish(message);

        let mut session = ProvisioningSession::new(config.provisioning.max_attempts);
        let state = run_session(
            &mut session,
            &inbound,
            &mut store,
            &mut SimulatedRadio,
            || {},
        );
        info!("provisioning session finished: {state:?}");
    }

    let credentials = Credentials::load(&store)?;
    if !credentials.is_provisioned() {
        warn!("node is not provisioned; reporting with placeholder unit id");
    }
    let unit_id = credentials.unit_id.unwrap_or_else(|| "dev-unit".to_string());

    let mut engine = DebounceEngine::register(
        config.button_mask,
        config.debounce.bounce_window_ms,
        |_| false,
    );
    let pin_ids: Vec<u8> = engine.pins().iter().map(|record| record.pin).collect();
    let mut levels = vec![false; pin_ids.len()];

    let started = Instant::now();
    let mut scheduler = ReportScheduler::new(&config.report, 0);
    let mut interval = tokio::time::interval(Duration::from_millis(config.report.tick_ms));
    let mut tick: u64 = 0;

    info!("host simulation started (unit id `{unit_id}`)");

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);
        let now_ms = started.elapsed().as_millis() as u64;

        // Hardware integration point: replace this synthetic toggle with the
        // GPIO interrupt queue on the ESP target.
        if tick % 15 == 0 && !levels.is_empty() {
            let index = ((tick / 15) as usize) % levels.len();
            levels[index] = !levels[index];

            let pin = pin_ids[index];
            if engine.on_event(pin, levels[index], now_ms) {
                scheduler.record_activity(now_ms);
                info!(
                    "pin {pin} changed to {}",
                    if levels[index] { "pressed" } else { "released" }
                );
            }
        }

        if scheduler.is_due(now_ms) {
            engine.refresh(|pin| {
                pin_ids
                    .iter()
                    .position(|candidate| *candidate == pin)
                    .map(|index| levels[index])
                    .unwrap_or(false)
            });

            let report = StateReport::new(unit_id.clone(), engine.states());
            info!("send to server: {}", report.to_json());
            scheduler.mark_sent(now_ms);
        }
    }
}
