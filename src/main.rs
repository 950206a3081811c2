//! PinLink Firmware: Main Entry Point
//!
//! Hexagonal architecture with a single cooperative poll loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BoardGpio     EspSystem     NvsAdapter     Esp32Clock         │
//! │  (GpioPort)    (SystemPort)  (Config+NVS)   (ClockPort)        │
//! │  TcpTransport  LogEventSink                                    │
//! │  (Transport)   (EventSink)                                     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              GpioService (pure logic)                  │    │
//! │  │  PinRegistry · Scheduler · UpdateManager               │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Server (framer + RpcEngine) · Watchdog                        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The network interface is expected to be up before step 6; link
//! bring-up is handled outside this firmware.
#![deny(unused_must_use)]

use anyhow::{Result, anyhow};
use log::{error, info, warn};

use pinlink::adapters::hardware::BoardGpio;
use pinlink::adapters::log_sink::LogEventSink;
use pinlink::adapters::nvs::NvsAdapter;
use pinlink::adapters::system::EspSystem;
use pinlink::adapters::tcp_transport::TcpTransport;
use pinlink::adapters::time::Esp32Clock;
use pinlink::app::ports::{ClockPort, ConfigPort};
use pinlink::app::service::{GpioService, Ports};
use pinlink::config::ServerConfig;
use pinlink::diagnostics;
use pinlink::drivers::hw_init;
use pinlink::drivers::watchdog::{DEFAULT_TIMEOUT_MS, Watchdog};
use pinlink::rpc::server::Server;
use pinlink::update::{self, BootDecision, UpdateManager};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  PinLink v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. NVS, config, previous panic ────────────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {}", e))?;
    diagnostics::install_panic_handler();

    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            ServerConfig::default()
        }
    };
    info!(
        "Config: port={} poll={}ms action_delay={}ms board={}",
        config.port, config.poll_interval_ms, config.system_action_delay_ms, config.board
    );

    let last_panic = diagnostics::take_last_panic(&mut nvs);

    // ── 3. Boot marker / rollback check ───────────────────────
    let mut updates = UpdateManager::load(&nvs, env!("CARGO_PKG_VERSION"), config.max_trial_boots);
    match updates.on_boot(&mut nvs) {
        Ok(BootDecision::RolledBack { from, to }) => {
            error!("Boot: slot {:?} rolled back to {:?}", from, to);
            update::restart_after_rollback(to);
        }
        Ok(decision) => info!("Boot: {:?}", decision),
        Err(e) => warn!("Boot marker check failed: {}", e),
    }

    // ── 4. Peripherals + adapters ─────────────────────────────
    if let Err(e) = hw_init::init_peripherals() {
        error!("HAL init failed: {}", e);
    }
    let mut gpio = BoardGpio::new();
    let mut system = EspSystem::new();
    let mut sink = LogEventSink::new();
    let clock = Esp32Clock::new();

    // ── 5. Domain service ─────────────────────────────────────
    let mut service = GpioService::new(&config, updates);
    service.set_last_panic(last_panic);

    // ── 6. Command server ─────────────────────────────────────
    let transport = TcpTransport::bind(config.port)
        .map_err(|e| anyhow!("TCP listen on port {} failed: {}", config.port, e))?;
    let mut server = Server::new(transport);
    info!("Listening on TCP port {}", config.port);

    // ── 7. Trial image reached a serving state ────────────────
    if let Err(e) = service.update_mut().confirm(&mut nvs) {
        warn!("Update confirm failed: {}", e);
    }

    // ── 8. Watchdog ───────────────────────────────────────────
    let watchdog = Watchdog::new(DEFAULT_TIMEOUT_MS);

    info!("System ready. Entering poll loop.");

    // ── 9. Poll loop ──────────────────────────────────────────
    let mut ports = Ports {
        gpio: &mut gpio,
        system: &mut system,
        storage: &mut nvs,
        sink: &mut sink,
    };
    let poll_ms = u64::from(config.poll_interval_ms);

    loop {
        let now = clock.now_ms();
        server.poll(now, &mut service, &mut ports);

        let now = clock.now_ms();
        service.tick(now, &mut ports);

        watchdog.feed();

        let idle_ms = service
            .next_deadline()
            .map_or(poll_ms, |deadline| deadline.saturating_sub(now).clamp(1, poll_ms));

        #[cfg(target_os = "espidf")]
        esp_idf_hal::delay::FreeRtos::delay_ms(idle_ms as u32);

        #[cfg(not(target_os = "espidf"))]
        std::thread::sleep(std::time::Duration::from_millis(idle_ms));
    }
}
