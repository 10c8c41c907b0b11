//! `beacon-cli` – interactive host for the guidance engine.
//!
//! 1. Installs tracing (`RUST_LOG`, `BEACON_LOG_FORMAT`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.beacon/config.toml` (with `BEACON_*` overrides) and the
//!    persisted calibration, writing defaults on first run.
//! 3. Connects a simulated tracking platform and wires the guidance loop to
//!    a logging audio sink and, when enabled, the TCP telemetry collector.
//! 4. Drops the user into a REPL for feeding poses, targets and markers.
//! 5. Intercepts **Ctrl-C** to publish a session-fault alert and exit.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use beacon_hal::audio::{AudioDispatcher, LoggingAudio};
use beacon_hal::platform::SimulatedPlatform;
use beacon_hal::telemetry_link::{TcpTelemetryTransport, TelemetryDispatcher};
use beacon_middleware::{EventBus, Topic};
use beacon_perception::markers::MarkerRegistry;
use beacon_runtime::calibration::{self, CalibrationEngine, CalibrationParameters, CalibrationStore, FileCalibrationStore};
use beacon_runtime::guidance_loop::{GuidanceLoop, GuidanceLoopConfig};
use beacon_runtime::session::SessionContext;
use beacon_runtime::telemetry::init_tracing;
use beacon_types::{Event, EventPayload, SessionFaultKind};

fn main() {
    let _tracing = init_tracing("beacon");

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => {
            println!("  Config: {}", config::config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    if !config::config_path().exists() {
        match config::save(&cfg) {
            Ok(()) => println!("  {} wrote default config", "✓".green()),
            Err(e) => warn!(error = %e, "could not write default config"),
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Shutdown wiring ───────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let bus = EventBus::new(cfg.bus_capacity);
    {
        let shutdown = shutdown.clone();
        let bus = bus.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            let fault = Event::new(
                "beacon-cli",
                EventPayload::SessionFault {
                    kind: SessionFaultKind::Service,
                    message: "operator interrupt".to_string(),
                },
            );
            let _ = bus.publish_to(Topic::SystemAlerts, fault);
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!(error = %e, "Failed to install Ctrl-C handler");
        }
    }

    // ── Calibration ───────────────────────────────────────────────────────
    let store: Arc<dyn CalibrationStore> = Arc::new(FileCalibrationStore::new(cfg.calibration_path.clone()));
    let params = match calibration::load_or_initialize(store.as_ref()) {
        Ok(p) => {
            println!("  Calibration: {}", cfg.calibration_path.display().to_string().bold());
            p
        }
        Err(e) => {
            println!("{}: {} – using defaults", "Calibration error".red(), e);
            CalibrationParameters::default()
        }
    };
    let engine = match CalibrationEngine::new(params) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("{}: {}", "Invalid calibration".red(), e);
            std::process::exit(1);
        }
    };

    // ── Boundaries ────────────────────────────────────────────────────────
    let audio = match AudioDispatcher::spawn(Arc::new(LoggingAudio), runtime.handle()) {
        Ok(audio) => audio,
        Err(e) => {
            eprintln!("{}: {}", "Audio engine failed to start".red(), e);
            std::process::exit(1);
        }
    };
    let telemetry = cfg.telemetry_enabled.then(|| {
        let transport = TcpTelemetryTransport::new(
            &cfg.telemetry_host,
            cfg.telemetry_port,
            cfg.telemetry_connect_timeout(),
        );
        println!("  Telemetry: {}", transport.address().bold());
        TelemetryDispatcher::new(Arc::new(transport), runtime.handle().clone())
    });
    if telemetry.is_none() {
        println!("  Telemetry: {}", "disabled".dimmed());
    }

    let guidance = GuidanceLoop::new(
        GuidanceLoopConfig {
            telemetry_enabled: cfg.telemetry_enabled,
            ..Default::default()
        },
        engine,
        audio,
        telemetry,
        bus,
    );

    // ── Session ───────────────────────────────────────────────────────────
    let session = SessionContext::new(Arc::new(SimulatedPlatform::new()));
    match session.connect() {
        Ok(_) => println!("  Session: {}", "connected (simulated platform)".green()),
        Err(e) => println!("  Session: {} {}", "not connected:".red(), e),
    }
    info!("beacon host ready");

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(
        repl::Host {
            runtime,
            session,
            guidance,
            store,
            markers: MarkerRegistry::new(),
        },
        shutdown,
    );
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                         "#.bold().cyan());
    println!("{}", r#"  / _ )___ ___ _______  ___    "#.bold().cyan());
    println!("{}", r#" / _  / -_) _ `/ __/ _ \/ _ \  "#.bold().cyan());
    println!("{}", r#"/____/\__/\_,_/\__/\___/_//_/  "#.bold().cyan());
    println!();
    println!("  {} {}", "Beacon".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Spatial-audio guidance engine");
    println!();
}
