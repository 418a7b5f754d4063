//! Runtime wiring.
//!
//! Connects the bus, builds the controller and runs it until Ctrl-C/SIGTERM.

use anyhow::{Context, Result};

use amp_bus::{BusClient, InboundMessage, ShutdownSignal};

use crate::audio::CommandAudioSource;
use crate::cli::Args;
use crate::clock::SystemClock;
use crate::config::{ConfigFile, Settings};
use crate::controller::AmplifierController;
use crate::transport::BusTransport;

/// Resolve settings from the config file plus CLI overrides.
pub fn settings_from_args(args: &Args) -> Result<Settings> {
    let cfg = match args.config.as_ref() {
        Some(path) => ConfigFile::load(path)?,
        None => {
            let auto_path = std::env::current_exe()
                .ok()
                .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
            match auto_path {
                Some(path) if path.exists() => ConfigFile::load(&path)?,
                _ if args.broker_host.is_some() => ConfigFile::default(),
                _ => {
                    return Err(anyhow::anyhow!(
                        "config file is required; use --config or --broker-host"
                    ));
                }
            }
        }
    };
    apply_overrides(cfg, args)
}

fn apply_overrides(mut cfg: ConfigFile, args: &Args) -> Result<Settings> {
    if let Some(host) = args.broker_host.as_ref() {
        cfg.broker.host = Some(host.clone());
    }
    if let Some(port) = args.broker_port {
        cfg.broker.port = Some(port);
    }
    if let Some(secs) = args.timeout_secs {
        cfg.controller.timeout_secs = Some(secs);
    }
    Settings::from_config(&cfg)
}

/// Connect to the broker and run the control loop until shutdown.
pub fn run(settings: Settings) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::info!("shutdown requested");
            shutdown.trigger();
        }) {
            tracing::warn!(error = %e, "failed to install signal handler");
        }
    }

    let bus = BusClient::connect(&settings.bus).context("connect to broker")?;
    bus.on_message(log_inbound);

    let transport = BusTransport::new(bus.clone(), settings.command_topic);
    let audio = CommandAudioSource::new(settings.audio);
    let mut controller = AmplifierController::new(audio, transport, SystemClock, settings.controller);
    controller.run(&shutdown);

    bus.shutdown();
    Ok(())
}

/// Inbound messages carry no commands yet; they are only logged.
fn log_inbound(msg: &InboundMessage) {
    tracing::debug!(
        topic = %msg.topic,
        payload = msg.payload_str().unwrap_or("<binary>"),
        "inbound message"
    );
}
