//! amp-control: switches a networked amplifier on while the host plays audio.
//!
//! ## Loop
//! 1. **Poll**: every 100 ms the host mixer is asked whether anything is playing.
//! 2. **Decide**: activity within the trailing timeout powers the amplifier on;
//!    an expired timeout powers it off.
//! 3. **Command**: `powerOn` / `powerOff` are published over MQTT (QoS 0).
//!
//! Power-on mutes the system first and ramps the volume back up once the
//! amplifier has settled, stopping early if the user touches the volume.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use amp_control::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,amp_control=info,amp_bus=info")
        }))
        .init();

    let settings = runtime::settings_from_args(&args)?;
    tracing::info!(
        host = %settings.bus.host,
        port = settings.bus.port,
        command_topic = %settings.command_topic,
        subscribe_topic = %settings.bus.subscribe_topic,
        "starting amp-control"
    );
    runtime::run(settings)
}
