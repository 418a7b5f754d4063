use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("AMP_REVISION"),
    ", ",
    env!("AMP_BUILD_DAY"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "amp-control", version = VERSION)]
pub struct Args {
    /// Config file (TOML). Defaults to config.toml next to the executable.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override broker.host
    #[arg(long)]
    pub broker_host: Option<String>,

    /// Override broker.port
    #[arg(long)]
    pub broker_port: Option<u16>,

    /// Override controller.timeout_secs (inactivity before power-off)
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}
