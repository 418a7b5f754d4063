//! Configuration loading and parsing.
//!
//! Defines the TOML schema and resolves it into runtime settings with defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use amp_bus::{BusConfig, Credentials};

use crate::audio::AudioCommands;
use crate::controller::ControllerConfig;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "media_pc_amplifier_control_client";
pub const DEFAULT_COMMAND_TOPIC: &str = "allenst/house/kitchen/amplifierpower";
pub const DEFAULT_SUBSCRIBE_TOPIC: &str = "allenst/house/frontdoor/a";

/// Top-level configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub audio: AudioSection,
}

/// `[broker]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    /// Broker host name or IP (required).
    pub host: Option<String>,
    /// Broker port (default: 1883).
    pub port: Option<u16>,
    /// MQTT client id.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic receiving `powerOn` / `powerOff`.
    pub command_topic: Option<String>,
    /// Topic kept subscribed for inbound messages.
    pub subscribe_topic: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub reconnect_min_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
}

/// `[controller]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSection {
    pub poll_interval_ms: Option<u64>,
    /// Inactivity before power-off (default: 3600).
    pub timeout_secs: Option<u64>,
    pub warmup_secs: Option<u64>,
    pub startup_volume: Option<i32>,
    pub ramp_step_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
}

/// `[audio]` section. Each command is an argv array.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioSection {
    pub is_playing_cmd: Option<Vec<String>>,
    pub get_volume_cmd: Option<Vec<String>>,
    pub set_volume_cmd: Option<Vec<String>>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bus: BusConfig,
    pub command_topic: String,
    pub controller: ControllerConfig,
    pub audio: AudioCommands,
}

impl ConfigFile {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<ConfigFile>(raw)?)
    }
}

impl Settings {
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Ok(Self {
            bus: bus_from_config(&cfg.broker)?,
            command_topic: non_empty(cfg.broker.command_topic.as_deref())
                .unwrap_or(DEFAULT_COMMAND_TOPIC)
                .to_string(),
            controller: controller_from_config(&cfg.controller)?,
            audio: audio_from_config(&cfg.audio)?,
        })
    }
}

/// Build the bus connection config from the `[broker]` section.
pub fn bus_from_config(broker: &BrokerSection) -> Result<BusConfig> {
    let host = non_empty(broker.host.as_deref())
        .ok_or_else(|| anyhow::anyhow!("broker.host is required in config"))?;
    let client_id = non_empty(broker.client_id.as_deref()).unwrap_or(DEFAULT_CLIENT_ID);
    let mut bus = BusConfig::new(host, broker.port.unwrap_or(DEFAULT_PORT), client_id);
    bus.subscribe_topic = broker
        .subscribe_topic
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_SUBSCRIBE_TOPIC)
        .to_string();
    bus.credentials = match (broker.username.as_ref(), broker.password.as_ref()) {
        (Some(username), password) => Some(Credentials {
            username: username.clone(),
            password: password.cloned().unwrap_or_default(),
        }),
        (None, Some(_)) => {
            return Err(anyhow::anyhow!("broker.password requires broker.username"));
        }
        (None, None) => None,
    };
    if let Some(secs) = broker.keep_alive_secs {
        bus.keep_alive = Duration::from_secs(secs);
    }
    if let Some(ms) = broker.reconnect_min_ms {
        if ms == 0 {
            return Err(anyhow::anyhow!("broker.reconnect_min_ms must be > 0"));
        }
        bus.reconnect_min = Duration::from_millis(ms);
    }
    if let Some(ms) = broker.reconnect_max_ms {
        bus.reconnect_max = Duration::from_millis(ms);
    }
    Ok(bus)
}

/// Resolve controller timings, falling back to defaults.
pub fn controller_from_config(section: &ControllerSection) -> Result<ControllerConfig> {
    let defaults = ControllerConfig::default();
    let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
    let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);

    let startup_volume = section.startup_volume.unwrap_or(defaults.startup_volume);
    if !(0..=100).contains(&startup_volume) {
        return Err(anyhow::anyhow!(
            "controller.startup_volume must be within 0..=100, got {startup_volume}"
        ));
    }
    let poll_interval = ms(section.poll_interval_ms, defaults.poll_interval);
    if poll_interval.is_zero() {
        return Err(anyhow::anyhow!("controller.poll_interval_ms must be > 0"));
    }

    Ok(ControllerConfig {
        poll_interval,
        timeout: secs(section.timeout_secs, defaults.timeout),
        warmup: secs(section.warmup_secs, defaults.warmup),
        startup_volume,
        ramp_step: ms(section.ramp_step_ms, defaults.ramp_step),
        settle: ms(section.settle_ms, defaults.settle),
        cooldown: ms(section.cooldown_ms, defaults.cooldown),
    })
}

/// Resolve audio commands; unset commands keep the `pactl` defaults.
pub fn audio_from_config(section: &AudioSection) -> Result<AudioCommands> {
    let defaults = AudioCommands::default();
    let pick = |name: &str, v: Option<&Vec<String>>, d: Vec<String>| -> Result<Vec<String>> {
        match v {
            Some(argv) if argv.is_empty() => {
                Err(anyhow::anyhow!("audio.{name} must not be an empty list"))
            }
            Some(argv) => Ok(argv.clone()),
            None => Ok(d),
        }
    };
    Ok(AudioCommands {
        is_playing: pick(
            "is_playing_cmd",
            section.is_playing_cmd.as_ref(),
            defaults.is_playing,
        )?,
        get_volume: pick(
            "get_volume_cmd",
            section.get_volume_cmd.as_ref(),
            defaults.get_volume,
        )?,
        set_volume: pick(
            "set_volume_cmd",
            section.set_volume_cmd.as_ref(),
            defaults.set_volume,
        )?,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
