use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, FromInto, PickFirst};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub grobro: Grobro,

    #[serde(default = "Config::default_homeassistant")]
    pub homeassistant: HomeAssistant,

    pub forward: Option<Forward>,

    #[serde(default)]
    pub dump_messages: bool,

    #[serde(default = "Config::default_dump_dir")]
    pub dump_dir: String,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Broker {{{
/// Connection settings shared by every broker section.
#[derive(Clone, Debug, Deserialize)]
pub struct Broker {
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
}

impl Broker {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Credentials are only used when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.port == 0 {
            bail!("{}.port must be between 1 and 65535", section);
        }
        if self.host.is_empty() {
            bail!("{}.host cannot be empty", section);
        }
        Ok(())
    }
} // }}}

// Grobro {{{
/// The broker the devices talk to.
#[derive(Clone, Debug, Deserialize)]
pub struct Grobro {
    #[serde(flatten)]
    pub broker: Broker,

    #[serde(default = "Config::default_command_class")]
    pub command_class: u16,
}

impl Grobro {
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn command_class(&self) -> u16 {
        self.command_class
    }
} // }}}

// HomeAssistant {{{
#[derive(Clone, Debug, Deserialize)]
pub struct HomeAssistant {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub broker: Broker,

    #[serde(default = "Config::default_homeassistant_prefix")]
    pub prefix: String,

    #[serde(default = "Config::default_max_slots")]
    pub max_slots: u8,
}

impl HomeAssistant {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_slots(&self) -> u8 {
        self.max_slots
    }
} // }}}

// Forward {{{
/// Which device messages get relayed to the cloud broker.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum CloudForwarding {
    #[default]
    Disabled,
    All,
    Devices(BTreeSet<String>),
}

impl CloudForwarding {
    pub fn enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub fn includes(&self, device_id: &str) -> bool {
        match self {
            Self::Disabled => false,
            Self::All => true,
            Self::Devices(devices) => devices.contains(device_id),
        }
    }
}

impl From<bool> for CloudForwarding {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::All
        } else {
            Self::Disabled
        }
    }
}

impl std::str::FromStr for CloudForwarding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let r = match s.to_ascii_lowercase().as_str() {
            "" | "false" => Self::Disabled,
            "true" => Self::All,
            _ => Self::Devices(
                s.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
        };

        Ok(r)
    }
}

impl std::fmt::Display for CloudForwarding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "false"),
            Self::All => write!(f, "true"),
            Self::Devices(devices) => {
                let list: Vec<&str> = devices.iter().map(String::as_str).collect();
                write!(f, "{}", list.join(","))
            }
        }
    }
}

/// The Growatt cloud broker that device traffic can be relayed to.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Forward {
    #[serde(flatten)]
    pub broker: Broker,

    // `true`, `false` or a comma separated list of device ids
    #[serde_as(as = "PickFirst<(DisplayFromStr, FromInto<bool>)>")]
    #[serde(default)]
    pub growatt_cloud: CloudForwarding,
}

impl Forward {
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn growatt_cloud(&self) -> &CloudForwarding {
        &self.growatt_cloud
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn grobro(&self) -> Grobro {
        self.lock().grobro.clone()
    }

    pub fn homeassistant(&self) -> HomeAssistant {
        self.lock().homeassistant.clone()
    }

    pub fn forward(&self) -> Option<Forward> {
        self.lock().forward.clone()
    }

    /// Cloud relay setting, `Disabled` when there is no forward section.
    pub fn growatt_cloud(&self) -> CloudForwarding {
        self.lock()
            .forward
            .as_ref()
            .map(|f| f.growatt_cloud.clone())
            .unwrap_or_default()
    }

    pub fn dump_messages(&self) -> bool {
        self.lock().dump_messages
    }

    pub fn dump_dir(&self) -> String {
        self.lock().dump_dir.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    pub fn log_summary(&self) {
        self.lock().log_summary();
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| crate::file_error_with_source!(err, "error reading {}", file))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    // logging isn't up until the loglevel has been read, so this is separate from new()
    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!(
            "  GroBro broker: {}:{} (tls: {}, command class: {})",
            self.grobro.broker.host,
            self.grobro.broker.port,
            self.grobro.broker.use_tls,
            self.grobro.command_class
        );

        info!(
            "  Home Assistant: {}",
            if self.homeassistant.enabled { "enabled" } else { "disabled" }
        );
        if self.homeassistant.enabled {
            info!(
                "    Broker: {}:{} (tls: {})",
                self.homeassistant.broker.host,
                self.homeassistant.broker.port,
                self.homeassistant.broker.use_tls
            );
            info!("    Prefix: {}", self.homeassistant.prefix);
            info!("    Max Slots: {}", self.homeassistant.max_slots);
        }

        match &self.forward {
            Some(forward) if forward.growatt_cloud.enabled() => {
                info!("  Cloud forwarding: {}", forward.growatt_cloud);
                info!(
                    "    Broker: {}:{} (tls: {})",
                    forward.broker.host, forward.broker.port, forward.broker.use_tls
                );
            }
            _ => info!("  Cloud forwarding: disabled"),
        }

        info!(
            "  Dump messages: {}",
            if self.dump_messages { self.dump_dir.as_str() } else { "disabled" }
        );
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        self.grobro.broker.validate("grobro")?;

        if self.homeassistant.enabled {
            self.homeassistant.broker.validate("homeassistant")?;
        }

        if let Some(forward) = &self.forward {
            if forward.growatt_cloud.enabled() {
                forward.broker.validate("forward")?;
            }
        }

        if self.dump_messages && self.dump_dir.is_empty() {
            bail!("dump_dir cannot be empty when dump_messages is enabled");
        }

        Ok(())
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_command_class() -> u16 {
        33
    }

    fn default_homeassistant() -> HomeAssistant {
        HomeAssistant {
            enabled: false,
            broker: Broker {
                host: String::new(),
                port: Self::default_mqtt_port(),
                username: None,
                password: None,
                use_tls: false,
            },
            prefix: Self::default_homeassistant_prefix(),
            max_slots: Self::default_max_slots(),
        }
    }

    fn default_homeassistant_prefix() -> String {
        "homeassistant".to_string()
    }

    fn default_max_slots() -> u8 {
        5
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_dump_dir() -> String {
        "/dump".to_string()
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
