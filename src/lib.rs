pub mod catalog;
pub mod channels;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod dump;
pub mod error;
pub mod forward;
pub mod grobro;
pub mod growatt;
pub mod home_assistant;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod register;
pub mod utils;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::coordinator::Coordinator;
use crate::grobro::Grobro;
use crate::mqtt::Mqtt;
use std::sync::Arc;

/// Holds the long-running parts of the bridge so they can be stopped together.
#[derive(Clone)]
pub struct Components {
    pub coordinator: Coordinator,
    pub grobro: Grobro,
    pub mqtt: Mqtt,
}

impl Components {
    /// Coordinator first so nothing new gets translated, then the brokers.
    pub fn stop(&self) {
        info!("Stopping all components...");
        self.coordinator.stop();
        self.grobro.stop();
        self.mqtt.stop();
    }
}

fn init_logger(level: &str) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()?;

    Ok(())
}

pub async fn app(options: Options) -> Result<()> {
    let config = ConfigWrapper::new(options.config_file.clone())?;

    if let Err(err) = init_logger(config.loglevel().as_str()) {
        eprintln!("failed to initialise logging: {}", err);
    }

    info!(
        "growatt-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    let catalogs = Arc::new(Catalogs::load()?);
    let channels = Channels::new();

    let coordinator = Coordinator::new(config.clone(), channels.clone(), catalogs);
    let grobro = Grobro::new(config.clone(), channels.clone(), coordinator.stats.clone());
    let mqtt = Mqtt::new(config.clone(), channels.clone());

    let components = Components {
        coordinator: coordinator.clone(),
        grobro: grobro.clone(),
        mqtt: mqtt.clone(),
    };

    // coordinator subscribes before the brokers start producing
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator.start().await {
            error!("Coordinator task failed: {}", e);
        }
    });
    tokio::task::yield_now().await;

    let grobro_handle = tokio::spawn(async move {
        if let Err(e) = grobro.start().await {
            error!("Grobro task failed: {}", e);
        }
    });
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    info!("Waiting for shutdown signal...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl+c: {}", e);
    }

    info!("Shutdown signal received, stopping components...");
    components.stop();

    for (name, handle) in [
        ("coordinator", coordinator_handle),
        ("grobro", grobro_handle),
        ("mqtt", mqtt_handle),
    ] {
        if let Err(e) = handle.await {
            error!("Error waiting for {} task: {}", name, e);
        }
    }

    if let Ok(stats) = components.coordinator.stats.lock() {
        stats.print_summary();
    }

    info!("Shutdown complete");
    Ok(())
}
