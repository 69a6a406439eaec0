use crate::prelude::*;

use crate::grobro::DeviceMessage;
use rumqttc::{AsyncClient, MqttOptions, QoS, Transport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One lazily created connection per device id, kept for the process lifetime.
pub struct ConnectionCache<C: Clone> {
    clients: Mutex<HashMap<String, C>>,
}

impl<C: Clone> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl<C: Clone> ConnectionCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached client for `device_id`, calling `connect` to create
    /// it on first sight. The lookup and insert happen under one lock, so
    /// `connect` runs at most once per device id.
    pub fn get_or_connect<F>(&self, device_id: &str, connect: F) -> Result<C>
    where
        F: FnOnce() -> Result<C>,
    {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| anyhow!("forward connection cache poisoned"))?;

        if let Some(client) = clients.get(device_id) {
            return Ok(client.clone());
        }

        let client = connect()?;
        clients.insert(device_id.to_owned(), client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Relays device messages, unmodified, to the Growatt cloud broker.
#[derive(Clone)]
pub struct Forwarder {
    config: ConfigWrapper,
    cache: Arc<ConnectionCache<AsyncClient>>,
}

impl Forwarder {
    pub fn new(config: ConfigWrapper) -> Self {
        Self {
            config,
            cache: Arc::new(ConnectionCache::new()),
        }
    }

    pub fn wants(&self, device_id: &str) -> bool {
        self.config.forward().is_some() && self.config.growatt_cloud().includes(device_id)
    }

    /// Returns whether the message was handed to a cloud connection.
    pub fn forward(&self, message: &DeviceMessage) -> Result<bool> {
        let device_id = message.device_id();
        if !self.wants(device_id) {
            return Ok(false);
        }

        let client = self
            .cache
            .get_or_connect(device_id, || self.connect(device_id))?;

        client.try_publish(
            message.topic.clone(),
            qos_v3(message.qos),
            message.retain,
            message.payload.clone(),
        )?;

        Ok(true)
    }

    fn connect(&self, device_id: &str) -> Result<AsyncClient> {
        let forward = self
            .config
            .forward()
            .ok_or_else(|| anyhow!("no forward broker configured"))?;
        let broker = forward.broker();

        let mut options =
            MqttOptions::new(format!("grobro-forward-{}", device_id), broker.host(), broker.port());
        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let Some((u, p)) = broker.credentials() {
            options.set_credentials(u, p);
        }
        if broker.use_tls() {
            options.set_transport(Transport::tls_with_default_config());
        }

        info!(
            "connecting {} to growatt cloud at {}:{}",
            device_id,
            broker.host(),
            broker.port()
        );

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let device_id = device_id.to_owned();
        tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!("growatt cloud connection for {}: {}", device_id, err);
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        });

        Ok(client)
    }
}

fn qos_v3(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}
