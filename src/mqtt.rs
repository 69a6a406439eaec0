use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS, Transport};
use std::collections::BTreeSet;

// Message {{{
/// A message on the Home Assistant broker. `topic` is relative to the
/// configured prefix.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// Translates a Home Assistant command into device commands.
    ///
    /// State echoes (`.../get`) translate to nothing.
    pub fn to_commands(&self, catalogs: &Catalogs) -> Result<Vec<Command>> {
        use Command::*;

        let (platform, device_id, name, action) = self.split_cmd_topic()?;

        if action == "get" {
            return Ok(Vec::new());
        }

        let registers = catalogs
            .for_device(device_id)
            .ok_or_else(|| anyhow!("unknown device_id: {}", device_id))?;

        let r = match (platform, name, action) {
            ("button", "read_all", "read") => registers
                .holding_registers
                .values()
                .filter_map(|r| r.growatt.as_ref())
                .map(|g| g.position.register_no)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|register| ReadRegister(device_id.to_owned(), register))
                .collect(),
            ("button", name, "read") => {
                let (growatt, _) = registers
                    .writable(name)
                    .ok_or_else(|| anyhow!("unknown command name: {}", name))?;
                vec![ReadRegister(device_id.to_owned(), growatt.position.register_no)]
            }
            ("number" | "switch" | "text", name, "set") => {
                let (growatt, _) = registers
                    .writable(name)
                    .ok_or_else(|| anyhow!("unknown command name: {}", name))?;
                let value = growatt.data.parse_value(&self.payload)?;
                vec![Command::write_value(device_id, growatt, &value)?]
            }
            _ => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }

    // given a command Message, return its parts.
    //
    // eg number/grobro/0PVP000001/output_power_w/set => (number, 0PVP000001, output_power_w, set)
    pub fn split_cmd_topic(&self) -> Result<(&str, &str, &str, &str)> {
        let parts: Vec<&str> = self.topic.split('/').collect();

        match parts[..] {
            [platform, "grobro", device_id, name, action] => Ok((platform, device_id, name, action)),
            _ => bail!("ignoring badly formed MQTT topic: {}", self.topic),
        }
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

/// Client for the Home Assistant broker.
#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let ha = self.config.homeassistant();

        if !ha.enabled() {
            info!("homeassistant disabled, skipping");
            return Ok(());
        }

        let broker = ha.broker();
        let mut options = MqttOptions::new("grobro-ha", broker.host(), broker.port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let Some((u, p)) = broker.credentials() {
            options.set_credentials(u, p);
        }
        if broker.use_tls() {
            options.set_transport(Transport::tls_with_default_config());
        }

        info!(
            "initializing homeassistant mqtt at {}:{}",
            broker.host(),
            broker.port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(self.receiver(client.clone(), eventloop), self.sender(client))?;

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_homeassistant.send(ChannelData::Shutdown);
    }

    fn setup(&self, client: &AsyncClient) -> Result<()> {
        client.try_publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")?;
        client.try_subscribe(
            format!("{}/+/grobro/#", self.config.homeassistant().prefix()),
            QoS::AtMostOnce,
        )?;

        Ok(())
    }

    // mqtt -> coordinator
    async fn receiver(&self, client: AsyncClient, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_homeassistant.subscribe();

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if let Err(err) = self.handle_message(publish) {
                            warn!("homeassistant mqtt: {}", err);
                        }
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        if let Err(err) = self.setup(&client) {
                            error!("homeassistant setup failed: {}", err);
                        }
                    }
                    Err(e) => {
                        error!("homeassistant mqtt: {}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                    _ => {} // keepalives etc
                },
                msg = shutdown.recv() => {
                    if matches!(msg, Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                }
            }
        }

        info!("homeassistant receiver loop exiting");
        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        let prefix = self.config.homeassistant().prefix().to_owned();

        // remove the prefix, including the first /
        let Some(topic) = publish
            .topic
            .strip_prefix(prefix.as_str())
            .and_then(|t| t.strip_prefix('/'))
        else {
            debug!("ignoring message outside {}: {}", prefix, publish.topic);
            return Ok(());
        };

        let message = Message {
            topic: topic.to_owned(),
            retain: publish.retain,
            payload: String::from_utf8(publish.payload.to_vec())?,
        };
        debug!("RX: {:?}", message);
        if self
            .channels
            .from_homeassistant
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_homeassistant) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_homeassistant.subscribe();
        let prefix = self.config.homeassistant().prefix().to_owned();

        loop {
            match receiver.recv().await {
                Ok(Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = client.disconnect().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("homeassistant sender lagged, {} messages lost", n);
                }
                Ok(Message(message)) => {
                    let topic = format!("{}/{}", prefix, message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    if let Err(err) = client
                        .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload)
                        .await
                    {
                        error!("publish to {} failed: {}", topic, err);
                    }
                }
            }
        }

        info!("homeassistant sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/grobro/LWT", self.config.homeassistant().prefix())
    }
}
