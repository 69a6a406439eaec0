use crate::prelude::*;

use rumqttc::v5::mqttbytes::v5::{Packet as MqttPacket, Publish, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Transport;
use std::sync::{Arc, Mutex};

use crate::coordinator::MessageStats;

pub const FORWARDED_FOR: &str = "forwarded-for";
/// Marks messages this gateway published, so they are not consumed again.
pub const FORWARDED_FOR_HA: &str = "ha";
pub const FORWARDED_FOR_GROWATT: &str = "growatt";

// DeviceMessage {{{
/// A raw (still framed) message seen on, or bound for, the device broker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

impl DeviceMessage {
    /// Device topics end with the device id, eg `c/33/QMN0000001`.
    pub fn device_id(&self) -> &str {
        self.topic.rsplit('/').next().unwrap_or_default()
    }

    pub fn for_command(command: &Command, command_class: u16) -> Result<Self> {
        Ok(Self {
            topic: command.topic(command_class),
            payload: command.payload()?,
            qos: 0,
            retain: false,
        })
    }
} // }}}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChannelData {
    Message(DeviceMessage),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

pub fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn qos_to_u8(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Value of the `forwarded-for` user property, if present.
pub fn forwarded_for(properties: Option<&PublishProperties>) -> Option<&str> {
    properties?
        .user_properties
        .iter()
        .find(|(key, _)| key == FORWARDED_FOR)
        .map(|(_, value)| value.as_str())
}

/// Client for the broker the devices (and the Growatt cloud relay) talk to.
#[derive(Clone)]
pub struct Grobro {
    config: ConfigWrapper,
    channels: Channels,
    shared_stats: Arc<Mutex<MessageStats>>,
}

impl Grobro {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        shared_stats: Arc<Mutex<MessageStats>>,
    ) -> Self {
        Self {
            config,
            channels,
            shared_stats,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let grobro = self.config.grobro();
        let broker = grobro.broker();

        let mut options = MqttOptions::new("grobro-grobro", broker.host(), broker.port());
        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let Some((u, p)) = broker.credentials() {
            options.set_credentials(u, p);
        }
        if broker.use_tls() {
            options.set_transport(Transport::tls_with_default_config());
        }

        info!(
            "initializing grobro mqtt at {}:{}",
            broker.host(),
            broker.port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(self.receiver(client.clone(), eventloop), self.sender(client))?;

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_grobro.send(ChannelData::Shutdown);
    }

    // grobro -> coordinator
    async fn receiver(&self, client: AsyncClient, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_grobro.subscribe();

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(MqttPacket::Publish(publish))) => {
                        if let Err(err) = self.handle_publish(publish) {
                            warn!("grobro mqtt: {}", err);
                        }
                    }
                    Ok(Event::Incoming(MqttPacket::ConnAck(_))) => {
                        // clean session, so subscribe again on every connect
                        info!("grobro mqtt connected, subscribing to c/#");
                        if let Err(err) = client.try_subscribe("c/#", QoS::AtMostOnce) {
                            error!("grobro subscribe failed: {}", err);
                        }
                    }
                    Err(e) => {
                        error!("grobro mqtt: {}", e);
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

        info!("grobro receiver loop exiting");
        Ok(())
    }

    fn handle_publish(&self, publish: Publish) -> Result<()> {
        let topic = String::from_utf8(publish.topic.to_vec())?;

        if let Some(origin) = forwarded_for(publish.properties.as_ref()) {
            if origin == FORWARDED_FOR_HA || origin == FORWARDED_FOR_GROWATT {
                debug!("message on {} forwarded from {}. Skipping...", topic, origin);
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.forwarded_skipped += 1;
                }
                return Ok(());
            }
        }

        let message = DeviceMessage {
            topic,
            payload: publish.payload.to_vec(),
            qos: qos_to_u8(publish.qos),
            retain: publish.retain,
        };
        trace!("RX: {} {}", message.topic, Utils::hex(&message.payload));

        if self
            .channels
            .from_grobro
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_grobro) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> grobro
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let mut receiver = self.channels.to_grobro.subscribe();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = client.disconnect().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("grobro sender lagged, {} commands lost", n);
                }
                Ok(ChannelData::Message(message)) => {
                    debug!("send command: {} {}", message.topic, Utils::hex(&message.payload));
                    let properties = PublishProperties {
                        user_properties: vec![(
                            FORWARDED_FOR.to_owned(),
                            FORWARDED_FOR_HA.to_owned(),
                        )],
                        ..Default::default()
                    };
                    if let Err(err) = client
                        .publish_with_properties(
                            message.topic.clone(),
                            qos_from_u8(message.qos),
                            message.retain,
                            message.payload,
                            properties,
                        )
                        .await
                    {
                        warn!("sending to {} failed: {}", message.topic, err);
                    }
                }
            }
        }

        info!("grobro sender loop exiting");
        Ok(())
    }
}
