use crate::prelude::*;

pub mod dispatch;

pub use dispatch::{dispatch, DropReason, Outcome};

use crate::dump::MessageDumper;
use crate::forward::Forwarder;
use crate::grobro::DeviceMessage;
use crate::home_assistant::HomeAssistant;
use std::sync::{Arc, Mutex};

#[derive(Default, Debug, Clone)]
pub struct MessageStats {
    pub received: u64,
    pub forwarded_skipped: u64,
    pub frame_errors: u64,
    pub parse_errors: u64,
    pub unknown_function: u64,
    pub unknown_device: u64,
    pub unhandled_function: u64,
    pub data_quality_drops: u64,
    pub input_published: u64,
    pub holding_published: u64,
    pub commands_sent: u64,
    pub command_errors: u64,
    pub cloud_forwarded: u64,
    pub dump_errors: u64,
}

impl MessageStats {
    pub fn print_summary(&self) {
        info!("Message Statistics:");
        info!("  Device messages received: {}", self.received);
        info!("  Skipped (forwarded by us): {}", self.forwarded_skipped);
        info!("  Dropped:");
        info!("    Frame errors: {}", self.frame_errors);
        info!("    Parse errors: {}", self.parse_errors);
        info!("    Unknown function: {}", self.unknown_function);
        info!("    Unknown device: {}", self.unknown_device);
        info!("    Unhandled function: {}", self.unhandled_function);
        info!("    Bad data: {}", self.data_quality_drops);
        info!("  Published:");
        info!("    Input states: {}", self.input_published);
        info!("    Holding states: {}", self.holding_published);
        info!("  Commands:");
        info!("    Sent: {}", self.commands_sent);
        info!("    Errors: {}", self.command_errors);
        info!("  Cloud forwarded: {}", self.cloud_forwarded);
        if self.dump_errors > 0 {
            info!("  Dump errors: {}", self.dump_errors);
        }
    }
}

/// Moves messages between the device broker and Home Assistant, translating
/// in both directions.
#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    catalogs: Arc<Catalogs>,
    home_assistant: Arc<HomeAssistant>,
    forwarder: Forwarder,
    dumper: Option<MessageDumper>,
    pub stats: Arc<Mutex<MessageStats>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels, catalogs: Arc<Catalogs>) -> Self {
        let dumper = config
            .dump_messages()
            .then(|| MessageDumper::new(config.dump_dir()));

        Self {
            home_assistant: Arc::new(HomeAssistant::new(config.clone(), catalogs.clone())),
            forwarder: Forwarder::new(config.clone()),
            config,
            channels,
            catalogs,
            dumper,
            stats: Arc::new(Mutex::new(MessageStats::default())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        futures::try_join!(self.grobro_receiver(), self.homeassistant_receiver())?;

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_grobro.send(grobro::ChannelData::Shutdown);
        let _ = self
            .channels
            .from_homeassistant
            .send(mqtt::ChannelData::Shutdown);
    }

    fn count(&self, f: impl FnOnce(&mut MessageStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    async fn grobro_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_grobro.subscribe();

        loop {
            match receiver.recv().await {
                Ok(grobro::ChannelData::Message(message)) => {
                    for reply in self.process_device_message(&message) {
                        if self
                            .channels
                            .to_homeassistant
                            .send(mqtt::ChannelData::Message(reply))
                            .is_err()
                        {
                            warn!("send(to_homeassistant) failed - channel closed?");
                        }
                    }
                }
                Ok(grobro::ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    break
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagged, {} device messages lost", n);
                }
            }
        }

        Ok(())
    }

    async fn homeassistant_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_homeassistant.subscribe();

        loop {
            match receiver.recv().await {
                Ok(mqtt::ChannelData::Message(message)) => {
                    for command in self.process_homeassistant_message(&message) {
                        if self
                            .channels
                            .to_grobro
                            .send(grobro::ChannelData::Message(command))
                            .is_err()
                        {
                            warn!("send(to_grobro) failed - channel closed?");
                        }
                    }
                }
                Ok(mqtt::ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    break
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagged, {} homeassistant messages lost", n);
                }
            }
        }

        Ok(())
    }

    /// Handles one raw device message and returns what to publish to Home Assistant.
    pub fn process_device_message(&self, message: &DeviceMessage) -> Vec<mqtt::Message> {
        let device_id = message.device_id();
        self.count(|s| s.received += 1);

        if let Some(dumper) = &self.dumper {
            if let Err(err) = dumper.dump(&message.topic, &message.payload) {
                warn!("dumping {} failed: {}", message.topic, err);
                self.count(|s| s.dump_errors += 1);
            }
        }

        match self.forwarder.forward(message) {
            Ok(true) => self.count(|s| s.cloud_forwarded += 1),
            Ok(false) => {}
            Err(err) => warn!("forwarding {} to growatt cloud failed: {}", device_id, err),
        }

        let outcome = match self.decode(message) {
            Some(outcome) => outcome,
            None => return Vec::new(),
        };

        match outcome {
            Outcome::Input(state) => {
                self.count(|s| s.input_published += 1);
                let discovery = self.home_assistant.discovery(device_id);
                let input = self.home_assistant.input_state(&state);
                match (discovery, input) {
                    (Ok(mut discovery), Ok(input)) => {
                        discovery.extend(input);
                        discovery
                    }
                    (Err(err), _) | (_, Err(err)) => {
                        warn!("{}: cannot build state messages: {}", device_id, err);
                        Vec::new()
                    }
                }
            }
            Outcome::Holding(state) => {
                self.count(|s| s.holding_published += 1);
                self.home_assistant.holding_state(&state)
            }
            Outcome::Dropped(reason) => {
                self.count(|s| match reason {
                    DropReason::UnknownDevice => s.unknown_device += 1,
                    DropReason::UnhandledFunction(_) => s.unhandled_function += 1,
                    DropReason::DataQuality(_) => s.data_quality_drops += 1,
                });
                Vec::new()
            }
        }
    }

    // descramble -> parse -> dispatch
    fn decode(&self, message: &DeviceMessage) -> Option<Outcome> {
        let device_id = message.device_id();

        let cleartext = match Frame::decode(&message.payload) {
            Ok(cleartext) => cleartext,
            Err(err) => {
                warn!("{}: dropping frame: {}", message.topic, err);
                self.count(|s| s.frame_errors += 1);
                return None;
            }
        };
        trace!("{}: {}", message.topic, Utils::hex(&cleartext));

        let modbus = match ModbusMessage::parse(&cleartext) {
            Ok(Some(modbus)) => modbus,
            Ok(None) => {
                self.count(|s| s.unknown_function += 1);
                return None;
            }
            Err(err) => {
                warn!("{}: dropping message: {}", message.topic, err);
                self.count(|s| s.parse_errors += 1);
                return None;
            }
        };
        debug!(
            "{}: {} with {} register blocks",
            device_id,
            modbus.function,
            modbus.register_blocks.len()
        );

        Some(dispatch(&self.catalogs, device_id, &modbus))
    }

    /// Translates a Home Assistant command message into framed device messages.
    pub fn process_homeassistant_message(&self, message: &mqtt::Message) -> Vec<DeviceMessage> {
        let commands = match message.to_commands(&self.catalogs) {
            Ok(commands) => commands,
            Err(err) => {
                warn!("{}: {}", message.topic, err);
                self.count(|s| s.command_errors += 1);
                return Vec::new();
            }
        };

        let command_class = self.config.grobro().command_class();
        let r: Vec<DeviceMessage> = commands
            .iter()
            .filter_map(|command| match DeviceMessage::for_command(command, command_class) {
                Ok(device_message) => {
                    info!("sending {:?}", command);
                    Some(device_message)
                }
                Err(err) => {
                    warn!("{}: {:?}: {}", message.topic, command, err);
                    self.count(|s| s.command_errors += 1);
                    None
                }
            })
            .collect();

        self.count(|s| s.commands_sent += r.len() as u64);
        r
    }
}
