#![allow(dead_code)]

use growatt_bridge::grobro::DeviceMessage;
use growatt_bridge::growatt::packet::{ModbusMetadata, RegisterBlock};
use growatt_bridge::prelude::*;
use std::sync::Arc;

pub const NEO: &str = "QMN0000001";
pub const NOAH: &str = "0PVP000001";
pub const NEXA: &str = "0HVR000001";

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn config_yaml() -> &'static str {
        r#"
grobro:
  host: localhost
homeassistant:
  host: localhost
  prefix: homeassistant
  max_slots: 2
"#
    }

    pub fn config() -> ConfigWrapper {
        Self::config_from(Self::config_yaml())
    }

    pub fn config_from(yaml: &str) -> ConfigWrapper {
        ConfigWrapper::from_config(Config::from_yaml(yaml).unwrap())
    }

    pub fn catalogs() -> Arc<Catalogs> {
        Arc::new(Catalogs::load().unwrap())
    }

    /// Big-endian bytes for a run of 16-bit registers.
    pub fn words(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    pub fn metadata(device_id: &str) -> ModbusMetadata {
        let timestamp = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_milli_opt(12, 34, 56, 780)
            .unwrap();

        ModbusMetadata {
            device_serial: device_id.to_owned(),
            timestamp: Some(timestamp),
        }
    }

    pub fn read_input(device_id: &str, start: u16, values: &[u16]) -> ModbusMessage {
        ModbusMessage {
            unknown: 1,
            device_id: device_id.to_owned(),
            function: FunctionCode::ReadInput,
            metadata: Some(Self::metadata(device_id)),
            register_blocks: vec![RegisterBlock::new(start, Self::words(values)).unwrap()],
        }
    }

    pub fn read_single(device_id: &str, start: u16, values: &[u16]) -> ModbusMessage {
        ModbusMessage {
            unknown: 1,
            device_id: device_id.to_owned(),
            function: FunctionCode::ReadSingle,
            metadata: None,
            register_blocks: vec![RegisterBlock::new(start, Self::words(values)).unwrap()],
        }
    }

    /// What a device publishes for `message`: framed, on `c/33/<id>`.
    pub fn device_message(message: &ModbusMessage) -> DeviceMessage {
        DeviceMessage {
            topic: format!("c/33/{}", message.device_id),
            payload: Frame::encode(&message.bytes()),
            qos: 0,
            retain: false,
        }
    }

    pub fn ha_message(topic: &str, payload: &str) -> mqtt::Message {
        mqtt::Message {
            topic: topic.to_owned(),
            retain: false,
            payload: payload.to_owned(),
        }
    }
}
