pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use tokio::sync::broadcast;

pub use crate::{
    catalog::{self, Catalogs, DeviceFamily},
    channels::Channels,
    command::Command,
    config::{self, Config, ConfigWrapper},
    coordinator,
    growatt::{
        self,
        frame::Frame,
        packet::{FunctionCode, ModbusMessage, Packet, PacketCommon},
    },
    grobro, home_assistant, mqtt,
    options::Options,
    register::{self, RegisterDataType, RegisterPosition, RegisterValue},
    utils::Utils,
};
