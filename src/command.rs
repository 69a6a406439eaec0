use crate::prelude::*;

use crate::catalog::GrowattRegister;
use crate::growatt::packet::{MultiRegisterCommand, SingleRegisterCommand};

/// An operator request for one device, before it is framed for the wire.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    // device_id, register
    ReadRegister(String, u16),
    // device_id, register, value
    WriteRegister(String, u16, u16),
    // device_id, start register, big-endian value bytes
    WriteRegisters(String, u16, Vec<u8>),
}

impl Command {
    /// Builds the write for `value` into `register`: values that fit one
    /// register go out as a single write, anything wider as a multi write.
    pub fn write_value(
        device_id: &str,
        register: &GrowattRegister,
        value: &RegisterValue,
    ) -> Result<Self> {
        let position = register.position;
        let bytes = register.data.encode(value, usize::from(position.size))?;

        let r = if bytes.len() <= 2 {
            Self::WriteRegister(
                device_id.to_owned(),
                position.register_no,
                Utils::be_uint(&bytes)? as u16,
            )
        } else {
            Self::WriteRegisters(device_id.to_owned(), position.register_no, bytes)
        };

        Ok(r)
    }

    pub fn device_id(&self) -> &str {
        use Command::*;

        match self {
            ReadRegister(device_id, _)
            | WriteRegister(device_id, _, _)
            | WriteRegisters(device_id, _, _) => device_id,
        }
    }

    pub fn to_packet(&self) -> Result<Packet> {
        use Command::*;

        let r = match self {
            ReadRegister(device_id, register) => {
                Packet::Single(SingleRegisterCommand::read(device_id, *register))
            }
            WriteRegister(device_id, register, value) => {
                Packet::Single(SingleRegisterCommand::write(device_id, *register, *value))
            }
            WriteRegisters(device_id, start, values) => {
                Packet::Multiple(MultiRegisterCommand::write(device_id, *start, values.clone())?)
            }
        };

        Ok(r)
    }

    /// Device broker topic the command is published on.
    pub fn topic(&self, command_class: u16) -> String {
        format!("s/{}/{}", command_class, self.device_id())
    }

    /// Framed payload, ready to publish.
    pub fn payload(&self) -> Result<Vec<u8>> {
        Ok(Frame::encode(&self.to_packet()?.bytes()))
    }
}
