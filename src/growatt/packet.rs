use crate::prelude::*;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use enum_dispatch::*;
use nom::{
    bytes::complete::take,
    combinator::verify,
    number::complete::be_u16,
    sequence::tuple,
    IResult,
};
use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

pub const HEADER_SIZE: usize = 38;
pub const METADATA_SIZE: usize = 37;
pub const DEVICE_ID_SIZE: usize = 30;

// unknown + constant 7 + length; the length field counts everything after these
const LENGTH_PREFIX: usize = 6;
const CONSTANT_7: u16 = 7;
const DEVICE_ADDRESS: u8 = 1;
const COMMAND_UNKNOWN: u16 = 1;
// header after the prefix (32) + register/start (2) + value/end (2)
const COMMAND_LENGTH: u16 = 36;
const BLOCK_HEADER_SIZE: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHolding = 3,
    ReadInput = 4,
    ReadSingle = 5,
    WriteSingle = 6,
    WriteMultiple = 16,
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, u8::from(*self))
    }
}

#[enum_dispatch]
pub trait PacketCommon {
    fn device_id(&self) -> &str;
    fn function(&self) -> FunctionCode;
    fn bytes(&self) -> Vec<u8>;
}

#[enum_dispatch(PacketCommon)]
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Message(ModbusMessage),
    Single(SingleRegisterCommand),
    Multiple(MultiRegisterCommand),
}

// {{{ header

#[derive(Nom)]
#[nom(BigEndian)]
struct RawHeader<'a> {
    unknown: u16,
    _constant: u16,
    length: u16,
    device_address: u8,
    function: u8,
    #[nom(Take = "DEVICE_ID_SIZE")]
    device_id: &'a [u8],
}

/// The fixed 38 byte prefix shared by every message and command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModbusHeader {
    pub unknown: u16,
    pub length: u16,
    pub device_address: u8,
    pub function: Option<FunctionCode>,
    pub raw_function: u8,
    pub device_id: String,
}

impl ModbusHeader {
    /// Parses the header and checks the declared length against `input`.
    pub fn parse(input: &[u8]) -> Result<Self> {
        if input.len() < HEADER_SIZE {
            bail!(
                "ModbusHeader::parse short buffer: {} < {} bytes",
                input.len(),
                HEADER_SIZE
            );
        }

        let raw = match RawHeader::parse(input) {
            Ok((_, raw)) => raw,
            Err(_) => bail!("ModbusHeader::parse malformed header: {}", Utils::hex(&input[..8])),
        };

        let actual = input.len() - LENGTH_PREFIX;
        if usize::from(raw.length) != actual {
            bail!(
                "ModbusHeader::parse length mismatch: declared={} actual={}",
                raw.length,
                actual
            );
        }

        Ok(Self {
            unknown: raw.unknown,
            length: raw.length,
            device_address: raw.device_address,
            function: FunctionCode::try_from(raw.function).ok(),
            raw_function: raw.function,
            device_id: Utils::ascii_trimmed(raw.device_id),
        })
    }

    fn write(
        r: &mut Vec<u8>,
        unknown: u16,
        length: u16,
        function: FunctionCode,
        device_id: &str,
    ) {
        r.extend_from_slice(&unknown.to_be_bytes());
        r.extend_from_slice(&CONSTANT_7.to_be_bytes());
        r.extend_from_slice(&length.to_be_bytes());
        r.push(DEVICE_ADDRESS);
        r.push(function.into());
        r.extend_from_slice(&Utils::ascii_padded(device_id, DEVICE_ID_SIZE));
    }

    fn known_function(&self) -> Result<FunctionCode> {
        self.function
            .ok_or_else(|| anyhow!("unknown function code {}", self.raw_function))
    }
} // }}}

// {{{ metadata

#[derive(Nom)]
#[nom(BigEndian)]
struct RawMetadata<'a> {
    #[nom(Take = "DEVICE_ID_SIZE")]
    device_serial: &'a [u8],
    year: u8,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    centis: u8,
}

/// Serial and device clock, present on input register reports only.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModbusMetadata {
    pub device_serial: String,
    pub timestamp: Option<NaiveDateTime>,
}

impl ModbusMetadata {
    fn parse(input: &[u8]) -> Result<(&[u8], Self)> {
        let (rest, raw) = match RawMetadata::parse(input) {
            Ok(r) => r,
            Err(_) => bail!("ModbusMetadata::parse truncated: {} bytes", input.len()),
        };

        let timestamp = NaiveDate::from_ymd_opt(
            2000 + i32::from(raw.year),
            u32::from(raw.month),
            u32::from(raw.day),
        )
        .and_then(|date| {
            // anything from 100 would land in chrono's leap second range
            if raw.centis > 99 {
                return None;
            }
            date.and_hms_milli_opt(
                u32::from(raw.hour),
                u32::from(raw.minute),
                u32::from(raw.second),
                u32::from(raw.centis) * 10,
            )
        });

        let r = Self {
            device_serial: Utils::ascii_trimmed(raw.device_serial),
            timestamp,
        };

        Ok((rest, r))
    }

    fn write(&self, r: &mut Vec<u8>) {
        r.extend_from_slice(&Utils::ascii_padded(&self.device_serial, DEVICE_ID_SIZE));

        let clock = self.timestamp.and_then(|ts| {
            let year = u8::try_from(ts.year() - 2000).ok()?;
            Some([
                year,
                ts.month() as u8,
                ts.day() as u8,
                ts.hour() as u8,
                ts.minute() as u8,
                ts.second() as u8,
                (ts.nanosecond() / 10_000_000).min(99) as u8,
            ])
        });
        r.extend_from_slice(&clock.unwrap_or_default());
    }
} // }}}

// {{{ register blocks

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegisterBlock {
    pub start: u16,
    pub end: u16,
    pub values: Vec<u8>,
}

impl RegisterBlock {
    /// A block starting at `start` covering every byte of `values`; an odd
    /// trailing byte takes a whole register.
    pub fn new(start: u16, values: Vec<u8>) -> Result<Self> {
        let registers = u16::try_from(values.len().div_ceil(2).max(1))
            .map_err(|_| anyhow!("{} value bytes do not fit a register block", values.len()))?;
        let end = start.checked_add(registers - 1).ok_or_else(|| {
            anyhow!(
                "register block of {} registers from {} runs past 65535",
                registers,
                start
            )
        })?;

        Ok(Self { start, end, values })
    }

    fn value_size(start: u16, end: u16) -> usize {
        (usize::from(end) - usize::from(start) + 1) * 2
    }

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (start, end)) = verify(tuple((be_u16, be_u16)), |(start, end): &(u16, u16)| {
            end >= start
        })(input)?;
        let (input, values) = take(Self::value_size(start, end))(input)?;

        Ok((
            input,
            Self {
                start,
                end,
                values: values.to_vec(),
            },
        ))
    }

    fn size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.values.len()
    }

    fn write(&self, r: &mut Vec<u8>) {
        r.extend_from_slice(&self.start.to_be_bytes());
        r.extend_from_slice(&self.end.to_be_bytes());
        r.extend_from_slice(&self.values);
    }
} // }}}

// {{{ ModbusMessage

/// A telemetry report (or any other block-carrying message) from a device.
#[derive(Clone, Debug, PartialEq)]
pub struct ModbusMessage {
    pub unknown: u16,
    pub device_id: String,
    pub function: FunctionCode,
    pub metadata: Option<ModbusMetadata>,
    pub register_blocks: Vec<RegisterBlock>,
}

impl ModbusMessage {
    /// Parses a descrambled buffer.
    ///
    /// Returns `Ok(None)` for a function code this gateway doesn't know.
    pub fn parse(input: &[u8]) -> Result<Option<Self>> {
        let header = ModbusHeader::parse(input)?;

        let Some(function) = header.function else {
            info!(
                "unknown modbus function {} from {}",
                header.raw_function, header.device_id
            );
            return Ok(None);
        };

        let mut rest = &input[HEADER_SIZE..];

        let metadata = if function == FunctionCode::ReadInput {
            let (r, metadata) = ModbusMetadata::parse(rest)?;
            rest = r;
            Some(metadata)
        } else {
            None
        };

        let mut register_blocks = Vec::new();
        while rest.len() >= BLOCK_HEADER_SIZE {
            match RegisterBlock::parse(rest) {
                Ok((r, block)) => {
                    register_blocks.push(block);
                    rest = r;
                }
                Err(_) => bail!(
                    "ModbusMessage::parse malformed register block at offset {} from {}",
                    input.len() - rest.len(),
                    header.device_id
                ),
            }
        }

        Ok(Some(Self {
            unknown: header.unknown,
            device_id: header.device_id,
            function,
            metadata,
            register_blocks,
        }))
    }

    /// Value of the length header field for this message's content.
    pub fn length(&self) -> u16 {
        let metadata = self.metadata.as_ref().map_or(0, |_| METADATA_SIZE);
        let blocks: usize = self.register_blocks.iter().map(RegisterBlock::size).sum();
        (HEADER_SIZE - LENGTH_PREFIX + metadata + blocks) as u16
    }

    /// Raw bytes covering `position`, from the first block that contains its register.
    pub fn get_data(&self, position: &RegisterPosition) -> Option<&[u8]> {
        let block = self
            .register_blocks
            .iter()
            .find(|b| (b.start..=b.end).contains(&position.register_no))?;

        let from = usize::from(position.register_no - block.start) * 2 + usize::from(position.offset);
        block.values.get(from..from + usize::from(position.size))
    }
}

impl PacketCommon for ModbusMessage {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn function(&self) -> FunctionCode {
        self.function
    }

    fn bytes(&self) -> Vec<u8> {
        let mut r = Vec::with_capacity(usize::from(self.length()) + LENGTH_PREFIX);

        ModbusHeader::write(
            &mut r,
            self.unknown,
            self.length(),
            self.function,
            &self.device_id,
        );
        if let Some(metadata) = &self.metadata {
            metadata.write(&mut r);
        }
        for block in &self.register_blocks {
            block.write(&mut r);
        }

        r
    }
} // }}}

// {{{ SingleRegisterCommand

/// Reads or writes exactly one register.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SingleRegisterCommand {
    pub device_id: String,
    pub function: FunctionCode,
    pub register: u16,
    pub value: u16,
}

impl SingleRegisterCommand {
    pub fn read(device_id: &str, register: u16) -> Self {
        Self {
            device_id: device_id.to_owned(),
            function: FunctionCode::ReadSingle,
            register,
            value: register,
        }
    }

    pub fn write(device_id: &str, register: u16, value: u16) -> Self {
        Self {
            device_id: device_id.to_owned(),
            function: FunctionCode::WriteSingle,
            register,
            value,
        }
    }

    pub fn parse(input: &[u8]) -> Result<Self> {
        let header = ModbusHeader::parse(input)?;
        let function = header.known_function()?;

        let body = &input[HEADER_SIZE..];
        let r: IResult<&[u8], (u16, u16)> = tuple((be_u16, be_u16))(body);
        let Ok((_, (register, value))) = r else {
            bail!("SingleRegisterCommand::parse truncated body: {} bytes", body.len());
        };

        Ok(Self {
            device_id: header.device_id,
            function,
            register,
            value,
        })
    }
}

impl PacketCommon for SingleRegisterCommand {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn function(&self) -> FunctionCode {
        self.function
    }

    fn bytes(&self) -> Vec<u8> {
        let mut r = Vec::with_capacity(HEADER_SIZE + 4);

        ModbusHeader::write(
            &mut r,
            COMMAND_UNKNOWN,
            COMMAND_LENGTH,
            self.function,
            &self.device_id,
        );
        r.extend_from_slice(&self.register.to_be_bytes());
        r.extend_from_slice(&self.value.to_be_bytes());

        r
    }
} // }}}

// {{{ MultiRegisterCommand

/// Writes (or reads) the inclusive register range `start..=end`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiRegisterCommand {
    pub device_id: String,
    pub function: FunctionCode,
    pub start: u16,
    pub end: u16,
    pub values: Vec<u8>,
}

impl MultiRegisterCommand {
    pub fn write(device_id: &str, start: u16, values: Vec<u8>) -> Result<Self> {
        let block = RegisterBlock::new(start, values)?;
        Ok(Self {
            device_id: device_id.to_owned(),
            function: FunctionCode::WriteMultiple,
            start: block.start,
            end: block.end,
            values: block.values,
        })
    }

    pub fn parse(input: &[u8]) -> Result<Self> {
        let header = ModbusHeader::parse(input)?;
        let function = header.known_function()?;

        let body = &input[HEADER_SIZE..];
        let r: IResult<&[u8], (u16, u16)> = tuple((be_u16, be_u16))(body);
        let Ok((values, (start, end))) = r else {
            bail!("MultiRegisterCommand::parse truncated body: {} bytes", body.len());
        };

        Ok(Self {
            device_id: header.device_id,
            function,
            start,
            end,
            values: values.to_vec(),
        })
    }

    /// Values NUL-padded to cover the whole range.
    pub fn padded_values(&self) -> Vec<u8> {
        let mut r = self.values.clone();
        if self.end >= self.start {
            let size = RegisterBlock::value_size(self.start, self.end);
            if r.len() < size {
                r.resize(size, 0);
            }
        }
        r
    }
}

impl PacketCommon for MultiRegisterCommand {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn function(&self) -> FunctionCode {
        self.function
    }

    fn bytes(&self) -> Vec<u8> {
        let values = self.padded_values();
        let mut r = Vec::with_capacity(HEADER_SIZE + 4 + values.len());

        ModbusHeader::write(
            &mut r,
            COMMAND_UNKNOWN,
            COMMAND_LENGTH + values.len() as u16,
            self.function,
            &self.device_id,
        );
        r.extend_from_slice(&self.start.to_be_bytes());
        r.extend_from_slice(&self.end.to_be_bytes());
        r.extend_from_slice(&values);

        r
    }
} // }}}
