use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// RegisterPosition {{{
/// Where a field lives inside a register block: the register it starts at,
/// a byte offset into that register and the field width in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterPosition {
    pub register_no: u16,
    #[serde(default)]
    pub offset: u8,
    #[serde(default = "RegisterPosition::default_size")]
    pub size: u8,
}

impl RegisterPosition {
    pub fn new(register_no: u16) -> Self {
        Self {
            register_no,
            offset: 0,
            size: Self::default_size(),
        }
    }

    pub fn with_size(register_no: u16, size: u8) -> Self {
        Self {
            register_no,
            offset: 0,
            size,
        }
    }

    /// Number of 16-bit registers the field touches.
    pub fn register_count(&self) -> u16 {
        let bytes = u16::from(self.offset) + u16::from(self.size);
        ((bytes + 1) / 2).max(1)
    }

    fn default_size() -> u8 {
        2
    }
} // }}}

// RegisterValue {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Int(u32),
    Float(f64),
    Text(String),
    Bits(BTreeMap<String, bool>),
}

impl RegisterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(f64::from(*v)),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 && *v >= 0.0 && *v <= f64::from(u32::MAX) => {
                Some(*v as u32)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
            Self::Bits(bits) => {
                let set: Vec<&str> = bits
                    .iter()
                    .filter(|(_, on)| **on)
                    .map(|(name, _)| name.as_str())
                    .collect();
                write!(f, "{}", set.join(","))
            }
        }
    }
} // }}}

// RegisterDataType {{{
#[derive(Clone, Debug, PartialEq)]
pub enum EnumMapping {
    IntMap(BTreeMap<u32, String>),
    Bitfield(BTreeMap<u32, String>),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawDataType")]
pub enum RegisterDataType {
    Int,
    Float { multiplier: f64, delta: f64 },
    TimeHhmm,
    String,
    Enum(EnumMapping),
}

// the shape used by the register tables on disk
#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum DataTypeKind {
    Enum,
    String,
    Float,
    Int,
    TimeHhmm,
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum EnumKind {
    IntMap,
    Bitfield,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FloatOptions {
    #[serde(default = "FloatOptions::default_multiplier")]
    multiplier: f64,
    // an omitted delta is 0, not 1
    #[serde(default)]
    delta: f64,
}

impl FloatOptions {
    fn default_multiplier() -> f64 {
        1.0
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EnumOptions {
    enum_type: EnumKind,
    values: BTreeMap<u32, String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDataType {
    data_type: DataTypeKind,
    float_options: Option<FloatOptions>,
    enum_options: Option<EnumOptions>,
}

impl TryFrom<RawDataType> for RegisterDataType {
    type Error = anyhow::Error;

    fn try_from(raw: RawDataType) -> Result<Self> {
        let r = match raw.data_type {
            DataTypeKind::Int => Self::Int,
            DataTypeKind::TimeHhmm => Self::TimeHhmm,
            DataTypeKind::String => Self::String,
            DataTypeKind::Float => {
                let opts = raw.float_options.unwrap_or(FloatOptions {
                    multiplier: FloatOptions::default_multiplier(),
                    delta: 0.0,
                });
                Self::Float {
                    multiplier: opts.multiplier,
                    delta: opts.delta,
                }
            }
            DataTypeKind::Enum => {
                let opts = raw
                    .enum_options
                    .ok_or_else(|| anyhow!("ENUM data type without enum_options"))?;
                match opts.enum_type {
                    EnumKind::IntMap => Self::Enum(EnumMapping::IntMap(opts.values)),
                    EnumKind::Bitfield => {
                        if let Some(bit) = opts.values.keys().find(|bit| **bit > 31) {
                            bail!("bitfield bit {} out of range", bit);
                        }
                        Self::Enum(EnumMapping::Bitfield(opts.values))
                    }
                }
            }
        };

        Ok(r)
    }
}

impl RegisterDataType {
    /// Decodes a raw big-endian span. An empty span, or an enum value the
    /// table doesn't know, is "no value" rather than an error. A span width
    /// other than 1, 2 or 4 bytes for a numeric type is a table bug and
    /// returns `Err`.
    pub fn decode(&self, raw: &[u8]) -> Result<Option<RegisterValue>> {
        use RegisterValue::*;

        if raw.is_empty() {
            return Ok(None);
        }

        let r = match self {
            Self::String => Some(Text(Utils::ascii_trimmed(raw))),
            Self::Int => Some(Int(Utils::be_uint(raw)?)),
            Self::Float { multiplier, delta } => {
                let value = f64::from(Utils::be_uint(raw)?);
                Some(Float(Utils::round(value * multiplier + delta, 3)))
            }
            Self::TimeHhmm => {
                let value = Utils::be_uint(raw)?;
                Some(Int((value / 256) * 100 + value % 256))
            }
            Self::Enum(EnumMapping::IntMap(values)) => {
                let value = Utils::be_uint(raw)?;
                values.contains_key(&value).then_some(Int(value))
            }
            Self::Enum(EnumMapping::Bitfield(bits)) => {
                let value = Utils::be_uint(raw)?;
                Some(Bits(
                    bits.iter()
                        .map(|(bit, name)| (name.clone(), value & (1 << bit) != 0))
                        .collect(),
                ))
            }
        };

        Ok(r)
    }

    /// Inverse of `decode` for the writable types, producing exactly `size` bytes.
    pub fn encode(&self, value: &RegisterValue, size: usize) -> Result<Vec<u8>> {
        match self {
            Self::Int => {
                let v = value
                    .as_u32()
                    .ok_or_else(|| anyhow!("{:?} is not an integer", value))?;
                Utils::be_bytes(v, size)
            }
            Self::Float { multiplier, delta } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| anyhow!("{:?} is not a number", value))?;
                let raw = ((v - delta) / multiplier).round();
                if !(0.0..=f64::from(u32::MAX)).contains(&raw) {
                    bail!("{} is out of range for this register", v);
                }
                Utils::be_bytes(raw as u32, size)
            }
            Self::TimeHhmm => {
                let v = value
                    .as_u32()
                    .ok_or_else(|| anyhow!("{:?} is not a HHMM time", value))?;
                let (hours, minutes) = (v / 100, v % 100);
                if hours > 23 || minutes > 59 {
                    bail!("{:04} is not a valid time of day", v);
                }
                Utils::be_bytes(hours * 256 + minutes, size)
            }
            Self::String => {
                let RegisterValue::Text(s) = value else {
                    bail!("{:?} is not text", value);
                };
                if !s.is_ascii() {
                    bail!("{:?} is not ASCII", s);
                }
                if s.len() > size {
                    bail!("{:?} is longer than {} bytes", s, size);
                }
                Ok(Utils::ascii_padded(s, size))
            }
            Self::Enum(_) => bail!("enum registers are not writable"),
        }
    }

    /// Parses a command payload into a value of this type.
    ///
    /// Accepts `ON`/`OFF` for integers and `HH:MM` for times.
    pub fn parse_value(&self, payload: &str) -> Result<RegisterValue> {
        let payload = payload.trim();

        let r = match self {
            Self::Int => match payload.to_ascii_uppercase().as_str() {
                "ON" => RegisterValue::Int(1),
                "OFF" => RegisterValue::Int(0),
                _ => match payload.parse::<u32>() {
                    Ok(v) => RegisterValue::Int(v),
                    Err(_) => RegisterValue::Float(payload.parse()?),
                },
            },
            Self::Float { .. } => RegisterValue::Float(payload.parse()?),
            Self::TimeHhmm => match payload.split_once(':') {
                Some((h, m)) => {
                    let (h, m): (u32, u32) = (h.parse()?, m.parse()?);
                    RegisterValue::Int(h * 100 + m)
                }
                None => RegisterValue::Int(payload.parse()?),
            },
            Self::String => RegisterValue::Text(payload.to_owned()),
            Self::Enum(_) => bail!("enum registers are not writable"),
        };

        Ok(r)
    }

    /// Human readable label for a decoded `IntMap` value.
    pub fn label(&self, value: &RegisterValue) -> Option<&str> {
        match (self, value) {
            (Self::Enum(EnumMapping::IntMap(values)), RegisterValue::Int(v)) => {
                values.get(v).map(String::as_str)
            }
            _ => None,
        }
    }
} // }}}
