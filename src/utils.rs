use crate::prelude::*;

pub struct Utils;

impl Utils {
    pub fn round(x: f64, decimals: u32) -> f64 {
        let y = 10_i32.pow(decimals) as f64;
        (x * y).round() / y
    }

    /// ASCII text from a fixed-width field. Non-ASCII bytes are dropped and
    /// NUL padding is trimmed from both ends.
    pub fn ascii_trimmed(bytes: &[u8]) -> String {
        let s: String = bytes
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect();
        s.trim_matches('\0').to_owned()
    }

    /// Inverse of `ascii_trimmed`: NUL-padded (or truncated) to exactly `len` bytes.
    pub fn ascii_padded(s: &str, len: usize) -> Vec<u8> {
        let mut r: Vec<u8> = s.bytes().filter(|b| b.is_ascii()).take(len).collect();
        r.resize(len, 0);
        r
    }

    /// Big-endian unsigned integer from a 1, 2 or 4 byte span.
    pub fn be_uint(bytes: &[u8]) -> Result<u32> {
        match *bytes {
            [a] => Ok(u32::from(a)),
            [a, b] => Ok(u32::from(u16::from_be_bytes([a, b]))),
            [a, b, c, d] => Ok(u32::from_be_bytes([a, b, c, d])),
            _ => bail!("cannot read a {} byte span as an integer", bytes.len()),
        }
    }

    pub fn be_bytes(value: u32, size: usize) -> Result<Vec<u8>> {
        match size {
            1 => Ok(vec![u8::try_from(value)
                .map_err(|_| anyhow!("{} does not fit in 1 byte", value))?]),
            2 => Ok(u16::try_from(value)
                .map_err(|_| anyhow!("{} does not fit in 2 bytes", value))?
                .to_be_bytes()
                .to_vec()),
            4 => Ok(value.to_be_bytes().to_vec()),
            _ => bail!("cannot write an integer into {} bytes", size),
        }
    }

    pub fn hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
