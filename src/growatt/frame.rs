use crate::prelude::*;

/// Every byte after the clear prefix is XORed with this key, repeating.
const KEY: &[u8] = b"Growatt";
const CLEAR_PREFIX: usize = 8;
const CHECKSUM_SIZE: usize = 2;

/// The obfuscation + checksum layer wrapped around every MQTT payload.
///
/// On the wire a frame is `scramble(cleartext) ++ crc16_modbus(scrambled)`,
/// with the checksum big-endian. `decode` and `encode` are exact inverses.
pub struct Frame;

impl Frame {
    /// XOR with the key from byte 8 onward. Applying it twice gives back the input.
    pub fn scramble(data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, b)| {
                if i < CLEAR_PREFIX {
                    *b
                } else {
                    b ^ KEY[(i - CLEAR_PREFIX) % KEY.len()]
                }
            })
            .collect()
    }

    pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
        crc16::State::<crc16::MODBUS>::calculate(data).to_be_bytes()
    }

    pub fn encode(cleartext: &[u8]) -> Vec<u8> {
        let mut r = Self::scramble(cleartext);
        let checksum = Self::checksum(&r);
        r.extend_from_slice(&checksum);
        r
    }

    pub fn decode(raw: &[u8]) -> Result<Vec<u8>> {
        if raw.len() < CHECKSUM_SIZE {
            return Err(crate::file_error!(
                "Frame::decode truncated frame: {} bytes",
                raw.len()
            ));
        }

        let (payload, checksum) = raw.split_at(raw.len() - CHECKSUM_SIZE);
        let expected = Self::checksum(payload);
        if checksum != expected {
            return Err(crate::file_error!(
                "Frame::decode checksum mismatch - got {:02x?}, expected {:02x?}",
                checksum,
                expected
            ));
        }

        Ok(Self::scramble(payload))
    }
}
