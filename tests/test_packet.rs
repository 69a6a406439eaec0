mod common;
use common::*;
use growatt_bridge::growatt::packet::{
    ModbusHeader, MultiRegisterCommand, RegisterBlock, SingleRegisterCommand, HEADER_SIZE,
};
use growatt_bridge::prelude::*;

// rewrites the length field after the buffer has been tampered with
fn fix_length(bytes: &mut [u8]) {
    let length = (bytes.len() - 6) as u16;
    bytes[4..6].copy_from_slice(&length.to_be_bytes());
}

#[test]
fn read_input_message() -> Result<()> {
    common_setup();

    let message = Factory::read_input(NEO, 3000, &[1, 0, 1234]);
    let bytes = message.bytes();

    // header + metadata + block header + 3 registers
    assert_eq!(bytes.len(), 38 + 37 + 4 + 6);
    assert_eq!(&bytes[2..4], &[0, 7]);
    assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), message.length());
    assert_eq!(usize::from(message.length()), bytes.len() - 6);
    assert_eq!(bytes[6], 1);
    assert_eq!(bytes[7], 4);
    assert_eq!(&bytes[8..18], NEO.as_bytes());
    assert!(bytes[18..38].iter().all(|b| *b == 0));

    assert_eq!(ModbusMessage::parse(&bytes)?, Some(message));

    Ok(())
}

#[test]
fn metadata_clock() -> Result<()> {
    let bytes = Factory::read_input(NOAH, 0, &[0]).bytes();

    // year, month, day, hour, minute, second, centiseconds
    assert_eq!(&bytes[68..75], &[24, 5, 1, 12, 34, 56, 78]);

    let parsed = ModbusMessage::parse(&bytes)?.unwrap();
    assert_eq!(parsed.metadata, Some(Factory::metadata(NOAH)));

    Ok(())
}

#[test]
fn metadata_clock_centis_out_of_range() -> Result<()> {
    common_setup();

    let mut bytes = Factory::read_input(NOAH, 0, &[0]).bytes();
    bytes[74] = 150;

    let parsed = ModbusMessage::parse(&bytes)?.unwrap();
    let metadata = parsed.metadata.as_ref().unwrap();
    assert_eq!(metadata.device_serial, NOAH);
    assert_eq!(metadata.timestamp, None);

    // no clock goes back out as zeros and reads back the same
    let rebuilt = parsed.bytes();
    assert_eq!(&rebuilt[68..75], &[0; 7]);
    assert_eq!(ModbusMessage::parse(&rebuilt)?, Some(parsed));

    Ok(())
}

#[test]
fn read_single_has_no_metadata() -> Result<()> {
    let message = Factory::read_single(NOAH, 255, &[1]);
    let bytes = message.bytes();

    assert_eq!(bytes.len(), HEADER_SIZE + 4 + 2);

    let parsed = ModbusMessage::parse(&bytes)?.unwrap();
    assert_eq!(parsed.metadata, None);
    assert_eq!(parsed.register_blocks, vec![RegisterBlock::new(255, vec![0, 1])?]);

    Ok(())
}

#[test]
fn length_mismatch() {
    common_setup();

    let mut bytes = Factory::read_single(NOAH, 255, &[1]).bytes();
    bytes[5] += 1;

    assert!(ModbusMessage::parse(&bytes).is_err());
}

#[test]
fn short_header() {
    let bytes = Factory::read_single(NOAH, 255, &[1]).bytes();

    assert!(ModbusHeader::parse(&bytes[..20]).is_err());
    assert!(ModbusMessage::parse(&bytes[..37]).is_err());
}

#[test]
fn unknown_function_is_not_an_error() -> Result<()> {
    common_setup();

    let mut bytes = Factory::read_single(NOAH, 255, &[1]).bytes();
    bytes[7] = 0x42;

    assert_eq!(ModbusMessage::parse(&bytes)?, None);

    let header = ModbusHeader::parse(&bytes)?;
    assert_eq!(header.function, None);
    assert_eq!(header.raw_function, 0x42);
    assert_eq!(header.device_id, NOAH);

    Ok(())
}

#[test]
fn block_end_before_start() {
    common_setup();

    let mut bytes = Factory::read_single(NOAH, 255, &[1]).bytes();
    bytes.extend_from_slice(&[0, 10, 0, 5, 0, 0]);
    fix_length(&mut bytes);

    assert!(ModbusMessage::parse(&bytes).is_err());
}

#[test]
fn truncated_block_values() {
    let mut bytes = Factory::read_single(NOAH, 255, &[1]).bytes();
    // claims two registers, carries one
    bytes.extend_from_slice(&[0, 10, 0, 11, 0, 1]);
    fix_length(&mut bytes);

    assert!(ModbusMessage::parse(&bytes).is_err());
}

#[test]
fn trailing_bytes_ignored() -> Result<()> {
    let message = Factory::read_single(NOAH, 255, &[1]);
    let mut bytes = message.bytes();
    bytes.extend_from_slice(&[0xaa, 0xbb]);
    fix_length(&mut bytes);

    assert_eq!(ModbusMessage::parse(&bytes)?, Some(message));

    Ok(())
}

#[test]
fn multiple_blocks() -> Result<()> {
    let mut message = Factory::read_input(NOAH, 12, &[1, 2, 3]);
    message
        .register_blocks
        .push(RegisterBlock::new(252, Factory::words(&[800, 100]))?);

    let parsed = ModbusMessage::parse(&message.bytes())?.unwrap();
    assert_eq!(parsed.register_blocks.len(), 2);
    assert_eq!(parsed.register_blocks[1].start, 252);
    assert_eq!(parsed.register_blocks[1].end, 253);

    Ok(())
}

#[test]
fn get_data() {
    let message = Factory::read_input(NEO, 3000, &[1, 0x00b7, 0x1b00, 42]);

    assert_eq!(
        message.get_data(&RegisterPosition::with_size(3001, 4)),
        Some(&[0x00, 0xb7, 0x1b, 0x00][..])
    );
    assert_eq!(
        message.get_data(&RegisterPosition::new(3003)),
        Some(&[0, 42][..])
    );
    // outside the block
    assert_eq!(message.get_data(&RegisterPosition::new(3004)), None);
    // runs off the end of the block
    assert_eq!(message.get_data(&RegisterPosition::with_size(3003, 4)), None);
}

#[test]
fn single_register_read() -> Result<()> {
    let command = SingleRegisterCommand::read(NOAH, 255);
    let bytes = command.bytes();

    assert_eq!(bytes.len(), 42);
    assert_eq!(&bytes[..8], &[0, 1, 0, 7, 0, 36, 1, 5]);
    assert_eq!(&bytes[8..18], NOAH.as_bytes());
    assert_eq!(&bytes[38..], &[0, 255, 0, 255]);

    assert_eq!(SingleRegisterCommand::parse(&bytes)?, command);

    Ok(())
}

#[test]
fn single_register_write() -> Result<()> {
    let command = SingleRegisterCommand::write(NOAH, 252, 800);
    let bytes = command.bytes();

    assert_eq!(bytes[7], 6);
    assert_eq!(&bytes[38..], &[0, 252, 0x03, 0x20]);
    assert_eq!(SingleRegisterCommand::parse(&bytes)?, command);

    Ok(())
}

#[test]
fn multi_register_write() -> Result<()> {
    let command = MultiRegisterCommand::write(NOAH, 100, b"Noah".to_vec())?;
    assert_eq!(command.start, 100);
    assert_eq!(command.end, 101);

    let bytes = command.bytes();
    assert_eq!(bytes.len(), 46);
    assert_eq!(&bytes[..8], &[0, 1, 0, 7, 0, 40, 1, 16]);
    assert_eq!(&bytes[38..42], &[0, 100, 0, 101]);
    assert_eq!(&bytes[42..], b"Noah");

    assert_eq!(MultiRegisterCommand::parse(&bytes)?, command);

    Ok(())
}

#[test]
fn multi_register_write_odd_length() -> Result<()> {
    let command = MultiRegisterCommand::write(NOAH, 10, b"abc".to_vec())?;
    assert_eq!(command.start, 10);
    assert_eq!(command.end, 11);
    assert_eq!(command.padded_values(), b"abc\0".to_vec());

    let bytes = command.bytes();
    assert_eq!(bytes.len(), 38 + 4 + 4);
    assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 40);
    assert_eq!(&bytes[38..42], &[0, 10, 0, 11]);
    assert_eq!(&bytes[42..], b"abc\0");

    Ok(())
}

#[test]
fn register_block_past_last_register() -> Result<()> {
    common_setup();

    assert!(RegisterBlock::new(65535, vec![0, 1, 0, 2]).is_err());
    assert!(RegisterBlock::new(65534, vec![0; 5]).is_err());
    assert!(MultiRegisterCommand::write(NOAH, 65535, vec![0; 4]).is_err());

    let block = RegisterBlock::new(65535, vec![0, 1])?;
    assert_eq!(block.start, 65535);
    assert_eq!(block.end, 65535);

    let block = RegisterBlock::new(65534, vec![0; 4])?;
    assert_eq!(block.end, 65535);

    Ok(())
}

#[test]
fn register_block_too_many_values() {
    assert!(RegisterBlock::new(0, vec![0; 2 * 65536 + 2]).is_err());
}

#[test]
fn multi_register_write_pads_values() {
    let command = MultiRegisterCommand {
        device_id: NOAH.to_owned(),
        function: FunctionCode::WriteMultiple,
        start: 100,
        end: 103,
        values: b"Noah".to_vec(),
    };

    assert_eq!(command.padded_values(), b"Noah\0\0\0\0".to_vec());

    let bytes = command.bytes();
    assert_eq!(bytes.len(), 38 + 4 + 8);
    assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 44);
}

#[test]
fn packet_common() {
    let packet = Packet::Single(SingleRegisterCommand::write(NOAH, 252, 800));

    assert_eq!(packet.device_id(), NOAH);
    assert_eq!(packet.function(), FunctionCode::WriteSingle);

    let packet = Packet::Message(Factory::read_input(NEO, 3000, &[1]));
    assert_eq!(packet.function(), FunctionCode::ReadInput);
    assert_eq!(packet.device_id(), NEO);
}

#[test]
fn function_code_display() {
    assert_eq!(FunctionCode::ReadInput.to_string(), "ReadInput(4)");
    assert_eq!(FunctionCode::WriteMultiple.to_string(), "WriteMultiple(16)");
    assert_eq!(FunctionCode::try_from(5u8).ok(), Some(FunctionCode::ReadSingle));
    assert!(FunctionCode::try_from(7u8).is_err());
}
