use crate::prelude::*;

use crate::catalog::{GroBroRegisters, HomeAssistantHoldingRegister};
use serde::Serialize;
use std::collections::BTreeMap;

/// Ppv readings above this are garbage the inverters send at night.
pub const PPV_LIMIT: f64 = 1_000_000.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InputRegisterState {
    pub device_id: String,
    pub payload: BTreeMap<String, RegisterValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HoldingRegisterValue {
    pub name: String,
    pub value: RegisterValue,
    pub register: HomeAssistantHoldingRegister,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HoldingRegisterState {
    pub device_id: String,
    pub payload: Vec<HoldingRegisterValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DropReason {
    UnknownDevice,
    UnhandledFunction(FunctionCode),
    DataQuality(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Input(InputRegisterState),
    Holding(HoldingRegisterState),
    Dropped(DropReason),
}

/// Routes a parsed message to its device family's table and decodes it.
pub fn dispatch(catalogs: &Catalogs, device_id: &str, message: &ModbusMessage) -> Outcome {
    let Some(registers) = catalogs.for_device(device_id) else {
        info!("modbus message from unknown device type: {}", device_id);
        return Outcome::Dropped(DropReason::UnknownDevice);
    };

    match message.function {
        FunctionCode::ReadInput => input_state(registers, device_id, message),
        FunctionCode::ReadSingle => Outcome::Holding(holding_state(registers, device_id, message)),
        function => {
            debug!("{}: nothing to publish for {}", device_id, function);
            Outcome::Dropped(DropReason::UnhandledFunction(function))
        }
    }
}

fn decode_logged(
    device_id: &str,
    name: &str,
    data: &RegisterDataType,
    raw: Option<&[u8]>,
) -> Option<RegisterValue> {
    match data.decode(raw?) {
        Ok(value) => value,
        Err(err) => {
            warn!("{}: cannot decode {}: {}", device_id, name, err);
            None
        }
    }
}

fn input_state(registers: &GroBroRegisters, device_id: &str, message: &ModbusMessage) -> Outcome {
    let mut payload = BTreeMap::new();

    for (name, register) in &registers.input_registers {
        let raw = message.get_data(&register.growatt.position);
        let Some(value) = decode_logged(device_id, name, &register.growatt.data, raw) else {
            continue;
        };

        if name == "Ppv" && value.as_f64().is_some_and(|v| v > PPV_LIMIT) {
            debug!("dropping bad payload from {}: Ppv={}", device_id, value);
            return Outcome::Dropped(DropReason::DataQuality(format!("Ppv={}", value)));
        }

        payload.insert(name.clone(), value);
    }

    for derived in &registers.derived_registers {
        if let Some(value) = derived.compose(&payload) {
            payload.insert(derived.name.clone(), value);
        }
    }

    Outcome::Input(InputRegisterState {
        device_id: device_id.to_owned(),
        payload,
    })
}

fn holding_state(
    registers: &GroBroRegisters,
    device_id: &str,
    message: &ModbusMessage,
) -> HoldingRegisterState {
    let mut payload = Vec::new();

    for (name, register) in &registers.holding_registers {
        let Some(growatt) = &register.growatt else {
            continue;
        };
        let raw = message.get_data(&growatt.position);
        let Some(mut value) = decode_logged(device_id, name, &growatt.data, raw) else {
            continue;
        };

        if register.homeassistant.is_switch() {
            let on = value.as_f64() == Some(1.0);
            value = RegisterValue::Text(if on { "ON" } else { "OFF" }.to_owned());
        }

        payload.push(HoldingRegisterValue {
            name: name.clone(),
            value,
            register: register.homeassistant.clone(),
        });
    }

    HoldingRegisterState {
        device_id: device_id.to_owned(),
        payload,
    }
}
