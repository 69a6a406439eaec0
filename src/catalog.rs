use crate::prelude::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NEO_REGISTERS: &str = include_str!("registers/growatt_neo_registers.json");
const NOAH_REGISTERS: &str = include_str!("registers/growatt_noah_registers.json");
const NEXA_REGISTERS: &str = include_str!("registers/growatt_nexa_registers.json");

// DeviceFamily {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum DeviceFamily {
    Neo,
    Noah,
    Nexa,
}

// first match wins
const FAMILY_PREFIXES: [(&str, DeviceFamily); 3] = [
    ("QMN", DeviceFamily::Neo),
    ("0PVP", DeviceFamily::Noah),
    ("0HVR", DeviceFamily::Nexa),
];

impl DeviceFamily {
    pub fn resolve(device_id: &str) -> Option<Self> {
        FAMILY_PREFIXES
            .iter()
            .find(|(prefix, _)| device_id.starts_with(*prefix))
            .map(|(_, family)| *family)
    }

    pub fn prefix(&self) -> &'static str {
        FAMILY_PREFIXES
            .iter()
            .find(|(_, family)| family == self)
            .map_or("", |(prefix, _)| *prefix)
    }
} // }}}

// register entries {{{

/// Device side of a catalog entry: where the value lives and how to decode it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrowattRegister {
    pub position: RegisterPosition,
    pub data: RegisterDataType,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HomeAssistantInputRegister {
    pub name: String,
    #[serde(default = "default_publish")]
    pub publish: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HomeAssistantHoldingRegister {
    pub name: String,
    #[serde(default = "default_publish")]
    pub publish: bool,
    /// Home Assistant platform: `number`, `switch`, `text` or `button`.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl HomeAssistantHoldingRegister {
    pub fn is_switch(&self) -> bool {
        self.type_ == "switch"
    }
}

fn default_publish() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroBroInputRegister {
    pub growatt: GrowattRegister,
    pub homeassistant: HomeAssistantInputRegister,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroBroHoldingRegister {
    pub growatt: Option<GrowattRegister>,
    pub homeassistant: HomeAssistantHoldingRegister,
}

/// A value computed from other input registers rather than read directly.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedRegister {
    pub name: String,
    pub components: Vec<String>,
    pub separator: &'static str,
    pub homeassistant: HomeAssistantInputRegister,
}

impl DerivedRegister {
    /// Joins the decoded component values, or `None` if any is missing.
    pub fn compose(&self, decoded: &BTreeMap<String, RegisterValue>) -> Option<RegisterValue> {
        let parts = self
            .components
            .iter()
            .map(|name| decoded.get(name).map(ToString::to_string))
            .collect::<Option<Vec<_>>>()?;

        Some(RegisterValue::Text(parts.join(self.separator)))
    }
} // }}}

// GroBroRegisters {{{
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroBroRegisters {
    pub input_registers: BTreeMap<String, GroBroInputRegister>,
    pub holding_registers: BTreeMap<String, GroBroHoldingRegister>,
    #[serde(skip)]
    pub derived_registers: Vec<DerivedRegister>,
}

impl GroBroRegisters {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Holding registers that have a device-side position, by name.
    pub fn writable(&self, name: &str) -> Option<(&GrowattRegister, &HomeAssistantHoldingRegister)> {
        let register = self.holding_registers.get(name)?;
        register
            .growatt
            .as_ref()
            .map(|growatt| (growatt, &register.homeassistant))
    }

    pub fn input_data_type(&self, name: &str) -> Option<&RegisterDataType> {
        self.input_registers.get(name).map(|r| &r.growatt.data)
    }
}

/// Adds the Noah firmware registers and the `firmware_version` value built from them.
pub fn with_firmware_version(mut registers: GroBroRegisters) -> GroBroRegisters {
    let components = [
        ("control_fw_high", 0x0C),
        ("control_fw_mid", 0x0D),
        ("control_fw_low", 0x0E),
    ];

    for (name, register_no) in components {
        registers.input_registers.insert(
            name.to_owned(),
            GroBroInputRegister {
                growatt: GrowattRegister {
                    position: RegisterPosition::new(register_no),
                    data: RegisterDataType::Int,
                },
                homeassistant: HomeAssistantInputRegister {
                    name: name.to_owned(),
                    publish: false,
                    state_class: None,
                    device_class: None,
                    unit_of_measurement: None,
                    icon: None,
                },
            },
        );
    }

    registers.derived_registers.push(DerivedRegister {
        name: "firmware_version".to_owned(),
        components: components.iter().map(|(name, _)| (*name).to_owned()).collect(),
        separator: ".",
        homeassistant: HomeAssistantInputRegister {
            name: "Firmware Version".to_owned(),
            publish: true,
            state_class: None,
            device_class: None,
            unit_of_measurement: None,
            icon: Some("mdi:chip".to_owned()),
        },
    });

    registers
} // }}}

// Catalogs {{{
/// The register tables of every supported device family, loaded once.
#[derive(Clone, Debug)]
pub struct Catalogs {
    neo: GroBroRegisters,
    noah: GroBroRegisters,
    nexa: GroBroRegisters,
}

impl Catalogs {
    pub fn load() -> Result<Self> {
        let load = |family: DeviceFamily, json: &str| {
            GroBroRegisters::from_json(json)
                .map_err(|err| anyhow!("{:?} register table: {}", family, err))
        };

        let r = Self {
            neo: load(DeviceFamily::Neo, NEO_REGISTERS)?,
            noah: with_firmware_version(load(DeviceFamily::Noah, NOAH_REGISTERS)?),
            nexa: load(DeviceFamily::Nexa, NEXA_REGISTERS)?,
        };

        debug!(
            "loaded register tables: neo={} noah={} nexa={}",
            r.neo.input_registers.len() + r.neo.holding_registers.len(),
            r.noah.input_registers.len() + r.noah.holding_registers.len(),
            r.nexa.input_registers.len() + r.nexa.holding_registers.len(),
        );

        Ok(r)
    }

    pub fn get(&self, family: DeviceFamily) -> &GroBroRegisters {
        match family {
            DeviceFamily::Neo => &self.neo,
            DeviceFamily::Noah => &self.noah,
            DeviceFamily::Nexa => &self.nexa,
        }
    }

    pub fn for_device(&self, device_id: &str) -> Option<&GroBroRegisters> {
        DeviceFamily::resolve(device_id).map(|family| self.get(family))
    }
} // }}}
