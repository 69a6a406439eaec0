use crate::prelude::*;

use crate::catalog::GroBroRegisters;
use crate::coordinator::dispatch::{HoldingRegisterState, InputRegisterState};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const ORIGIN_NAME: &str = "growatt-bridge";

/// Builds the Home Assistant side of things: discovery, state and
/// availability messages. Topics are relative to the configured prefix.
pub struct HomeAssistant {
    config: ConfigWrapper,
    catalogs: Arc<Catalogs>,
    // device_id -> last published discovery payload
    discovery_cache: Mutex<HashMap<String, String>>,
}

impl HomeAssistant {
    pub fn new(config: ConfigWrapper, catalogs: Arc<Catalogs>) -> Self {
        Self {
            config,
            catalogs,
            discovery_cache: Mutex::new(HashMap::new()),
        }
    }

    fn prefix(&self) -> String {
        self.config.homeassistant().prefix().to_owned()
    }

    // discovery {{{

    /// Discovery messages for `device_id`, or nothing if the device is
    /// unknown or its discovery payload was already published unchanged.
    pub fn discovery(&self, device_id: &str) -> Result<Vec<mqtt::Message>> {
        let Some(registers) = self.catalogs.for_device(device_id) else {
            info!("unable to publish discovery for unknown device type: {}", device_id);
            return Ok(Vec::new());
        };

        let payload = serde_json::to_string(&self.discovery_payload(device_id, registers))?;

        {
            let mut cache = self
                .discovery_cache
                .lock()
                .map_err(|_| anyhow!("discovery cache poisoned"))?;
            if cache.get(device_id) == Some(&payload) {
                debug!("discovery unchanged for {}, skipping", device_id);
                return Ok(Vec::new());
            }
            cache.insert(device_id.to_owned(), payload.clone());
        }

        info!("publishing updated discovery for {}", device_id);
        let topic = format!("device/{}/config", device_id);

        Ok(vec![
            // clear first so removed components disappear
            mqtt::Message {
                topic: topic.clone(),
                retain: true,
                payload: String::new(),
            },
            mqtt::Message {
                topic,
                retain: true,
                payload,
            },
            mqtt::Message {
                topic: format!("grobro/{}/serial", device_id),
                retain: true,
                payload: device_id.to_owned(),
            },
        ])
    }

    pub fn discovery_payload(&self, device_id: &str, registers: &GroBroRegisters) -> Value {
        let prefix = self.prefix();
        let max_slots = self.config.homeassistant().max_slots();
        let mut components = Map::new();

        for (name, register) in &registers.holding_registers {
            if !register.homeassistant.publish || !Self::slot_wanted(name, max_slots) {
                continue;
            }

            let unique_id = format!("grobro_{}_cmd_{}", device_id, name);
            let platform = &register.homeassistant.type_;

            let mut component = match serde_json::to_value(&register.homeassistant) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            component.insert(
                "command_topic".to_owned(),
                json!(format!("{}/{}/grobro/{}/{}/set", prefix, platform, device_id, name)),
            );
            component.insert(
                "state_topic".to_owned(),
                json!(format!("{}/{}/grobro/{}/{}/get", prefix, platform, device_id, name)),
            );
            component.insert("platform".to_owned(), json!(platform));
            component.insert("unique_id".to_owned(), json!(unique_id));

            components.insert(unique_id, Value::Object(component));
        }

        let read_all = format!("grobro_{}_cmd_read_all", device_id);
        components.insert(
            read_all.clone(),
            json!({
                "command_topic": format!("{}/button/grobro/{}/read_all/read", prefix, device_id),
                "platform": "button",
                "unique_id": read_all,
                "name": "Read All Values",
            }),
        );

        let state_topic = format!("{}/grobro/{}/state", prefix, device_id);
        let sensors = registers
            .input_registers
            .iter()
            .map(|(name, r)| (name, &r.homeassistant))
            .chain(
                registers
                    .derived_registers
                    .iter()
                    .map(|d| (&d.name, &d.homeassistant)),
            );

        for (name, ha) in sensors {
            if !ha.publish {
                continue;
            }

            let unique_id = format!("grobro_{}_{}", device_id, name);
            let mut component = Map::new();
            component.insert("platform".to_owned(), json!("sensor"));
            component.insert("name".to_owned(), json!(ha.name));
            component.insert("state_topic".to_owned(), json!(state_topic));
            component.insert(
                "value_template".to_owned(),
                json!(format!("{{{{ value_json['{}'] }}}}", name)),
            );
            component.insert("unique_id".to_owned(), json!(unique_id));
            component.insert("object_id".to_owned(), json!(format!("{}_{}", device_id, name)));
            for (key, value) in [
                ("device_class", &ha.device_class),
                ("state_class", &ha.state_class),
                ("unit_of_measurement", &ha.unit_of_measurement),
                ("icon", &ha.icon),
            ] {
                if let Some(value) = value {
                    component.insert(key.to_owned(), json!(value));
                }
            }

            components.insert(unique_id, Value::Object(component));
        }

        let serial = format!("grobro_{}_serial", device_id);
        components.insert(
            serial.clone(),
            json!({
                "platform": "sensor",
                "name": "Serial Number",
                "state_topic": format!("{}/grobro/{}/serial", prefix, device_id),
                "unique_id": serial,
                "object_id": format!("{}_serial", device_id),
                "icon": "mdi:identifier",
            }),
        );

        json!({
            "dev": {
                "identifiers": [device_id],
                "name": format!("Growatt {}", device_id),
                "manufacturer": "Growatt",
                "serial_number": device_id,
            },
            "avty_t": format!("{}/grobro/{}/availability", prefix, device_id),
            "o": { "name": ORIGIN_NAME, "sw": env!("CARGO_PKG_VERSION") },
            "cmps": components,
        })
    }

    // slotN registers above max_slots are hidden; anything else named slot* that
    // doesn't carry a number is too
    fn slot_wanted(name: &str, max_slots: u8) -> bool {
        let Some(rest) = name.strip_prefix("slot") else {
            return true;
        };

        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits
            .parse::<u8>()
            .map(|slot| slot <= max_slots)
            .unwrap_or(false)
    } // }}}

    // state {{{

    /// Input register state as one JSON object, enums shown by label.
    pub fn input_state(&self, state: &InputRegisterState) -> Result<Vec<mqtt::Message>> {
        let registers = self.catalogs.for_device(&state.device_id);

        let mut payload = Map::new();
        for (name, value) in &state.payload {
            let label = registers
                .and_then(|r| r.input_data_type(name))
                .and_then(|data| data.label(value));
            let value = match label {
                Some(label) => json!(label),
                None => serde_json::to_value(value)?,
            };
            payload.insert(name.clone(), value);
        }

        Ok(vec![
            mqtt::Message {
                topic: format!("grobro/{}/state", state.device_id),
                retain: false,
                payload: serde_json::to_string(&payload)?,
            },
            self.availability(&state.device_id),
        ])
    }

    /// One message per holding register value, on its `get` topic.
    pub fn holding_state(&self, state: &HoldingRegisterState) -> Vec<mqtt::Message> {
        let registers = self.catalogs.for_device(&state.device_id);

        let mut r: Vec<mqtt::Message> = state
            .payload
            .iter()
            .map(|v| {
                let data = registers
                    .and_then(|r| r.holding_registers.get(&v.name))
                    .and_then(|r| r.growatt.as_ref())
                    .map(|g| &g.data);

                mqtt::Message {
                    topic: format!(
                        "{}/grobro/{}/{}/get",
                        v.register.type_, state.device_id, v.name
                    ),
                    retain: false,
                    payload: Self::holding_payload(data, &v.value),
                }
            })
            .collect();

        r.push(self.availability(&state.device_id));
        r
    }

    fn holding_payload(data: Option<&RegisterDataType>, value: &RegisterValue) -> String {
        match (data, value) {
            (Some(RegisterDataType::TimeHhmm), RegisterValue::Int(hhmm)) => {
                format!("{:02}:{:02}", hhmm / 100, hhmm % 100)
            }
            _ => value.to_string(),
        }
    }

    pub fn availability(&self, device_id: &str) -> mqtt::Message {
        mqtt::Message {
            topic: format!("grobro/{}/availability", device_id),
            retain: false,
            payload: "online".to_owned(),
        }
    } // }}}
}
