mod common;
use common::*;
use growatt_bridge::config::CloudForwarding;
use growatt_bridge::prelude::*;
use std::collections::BTreeSet;

#[test]
fn defaults() -> Result<()> {
    common_setup();

    let config = Config::from_yaml("grobro:\n  host: broker.local\n")?;

    assert_eq!(config.grobro.broker.host(), "broker.local");
    assert_eq!(config.grobro.broker.port(), 1883);
    assert!(!config.grobro.broker.use_tls());
    assert_eq!(config.grobro.broker.credentials(), None);
    assert_eq!(config.grobro.command_class(), 33);

    assert!(!config.homeassistant.enabled());
    assert_eq!(config.homeassistant.prefix(), "homeassistant");
    assert_eq!(config.homeassistant.max_slots(), 5);

    assert!(config.forward.is_none());
    assert!(!config.dump_messages);
    assert_eq!(config.dump_dir, "/dump");
    assert_eq!(config.loglevel, "info");

    Ok(())
}

#[test]
fn full_config() -> Result<()> {
    let config = Config::from_yaml(
        r#"
grobro:
  host: broker.local
  port: 8883
  username: grobro
  password: secret
  use_tls: true
  command_class: 35
homeassistant:
  host: ha.local
  prefix: ha
  max_slots: 3
forward:
  host: mqtt.growatt.com
  port: 7006
  growatt_cloud: "0PVP000001"
dump_messages: true
dump_dir: /tmp/dump
loglevel: debug
"#,
    )?;

    assert_eq!(config.grobro.broker.port(), 8883);
    assert_eq!(config.grobro.broker.credentials(), Some(("grobro", "secret")));
    assert!(config.grobro.broker.use_tls());
    assert_eq!(config.grobro.command_class(), 35);

    assert!(config.homeassistant.enabled());
    assert_eq!(config.homeassistant.broker().host(), "ha.local");
    assert_eq!(config.homeassistant.prefix(), "ha");
    assert_eq!(config.homeassistant.max_slots(), 3);

    let forward = config.forward.as_ref().unwrap();
    assert_eq!(forward.broker().port(), 7006);
    assert_eq!(
        forward.growatt_cloud(),
        &CloudForwarding::Devices(BTreeSet::from([NOAH.to_owned()]))
    );

    assert!(config.dump_messages);
    assert_eq!(config.dump_dir, "/tmp/dump");
    assert_eq!(config.loglevel, "debug");

    Ok(())
}

#[test]
fn credentials_need_both_parts() -> Result<()> {
    let config = Config::from_yaml("grobro:\n  host: broker.local\n  username: grobro\n")?;

    assert_eq!(config.grobro.broker.credentials(), None);

    Ok(())
}

#[test]
fn invalid_configs() {
    common_setup();

    // no grobro section
    assert!(Config::from_yaml("loglevel: debug\n").is_err());
    // port 0
    assert!(Config::from_yaml("grobro:\n  host: broker.local\n  port: 0\n").is_err());
    // empty host
    assert!(Config::from_yaml("grobro:\n  host: \"\"\n").is_err());
    // enabled homeassistant needs a broker
    assert!(Config::from_yaml(
        "grobro:\n  host: broker.local\nhomeassistant:\n  host: \"\"\n"
    )
    .is_err());
    assert!(Config::from_yaml(
        "grobro:\n  host: broker.local\ndump_messages: true\ndump_dir: \"\"\n"
    )
    .is_err());
}

#[test]
fn disabled_homeassistant_skips_validation() -> Result<()> {
    let config = Config::from_yaml(
        "grobro:\n  host: broker.local\nhomeassistant:\n  enabled: false\n  host: \"\"\n",
    )?;

    assert!(!config.homeassistant.enabled());

    Ok(())
}

#[test]
fn cloud_forwarding_from_str() -> Result<()> {
    assert_eq!("".parse::<CloudForwarding>()?, CloudForwarding::Disabled);
    assert_eq!("false".parse::<CloudForwarding>()?, CloudForwarding::Disabled);
    assert_eq!("TRUE".parse::<CloudForwarding>()?, CloudForwarding::All);

    let devices = "0PVP000001, QMN0000001,".parse::<CloudForwarding>()?;
    assert_eq!(
        devices,
        CloudForwarding::Devices(BTreeSet::from([NOAH.to_owned(), NEO.to_owned()]))
    );
    assert!(devices.enabled());
    assert!(devices.includes(NOAH));
    assert!(!devices.includes(NEXA));
    assert_eq!(devices.to_string(), "0PVP000001,QMN0000001");

    assert!(!CloudForwarding::Disabled.includes(NOAH));
    assert!(!CloudForwarding::Disabled.enabled());

    Ok(())
}

#[test]
fn wrapper_without_forward_section() {
    let config = Factory::config();

    assert!(config.forward().is_none());
    assert_eq!(config.growatt_cloud(), CloudForwarding::Disabled);
    assert!(config.homeassistant().enabled());
    assert_eq!(config.homeassistant().max_slots(), 2);
}

#[test]
fn config_from_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, Factory::config_yaml())?;

    let config = ConfigWrapper::new(path.display().to_string())?;
    assert_eq!(config.grobro().broker().host(), "localhost");
    assert_eq!(config.loglevel(), "info");

    assert!(Config::new(dir.path().join("missing.yaml").display().to_string()).is_err());

    Ok(())
}
