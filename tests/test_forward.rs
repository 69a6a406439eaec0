mod common;
use common::*;
use growatt_bridge::forward::{ConnectionCache, Forwarder};
use growatt_bridge::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn connects_once_per_device() -> Result<()> {
    common_setup();

    let cache: ConnectionCache<usize> = ConnectionCache::new();
    let connects = AtomicUsize::new(0);

    let connect = || -> Result<usize> { Ok(connects.fetch_add(1, Ordering::SeqCst)) };

    assert_eq!(cache.get_or_connect(NOAH, connect)?, 0);
    assert_eq!(cache.get_or_connect(NOAH, connect)?, 0);
    assert_eq!(cache.get_or_connect(NEO, connect)?, 1);

    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);

    Ok(())
}

#[test]
fn concurrent_first_sight_connects_once() {
    let cache: Arc<ConnectionCache<usize>> = Arc::new(ConnectionCache::new());
    let connects = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let connects = connects.clone();
            std::thread::spawn(move || {
                cache
                    .get_or_connect(NOAH, || {
                        std::thread::sleep(std::time::Duration::from_millis(10));
                        Ok(connects.fetch_add(1, Ordering::SeqCst))
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 0);
    }
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn failed_connect_not_cached() -> Result<()> {
    let cache: ConnectionCache<usize> = ConnectionCache::new();

    assert!(cache
        .get_or_connect(NOAH, || Err(anyhow!("broker down")))
        .is_err());
    assert!(cache.is_empty());

    assert_eq!(cache.get_or_connect(NOAH, || Ok(7))?, 7);
    assert_eq!(cache.len(), 1);

    Ok(())
}

#[test]
fn forwarder_wants() {
    let config = Factory::config_from(
        r#"
grobro:
  host: localhost
forward:
  host: mqtt.growatt.com
  port: 7006
  growatt_cloud: "0PVP000001, QMN0000001"
"#,
    );
    let forwarder = Forwarder::new(config);

    assert!(forwarder.wants(NOAH));
    assert!(forwarder.wants(NEO));
    assert!(!forwarder.wants(NEXA));
}

#[test]
fn forwarder_all_devices() {
    let config = Factory::config_from(
        r#"
grobro:
  host: localhost
forward:
  host: mqtt.growatt.com
  growatt_cloud: true
"#,
    );
    let forwarder = Forwarder::new(config);

    assert!(forwarder.wants(NOAH));
    assert!(forwarder.wants("anything"));
}

#[test]
fn forwarder_disabled() -> Result<()> {
    let forwarder = Forwarder::new(Factory::config());
    let message = Factory::device_message(&Factory::read_single(NOAH, 255, &[1]));

    assert!(!forwarder.wants(NOAH));
    // nothing to do, and no connection attempted
    assert!(!forwarder.forward(&message)?);

    Ok(())
}
