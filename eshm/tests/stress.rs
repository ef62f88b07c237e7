//! Hammer the channels and check that snapshots are never torn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eshm::{EshmConfig, EshmHandle, Role};

fn unique(tag: &str) -> String {
    format!("st-{}-{tag}", std::process::id())
}

fn handle(identifier: &str, role: Role) -> Arc<EshmHandle> {
    let mut config = EshmConfig::new(identifier);
    config.role = role;
    Arc::new(EshmHandle::init(config).expect("init handle"))
}

/// A writer hammers one direction with self-describing payloads while a
/// reader snapshots; every delivered payload must be internally consistent.
#[test]
fn reader_never_observes_mixed_payloads() {
    let id = unique("torn");
    let master = handle(&id, Role::Master);
    let slave = handle(&id, Role::Slave);

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let master = Arc::clone(&master);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut value = 0u8;
            while !stop.load(Ordering::Relaxed) {
                value = value.wrapping_add(1);
                let payload = [value; 1024];
                master.write(&payload).unwrap();
            }
        })
    };

    let mut buf = [0u8; 1024];
    let mut delivered = 0;
    while delivered < 2_000 {
        let len = slave
            .read_with_timeout(&mut buf, Duration::from_millis(1000))
            .expect("writer is hammering, reads must succeed");
        assert_eq!(len, 1024);
        let first = buf[0];
        assert!(
            buf.iter().all(|b| *b == first),
            "torn payload: starts {first:#x}, contains {:?}",
            buf.iter().find(|b| **b != first)
        );
        delivered += 1;
    }

    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
}

/// Both directions under load at once; each side checks its own stream.
#[test]
fn bidirectional_hammering_stays_consistent() {
    let id = unique("bidi");
    let master = handle(&id, Role::Master);
    let slave = handle(&id, Role::Slave);

    let stop = Arc::new(AtomicBool::new(false));
    let mut feeders = Vec::new();
    for (writer, marker) in [(Arc::clone(&master), 0x10u8), (Arc::clone(&slave), 0x80u8)] {
        let stop = Arc::clone(&stop);
        feeders.push(std::thread::spawn(move || {
            let mut tick = 0u8;
            while !stop.load(Ordering::Relaxed) {
                tick = tick.wrapping_add(1);
                // High bits say who wrote it, low bits which iteration.
                let payload = [marker | (tick & 0x0F); 256];
                writer.write(&payload).unwrap();
                std::thread::sleep(Duration::from_micros(50));
            }
        }));
    }

    let mut checkers = Vec::new();
    for (reader, marker) in [(Arc::clone(&slave), 0x10u8), (Arc::clone(&master), 0x80u8)] {
        checkers.push(std::thread::spawn(move || {
            let mut buf = [0u8; 256];
            for _ in 0..500 {
                let len = reader
                    .read_with_timeout(&mut buf, Duration::from_millis(1000))
                    .expect("feeder is running");
                assert_eq!(len, 256);
                let first = buf[0];
                assert_eq!(first & 0xF0, marker, "payload from the wrong side");
                assert!(buf.iter().all(|b| *b == first), "torn payload");
            }
        }));
    }

    for checker in checkers {
        checker.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for feeder in feeders {
        feeder.join().unwrap();
    }
}
