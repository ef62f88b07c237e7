//! Master crash, staleness, and slave reattachment.
//!
//! These tests fork real child processes for the MASTER side and kill them
//! with SIGKILL, so the alive flags stay set and the region name stays
//! behind — exactly what an abrupt crash leaves for the SLAVE to deal with.

#![cfg(unix)]

use std::time::{Duration, Instant};

use eshm::{DisconnectPolicy, EshmConfig, EshmError, EshmHandle, HandleState, Role};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn unique(tag: &str) -> String {
    format!("rc-{}-{tag}", std::process::id())
}

fn slave_config(identifier: &str) -> EshmConfig {
    let mut config = EshmConfig::new(identifier);
    config.role = Role::Slave;
    config
}

/// Fork a child that runs a MASTER on `identifier`, publishing `payload`
/// every few milliseconds until it is killed.
fn spawn_master(identifier: &str, payload: &[u8]) -> libc::pid_t {
    let identifier = identifier.to_string();
    let payload = payload.to_vec();
    match unsafe { libc::fork() } {
        -1 => panic!("fork failed"),
        0 => {
            let mut config = EshmConfig::new(&identifier);
            config.role = Role::Master;
            let Ok(master) = EshmHandle::init(config) else {
                unsafe { libc::_exit(2) };
            };
            loop {
                let _ = master.write(&payload);
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        pid => pid,
    }
}

fn kill_and_reap(pid: libc::pid_t) {
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        let mut status = 0;
        libc::waitpid(pid, &mut status, 0);
    }
}

/// Poll `predicate` until it holds or `budget` is spent.
fn wait_for(budget: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < budget {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn read_until_success(slave: &EshmHandle, budget: Duration) -> Option<Vec<u8>> {
    let start = Instant::now();
    let mut buf = [0u8; 64];
    while start.elapsed() < budget {
        match slave.read_with_timeout(&mut buf, Duration::from_millis(100)) {
            Ok(len) => return Some(buf[..len].to_vec()),
            Err(EshmError::Timeout) | Err(EshmError::NoData) => continue,
            Err(err) => panic!("unexpected read error: {err}"),
        }
    }
    None
}

#[test]
fn slave_detects_killed_master_and_reads_timeout() {
    init_tracing();
    let id = unique("stale");
    let master_pid = spawn_master(&id, b"alive");

    let mut config = slave_config(&id);
    config.reconnect_wait_ms = 0; // keep retrying for the whole test
    config.max_reconnect_attempts = 0;
    let slave = EshmHandle::init(config).unwrap();

    assert!(read_until_success(&slave, Duration::from_secs(2)).is_some());
    assert!(slave.remote_alive());

    kill_and_reap(master_pid);

    // Staleness verdict lands within the threshold plus a few monitor ticks.
    assert!(
        wait_for(Duration::from_millis(500), || !slave.remote_alive()),
        "slave never noticed the dead master"
    );

    // The dead master may have left one unread payload; drain it.
    let mut buf = [0u8; 64];
    while slave
        .read_with_timeout(&mut buf, Duration::from_millis(20))
        .is_ok()
    {}

    // ON_TIMEOUT policy: reads keep reporting timeout so the caller can
    // poll while the monitor reattaches; never remote-stale.
    for _ in 0..3 {
        match slave.read_with_timeout(&mut buf, Duration::from_millis(50)) {
            Err(EshmError::Timeout) => {}
            other => panic!("expected timeout while reconnecting, got {other:?}"),
        }
    }

    eshm::region::unlink_region(&id).unwrap();
}

#[test]
fn slave_reattaches_to_new_master_incarnation() {
    init_tracing();
    let id = unique("reattach");
    let first_master = spawn_master(&id, b"M1-#1");

    let slave = EshmHandle::init(slave_config(&id)).unwrap();
    assert_eq!(
        read_until_success(&slave, Duration::from_secs(2)).as_deref(),
        Some(b"M1-#1".as_slice())
    );
    let first_generation = slave.stats().unwrap().master_generation;

    kill_and_reap(first_master);
    assert!(
        wait_for(Duration::from_secs(1), || {
            slave.state() == HandleState::SlaveReconnecting
        }),
        "slave never entered reattach mode"
    );

    // A new master incarnation appears under the same name, inside the
    // default 5000 ms reconnect budget.
    let second_master = spawn_master(&id, b"M2-#1");

    let payload = read_until_success(&slave, Duration::from_secs(4));
    assert_eq!(payload.as_deref(), Some(b"M2-#1".as_slice()));
    assert_eq!(slave.state(), HandleState::Mapped);

    let stats = slave.stats().unwrap();
    assert!(
        stats.master_generation > first_generation,
        "generation did not advance: {} -> {}",
        first_generation,
        stats.master_generation
    );

    kill_and_reap(second_master);
    eshm::region::unlink_region(&id).unwrap();
}

#[test]
fn immediate_policy_stops_the_handle() {
    init_tracing();
    let id = unique("immediate");
    let master_pid = spawn_master(&id, b"here");

    let mut config = slave_config(&id);
    config.disconnect_policy = DisconnectPolicy::Immediately;
    let slave = EshmHandle::init(config).unwrap();
    assert!(read_until_success(&slave, Duration::from_secs(2)).is_some());

    kill_and_reap(master_pid);
    assert!(
        wait_for(Duration::from_secs(1), || {
            slave.state() == HandleState::Stopped
        }),
        "slave never stopped"
    );

    // First read after the verdict reports the stale master; once the
    // handle is stopped, later reads report not-initialized.
    let mut buf = [0u8; 16];
    assert_eq!(
        slave.read_with_timeout(&mut buf, Duration::from_millis(50)),
        Err(EshmError::RemoteStale)
    );
    assert_eq!(
        slave.read_with_timeout(&mut buf, Duration::from_millis(50)),
        Err(EshmError::NotInitialized)
    );

    eshm::region::unlink_region(&id).unwrap();
}

#[test]
fn bounded_reconnect_exhausts_and_stops() {
    init_tracing();
    let id = unique("bounded");
    let master_pid = spawn_master(&id, b"short-lived");

    let mut config = slave_config(&id);
    config.max_reconnect_attempts = 3;
    config.reconnect_retry_interval_ms = 30;
    config.reconnect_wait_ms = 0;
    let slave = EshmHandle::init(config).unwrap();
    assert!(read_until_success(&slave, Duration::from_secs(2)).is_some());

    kill_and_reap(master_pid);
    // No new master ever starts: three attempts, then the handle stops.
    assert!(
        wait_for(Duration::from_secs(3), || {
            slave.state() == HandleState::Stopped
        }),
        "slave never gave up"
    );

    let mut buf = [0u8; 16];
    assert_eq!(
        slave.read_with_timeout(&mut buf, Duration::from_millis(50)),
        Err(EshmError::NotInitialized)
    );
    assert_eq!(slave.write(b"x"), Err(EshmError::NotInitialized));

    eshm::region::unlink_region(&id).unwrap();
}

#[test]
fn reconnect_budget_exhausts_and_stops() {
    init_tracing();
    let id = unique("budget");
    let master_pid = spawn_master(&id, b"short-lived");

    let mut config = slave_config(&id);
    config.max_reconnect_attempts = 0;
    config.reconnect_wait_ms = 300;
    config.reconnect_retry_interval_ms = 50;
    let slave = EshmHandle::init(config).unwrap();
    assert!(read_until_success(&slave, Duration::from_secs(2)).is_some());

    kill_and_reap(master_pid);
    assert!(
        wait_for(Duration::from_secs(3), || {
            slave.state() == HandleState::Stopped
        }),
        "slave never gave up"
    );

    eshm::region::unlink_region(&id).unwrap();
}
