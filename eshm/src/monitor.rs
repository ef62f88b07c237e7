//! Liveness monitor: staleness detection and the slave reattach loop.
//!
//! One thread per handle, ticking every [`MONITOR_INTERVAL`]. Staleness is
//! measured by observed change of the peer's heartbeat cell over ticks, not
//! by wall-clock timestamps, so the two processes never compare clocks.
//!
//! When a SLAVE declares its MASTER stale (policy permitting) the monitor
//! switches into reattach mode: it publishes a null mapping pointer, waits
//! a quiesce period so the heartbeat thread and in-flight entry points can
//! observe the null, unmaps, and then re-opens the region by name until a
//! *new* MASTER incarnation shows up — recognized by a master heartbeat
//! different from the last one the old incarnation published.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use tracing::{debug, info, warn};

use crate::config::{DisconnectPolicy, MONITOR_INTERVAL, REATTACH_QUIESCE, Role};
use crate::handle::{HandleState, Shared};
use crate::region::{self, RegionMap};

/// Body of the monitor thread.
pub(crate) fn run(shared: Arc<Shared>) {
    debug!(role = ?shared.role, "monitor thread started");

    let tick_ms = MONITOR_INTERVAL.as_millis() as u64;
    let mut reattaching = false;
    let mut total_wait_ms: u64 = 0;
    let mut since_attempt_ms: u64 = 0;
    let mut attempts: u32 = 0;

    while shared.running.load(Ordering::Acquire) {
        if reattaching {
            total_wait_ms += tick_ms;
            since_attempt_ms += tick_ms;

            if since_attempt_ms >= shared.config.reconnect_retry_interval_ms as u64 {
                since_attempt_ms = 0;
                attempts += 1;

                if try_reattach(&shared, attempts) {
                    info!(
                        attempts,
                        waited_ms = total_wait_ms,
                        "slave reattached to new master"
                    );
                    reattaching = false;
                    total_wait_ms = 0;
                    attempts = 0;
                    continue;
                }

                let max_attempts = shared.config.max_reconnect_attempts;
                if max_attempts > 0 && attempts >= max_attempts {
                    warn!(attempts, "reattach attempt limit reached, giving up");
                    stop(&shared);
                    break;
                }
            }

            // The total-wait bound is meaningless under the NEVER policy.
            let budget_ms = shared.config.reconnect_wait_ms as u64;
            if shared.config.disconnect_policy != DisconnectPolicy::Never
                && budget_ms > 0
                && total_wait_ms >= budget_ms
            {
                warn!(waited_ms = total_wait_ms, "reattach budget spent, giving up");
                stop(&shared);
                break;
            }

            thread::sleep(MONITOR_INTERVAL);
            continue;
        }

        // Normal monitoring.
        let ptr = shared.mapping.load(Ordering::Acquire);
        if !ptr.is_null() {
            let header = unsafe { &(*ptr).header };
            let remote = shared.remote_heartbeat_cell(header).load(Ordering::Acquire);
            let threshold_ms = header.stale_threshold_ms.load(Ordering::Acquire) as u64;

            if remote == shared.last_remote_heartbeat.load(Ordering::Acquire) {
                let stale_ms = shared
                    .stale_counter_ms
                    .fetch_add(tick_ms, Ordering::AcqRel)
                    + tick_ms;

                if stale_ms >= threshold_ms && !shared.remote_is_stale.load(Ordering::Acquire) {
                    warn!(stale_ms, threshold_ms, "remote endpoint is stale");

                    if shared.role == Role::Slave {
                        match shared.config.disconnect_policy {
                            DisconnectPolicy::Immediately => {
                                // Stale flag first: any read that sees the
                                // stopped state must also see the flag, so
                                // the one-shot remote-stale report wins over
                                // not-initialized.
                                shared.remote_is_stale.store(true, Ordering::Release);
                                shared
                                    .state
                                    .store(HandleState::Stopped as u32, Ordering::Release);
                                shared.running.store(false, Ordering::Release);
                                break;
                            }
                            DisconnectPolicy::OnTimeout | DisconnectPolicy::Never => {
                                shared.remote_is_stale.store(true, Ordering::Release);
                                shared.state.store(
                                    HandleState::SlaveReconnecting as u32,
                                    Ordering::Release,
                                );
                                info!("slave entering reattach mode");
                                reattaching = true;
                                total_wait_ms = 0;
                                // First attempt fires on the next tick.
                                since_attempt_ms =
                                    shared.config.reconnect_retry_interval_ms as u64;
                                attempts = 0;
                            }
                        }
                    } else {
                        shared.remote_is_stale.store(true, Ordering::Release);
                    }
                }
            } else {
                if shared.remote_is_stale.load(Ordering::Acquire) {
                    info!("remote endpoint recovered");
                }
                shared.stale_counter_ms.store(0, Ordering::Release);
                shared.remote_is_stale.store(false, Ordering::Release);
                shared.stale_notified.store(false, Ordering::Release);
                shared.last_remote_heartbeat.store(remote, Ordering::Release);
            }
        }

        thread::sleep(MONITOR_INTERVAL);
    }

    debug!(role = ?shared.role, "monitor thread stopped");
}

/// One reattach attempt. Returns `true` once a new MASTER incarnation has
/// been adopted.
fn try_reattach(shared: &Arc<Shared>, attempt: u32) -> bool {
    debug!(attempt, "slave reattach attempt");

    // Publish the detached pointer, give the heartbeat thread and in-flight
    // entry points a chance to observe it, and only then drop the mapping.
    let old = shared
        .mapping
        .swap(std::ptr::null_mut(), Ordering::Release);
    if !old.is_null() {
        thread::sleep(REATTACH_QUIESCE);
        *shared.map.lock() = None;
    }

    let Ok(map) = RegionMap::open(&shared.object_name) else {
        debug!(attempt, "region not openable yet");
        return false;
    };
    if map.validate().is_err() {
        return false;
    }

    let master_heartbeat = map.header().master_heartbeat.load(Ordering::Acquire);
    if master_heartbeat == shared.last_remote_heartbeat.load(Ordering::Acquire) {
        // Same heartbeat as the incarnation we declared dead: the OS has
        // not recycled the name yet. Keep waiting for a new master.
        debug!(attempt, "region still belongs to the dead incarnation");
        return false;
    }

    region::mark_slave(map.header());
    let ptr = map.data();

    // Anything already in the adopted channel was authored before this
    // incarnation's first delivered write; never hand it to the caller.
    let incoming = unsafe { crate::channel::ChannelView::from_raw(shared.incoming_channel(ptr)) };
    shared
        .last_seen_incoming
        .store(incoming.write_count(), Ordering::Release);

    *shared.map.lock() = Some(map);

    shared.stale_counter_ms.store(0, Ordering::Release);
    shared.remote_is_stale.store(false, Ordering::Release);
    shared.stale_notified.store(false, Ordering::Release);
    shared
        .last_remote_heartbeat
        .store(master_heartbeat, Ordering::Release);
    shared.mapping.store(ptr, Ordering::Release);
    shared
        .state
        .store(HandleState::Mapped as u32, Ordering::Release);
    true
}

fn stop(shared: &Arc<Shared>) {
    shared
        .state
        .store(HandleState::Stopped as u32, Ordering::Release);
    shared.running.store(false, Ordering::Release);
}
