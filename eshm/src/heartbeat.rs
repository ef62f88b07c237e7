//! Heartbeat source: advances this side's liveness counter.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use tracing::debug;

use crate::config::HEARTBEAT_INTERVAL;
use crate::handle::Shared;

/// Body of the heartbeat thread.
///
/// Each tick bumps this side's heartbeat cell with an atomic add; the RMW
/// needs no extra fence. A null mapping pointer (the slave is mid-reattach)
/// just skips the tick — the thread itself only exits when the running flag
/// clears.
pub(crate) fn run(shared: Arc<Shared>) {
    debug!(role = ?shared.role, "heartbeat thread started");

    while shared.running.load(Ordering::Acquire) {
        let ptr = shared.mapping.load(Ordering::Acquire);
        if !ptr.is_null() {
            let header = unsafe { &(*ptr).header };
            shared.own_heartbeat_cell(header).fetch_add(1, Ordering::AcqRel);
        }
        thread::sleep(HEARTBEAT_INTERVAL);
    }

    debug!(role = ?shared.role, "heartbeat thread stopped");
}
