//! The handle: one process's attachment to a region.
//!
//! `EshmHandle` ties together the mapping, the resolved role, and the two
//! background threads. All cross-thread state lives in [`Shared`], which the
//! heartbeat and monitor threads hold through an `Arc`; the handle itself
//! owns the join handles and the destroy/Drop path.
//!
//! The mapping is reachable two ways: `Shared::mapping` is an atomic pointer
//! for the hot paths (entry points, heartbeat, monitor), and `Shared::map`
//! owns the actual `RegionMap` so the monitor can replace it during a
//! reattach. The protocol for tearing a mapping down is: store null into
//! `mapping` (release), wait the quiesce period, then drop the map. Everyone
//! who reads `mapping` loads it to a local once and treats null as "retry
//! later" — nobody holds a pointer across a sleep.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::channel::{ChannelError, ChannelView};
use crate::config::{DEFAULT_READ_TIMEOUT, DisconnectPolicy, EshmConfig, READ_POLL_INTERVAL, Role};
use crate::error::EshmError;
use crate::layout::{Channel, RegionData, RegionHeader};
use crate::region::{self, RegionMap};
use crate::stats::EshmStats;
use crate::{heartbeat, monitor, name};

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HandleState {
    /// Transient, inside init.
    Created = 0,
    /// Mapped and exchanging.
    Mapped = 1,
    /// SLAVE lost its MASTER and is retrying the attach.
    SlaveReconnecting = 2,
    /// Terminal: destroyed, or the monitor gave up.
    Stopped = 3,
}

impl HandleState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => HandleState::Mapped,
            2 => HandleState::SlaveReconnecting,
            3 => HandleState::Stopped,
            _ => HandleState::Created,
        }
    }
}

/// State shared between the handle and its background threads.
pub(crate) struct Shared {
    /// Hot-path view of the mapping; null while the slave is detached.
    pub(crate) mapping: AtomicPtr<RegionData>,
    /// The owned mapping. Written by init, destroy, and the reattach loop.
    pub(crate) map: Mutex<Option<RegionMap>>,
    /// Cleared by destroy or by the monitor to end both threads.
    pub(crate) running: AtomicBool,
    /// [`HandleState`] as u32.
    pub(crate) state: AtomicU32,
    /// Set by the monitor when the peer's heartbeat stopped advancing.
    pub(crate) remote_is_stale: AtomicBool,
    /// One-shot latch: the first read after staleness reports remote-stale,
    /// later reads report not-initialized (IMMEDIATELY policy).
    pub(crate) stale_notified: AtomicBool,
    /// Peer heartbeat value the monitor saw last.
    pub(crate) last_remote_heartbeat: AtomicU64,
    /// Incoming-channel write count already delivered to the caller.
    /// Re-baselined by the monitor when it adopts a new incarnation, so
    /// bytes authored by a dead generation are never delivered.
    pub(crate) last_seen_incoming: AtomicU64,
    /// Milliseconds of unchanged peer heartbeat, accrued per monitor tick.
    pub(crate) stale_counter_ms: AtomicU64,
    /// Previous stats snapshot, for the heartbeat deltas.
    pub(crate) last_master_heartbeat: AtomicU64,
    pub(crate) last_slave_heartbeat: AtomicU64,
    /// Resolved role (never `Auto`).
    pub(crate) role: Role,
    /// The configuration the handle was built with.
    pub(crate) config: EshmConfig,
    /// shm object name, kept for the reattach loop.
    pub(crate) object_name: String,
}

impl Shared {
    /// This side's heartbeat cell.
    pub(crate) fn own_heartbeat_cell<'h>(&self, header: &'h RegionHeader) -> &'h AtomicU64 {
        match self.role {
            Role::Master => &header.master_heartbeat,
            _ => &header.slave_heartbeat,
        }
    }

    /// The peer's heartbeat cell.
    pub(crate) fn remote_heartbeat_cell<'h>(&self, header: &'h RegionHeader) -> &'h AtomicU64 {
        match self.role {
            Role::Master => &header.slave_heartbeat,
            _ => &header.master_heartbeat,
        }
    }

    /// The channel this side writes.
    fn outgoing_channel(&self, data: *mut RegionData) -> *mut Channel {
        match self.role {
            Role::Master => unsafe { &raw mut (*data).master_to_slave },
            _ => unsafe { &raw mut (*data).slave_to_master },
        }
    }

    /// The channel this side reads.
    pub(crate) fn incoming_channel(&self, data: *mut RegionData) -> *mut Channel {
        match self.role {
            Role::Master => unsafe { &raw mut (*data).slave_to_master },
            _ => unsafe { &raw mut (*data).master_to_slave },
        }
    }

    fn state(&self) -> HandleState {
        HandleState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Error for a null mapping: retry-friendly while reconnecting, hard
    /// otherwise.
    fn detached_error(&self) -> EshmError {
        if self.state() == HandleState::SlaveReconnecting {
            EshmError::Timeout
        } else {
            EshmError::NotInitialized
        }
    }

    /// Error for a stale remote under the IMMEDIATELY policy.
    ///
    /// While the handle still runs (a MASTER watching a dead SLAVE) every
    /// read reports remote-stale. Once the monitor has stopped the handle,
    /// only the first read reports it; the rest see not-initialized.
    fn stale_error(&self) -> EshmError {
        if self.state() == HandleState::Stopped && self.stale_notified.swap(true, Ordering::AcqRel)
        {
            EshmError::NotInitialized
        } else {
            EshmError::RemoteStale
        }
    }
}

/// One attachment to a named region.
///
/// Created by [`EshmHandle::init`], torn down by [`EshmHandle::destroy`] (or
/// `Drop`, best-effort). All entry points take `&self` and may be called
/// concurrently with each other and with the background threads.
pub struct EshmHandle {
    shared: Arc<Shared>,
    heartbeat: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    is_creator: bool,
    destroyed: bool,
}

impl EshmHandle {
    /// Validate `config`, resolve the role, map the region, and start the
    /// background threads.
    pub fn init(config: EshmConfig) -> Result<Self, EshmError> {
        config.validate()?;

        let attachment = region::establish(&config)?;
        let region::Attachment {
            mut map,
            role,
            is_creator,
        } = attachment;

        // From here on the name is only removed by an explicit destroy.
        map.set_unlink_on_drop(is_creator && config.auto_cleanup);

        let mapping = map.data();
        let use_tasks = config.use_background_tasks;
        let object_name = name::object_name(&config.name);

        let shared = Arc::new(Shared {
            mapping: AtomicPtr::new(mapping),
            map: Mutex::new(Some(map)),
            running: AtomicBool::new(true),
            state: AtomicU32::new(HandleState::Created as u32),
            remote_is_stale: AtomicBool::new(false),
            stale_notified: AtomicBool::new(false),
            last_remote_heartbeat: AtomicU64::new(0),
            last_seen_incoming: AtomicU64::new(0),
            stale_counter_ms: AtomicU64::new(0),
            last_master_heartbeat: AtomicU64::new(0),
            last_slave_heartbeat: AtomicU64::new(0),
            role,
            config,
            object_name,
        });

        let mut handle = Self {
            shared,
            heartbeat: None,
            monitor: None,
            is_creator,
            destroyed: false,
        };

        if use_tasks {
            if let Err(err) = handle.spawn_tasks() {
                warn!(%err, "background thread start failed");
                handle.shutdown();
                handle.destroyed = true;
                return Err(EshmError::Create);
            }
        }

        handle
            .shared
            .state
            .store(HandleState::Mapped as u32, Ordering::Release);
        Ok(handle)
    }

    fn spawn_tasks(&mut self) -> std::io::Result<()> {
        let shared = Arc::clone(&self.shared);
        self.heartbeat = Some(
            thread::Builder::new()
                .name("eshm-heartbeat".into())
                .spawn(move || heartbeat::run(shared))?,
        );

        let shared = Arc::clone(&self.shared);
        self.monitor = Some(
            thread::Builder::new()
                .name("eshm-monitor".into())
                .spawn(move || monitor::run(shared))?,
        );
        Ok(())
    }

    /// Publish `bytes` on this side's outgoing channel.
    ///
    /// Last writer wins: an unread previous payload is overwritten. A
    /// zero-length write is a valid wake trigger.
    pub fn write(&self, bytes: &[u8]) -> Result<(), EshmError> {
        let ptr = self.shared.mapping.load(Ordering::Acquire);
        if ptr.is_null() {
            return Err(self.shared.detached_error());
        }

        let view = unsafe { ChannelView::from_raw(self.shared.outgoing_channel(ptr)) };
        view.write(bytes)
            .map_err(|_| EshmError::BufferTooSmall)
    }

    /// Wait up to `timeout` for a publication the caller has not yet seen,
    /// then snapshot it into `buf` and return its length.
    ///
    /// The handle tracks the incoming write count it has delivered, so a
    /// payload published before this call (but never read) is returned
    /// immediately. A zero `timeout` is a non-blocking probe that reports
    /// no-data instead of timeout.
    pub fn read_with_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, EshmError> {
        let shared = &self.shared;
        let start = Instant::now();

        loop {
            let mapped = shared.mapping.load(Ordering::Acquire);
            if mapped.is_null() {
                return Err(shared.detached_error());
            }
            if shared.config.disconnect_policy == DisconnectPolicy::Immediately
                && shared.remote_is_stale.load(Ordering::Acquire)
            {
                return Err(shared.stale_error());
            }
            if !shared.running.load(Ordering::Acquire)
                && shared.state() == HandleState::Stopped
            {
                return Err(EshmError::NotInitialized);
            }

            let view = unsafe { ChannelView::from_raw(shared.incoming_channel(mapped)) };
            let baseline = shared.last_seen_incoming.load(Ordering::Acquire);

            match view.try_read(buf, baseline) {
                Ok(Some((len, observed))) => {
                    shared
                        .last_seen_incoming
                        .fetch_max(observed, Ordering::AcqRel);
                    return Ok(len);
                }
                Ok(None) => {}
                Err(ChannelError::BufferTooSmall) => return Err(EshmError::BufferTooSmall),
            }

            if timeout.is_zero() {
                return Err(EshmError::NoData);
            }
            if start.elapsed() >= timeout {
                return Err(EshmError::Timeout);
            }
            thread::sleep(READ_POLL_INTERVAL);
        }
    }

    /// [`EshmHandle::read_with_timeout`] with the default 1000 ms budget.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, EshmError> {
        self.read_with_timeout(buf, DEFAULT_READ_TIMEOUT)
    }

    /// True while the peer's heartbeat keeps advancing and the mapping is
    /// present.
    pub fn remote_alive(&self) -> bool {
        let ptr = self.shared.mapping.load(Ordering::Acquire);
        !ptr.is_null() && !self.shared.remote_is_stale.load(Ordering::Acquire)
    }

    /// Snapshot the region and channel counters, updating the heartbeat
    /// deltas kept for the next snapshot.
    pub fn stats(&self) -> Result<EshmStats, EshmError> {
        let ptr = self.shared.mapping.load(Ordering::Acquire);
        if ptr.is_null() {
            return Err(EshmError::NotInitialized);
        }

        let header = unsafe { &(*ptr).header };
        let master_heartbeat = header.master_heartbeat.load(Ordering::Acquire);
        let slave_heartbeat = header.slave_heartbeat.load(Ordering::Acquire);

        let previous_master = self
            .shared
            .last_master_heartbeat
            .swap(master_heartbeat, Ordering::AcqRel);
        let previous_slave = self
            .shared
            .last_slave_heartbeat
            .swap(slave_heartbeat, Ordering::AcqRel);

        let m2s = unsafe { ChannelView::from_raw(&raw mut (*ptr).master_to_slave) };
        let s2m = unsafe { ChannelView::from_raw(&raw mut (*ptr).slave_to_master) };

        Ok(EshmStats {
            master_heartbeat,
            slave_heartbeat,
            master_pid: header.master_pid.load(Ordering::Acquire),
            slave_pid: header.slave_pid.load(Ordering::Acquire),
            master_alive: header.master_alive.load(Ordering::Acquire) != 0,
            slave_alive: header.slave_alive.load(Ordering::Acquire) != 0,
            stale_threshold_ms: header.stale_threshold_ms.load(Ordering::Acquire),
            master_generation: header.master_generation.load(Ordering::Acquire),
            master_heartbeat_delta: master_heartbeat.wrapping_sub(previous_master),
            slave_heartbeat_delta: slave_heartbeat.wrapping_sub(previous_slave),
            m2s_write_count: m2s.write_count(),
            m2s_read_count: m2s.read_count(),
            s2m_write_count: s2m.write_count(),
            s2m_read_count: s2m.read_count(),
        })
    }

    /// The resolved role (`Auto` collapsed at init).
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandleState {
        self.shared.state()
    }

    /// Advance this side's heartbeat once, for callers running without
    /// background tasks.
    pub fn update_heartbeat(&self) -> Result<(), EshmError> {
        let ptr = self.shared.mapping.load(Ordering::Acquire);
        if ptr.is_null() {
            return Err(EshmError::NotInitialized);
        }
        let header = unsafe { &(*ptr).header };
        self.shared
            .own_heartbeat_cell(header)
            .fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Stop the background threads, clear this side's alive flag, unmap,
    /// and (creator with auto-cleanup) unlink the name.
    ///
    /// The second destroy of a handle reports invalid-parameter.
    pub fn destroy(&mut self) -> Result<(), EshmError> {
        if self.destroyed {
            return Err(EshmError::InvalidParam);
        }
        self.destroyed = true;
        self.shutdown();
        Ok(())
    }

    /// True if this handle created the region.
    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    fn shutdown(&mut self) {
        debug!(role = ?self.shared.role, "handle shutting down");
        self.shared.running.store(false, Ordering::Release);
        if let Some(thread) = self.heartbeat.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.monitor.take() {
            let _ = thread.join();
        }

        let ptr = self.shared.mapping.swap(ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            let header = unsafe { &(*ptr).header };
            region::clear_alive(header, self.shared.role);
        }
        self.shared
            .state
            .store(HandleState::Stopped as u32, Ordering::Release);

        // Unmaps, and unlinks the name when this handle was the creator and
        // auto-cleanup is on (set at init).
        *self.shared.map.lock() = None;
    }
}

impl Drop for EshmHandle {
    fn drop(&mut self) {
        if !self.destroyed {
            self.shutdown();
        }
    }
}
