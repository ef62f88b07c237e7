//! Region lifecycle: create, take over, attach, auto-negotiate, reclaim.
//!
//! `RegionMap` owns one mapping of the region and nothing else; the
//! decisions about who initializes, who takes over, and who unlinks live in
//! [`establish`] and the marking helpers. The creator of a fresh region is
//! the only party that ever writes the full header; a MASTER taking over a
//! region with a live SLAVE touches only the cells it owns so in-flight
//! reads on the other side never tear.

use std::sync::atomic::Ordering;

use eshm_primitives::ShmObject;
use tracing::{debug, info, warn};

use crate::config::{EshmConfig, Role};
use crate::error::EshmError;
use crate::layout::{Channel, REGION_SIZE, RegionData, RegionHeader};
use crate::name;

/// Mode bits for the on-disk object: both peers may run as different users.
const OBJECT_MODE: u32 = 0o666;

/// An owned mapping of one eshm region.
pub struct RegionMap {
    object: ShmObject,
}

impl RegionMap {
    /// Create the region exclusively and write its initial state.
    ///
    /// The returned map unlinks the name on drop until
    /// [`RegionMap::set_unlink_on_drop`] is called, so a failed init never
    /// leaves an orphan name behind.
    pub fn create(object_name: &str, stale_threshold_ms: u32) -> Result<Self, EshmError> {
        let object = ShmObject::create_exclusive(object_name, REGION_SIZE, OBJECT_MODE)
            .map_err(|err| {
                warn!(name = object_name, %err, "region create failed");
                EshmError::Create
            })?;
        let map = Self { object };
        unsafe {
            let data = map.data();
            (*data).header.init(stale_threshold_ms);
            (*data).master_to_slave.init();
            (*data).slave_to_master.init();
        }
        debug!(name = object_name, size = REGION_SIZE, "region created");
        Ok(map)
    }

    /// Map an existing region.
    ///
    /// Rejects objects whose size differs from this build's region total:
    /// the peers were built from different definitions and no field offset
    /// can be trusted.
    pub fn open(object_name: &str) -> Result<Self, EshmError> {
        let object = ShmObject::open(object_name).map_err(|err| {
            debug!(name = object_name, %err, "region open failed");
            EshmError::Attach
        })?;
        if object.len() != REGION_SIZE {
            warn!(
                name = object_name,
                found = object.len(),
                expected = REGION_SIZE,
                "region size mismatch, refusing to attach"
            );
            return Err(EshmError::Attach);
        }
        Ok(Self { object })
    }

    /// Pointer to the mapped region.
    #[inline]
    pub fn data(&self) -> *mut RegionData {
        self.object.region().as_ptr() as *mut RegionData
    }

    /// The region header.
    #[inline]
    pub fn header(&self) -> &RegionHeader {
        unsafe { &(*self.data()).header }
    }

    /// Pointer to the MASTER→SLAVE channel.
    #[inline]
    pub fn master_to_slave(&self) -> *mut Channel {
        unsafe { &raw mut (*self.data()).master_to_slave }
    }

    /// Pointer to the SLAVE→MASTER channel.
    #[inline]
    pub fn slave_to_master(&self) -> *mut Channel {
        unsafe { &raw mut (*self.data()).slave_to_master }
    }

    /// Check magic and version.
    pub fn validate(&self) -> Result<(), EshmError> {
        self.header().validate().map_err(|reason| {
            warn!(name = self.object.name(), reason, "invalid region header");
            EshmError::Attach
        })
    }

    /// Whether dropping this map also unlinks the region name.
    pub fn set_unlink_on_drop(&mut self, unlink: bool) {
        self.object.set_unlink_on_drop(unlink);
    }
}

/// Remove a region name (destroy-time cleanup).
pub fn unlink_region(identifier: &str) -> Result<(), EshmError> {
    ShmObject::unlink(&name::object_name(identifier)).map_err(|err| {
        warn!(identifier, %err, "region unlink failed");
        EshmError::Delete
    })
}

/// A mapped region together with the resolved role.
pub struct Attachment {
    pub map: RegionMap,
    pub role: Role,
    pub is_creator: bool,
}

/// Create, take over, or attach to the region named by `config`.
pub fn establish(config: &EshmConfig) -> Result<Attachment, EshmError> {
    let object_name = name::object_name(&config.name);
    match config.role {
        Role::Master => establish_master(&object_name, config),
        Role::Slave => establish_slave(&object_name),
        Role::Auto => {
            if ShmObject::exists(&object_name) {
                // Attach; if the region vanished under us, fall back once.
                establish_slave(&object_name)
                    .or_else(|_| establish_master(&object_name, config))
            } else {
                // Create; if someone beat us to it, attach once.
                establish_master(&object_name, config)
                    .or_else(|_| establish_slave(&object_name))
            }
        }
    }
}

fn establish_master(object_name: &str, config: &EshmConfig) -> Result<Attachment, EshmError> {
    if ShmObject::exists(object_name) {
        if let Ok(map) = RegionMap::open(object_name) {
            let valid = map.validate().is_ok();
            if valid && map.header().is_alive(false) {
                // A live SLAVE is attached: take over in place. Only cells
                // the MASTER owns are touched; the SLAVE's mapping and the
                // channel counters stay intact.
                let generation = mark_master(map.header());
                info!(name = object_name, generation, "master takeover of live region");
                return Ok(Attachment {
                    map,
                    role: Role::Master,
                    is_creator: false,
                });
            }
            // Dead or unrecognizable region: reclaim the name.
            info!(
                name = object_name,
                header_valid = valid,
                "master reclaiming stale region"
            );
            drop(map);
        }
        ShmObject::unlink(object_name).map_err(|err| {
            warn!(name = object_name, %err, "could not reclaim stale region");
            EshmError::Create
        })?;
    }

    let map = RegionMap::create(object_name, config.stale_threshold_ms)?;
    let generation = mark_master(map.header());
    info!(name = object_name, generation, "master created region");
    Ok(Attachment {
        map,
        role: Role::Master,
        is_creator: true,
    })
}

fn establish_slave(object_name: &str) -> Result<Attachment, EshmError> {
    let map = RegionMap::open(object_name)?;
    map.validate()?;
    mark_slave(map.header());
    info!(name = object_name, "slave attached");
    Ok(Attachment {
        map,
        role: Role::Slave,
        is_creator: false,
    })
}

/// Publish this process as the region's MASTER. Returns the new generation.
///
/// Bumps the generation first so a reconnecting SLAVE can pair the restart
/// with the heartbeat reset; the alive flag goes last with release ordering.
pub fn mark_master(header: &RegionHeader) -> u32 {
    let generation = header
        .master_generation
        .fetch_add(1, Ordering::AcqRel)
        .wrapping_add(1);
    header
        .master_pid
        .store(std::process::id(), Ordering::Release);
    header.master_heartbeat.store(0, Ordering::Release);
    header.master_alive.store(1, Ordering::Release);
    generation
}

/// Publish this process as the region's SLAVE.
pub fn mark_slave(header: &RegionHeader) {
    header.slave_pid.store(std::process::id(), Ordering::Release);
    header.slave_heartbeat.store(0, Ordering::Release);
    header.slave_alive.store(1, Ordering::Release);
}

/// Clear this side's alive flag (orderly detach).
pub fn clear_alive(header: &RegionHeader, role: Role) {
    match role {
        Role::Master => header.master_alive.store(0, Ordering::Release),
        Role::Slave => header.slave_alive.store(0, Ordering::Release),
        Role::Auto => {}
    }
}
