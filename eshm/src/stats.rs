//! Copy-out statistics snapshot.

/// One observation of the region and its channels.
///
/// The heartbeat deltas are measured against the previous snapshot taken
/// through the same handle, so polling [`crate::EshmHandle::stats`] at a
/// fixed cadence shows whether each side is ticking.
#[derive(Debug, Clone, Copy, Default)]
pub struct EshmStats {
    /// MASTER heartbeat counter.
    pub master_heartbeat: u64,
    /// SLAVE heartbeat counter.
    pub slave_heartbeat: u64,
    /// MASTER process id (0 = never attached).
    pub master_pid: u32,
    /// SLAVE process id (0 = never attached).
    pub slave_pid: u32,
    /// MASTER alive flag.
    pub master_alive: bool,
    /// SLAVE alive flag.
    pub slave_alive: bool,
    /// Staleness threshold in milliseconds, as stored in the header.
    pub stale_threshold_ms: u32,
    /// MASTER generation; grows by one with every MASTER start.
    pub master_generation: u32,
    /// MASTER heartbeat change since the previous snapshot.
    pub master_heartbeat_delta: u64,
    /// SLAVE heartbeat change since the previous snapshot.
    pub slave_heartbeat_delta: u64,
    /// Publications on the MASTER→SLAVE channel.
    pub m2s_write_count: u64,
    /// Snapshots taken from the MASTER→SLAVE channel (advisory).
    pub m2s_read_count: u64,
    /// Publications on the SLAVE→MASTER channel.
    pub s2m_write_count: u64,
    /// Snapshots taken from the SLAVE→MASTER channel (advisory).
    pub s2m_read_count: u64,
}
