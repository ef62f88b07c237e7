//! Master/slave shared-memory IPC substrate.
//!
//! eshm connects exactly two processes on one host through a named,
//! fixed-layout shared-memory region. One side (the MASTER) owns the
//! region; the other (the SLAVE) attaches to it. Each direction of traffic
//! has its own fixed-capacity channel published through a sequence lock, so
//! readers are lock-free and writers never block. Liveness is announced by
//! monotonically advancing heartbeat counters; a SLAVE that loses its
//! MASTER detaches and keeps re-attaching until a new MASTER incarnation of
//! the same region appears.
//!
//! ```text
//!  MASTER process                      SLAVE process
//!  ┌────────────┐   shared region    ┌────────────┐
//!  │ EshmHandle │ ┌────────────────┐ │ EshmHandle │
//!  │  heartbeat │→│ Header         │←│  heartbeat │
//!  │  monitor   │ ├────────────────┤ │  monitor   │
//!  │  write ────┼→│ M→S Channel    │→┼── read     │
//!  │  read  ←───┼←│ S→M Channel    │←┼── write    │
//!  └────────────┘ └────────────────┘ └────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use eshm::{EshmConfig, EshmHandle};
//! use std::time::Duration;
//!
//! // One process creates (or takes over) the region...
//! let master = EshmHandle::init(EshmConfig::new("demo"))?;
//! master.write(b"Hello, World!")?;
//!
//! // ...the other attaches to it and reads.
//! let slave = EshmHandle::init(EshmConfig::new("demo"))?;
//! let mut buf = [0u8; 4096];
//! let len = slave.read_with_timeout(&mut buf, Duration::from_millis(1000))?;
//! assert_eq!(&buf[..len], b"Hello, World!");
//! # Ok::<(), eshm::EshmError>(())
//! ```
//!
//! Channels do not queue: a write overwrites the previous payload whether or
//! not it was read. Producers that cannot lose messages pace themselves
//! through higher-level acknowledgement.

pub mod channel;
pub mod config;
pub mod error;
pub mod handle;
pub mod layout;
pub mod name;
pub mod region;
pub mod stats;

mod heartbeat;
mod monitor;

pub use channel::{ChannelError, ChannelView};
pub use config::{
    DEFAULT_READ_TIMEOUT, DisconnectPolicy, EshmConfig, HEARTBEAT_INTERVAL, MONITOR_INTERVAL,
    READ_POLL_INTERVAL, Role,
};
pub use error::{EshmError, SUCCESS, error_string};
pub use handle::{EshmHandle, HandleState};
pub use layout::{CHANNEL_CAPACITY, MAGIC, REGION_SIZE, VERSION};
pub use stats::EshmStats;
