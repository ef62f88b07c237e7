//! Error taxonomy: stable numeric codes plus textual descriptions.
//!
//! The numeric values are part of the external contract (bindings and
//! logging correlate on them) and never change. Gaps in the sequence are
//! retired historical codes.

use std::fmt;

/// Numeric code reported for success.
pub const SUCCESS: i32 = 0;

/// Everything that can go wrong at the eshm surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EshmError {
    /// A caller-supplied argument was rejected.
    InvalidParam,
    /// Creating the shared region failed.
    Create,
    /// Attaching to an existing region failed (missing, bad magic, wrong size).
    Attach,
    /// Detaching from the region failed.
    Detach,
    /// Removing the region name failed.
    Delete,
    /// Non-blocking probe found nothing new.
    NoData,
    /// A bounded wait elapsed, or the mapping is transiently detached while
    /// the slave reconnects.
    Timeout,
    /// The remote side stopped heartbeating (IMMEDIATELY policy only).
    RemoteStale,
    /// Payload larger than the channel capacity, or destination buffer
    /// smaller than the pending payload.
    BufferTooSmall,
    /// The handle has no mapping and is not reconnecting.
    NotInitialized,
    /// Operation not valid for this handle's role.
    RoleMismatch,
}

impl EshmError {
    /// Stable negative code for this error.
    pub const fn code(self) -> i32 {
        match self {
            EshmError::InvalidParam => -1,
            EshmError::Create => -2,
            EshmError::Attach => -3,
            EshmError::Detach => -4,
            EshmError::Delete => -5,
            EshmError::NoData => -9,
            EshmError::Timeout => -10,
            EshmError::RemoteStale => -11,
            EshmError::BufferTooSmall => -13,
            EshmError::NotInitialized => -14,
            EshmError::RoleMismatch => -15,
        }
    }

    /// The error for a stable code, if the code is known.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(EshmError::InvalidParam),
            -2 => Some(EshmError::Create),
            -3 => Some(EshmError::Attach),
            -4 => Some(EshmError::Detach),
            -5 => Some(EshmError::Delete),
            -9 => Some(EshmError::NoData),
            -10 => Some(EshmError::Timeout),
            -11 => Some(EshmError::RemoteStale),
            -13 => Some(EshmError::BufferTooSmall),
            -14 => Some(EshmError::NotInitialized),
            -15 => Some(EshmError::RoleMismatch),
            _ => None,
        }
    }

    /// Stable textual description.
    pub const fn as_str(self) -> &'static str {
        match self {
            EshmError::InvalidParam => "invalid parameter",
            EshmError::Create => "failed to create shared memory",
            EshmError::Attach => "failed to attach to shared memory",
            EshmError::Detach => "failed to detach from shared memory",
            EshmError::Delete => "failed to delete shared memory",
            EshmError::NoData => "no data available",
            EshmError::Timeout => "operation timed out",
            EshmError::RemoteStale => "remote endpoint is stale",
            EshmError::BufferTooSmall => "buffer too small",
            EshmError::NotInitialized => "not initialized",
            EshmError::RoleMismatch => "role mismatch",
        }
    }
}

impl fmt::Display for EshmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for EshmError {}

/// Description for a numeric code, `SUCCESS` included.
pub fn error_string(code: i32) -> &'static str {
    if code == SUCCESS {
        return "success";
    }
    match EshmError::from_code(code) {
        Some(err) => err.as_str(),
        None => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EshmError; 11] = [
        EshmError::InvalidParam,
        EshmError::Create,
        EshmError::Attach,
        EshmError::Detach,
        EshmError::Delete,
        EshmError::NoData,
        EshmError::Timeout,
        EshmError::RemoteStale,
        EshmError::BufferTooSmall,
        EshmError::NotInitialized,
        EshmError::RoleMismatch,
    ];

    #[test]
    fn codes_are_stable() {
        assert_eq!(EshmError::InvalidParam.code(), -1);
        assert_eq!(EshmError::Create.code(), -2);
        assert_eq!(EshmError::Attach.code(), -3);
        assert_eq!(EshmError::Detach.code(), -4);
        assert_eq!(EshmError::Delete.code(), -5);
        assert_eq!(EshmError::NoData.code(), -9);
        assert_eq!(EshmError::Timeout.code(), -10);
        assert_eq!(EshmError::RemoteStale.code(), -11);
        assert_eq!(EshmError::BufferTooSmall.code(), -13);
        assert_eq!(EshmError::NotInitialized.code(), -14);
        assert_eq!(EshmError::RoleMismatch.code(), -15);
    }

    #[test]
    fn code_roundtrip() {
        for err in ALL {
            assert_eq!(EshmError::from_code(err.code()), Some(err));
        }
        assert_eq!(EshmError::from_code(0), None);
        assert_eq!(EshmError::from_code(-6), None);
        assert_eq!(EshmError::from_code(-99), None);
    }

    #[test]
    fn strings_cover_every_code() {
        assert_eq!(error_string(SUCCESS), "success");
        for err in ALL {
            assert_eq!(error_string(err.code()), err.as_str());
        }
        assert_eq!(error_string(-100), "unknown error");
    }
}
