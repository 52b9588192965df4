//! Error surface for the power-domain engine.
//!
//! Covers the error kinds raised by topology edits, runtime PM and the
//! system-sleep pipeline. Kept as a plain enum with a hand-written
//! `Display` rather than a derive macro.

use core::fmt;

/// Stable, small error surface. Each variant corresponds to one of the
/// abstract kinds callers are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmError {
    /// A topology edit or lookup referenced something malformed (self-link,
    /// missing back-pointer, device already bound elsewhere).
    InvalidArg,
    /// Allocation failure when growing registry-owned storage.
    NoMem,
    /// Lookup of a domain or device that is not registered.
    NoEnt,
    /// A device has no timing/QoS data associated with it.
    NoData,
    /// The operation is vetoed right now (governor veto, attached devices
    /// still active, a subdomain still on); safe to retry or ignore.
    Busy,
    /// Contention refusal: `prepared_count > 0` during a topology edit.
    /// Retryable with back-off (see [`crate::registry::Registry::attach_device`]
    /// and [`crate::registry::Registry::detach_device`]).
    Again,
    /// The requested edge or binding already exists.
    Exists,
    /// Attach/detach-path translation of a retryable failure, signalling the
    /// driver-core equivalent should defer and retry probing later.
    Defer,
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PmError::InvalidArg => write!(f, "invalid argument"),
            PmError::NoMem => write!(f, "out of memory"),
            PmError::NoEnt => write!(f, "no such domain or device"),
            PmError::NoData => write!(f, "no timing data for device"),
            PmError::Busy => write!(f, "busy"),
            PmError::Again => write!(f, "try again"),
            PmError::Exists => write!(f, "already exists"),
            PmError::Defer => write!(f, "probe deferred"),
        }
    }
}

impl std::error::Error for PmError {}

/// Result alias used throughout the crate.
pub type PmResult<T> = Result<T, PmError>;
