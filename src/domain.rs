//! A single power domain node: its links to masters/subdomains, its device
//! list and the mutable state machine the walker and runtime-PM paths
//! drive.
//!
//! A plain data-holding struct keyed by a small handle, generalized from
//! register mask/offset fields to DAG links and counters, with an
//! active/inactive bookkeeping shape borrowed from dependency-tracking
//! code elsewhere in this crate's lineage.

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use crate::ops::{DomainOps, Governor};
use crate::registry::{DeviceId, DomainId};

/// Power status of a domain. Only two states exist; there is no
/// "transitioning" state visible to callers because transitions hold the
/// domain's lock for their whole duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    PowerOff,
}

/// An edge from `master` to `slave` in the domain DAG, keyed by the
/// ordered pair. Registry-owned: a `Domain` never carries a raw pointer to
/// its neighbors, only the `DomainId` half of whichever links touch it
/// (`DomainState::masters`/`subdomains` below), so the two intrusive
/// anchors this generalizes never form an ambient pointer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    pub master: DomainId,
    pub slave: DomainId,
}

/// Mutable state guarded by the domain's own mutex: the per-domain
/// "spinlock" tier below the registry's coarse membership lock.
pub struct DomainState {
    pub status: Status,
    /// Domains this one is a subdomain of (must be active before this
    /// domain can power on).
    pub masters: Vec<DomainId>,
    /// Domains nested under this one (this domain must stay on while any
    /// of them are active).
    pub subdomains: Vec<DomainId>,
    /// Devices bound directly to this domain, in bind order.
    pub devices: Vec<DeviceId>,
    /// Number of devices currently marked suspended for the in-progress
    /// system-sleep cycle. Compared against `devices.len()` the same way
    /// the kernel compares `suspended_count` to `device_count`.
    pub suspended_count: usize,
    /// Number of devices that have gone through `prepare` for the
    /// in-progress sleep cycle without a matching `complete` yet.
    pub prepared_count: usize,
    /// Latched at the first `prepare` of a sleep cycle: whether this domain
    /// should be powered off for the duration of the cycle.
    pub suspend_power_off: bool,
    pub power_on_latency_ns: u64,
    pub power_off_latency_ns: u64,
    /// Set whenever a measured latency exceeds the stored estimate; cleared
    /// by whoever consumes it (mirrors the kernel's `max_off_time_changed`).
    pub max_off_time_changed: bool,
}

impl DomainState {
    fn new() -> Self {
        DomainState {
            status: Status::PowerOff,
            masters: Vec::new(),
            subdomains: Vec::new(),
            devices: Vec::new(),
            suspended_count: 0,
            prepared_count: 0,
            suspend_power_off: false,
            power_on_latency_ns: 0,
            power_off_latency_ns: 0,
            max_off_time_changed: false,
        }
    }
}

/// A power domain. Holds its own lock plus a lock-free subdomain counter;
/// never references the [`crate::registry::Registry`] it lives in, so the
/// walker always takes `&Registry` alongside a `DomainId` instead of
/// following a back-pointer (keeps the arena acyclic).
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    pub ops: Arc<dyn DomainOps>,
    pub governor: Option<Arc<dyn Governor>>,
    /// Count of this domain's subdomains that are currently active. Must be
    /// zero before this domain is allowed to power off. Incremented by a
    /// subdomain powering on, decremented by it powering off; each update is
    /// followed by an explicit full memory barrier (see
    /// [`crate::walker`]) so the read in `power_down_ok` can never observe a
    /// stale zero.
    pub sd_count: AtomicUsize,
    pub state: Mutex<DomainState>,
}

impl Domain {
    pub fn new(id: DomainId, name: impl Into<String>, ops: Arc<dyn DomainOps>) -> Self {
        Domain {
            id,
            name: name.into(),
            ops,
            governor: None,
            sd_count: AtomicUsize::new(0),
            state: Mutex::new(DomainState::new()),
        }
    }

    pub fn with_governor(mut self, governor: Arc<dyn Governor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Start the domain already active, bypassing the default
    /// initially-powered-off assumption. Matches `init(domain, governor,
    /// initial_off)` where the caller already knows the hardware is on
    /// (e.g. a domain that was live at boot before any driver attached).
    pub fn with_initial_active(self) -> Self {
        self.state.lock().unwrap().status = Status::Active;
        self
    }
}
