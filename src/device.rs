//! Per-device binding: the record a domain's device list points at, holding
//! the device's runtime-suspended flag, its measured suspend/resume timing
//! and its QoS latency constraint.
//!
//! Save/restore state kept alongside a power transition, generalized from
//! raw register snapshots to latency-constraint bookkeeping.

use std::sync::Arc;

use crate::ops::{DeviceOps, SleepOps};
use crate::registry::{DeviceId, DomainId};

/// Measured power-transition timing for one device, used to decide whether
/// powering its domain off is worth the cost of powering it back on later.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingData {
    pub suspend_latency_ns: u64,
    pub resume_latency_ns: u64,
    pub effective_constraint_ns: Option<u64>,
    /// Set by [`crate::qos::notify`] when the device's latency constraint
    /// changes; cleared by whoever next consumes it.
    pub constraint_changed: bool,
}

impl TimingData {
    /// Whether the round-trip cost of powering off and back on fits within
    /// whatever QoS latency constraint is currently in force.
    pub fn fits_constraint(&self) -> bool {
        match self.effective_constraint_ns {
            Some(max) => self.suspend_latency_ns + self.resume_latency_ns <= max,
            None => true,
        }
    }
}

/// A device bound into a domain. Lives behind its own `Arc<Mutex<_>>` in
/// the registry, standing in for the per-device spinlock tier described in
/// the concurrency model: innermost, never held while a domain lock is
/// being acquired.
pub struct DeviceBinding {
    pub id: DeviceId,
    pub domain: DomainId,
    pub ops: Arc<dyn DeviceOps>,
    pub sleep_ops: Option<Arc<dyn SleepOps>>,
    pub timing: TimingData,
    /// False once `runtime_suspend` has completed for this device and not
    /// yet been undone by `runtime_resume`; read fresh by `power_off`'s
    /// `not_suspended` count on every call, never cached on the domain.
    pub runtime_suspended: bool,
    /// `device_can_wakeup`: whether this device is capable of waking the
    /// system from sleep at all.
    pub can_wakeup: bool,
    /// `device_may_wakeup`: whether that capability is currently armed by
    /// policy. Independent of `can_wakeup`; together with
    /// `DeviceOps::active_wakeup` these feed `resume_needed`'s XOR.
    pub may_wakeup: bool,
    /// `dev.power.wakeup_path`: set once `prepare` decides this device must
    /// stay resumed to arm its wakeup source for the rest of the sleep
    /// cycle. Read by the noirq suspend/resume pair (together with
    /// `DeviceOps::active_wakeup`) to skip the device entirely; distinct
    /// from the `can_wakeup`/`may_wakeup` pair `resume_needed` consults.
    pub wakeup_path: bool,
    /// PM-QoS `NO_POWER_OFF`/`REMOTE_WAKEUP` veto: set while some
    /// constraint source still needs this device (and so its domain)
    /// reachable without a power-off round trip.
    pub qos_no_power_off: bool,
    /// IRQ-safe devices never drive their domain's DAG walk: their domain
    /// is assumed permanently on for as long as they are bound, so
    /// `runtime_suspend`/`runtime_resume` skip the walker entirely for
    /// them.
    pub irq_safe: bool,
}

impl DeviceBinding {
    pub fn new(id: DeviceId, domain: DomainId, ops: Arc<dyn DeviceOps>) -> Self {
        DeviceBinding {
            id,
            domain,
            ops,
            sleep_ops: None,
            timing: TimingData::default(),
            runtime_suspended: false,
            can_wakeup: false,
            may_wakeup: false,
            wakeup_path: false,
            qos_no_power_off: false,
            irq_safe: false,
        }
    }

    pub fn with_sleep_ops(mut self, sleep_ops: Arc<dyn SleepOps>) -> Self {
        self.sleep_ops = Some(sleep_ops);
        self
    }

    pub fn with_irq_safe(mut self, irq_safe: bool) -> Self {
        self.irq_safe = irq_safe;
        self
    }

    pub fn with_wakeup(mut self, can_wakeup: bool, may_wakeup: bool) -> Self {
        self.can_wakeup = can_wakeup;
        self.may_wakeup = may_wakeup;
        self
    }
}
