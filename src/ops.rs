//! Operation tables: the capability traits external collaborators implement
//! so the engine can drive real hardware/driver-core behavior without
//! knowing about it directly.
//!
//! A small capability surface with default-implemented methods wherever a
//! callback is optional, so callers only override what they actually use.

use crate::error::PmResult;
use crate::registry::{DeviceId, DomainId};

/// Power transition callbacks for one domain. Implemented once per power
/// domain (or shared across a family of them) by whatever owns the real
/// power-sequencing hardware.
pub trait DomainOps: Send + Sync {
    /// Turn the domain on. Called with no domain locks held by the walker
    /// other than the domain's own.
    fn power_on(&self, domain: DomainId) -> PmResult<()>;

    /// Turn the domain off. May return [`crate::error::PmError::Busy`] to
    /// veto the transition; the walker treats that as "leave domain active".
    fn power_off(&self, domain: DomainId) -> PmResult<()>;
}

/// Per-device runtime-PM and sleep-adjacent callbacks. Every method has a
/// no-op default so implementers only wire up what their device actually
/// needs, the same optional-callback pattern a null-function-pointer check
/// gives a C driver table.
pub trait DeviceOps: Send + Sync {
    /// Start the device after its domain has powered on.
    fn start(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }

    /// Quiesce the device before its domain powers off.
    fn stop(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }

    /// Save any device state that would be lost across a power-off.
    fn save_state(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }

    /// Restore device state saved by [`DeviceOps::save_state`].
    fn restore_state(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }

    /// Report whether the device is a wakeup source that must stay active.
    fn active_wakeup(&self, device: DeviceId) -> bool {
        let _ = device;
        false
    }

    /// Called once when a device is bound into a domain.
    fn attach_dev(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }

    /// Called once when a device is unbound from a domain.
    fn detach_dev(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
}

/// Multi-phase system-sleep callbacks, standing in for the downstream
/// `pm_generic_*` bus/class/driver callbacks the kernel's genpd dispatches
/// into. Kept separate from [`DeviceOps`] since not every device cares
/// about the sleep pipeline. All phases default to a no-op.
pub trait SleepOps: Send + Sync {
    fn prepare(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn suspend(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn suspend_late(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn suspend_noirq(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn resume_noirq(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn resume_early(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn resume(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn complete(&self, device: DeviceId) {
        let _ = device;
    }
    fn freeze(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn freeze_late(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn freeze_noirq(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn thaw(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn thaw_early(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn thaw_noirq(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
    fn restore_noirq(&self, device: DeviceId) -> PmResult<()> {
        let _ = device;
        Ok(())
    }
}

/// Policy hook deciding whether a domain may actually power down. Separate
/// from [`DomainOps`] because the same governor is typically shared across
/// many domains while `DomainOps` is per-domain hardware glue.
pub trait Governor: Send + Sync {
    /// Whether it is worth stopping the device at all, analogous to an
    /// idle-control threshold check before a bus-idle request.
    fn stop_ok(&self, device: DeviceId) -> bool {
        let _ = device;
        true
    }

    /// Whether the domain itself should power down given its current
    /// aggregate state (QoS constraints, measured latencies).
    fn power_down_ok(&self, domain: DomainId) -> bool {
        let _ = domain;
        true
    }
}
