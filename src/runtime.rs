//! Per-device runtime power management: the two one-shot transitions the
//! PM core invokes around an actual runtime-suspend/runtime-resume, each
//! called once per transition rather than wrapping a usage-count surface.
//!
//! Call the ops, drive the domain transition, and let
//! [`crate::walker`]'s DAG walk stand in for the usual polling-for-ready
//! step a register-backed transition would need.

use std::time::Instant;

use log::{debug, trace};

use crate::error::{PmError, PmResult};
use crate::registry::{DeviceId, Registry};
use crate::walker;

/// A device completing its own runtime-suspend. Vetoed by the domain's
/// governor (if any) before anything else happens; once `ops.save_state`
/// and `ops.stop` succeed, the device is marked runtime-suspended and an
/// IRQ-safe device returns immediately without touching its domain.
/// Otherwise attempts `power_off(D, is_async=false)` — this is the one
/// synchronous caller allowed to drive a domain off while exactly one of
/// its devices is not yet suspended; the attempt's own result is ignored,
/// since the device's own suspend has already committed regardless of
/// whether its domain actually goes off.
pub fn runtime_suspend(registry: &Registry, device: DeviceId) -> PmResult<()> {
    let binding = registry.device(device)?;
    let domain_id = registry.device_domain(device)?;
    let domain = registry.domain(domain_id)?;

    if let Some(governor) = &domain.governor {
        if !governor.stop_ok(device) {
            trace!("genpd: device {:?} runtime_suspend vetoed by governor", device);
            return Err(PmError::Busy);
        }
    }

    let start = Instant::now();
    {
        let guard = binding.lock().unwrap();
        guard.ops.save_state(device)?;
        if let Err(e) = guard.ops.stop(device) {
            guard.ops.restore_state(device)?;
            return Err(e);
        }
    }
    let elapsed = start.elapsed().as_nanos() as u64;

    let irq_safe = {
        let mut guard = binding.lock().unwrap();
        if elapsed > guard.timing.suspend_latency_ns {
            guard.timing.suspend_latency_ns = elapsed;
        }
        guard.runtime_suspended = true;
        guard.irq_safe
    };

    if irq_safe {
        debug!("genpd: irq-safe device {:?} runtime-suspended, domain untouched", device);
        return Ok(());
    }

    debug!("genpd: device {:?} runtime-suspended, attempting domain off", device);
    let _ = walker::power_off(registry, domain_id, false);
    Ok(())
}

/// A device completing its own runtime-resume. IRQ-safe devices skip the
/// DAG walk entirely (their domain is assumed permanently on); otherwise
/// `power_on(D)` runs first and any failure aborts the resume with that
/// error. `ops.start` then `ops.restore_state` run in that order
/// afterwards regardless, with the round trip's latency folded into
/// `resume_latency_ns`.
pub fn runtime_resume(registry: &Registry, device: DeviceId) -> PmResult<()> {
    let binding = registry.device(device)?;
    let domain_id = registry.device_domain(device)?;
    let irq_safe = binding.lock().unwrap().irq_safe;

    if !irq_safe {
        walker::power_on(registry, domain_id)?;
    }

    let start = Instant::now();
    {
        let guard = binding.lock().unwrap();
        guard.ops.start(device)?;
        guard.ops.restore_state(device)?;
    }
    let elapsed = start.elapsed().as_nanos() as u64;

    let mut guard = binding.lock().unwrap();
    if elapsed > guard.timing.resume_latency_ns {
        guard.timing.resume_latency_ns = elapsed;
    }
    guard.runtime_suspended = false;
    debug!("genpd: device {:?} runtime-resumed", device);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::Status;
    use crate::test_support::{AlwaysGovernor, MockDeviceOps, MockDomainOps};

    #[test]
    fn runtime_resume_powers_on_domain_and_starts_device() {
        let reg = Registry::new();
        let dom_ops = Arc::new(MockDomainOps::default());
        let dev_ops = Arc::new(MockDeviceOps::default());
        let d = reg.add_domain("d", dom_ops);
        let dev = reg.add_device(d, dev_ops.clone()).unwrap();

        runtime_resume(&reg, dev).unwrap();

        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::Active);
        assert!(dev_ops.calls.lock().unwrap().contains(&"start"));
        assert!(!reg.device(dev).unwrap().lock().unwrap().runtime_suspended);
    }

    #[test]
    fn runtime_suspend_idles_the_domain() {
        let reg = Registry::new();
        let dom_ops = Arc::new(MockDomainOps::default());
        let dev_ops = Arc::new(MockDeviceOps::default());
        let d = reg.add_domain("d", dom_ops);
        let dev = reg.add_device(d, dev_ops).unwrap();

        runtime_resume(&reg, dev).unwrap();
        runtime_suspend(&reg, dev).unwrap();

        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::PowerOff);
        assert!(reg.device(dev).unwrap().lock().unwrap().runtime_suspended);
    }

    #[test]
    fn runtime_suspend_refused_by_governor_leaves_device_untouched() {
        let reg = Registry::new();
        let dom_ops = Arc::new(MockDomainOps::default());
        let dev_ops = Arc::new(MockDeviceOps::default());
        let d = reg.add_domain_with_governor("d", dom_ops, AlwaysGovernor::new(false));
        let dev = reg.add_device(d, dev_ops.clone()).unwrap();

        runtime_resume(&reg, dev).unwrap();
        let result = runtime_suspend(&reg, dev);

        assert_eq!(result, Err(PmError::Busy));
        assert!(!reg.device(dev).unwrap().lock().unwrap().runtime_suspended);
        assert!(!dev_ops.calls.lock().unwrap().contains(&"stop"));
    }

    #[test]
    fn irq_safe_device_never_touches_domain() {
        let reg = Registry::new();
        let dom_ops = Arc::new(MockDomainOps::default());
        let dev_ops = Arc::new(MockDeviceOps::default());
        let d = reg.add_domain("d", dom_ops.clone());
        let dev = reg.add_device(d, dev_ops.clone()).unwrap();
        reg.device(dev).unwrap().lock().unwrap().irq_safe = true;

        runtime_resume(&reg, dev).unwrap();
        runtime_suspend(&reg, dev).unwrap();

        use std::sync::atomic::Ordering;
        assert_eq!(dom_ops.power_ons.load(Ordering::SeqCst), 0);
        assert_eq!(dom_ops.power_offs.load(Ordering::SeqCst), 0);
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::PowerOff);
        assert!(dev_ops.calls.lock().unwrap().contains(&"start"));
        assert!(dev_ops.calls.lock().unwrap().contains(&"stop"));
    }

    #[test]
    fn irq_safe_device_still_vetoed_by_governor() {
        // The IRQ-safe shortcut only skips the DAG walk, not the governor
        // check, which runs unconditionally before save_state/stop.
        let reg = Registry::new();
        let dom_ops = Arc::new(MockDomainOps::default());
        let dev_ops = Arc::new(MockDeviceOps::default());
        let d = reg.add_domain_with_governor("d", dom_ops, AlwaysGovernor::new(false));
        let dev = reg.add_device(d, dev_ops).unwrap();
        reg.device(dev).unwrap().lock().unwrap().irq_safe = true;

        runtime_resume(&reg, dev).unwrap();
        assert_eq!(runtime_suspend(&reg, dev), Err(PmError::Busy));
    }
}
