//! The multi-phase system-sleep pipeline: suspend-to-RAM (`prepare` through
//! `complete`) and the freeze/thaw variant used while writing a hibernation
//! image, plus `restore_noirq` for reading one back.
//!
//! Every phase is a per-device operation: it resolves its device's owning
//! domain itself and fails with [`PmError::InvalidArg`] if that lookup
//! can't resolve, rather than taking a domain handle and batching over its
//! device list internally. Phase dispatch with per-step logging, the same
//! shape as any staged power sequence; the noirq/syscore phases skip the
//! domain lock entirely because they are guaranteed to run strictly
//! sequentially with interrupts disabled, so no lock is needed to stay
//! correct there.

use std::sync::Arc;

use log::{debug, info};

use crate::domain::{Domain, Status};
use crate::error::{PmError, PmResult};
use crate::ops::SleepOps;
use crate::registry::{DeviceId, DomainId, Registry};
use crate::runtime;
use crate::walker;

fn resolve_domain(registry: &Registry, device: DeviceId) -> PmResult<(DomainId, Arc<Domain>)> {
    let domain_id = registry.device_domain(device).map_err(|_| PmError::InvalidArg)?;
    let dom = registry.domain(domain_id).map_err(|_| PmError::InvalidArg)?;
    Ok((domain_id, dom))
}

/// `device_can_wakeup && (device_may_wakeup XOR ops.active_wakeup(dev))`:
/// whether `prepare` must force a runtime resume on this device so it is
/// guaranteed awake to arm its wakeup source for the cycle. Distinct from
/// the `wakeup_path`/`active_wakeup` pair [`skip_in_noirq_suspend`] checks.
fn resume_needed(registry: &Registry, device: DeviceId) -> PmResult<bool> {
    let binding = registry.device(device)?;
    let guard = binding.lock().unwrap();
    if !guard.can_wakeup {
        return Ok(false);
    }
    let reported = guard.ops.active_wakeup(device);
    Ok(if guard.may_wakeup { reported } else { !reported })
}

/// First phase of a sleep cycle for one device. The first `prepare` for a
/// domain in this cycle latches `suspend_power_off` to whatever the
/// domain's status already was at that instant — the domain stays off for
/// the whole cycle iff it was off when the cycle started. A device for
/// which [`resume_needed`] holds is force-resumed first so it is
/// guaranteed awake before that latch decision is even made.
///
/// Waking a device for an externally pending wakeup event and surfacing a
/// system wakeup event are the wakeup-core's own concerns, outside this
/// crate's domain-DAG scope, and are not modeled here; likewise the
/// runtime-PM enable/disable bookkeeping `prepare` otherwise wraps around
/// the downstream callback is folded into the explicit `runtime_resume`
/// call below rather than tracked as separate state.
pub fn prepare(registry: &Registry, device: DeviceId) -> PmResult<()> {
    let (_, dom) = resolve_domain(registry, device)?;

    if resume_needed(registry, device)? {
        runtime::runtime_resume(registry, device)?;
    }

    let latched_off = {
        let mut state = dom.state.lock().unwrap();
        if state.prepared_count == 0 {
            state.suspended_count = 0;
            state.suspend_power_off = state.status == Status::PowerOff;
            debug!(
                "genpd: {} prepare latches suspend_power_off={}",
                dom.name, state.suspend_power_off
            );
        }
        state.prepared_count += 1;
        state.suspend_power_off
    };
    if latched_off {
        return Ok(());
    }

    runtime::runtime_resume(registry, device)?;

    let result = {
        let binding = registry.device(device)?;
        let guard = binding.lock().unwrap();
        match &guard.sleep_ops {
            Some(ops) => ops.prepare(device),
            None => Ok(()),
        }
    };
    if let Err(e) = result {
        let mut state = dom.state.lock().unwrap();
        state.prepared_count = state.prepared_count.saturating_sub(1);
        if state.prepared_count == 0 {
            state.suspend_power_off = false;
        }
        return Err(e);
    }
    Ok(())
}

/// Run `f` for `device` unless its domain is latched off for this cycle,
/// in which case the phase is a no-op (matching "if `suspend_power_off` is
/// latched, no-op" for the ordinary suspend/resume phases).
fn unless_latched<F>(registry: &Registry, device: DeviceId, f: F) -> PmResult<()>
where
    F: FnOnce(&dyn SleepOps, DeviceId) -> PmResult<()>,
{
    let (_, dom) = resolve_domain(registry, device)?;
    if dom.state.lock().unwrap().suspend_power_off {
        return Ok(());
    }
    let binding = registry.device(device)?;
    let guard = binding.lock().unwrap();
    if let Some(ops) = &guard.sleep_ops {
        f(ops.as_ref(), device)?;
    }
    Ok(())
}

pub fn suspend(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.suspend(dev))
}

pub fn suspend_late(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.suspend_late(dev))
}

pub fn resume(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.resume(dev))
}

pub fn resume_early(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.resume_early(dev))
}

pub fn freeze(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.freeze(dev))
}

pub fn freeze_late(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.freeze_late(dev))
}

pub fn thaw(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.thaw(dev))
}

pub fn thaw_early(registry: &Registry, device: DeviceId) -> PmResult<()> {
    unless_latched(registry, device, |ops, dev| ops.thaw_early(dev))
}

/// Whether a noirq suspend phase should skip `device` entirely: either its
/// domain is latched off for the cycle, or it is on the wakeup path
/// (`wakeup_path`) and currently reporting itself an active wakeup source
/// (`DeviceOps::active_wakeup`) — both conditions required together, same
/// as the check guarding `resume_needed`'s own (distinct) wakeup flags.
fn skip_in_noirq_suspend(registry: &Registry, device: DeviceId, dom: &Domain) -> PmResult<bool> {
    if dom.state.lock().unwrap().suspend_power_off {
        return Ok(true);
    }
    let binding = registry.device(device)?;
    let guard = binding.lock().unwrap();
    Ok(guard.wakeup_path && guard.ops.active_wakeup(device))
}

#[derive(Clone, Copy)]
enum NoirqPhase {
    Suspend,
    Freeze,
}

/// Noirq suspend, shared by `suspend_noirq`, `freeze_noirq` and the
/// poweroff-noirq path: either no-op ([`skip_in_noirq_suspend`]) or stop
/// the device, mark it suspended and call the lock-free
/// [`walker::sync_power_off`] — safe to call once per device since noirq
/// phases run strictly sequentially with interrupts disabled, so no domain
/// lock is needed here.
fn noirq_suspend(registry: &Registry, device: DeviceId, method: NoirqPhase) -> PmResult<()> {
    let (domain_id, dom) = resolve_domain(registry, device)?;
    if skip_in_noirq_suspend(registry, device, &dom)? {
        return Ok(());
    }
    {
        let binding = registry.device(device)?;
        let guard = binding.lock().unwrap();
        if let Some(ops) = &guard.sleep_ops {
            match method {
                NoirqPhase::Suspend => ops.suspend_noirq(device)?,
                NoirqPhase::Freeze => ops.freeze_noirq(device)?,
            }
        }
    }
    dom.state.lock().unwrap().suspended_count += 1;
    info!("genpd: {} suspend_noirq stopping device {:?}", dom.name, device);
    walker::sync_power_off(registry, domain_id);
    Ok(())
}

pub fn suspend_noirq(registry: &Registry, device: DeviceId) -> PmResult<()> {
    noirq_suspend(registry, device, NoirqPhase::Suspend)
}

pub fn freeze_noirq(registry: &Registry, device: DeviceId) -> PmResult<()> {
    noirq_suspend(registry, device, NoirqPhase::Freeze)
}

/// Noirq resume, shared by `resume_noirq` and `thaw_noirq`: the symmetric
/// counterpart of [`noirq_suspend`] — only a device actually stopped there
/// (same skip condition) is woken back up, keeping `suspended_count`
/// balanced across the pair.
fn noirq_resume(registry: &Registry, device: DeviceId, method: NoirqPhase) -> PmResult<()> {
    let (domain_id, dom) = resolve_domain(registry, device)?;
    if skip_in_noirq_suspend(registry, device, &dom)? {
        return Ok(());
    }
    walker::sync_power_on(registry, domain_id);
    {
        let mut state = dom.state.lock().unwrap();
        state.suspended_count = state.suspended_count.saturating_sub(1);
    }
    let binding = registry.device(device)?;
    let guard = binding.lock().unwrap();
    if let Some(ops) = &guard.sleep_ops {
        match method {
            NoirqPhase::Suspend => ops.resume_noirq(device)?,
            NoirqPhase::Freeze => ops.thaw_noirq(device)?,
        }
    }
    Ok(())
}

pub fn resume_noirq(registry: &Registry, device: DeviceId) -> PmResult<()> {
    noirq_resume(registry, device, NoirqPhase::Suspend)
}

pub fn thaw_noirq(registry: &Registry, device: DeviceId) -> PmResult<()> {
    noirq_resume(registry, device, NoirqPhase::Freeze)
}

/// Final phase of a sleep cycle: runs unconditionally, even if an earlier
/// phase failed, same as the pipeline this generalizes. Clears the
/// `suspend_power_off` latch once every `prepare` has a matching
/// `complete`.
pub fn complete(registry: &Registry, device: DeviceId) -> PmResult<()> {
    let (_, dom) = resolve_domain(registry, device)?;
    let run_complete = !dom.state.lock().unwrap().suspend_power_off;

    if run_complete {
        if let Ok(binding) = registry.device(device) {
            let guard = binding.lock().unwrap();
            if let Some(ops) = &guard.sleep_ops {
                ops.complete(device);
            }
        }
    }

    let mut state = dom.state.lock().unwrap();
    state.prepared_count = state.prepared_count.saturating_sub(1);
    if state.prepared_count == 0 {
        state.suspend_power_off = false;
    }
    Ok(())
}

/// Restoring from a hibernation image: the first device visited for a
/// domain in this cycle (`suspended_count == 0` before increment) forces
/// the domain's status to powered-off, since the running kernel's view of
/// domain state predates the image and cannot be trusted. If the domain
/// was latched off for the cycle, the domain's own `power_off` op is
/// invoked directly and the device is skipped entirely; otherwise this
/// behaves like [`resume_noirq`] but calling `restore_noirq` on the device.
pub fn restore_noirq(registry: &Registry, device: DeviceId) -> PmResult<()> {
    let (domain_id, dom) = resolve_domain(registry, device)?;
    let latched = {
        let mut state = dom.state.lock().unwrap();
        if state.suspended_count == 0 {
            state.status = Status::PowerOff;
            debug!("genpd: {} restore_noirq forcing power-off status", dom.name);
        }
        state.suspended_count += 1;
        state.suspend_power_off
    };

    if latched {
        dom.ops.power_off(domain_id)?;
        return Ok(());
    }

    walker::sync_power_on(registry, domain_id);
    let binding = registry.device(device)?;
    let guard = binding.lock().unwrap();
    if let Some(ops) = &guard.sleep_ops {
        ops.restore_noirq(device)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{MockDeviceOps, MockDomainOps, MockSleepOps};

    fn domain_with_sleep_device(
        reg: &Registry,
    ) -> (DomainId, DeviceId, Arc<MockDeviceOps>, Arc<MockSleepOps>) {
        let dom_ops = Arc::new(MockDomainOps::default());
        let d = reg.add_domain("d", dom_ops);
        let dev_ops = Arc::new(MockDeviceOps::default());
        let dev = reg.add_device(d, dev_ops.clone()).unwrap();
        let sleep_ops = Arc::new(MockSleepOps::default());
        reg.set_sleep_ops(dev, sleep_ops.clone()).unwrap();
        (d, dev, dev_ops, sleep_ops)
    }

    #[test]
    fn prepare_fails_invalid_arg_for_unresolvable_device() {
        let reg = Registry::new();
        assert_eq!(prepare(&reg, DeviceId(4242)), Err(PmError::InvalidArg));
    }

    #[test]
    fn prepare_latches_off_when_domain_already_off() {
        let reg = Registry::new();
        let (d, dev, _dev_ops, sleep_ops) = domain_with_sleep_device(&reg);
        // Domain starts POWER_OFF by default.
        prepare(&reg, dev).unwrap();
        assert!(reg.domain(d).unwrap().state.lock().unwrap().suspend_power_off);
        // Latched off: downstream prepare was never called.
        assert!(sleep_ops.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn prepare_does_not_latch_off_when_domain_is_active() {
        let reg = Registry::new();
        let (d, dev, _dev_ops, sleep_ops) = domain_with_sleep_device(&reg);
        walker::power_on(&reg, d).unwrap();
        prepare(&reg, dev).unwrap();
        assert!(!reg.domain(d).unwrap().state.lock().unwrap().suspend_power_off);
        assert!(sleep_ops.calls.lock().unwrap().contains(&"prepare"));
    }

    #[test]
    fn prepare_forces_runtime_resume_when_resume_needed() {
        let reg = Registry::new();
        let (d, dev, _dev_ops, _sleep_ops) = domain_with_sleep_device(&reg);
        {
            let binding = reg.device(dev).unwrap();
            let mut guard = binding.lock().unwrap();
            guard.can_wakeup = true;
            guard.may_wakeup = true;
        }
        // Domain starts POWER_OFF, but resume_needed's forced resume runs
        // before the latch decision, so the domain ends up ACTIVE.
        prepare(&reg, dev).unwrap();
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::Active);
    }

    #[test]
    fn full_suspend_resume_cycle_powers_domain_off_and_back_on() {
        let reg = Registry::new();
        let (d, dev, _dev_ops, sleep_ops) = domain_with_sleep_device(&reg);
        walker::power_on(&reg, d).unwrap();

        prepare(&reg, dev).unwrap();
        suspend(&reg, dev).unwrap();
        suspend_late(&reg, dev).unwrap();
        suspend_noirq(&reg, dev).unwrap();
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::PowerOff);

        resume_noirq(&reg, dev).unwrap();
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::Active);
        resume_early(&reg, dev).unwrap();
        resume(&reg, dev).unwrap();
        complete(&reg, dev).unwrap();

        assert!(!reg.domain(d).unwrap().state.lock().unwrap().suspend_power_off);
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().prepared_count, 0);
        let calls = sleep_ops.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "prepare",
                "suspend",
                "suspend_late",
                "suspend_noirq",
                "resume_noirq",
                "resume_early",
                "resume",
                "complete",
            ]
        );
    }

    #[test]
    fn wakeup_device_keeps_domain_active_through_noirq_suspend() {
        let reg = Registry::new();
        let (d, dev, dev_ops, sleep_ops) = domain_with_sleep_device(&reg);
        dev_ops.active_wakeup.store(true, Ordering::SeqCst);
        reg.device(dev).unwrap().lock().unwrap().wakeup_path = true;
        walker::power_on(&reg, d).unwrap();

        prepare(&reg, dev).unwrap();
        suspend_noirq(&reg, dev).unwrap();

        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::Active);
        assert!(!sleep_ops.calls.lock().unwrap().contains(&"suspend_noirq"));
    }

    #[test]
    fn wakeup_path_alone_without_active_wakeup_does_not_skip_noirq_suspend() {
        let reg = Registry::new();
        let (d, dev, _dev_ops, sleep_ops) = domain_with_sleep_device(&reg);
        // wakeup_path set but the device no longer reports itself active:
        // both conditions are required, so this must NOT be skipped.
        reg.device(dev).unwrap().lock().unwrap().wakeup_path = true;
        walker::power_on(&reg, d).unwrap();

        prepare(&reg, dev).unwrap();
        suspend_noirq(&reg, dev).unwrap();

        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::PowerOff);
        assert!(sleep_ops.calls.lock().unwrap().contains(&"suspend_noirq"));
    }

    #[test]
    fn restore_noirq_forces_power_off_status_on_first_call() {
        let reg = Registry::new();
        let (d, dev, _dev_ops, _sleep_ops) = domain_with_sleep_device(&reg);
        // Simulate the running kernel's stale view: domain thinks it is on.
        reg.domain(d).unwrap().state.lock().unwrap().status = Status::Active;

        restore_noirq(&reg, dev).unwrap();

        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().suspended_count, 1);
    }
}
