//! The power-domain DAG walker: `power_on`/`power_off` recurse through
//! master links with rollback on failure, while `sync_power_on`/
//! `sync_power_off` give the noirq/syscore phases a lock-free, best-effort
//! traversal that matches the serialized-by-construction guarantee those
//! phases run under.
//!
//! Explicit multi-step sequencing with a barrier after each step,
//! generalized from a fixed linear sequence to a recursive DAG walk with
//! the same step-then-barrier discipline, and modeled on
//! `__genpd_poweron`/`genpd_poweron`/`pm_genpd_sync_poweron`/
//! `pm_genpd_sync_poweroff` for the exact rollback and best-effort shapes.

use std::sync::atomic::Ordering;
use std::time::Instant;

use log::{trace, warn};

use crate::domain::{Domain, Status};
use crate::error::{PmError, PmResult};
use crate::registry::{DomainId, Registry};

fn sd_count_inc(domain: &Domain) {
    domain.sd_count.fetch_add(1, Ordering::SeqCst);
    mbarrier::mb();
}

fn sd_count_dec(domain: &Domain) {
    let prev = domain.sd_count.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "sd_count underflow on domain {}", domain.name);
    mbarrier::mb();
}

/// Power a domain on, recursively powering on every master it depends on
/// first. On failure at any point, everything this call itself powered on
/// is unwound in reverse order: masters that were already active before
/// this call started are left untouched, and each master this call is
/// solely responsible for is handed to the deferred worker instead of
/// powered off synchronously, matching the non-blocking rollback shape of
/// the function this generalizes.
pub fn power_on(registry: &Registry, id: DomainId) -> PmResult<()> {
    let domain = registry.domain(id)?;
    let mut state = domain.state.lock().unwrap();

    if state.status == Status::Active
        || (state.prepared_count > 0 && state.suspend_power_off)
    {
        return Ok(());
    }

    let masters = state.masters.clone();
    let mut powered: Vec<DomainId> = Vec::with_capacity(masters.len());

    for master_id in masters {
        let master = registry.domain(master_id)?;
        sd_count_inc(&master);
        match power_on(registry, master_id) {
            Ok(()) => powered.push(master_id),
            Err(e) => {
                sd_count_dec(&master);
                unwind(registry, &powered);
                return Err(e);
            }
        }
    }

    let start = Instant::now();
    match domain.ops.power_on(id) {
        Ok(()) => {
            let elapsed = start.elapsed().as_nanos() as u64;
            if elapsed > state.power_on_latency_ns {
                state.power_on_latency_ns = elapsed;
                state.max_off_time_changed = true;
            }
            state.status = Status::Active;
            trace!("genpd: {} powered on ({} ns)", domain.name, elapsed);
            Ok(())
        }
        Err(e) => {
            warn!("genpd: {} power_on failed: {}", domain.name, e);
            unwind(registry, &powered);
            Err(e)
        }
    }
}

/// Undo a partially-successful power-on: decrement each master's subdomain
/// counter and hand it to the deferred worker rather than powering it off
/// inline, so rollback never itself blocks on a nested power-off.
fn unwind(registry: &Registry, powered: &[DomainId]) {
    for master_id in powered.iter().rev() {
        if let Ok(master) = registry.domain(*master_id) {
            sd_count_dec(&master);
            registry.schedule_power_off(*master_id);
        }
    }
}

/// Power a domain off if nothing still needs it. Refuses (returning `Ok(())`
/// with no transition) while any subdomain is active, while a sleep cycle
/// holds `prepared_count` above zero, while any attached device vetoes via
/// a PM-QoS `NO_POWER_OFF`/`REMOTE_WAKEUP` flag, or per the `not_suspended`
/// policy below. `is_async` distinguishes a deferred-work caller (the
/// worker thread retrying a previously-busy domain) from a synchronous
/// caller (a device's own `runtime_suspend` completing): only the latter
/// may drive a domain off while exactly one of its devices is not yet
/// runtime-suspended.
///
/// Returns `Ok(())` without error when the domain is left on for any of
/// those reasons — refusal is the normal, silent outcome of this call, not
/// a failure, mirroring the `-EBUSY` short-circuit of the function this is
/// grounded on. Once powered off, cascades into each master: decrement its
/// subdomain counter and enqueue a deferred power-off for it, never calling
/// back into this function synchronously (the cascade always goes through
/// the worker, exactly like [`unwind`] above).
pub fn power_off(registry: &Registry, id: DomainId, is_async: bool) -> PmResult<()> {
    let domain = registry.domain(id)?;
    let mut state = domain.state.lock().unwrap();

    if state.status == Status::PowerOff || state.prepared_count > 0 {
        return Ok(());
    }
    if domain.sd_count.load(Ordering::SeqCst) > 0 {
        return Ok(());
    }

    let mut not_suspended = 0usize;
    for device_id in &state.devices {
        let binding = match registry.device(*device_id) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let guard = binding.lock().unwrap();
        if guard.qos_no_power_off {
            trace!(
                "genpd: {} power_off vetoed by PM-QoS flag on {:?}",
                domain.name, device_id
            );
            return Ok(());
        }
        if !guard.runtime_suspended || guard.irq_safe {
            not_suspended += 1;
        }
    }
    if not_suspended > 1 || (not_suspended == 1 && is_async) {
        trace!(
            "genpd: {} power_off busy ({} not-suspended device(s), async={})",
            domain.name, not_suspended, is_async
        );
        return Ok(());
    }

    if let Some(governor) = &domain.governor {
        if !governor.power_down_ok(id) {
            return Ok(());
        }
    }

    // sd_count is updated without the domain mutex (see `sd_count_inc`), so
    // a subdomain may have incremented it between our first read above and
    // the governor call just now; re-check before committing.
    if domain.sd_count.load(Ordering::SeqCst) > 0 {
        return Ok(());
    }

    let start = Instant::now();
    match domain.ops.power_off(id) {
        Ok(()) => {
            let elapsed = start.elapsed().as_nanos() as u64;
            if elapsed > state.power_off_latency_ns {
                state.power_off_latency_ns = elapsed;
                state.max_off_time_changed = true;
            }
            state.status = Status::PowerOff;
            trace!("genpd: {} powered off ({} ns)", domain.name, elapsed);
            let masters = state.masters.clone();
            drop(state);
            for master_id in masters {
                if let Ok(master) = registry.domain(master_id) {
                    sd_count_dec(&master);
                    registry.schedule_power_off(master_id);
                }
            }
            Ok(())
        }
        Err(PmError::Busy) => {
            trace!("genpd: {} power_off vetoed (busy)", domain.name);
            Ok(())
        }
        Err(e) => {
            warn!("genpd: {} power_off failed: {}", domain.name, e);
            Err(e)
        }
    }
}

/// Lock-free, best-effort power-on used only from phases the caller has
/// already serialized globally (system-sleep noirq/syscore stages). Does
/// not take the domain's lock and ignores failures from its own `DomainOps`
/// call, since the original this generalizes is a void function: there is
/// no rollback path at this level because nothing below it can fail safely
/// once interrupts are off.
pub fn sync_power_on(registry: &Registry, id: DomainId) {
    let domain = match registry.domain(id) {
        Ok(d) => d,
        Err(_) => return,
    };
    let masters = {
        let state = domain.state.lock().unwrap();
        if state.status == Status::Active {
            return;
        }
        state.masters.clone()
    };
    for master_id in masters {
        sync_power_on(registry, master_id);
        if let Ok(master) = registry.domain(master_id) {
            sd_count_inc(&master);
        }
    }
    if domain.ops.power_on(id).is_ok() {
        domain.state.lock().unwrap().status = Status::Active;
    }
}

/// Lock-free, best-effort power-off counterpart to [`sync_power_on`]. Every
/// master is visited regardless of its own subdomain count, since the
/// precondition is re-checked at the top of each recursive call rather than
/// by the caller, matching the reference implementation exactly.
pub fn sync_power_off(registry: &Registry, id: DomainId) {
    let domain = match registry.domain(id) {
        Ok(d) => d,
        Err(_) => return,
    };
    let masters = {
        let mut state = domain.state.lock().unwrap();
        if state.status == Status::PowerOff {
            return;
        }
        if domain.sd_count.load(Ordering::SeqCst) > 0
            || state.suspended_count != state.devices.len()
        {
            return;
        }
        if domain.ops.power_off(id).is_err() {
            return;
        }
        state.status = Status::PowerOff;
        state.masters.clone()
    };
    for master_id in masters {
        if let Ok(master) = registry.domain(master_id) {
            sd_count_dec(&master);
        }
        sync_power_off(registry, master_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::test_support::MockDomainOps;

    #[test]
    fn power_on_cascades_into_masters() {
        let reg = Registry::new();
        let master_ops = Arc::new(MockDomainOps::default());
        let sub_ops = Arc::new(MockDomainOps::default());
        let master = reg.add_domain("master", master_ops.clone());
        let sub = reg.add_domain("sub", sub_ops.clone());
        reg.add_subdomain(master, sub).unwrap();

        power_on(&reg, sub).unwrap();

        assert_eq!(master_ops.power_ons.load(Ordering::SeqCst), 1);
        assert_eq!(sub_ops.power_ons.load(Ordering::SeqCst), 1);
        assert_eq!(reg.domain(master).unwrap().sd_count.load(Ordering::SeqCst), 1);
        assert_eq!(reg.domain(sub).unwrap().state.lock().unwrap().status, Status::Active);
    }

    #[test]
    fn power_on_is_idempotent() {
        let reg = Registry::new();
        let ops = Arc::new(MockDomainOps::default());
        let d = reg.add_domain("d", ops.clone());
        power_on(&reg, d).unwrap();
        power_on(&reg, d).unwrap();
        assert_eq!(ops.power_ons.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn power_on_rolls_back_master_on_failure() {
        let reg = Registry::new();
        let master_ops = Arc::new(MockDomainOps::default());
        let sub_ops = Arc::new(MockDomainOps::default());
        sub_ops.fail_next_power_on.store(true, Ordering::SeqCst);
        let master = reg.add_domain("master", master_ops.clone());
        let sub = reg.add_domain("sub", sub_ops);
        reg.add_subdomain(master, sub).unwrap();

        let result = power_on(&reg, sub);
        assert!(result.is_err());
        // sd_count was decremented back to zero as part of rollback.
        assert_eq!(reg.domain(master).unwrap().sd_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn power_off_refuses_while_subdomain_active() {
        let reg = Registry::new();
        let master_ops = Arc::new(MockDomainOps::default());
        let sub_ops = Arc::new(MockDomainOps::default());
        let master = reg.add_domain("master", master_ops.clone());
        let sub = reg.add_domain("sub", sub_ops);
        reg.add_subdomain(master, sub).unwrap();
        power_on(&reg, sub).unwrap();

        power_off(&reg, master, false).unwrap();
        assert_eq!(master_ops.power_offs.load(Ordering::SeqCst), 0);
        assert_eq!(reg.domain(master).unwrap().state.lock().unwrap().status, Status::Active);
    }

    #[test]
    fn power_off_cascades_via_deferred_worker_once_last_subdomain_is_off() {
        let reg = Arc::new(Registry::new());
        let worker = Arc::new(crate::worker::Worker::spawn(reg.clone()));
        reg.attach_worker(worker.clone());
        let master_ops = Arc::new(MockDomainOps::default());
        let sub_ops = Arc::new(MockDomainOps::default());
        let master = reg.add_domain("master", master_ops.clone());
        let sub = reg.add_domain("sub", sub_ops.clone());
        reg.add_subdomain(master, sub).unwrap();
        power_on(&reg, sub).unwrap();

        power_off(&reg, sub, false).unwrap();

        assert_eq!(sub_ops.power_offs.load(Ordering::SeqCst), 1);
        assert_eq!(reg.domain(master).unwrap().sd_count.load(Ordering::SeqCst), 0);
        // The cascade enqueues B's power-off on the worker rather than
        // calling it inline; shutting the worker down drains the queue
        // (FIFO, so the pending power-off runs before the shutdown job).
        worker.shutdown();
        assert_eq!(master_ops.power_offs.load(Ordering::SeqCst), 1);
        assert_eq!(reg.domain(master).unwrap().state.lock().unwrap().status, Status::PowerOff);
    }

    #[test]
    fn power_off_veto_leaves_domain_active() {
        let reg = Registry::new();
        let ops = Arc::new(MockDomainOps::default());
        ops.fail_power_off_busy.store(true, Ordering::SeqCst);
        let d = reg.add_domain("d", ops);
        power_on(&reg, d).unwrap();

        power_off(&reg, d, false).unwrap();
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::Active);
    }

    #[test]
    fn power_off_busy_when_two_devices_not_yet_suspended() {
        let reg = Registry::new();
        let ops = Arc::new(MockDomainOps::default());
        let d = reg.add_domain("d", ops.clone());
        reg.add_device(d, Arc::new(crate::test_support::MockDeviceOps::default())).unwrap();
        reg.add_device(d, Arc::new(crate::test_support::MockDeviceOps::default())).unwrap();
        power_on(&reg, d).unwrap();

        power_off(&reg, d, false).unwrap();
        assert_eq!(ops.power_offs.load(Ordering::SeqCst), 0);
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::Active);
    }

    #[test]
    fn power_off_busy_for_deferred_caller_with_one_not_yet_suspended_device() {
        let reg = Registry::new();
        let ops = Arc::new(MockDomainOps::default());
        let d = reg.add_domain("d", ops.clone());
        reg.add_device(d, Arc::new(crate::test_support::MockDeviceOps::default())).unwrap();
        power_on(&reg, d).unwrap();

        // Deferred (is_async = true) caller must not drive the domain off
        // while a single device is still not runtime-suspended.
        power_off(&reg, d, true).unwrap();
        assert_eq!(ops.power_offs.load(Ordering::SeqCst), 0);

        // A synchronous caller (the device's own runtime_suspend completing)
        // is allowed to.
        power_off(&reg, d, false).unwrap();
        assert_eq!(ops.power_offs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn power_off_vetoed_by_qos_no_power_off_flag() {
        let reg = Registry::new();
        let ops = Arc::new(MockDomainOps::default());
        let d = reg.add_domain("d", ops.clone());
        let dev = reg.add_device(d, Arc::new(crate::test_support::MockDeviceOps::default())).unwrap();
        reg.device(dev).unwrap().lock().unwrap().qos_no_power_off = true;
        power_on(&reg, d).unwrap();

        power_off(&reg, d, false).unwrap();
        assert_eq!(ops.power_offs.load(Ordering::SeqCst), 0);
        assert_eq!(reg.domain(d).unwrap().state.lock().unwrap().status, Status::Active);
    }

    #[test]
    fn sync_power_on_and_off_keep_sd_count_in_sync() {
        let reg = Registry::new();
        let master_ops = Arc::new(MockDomainOps::default());
        let sub_ops = Arc::new(MockDomainOps::default());
        let master = reg.add_domain("master", master_ops);
        let sub = reg.add_domain("sub", sub_ops);
        reg.add_subdomain(master, sub).unwrap();

        sync_power_on(&reg, sub);
        assert_eq!(reg.domain(master).unwrap().state.lock().unwrap().status, Status::Active);
        assert_eq!(reg.domain(sub).unwrap().state.lock().unwrap().status, Status::Active);
        assert_eq!(reg.domain(master).unwrap().sd_count.load(Ordering::SeqCst), 1);

        sync_power_off(&reg, sub);
        assert_eq!(reg.domain(sub).unwrap().state.lock().unwrap().status, Status::PowerOff);
        assert_eq!(reg.domain(master).unwrap().state.lock().unwrap().status, Status::PowerOff);
        assert_eq!(reg.domain(master).unwrap().sd_count.load(Ordering::SeqCst), 0);
    }
}
