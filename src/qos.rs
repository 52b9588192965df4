//! PM-QoS constraint-change propagation. The device ancestry walked here is
//! the domain master chain rather than a generic device-tree `dev->parent`
//! pointer — this crate has no such notion outside the domain DAG itself —
//! so the walk stops at a domain with no masters, standing in for "no
//! parent or a parent with `ignore_children`".
//!
//! There is no external PM-QoS source to register a callback with in this
//! crate, so [`notify`] stands in directly for a device's `qos_observer`:
//! whatever collaborator edits a device's latency constraint calls it in
//! place of firing that registered callback.

use crate::error::PmResult;
use crate::registry::{DeviceId, Registry};

/// Record that `device`'s effective latency constraint just changed, then
/// mark every domain on its master chain dirty so the next `power_off`
/// attempt re-evaluates whether it's still worth powering down.
pub fn notify(registry: &Registry, device: DeviceId) -> PmResult<()> {
    let binding = registry.device(device)?;
    binding.lock().unwrap().timing.constraint_changed = true;

    let domain_id = registry.device_domain(device)?;
    let mut frontier = vec![domain_id];
    while let Some(id) = frontier.pop() {
        let dom = match registry.domain(id) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let masters = {
            let mut state = dom.state.lock().unwrap();
            state.max_off_time_changed = true;
            state.masters.clone()
        };
        frontier.extend(masters);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::Registry;
    use crate::test_support::MockDomainOps;

    #[test]
    fn notify_marks_device_and_every_ancestor_domain_dirty() {
        let reg = Registry::new();
        let root = reg.add_domain("root", Arc::new(MockDomainOps::default()));
        let mid = reg.add_domain("mid", Arc::new(MockDomainOps::default()));
        let leaf = reg.add_domain("leaf", Arc::new(MockDomainOps::default()));
        reg.add_subdomain(root, mid).unwrap();
        reg.add_subdomain(mid, leaf).unwrap();
        let dev = reg
            .add_device(leaf, Arc::new(crate::test_support::MockDeviceOps::default()))
            .unwrap();

        notify(&reg, dev).unwrap();

        assert!(reg.device(dev).unwrap().lock().unwrap().timing.constraint_changed);
        for d in [root, mid, leaf] {
            assert!(reg.domain(d).unwrap().state.lock().unwrap().max_off_time_changed);
        }
    }
}
