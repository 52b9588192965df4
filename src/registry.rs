//! The registry: owns every domain and device behind opaque handles, and
//! carries the one process-wide mutex used strictly for enumeration (adding
//! domains, binding devices, walking everything for `poweroff_unused` and
//! `summary`).
//!
//! A small handle-keyed map with add/lookup/active-set operations,
//! generalized here to a DAG instead of a flat dependency set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::DeviceBinding;
use crate::domain::{Domain, Link, Status};
use crate::error::{PmError, PmResult};
use crate::ops::{DeviceOps, DomainOps, Governor};
use crate::worker::Worker;

/// Back-off delays for the attach/detach retry schedule: 1 ms doubling up
/// to roughly 250 ms total.
fn backoff_schedule() -> impl Iterator<Item = Duration> {
    let mut delay_ms = 1u64;
    std::iter::from_fn(move || {
        if delay_ms > 128 {
            None
        } else {
            let d = Duration::from_millis(delay_ms);
            delay_ms *= 2;
            Some(d)
        }
    })
}

/// Opaque handle to a registered domain. Cheap to copy and compare; carries
/// no lifetime, so callers can hold one across calls without borrowing the
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(pub(crate) u64);

/// Opaque handle to a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub(crate) u64);

struct DeviceEntry {
    domain: DomainId,
    binding: Arc<Mutex<DeviceBinding>>,
}

/// Owns the domain and device arenas. Domains are append-only (no removal
/// API), so domain lookups take a cheap `RwLock` read rather than the
/// heavier membership mutex; the membership mutex below is reserved for
/// device bind/unbind and whole-registry enumeration.
pub struct Registry {
    domains: RwLock<Vec<Arc<Domain>>>,
    devices: Mutex<HashMap<u64, DeviceEntry>>,
    /// Canonical registry-owned edge set; each domain's `masters`/
    /// `subdomains` vectors are a per-domain cached view of the same
    /// edges, not a second source of truth.
    links: Mutex<Vec<Link>>,
    next_domain: AtomicU64,
    next_device: AtomicU64,
    /// When true, `poweroff_unused` skips domains whose devices are all
    /// idle but which have never been instructed to idle (first-boot
    /// default-on domains some platforms want left alone).
    ignore_unused: std::sync::atomic::AtomicBool,
    /// Set once via [`Registry::attach_worker`] after construction, since
    /// the worker thread itself needs an `Arc<Registry>` to retry
    /// power-offs against.
    worker: OnceLock<Arc<Worker>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            domains: RwLock::new(Vec::new()),
            devices: Mutex::new(HashMap::new()),
            links: Mutex::new(Vec::new()),
            next_domain: AtomicU64::new(0),
            next_device: AtomicU64::new(0),
            ignore_unused: std::sync::atomic::AtomicBool::new(false),
            worker: OnceLock::new(),
        }
    }

    pub fn set_ignore_unused(&self, ignore: bool) {
        self.ignore_unused.store(ignore, Ordering::Relaxed);
    }

    /// Attach the deferred power-off worker. Idempotent after the first
    /// call; later calls are ignored, which only matters for tests that
    /// build a registry without ever needing deferred retries.
    pub fn attach_worker(&self, worker: Arc<Worker>) {
        let _ = self.worker.set(worker);
    }

    /// Queue `id` for a retried power-off. If no worker has been attached
    /// the request is dropped with a warning: deferred power-off is always
    /// advisory, never required for correctness of the synchronous paths.
    pub fn schedule_power_off(&self, id: DomainId) {
        match self.worker.get() {
            Some(w) => w.schedule_power_off(id),
            None => warn!("genpd: no worker attached, dropping deferred power-off of {:?}", id),
        }
    }

    /// Register a new, initially powered-off domain.
    pub fn add_domain(&self, name: impl Into<String>, ops: Arc<dyn DomainOps>) -> DomainId {
        let raw = self.next_domain.fetch_add(1, Ordering::Relaxed);
        let id = DomainId(raw);
        let domain = Arc::new(Domain::new(id, name, ops));
        info!("genpd: registered domain {} ({})", raw, domain.name);
        self.domains.write().unwrap().push(domain);
        id
    }

    /// Register a domain with a governor attached from the start (governors
    /// are immutable for a domain's lifetime; there is no post-hoc attach).
    pub fn add_domain_with_governor(
        &self,
        name: impl Into<String>,
        ops: Arc<dyn DomainOps>,
        governor: Arc<dyn Governor>,
    ) -> DomainId {
        let raw = self.next_domain.fetch_add(1, Ordering::Relaxed);
        let id = DomainId(raw);
        let domain = Arc::new(Domain::new(id, name, ops).with_governor(governor));
        info!("genpd: registered domain {} ({})", raw, domain.name);
        self.domains.write().unwrap().push(domain);
        id
    }

    /// Register a domain that starts out active rather than powered off,
    /// for hardware known to already be on at registration time.
    pub fn add_domain_initial_active(
        &self,
        name: impl Into<String>,
        ops: Arc<dyn DomainOps>,
    ) -> DomainId {
        let raw = self.next_domain.fetch_add(1, Ordering::Relaxed);
        let id = DomainId(raw);
        let domain = Arc::new(Domain::new(id, name, ops).with_initial_active());
        info!("genpd: registered domain {} ({}), initially active", raw, domain.name);
        self.domains.write().unwrap().push(domain);
        id
    }

    pub fn domain(&self, id: DomainId) -> PmResult<Arc<Domain>> {
        self.domains
            .read()
            .unwrap()
            .get(id.0 as usize)
            .cloned()
            .ok_or(PmError::NoEnt)
    }

    pub fn domain_count(&self) -> usize {
        self.domains.read().unwrap().len()
    }

    /// All registered domain handles, in registration order.
    pub fn domain_ids(&self) -> Vec<DomainId> {
        self.domains.read().unwrap().iter().map(|d| d.id).collect()
    }

    /// All currently-bound device handles. Order is unspecified beyond
    /// being stable for the duration of one sweep (no concurrent
    /// bind/unbind is assumed while a sleep-pipeline phase is running).
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.lock().unwrap().keys().map(|k| DeviceId(*k)).collect()
    }

    /// Bind a new device to `domain`, returning its handle. Refused with
    /// [`PmError::Again`] while a system-sleep cycle has the domain's
    /// `prepared_count` above zero, matching the topology-edit contention
    /// rule that keeps edits serialized against an in-flight sleep.
    pub fn add_device(&self, domain: DomainId, ops: Arc<dyn DeviceOps>) -> PmResult<DeviceId> {
        let dom = self.domain(domain)?;
        let raw = self.next_device.fetch_add(1, Ordering::Relaxed);
        let id = DeviceId(raw);
        let binding = Arc::new(Mutex::new(DeviceBinding::new(id, domain, ops)));

        {
            let mut state = dom.state.lock().unwrap();
            if state.prepared_count > 0 {
                return Err(PmError::Again);
            }
            state.devices.push(id);
        }
        if let Err(e) = binding.lock().unwrap().ops.attach_dev(id) {
            dom.state.lock().unwrap().devices.retain(|d| *d != id);
            return Err(e);
        }
        self.devices.lock().unwrap().insert(raw, DeviceEntry { domain, binding });
        debug!("genpd: bound device {} to domain {}", raw, dom.name);
        Ok(id)
    }

    /// Remove a device from its domain. Refused with [`PmError::Again`]
    /// while `prepared_count > 0`, same contention rule as [`Registry::add_device`].
    pub fn remove_device(&self, id: DeviceId) -> PmResult<()> {
        let domain = self.device_domain(id)?;
        let dom = self.domain(domain)?;
        {
            let state = dom.state.lock().unwrap();
            if state.prepared_count > 0 {
                return Err(PmError::Again);
            }
        }
        let entry = self
            .devices
            .lock()
            .unwrap()
            .remove(&id.0)
            .ok_or(PmError::NoEnt)?;
        entry.binding.lock().unwrap().ops.detach_dev(id)?;
        let mut state = dom.state.lock().unwrap();
        state.devices.retain(|d| *d != id);
        Ok(())
    }

    /// Driver-core attach entry point: bind a device to `domain`, retrying
    /// through `prepared_count > 0` contention with capped exponential
    /// back-off (1 ms doubling to ~250 ms) before giving up. A refusal that
    /// survives the whole schedule is translated to [`PmError::Defer`] so
    /// probing can be retried later, per the driver-core contract.
    pub fn attach_device(&self, domain: DomainId, ops: Arc<dyn DeviceOps>) -> PmResult<DeviceId> {
        for delay in backoff_schedule() {
            match self.add_device(domain, ops.clone()) {
                Err(PmError::Again) => std::thread::sleep(delay),
                other => return other,
            }
        }
        match self.add_device(domain, ops) {
            Err(PmError::Again) => Err(PmError::Defer),
            other => other,
        }
    }

    /// Driver-core detach entry point: the [`Registry::attach_device`]
    /// counterpart for `remove_device`.
    pub fn detach_device(&self, id: DeviceId) -> PmResult<()> {
        for delay in backoff_schedule() {
            match self.remove_device(id) {
                Err(PmError::Again) => std::thread::sleep(delay),
                other => return other,
            }
        }
        match self.remove_device(id) {
            Err(PmError::Again) => Err(PmError::Defer),
            other => other,
        }
    }

    /// Devices currently bound to `domain`, in bind order.
    pub fn domain_devices(&self, domain: DomainId) -> PmResult<Vec<DeviceId>> {
        Ok(self.domain(domain)?.state.lock().unwrap().devices.clone())
    }

    /// Attach sleep-pipeline callbacks to an already-bound device.
    pub fn set_sleep_ops(&self, id: DeviceId, sleep_ops: Arc<dyn crate::ops::SleepOps>) -> PmResult<()> {
        let binding = self.device(id)?;
        binding.lock().unwrap().sleep_ops = Some(sleep_ops);
        Ok(())
    }

    pub fn device(&self, id: DeviceId) -> PmResult<Arc<Mutex<DeviceBinding>>> {
        self.devices
            .lock()
            .unwrap()
            .get(&id.0)
            .map(|e| e.binding.clone())
            .ok_or(PmError::NoEnt)
    }

    pub fn device_domain(&self, id: DeviceId) -> PmResult<DomainId> {
        self.devices
            .lock()
            .unwrap()
            .get(&id.0)
            .map(|e| e.domain)
            .ok_or(PmError::NoEnt)
    }

    /// Link `sub` as a subdomain of `master`. Rejects self-links and
    /// duplicate edges; general cycle prevention across longer paths is
    /// left to the caller, matching the model this generalizes. Also
    /// rejects linking an active subdomain under a master that is powered
    /// off, which would let an active domain have an inactive master.
    pub fn add_subdomain(&self, master: DomainId, sub: DomainId) -> PmResult<()> {
        if master == sub {
            return Err(PmError::InvalidArg);
        }
        let master_dom = self.domain(master)?;
        let sub_dom = self.domain(sub)?;

        // Master-first nesting order, matching the documented lock
        // hierarchy (outer-to-inner by topological proximity to the root).
        let mut master_state = master_dom.state.lock().unwrap();
        let mut sub_state = sub_dom.state.lock().unwrap();

        if master_state.subdomains.contains(&sub) {
            return Err(PmError::Exists);
        }
        if master_state.status == Status::PowerOff && sub_state.status == Status::Active {
            return Err(PmError::InvalidArg);
        }
        master_state.subdomains.push(sub);
        sub_state.masters.push(master);
        if sub_state.status == Status::Active {
            master_dom.sd_count.fetch_add(1, Ordering::SeqCst);
            mbarrier::mb();
        }
        self.links.lock().unwrap().push(Link { master, slave: sub });
        Ok(())
    }

    /// Unlink `sub` from `master`. Refused if `sub` still has attached
    /// devices or its own subdomains, the same shape as the kernel's
    /// "has children" guard on removal.
    pub fn remove_subdomain(&self, master: DomainId, sub: DomainId) -> PmResult<()> {
        let master_dom = self.domain(master)?;
        let sub_dom = self.domain(sub)?;

        let mut master_state = master_dom.state.lock().unwrap();
        let mut sub_state = sub_dom.state.lock().unwrap();

        if !master_state.subdomains.contains(&sub) {
            return Err(PmError::NoEnt);
        }
        if !sub_state.devices.is_empty() || !sub_state.subdomains.is_empty() {
            return Err(PmError::Busy);
        }
        if sub_state.status == Status::Active {
            let prev = master_dom.sd_count.fetch_sub(1, Ordering::SeqCst);
            debug_assert!(prev > 0);
            mbarrier::mb();
        }
        master_state.subdomains.retain(|d| *d != sub);
        sub_state.masters.retain(|d| *d != master);
        self.links.lock().unwrap().retain(|l| !(l.master == master && l.slave == sub));
        Ok(())
    }

    /// All registry-owned edges, in no particular order.
    pub fn links(&self) -> Vec<Link> {
        self.links.lock().unwrap().clone()
    }

    /// After late init, if the process-wide "ignore unused" override is not
    /// set, enqueue deferred-off work for every registered domain. Each
    /// domain's work item independently attempts the power-off; domains
    /// with attached devices or active subdomains naturally refuse.
    pub fn poweroff_unused(&self) {
        if self.ignore_unused.load(Ordering::Relaxed) {
            return;
        }
        let ids: Vec<DomainId> = self
            .domains
            .read()
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        for id in ids {
            self.schedule_power_off(id);
        }
    }

    /// A point-in-time textual summary of every domain's status, subdomain
    /// count and device list. Stands in for the debugfs dump this is
    /// modeled on; not meant for machine parsing.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for dom in self.domains.read().unwrap().iter() {
            let state = dom.state.lock().unwrap();
            out.push_str(&format!(
                "{:<24} {:<10} sd_count={:<3} devices={}\n",
                dom.name,
                match state.status {
                    Status::Active => "active",
                    Status::PowerOff => "off",
                },
                dom.sd_count.load(Ordering::SeqCst),
                state.devices.len(),
            ));
        }
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
