//! Deferred power-off dispatcher: a single FIFO worker thread that retries
//! `power_off` for a domain whose eager power-off was refused mid-rollback
//! or deferred after its last subdomain went idle.
//!
//! A minimal hand-rolled helper rather than a scheduler dependency for a
//! one-shot FIFO: `std::thread` + `std::sync::mpsc` only.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::registry::{DomainId, Registry};

enum Job {
    PowerOff(DomainId),
    Shutdown,
}

/// Owns the worker thread and its queue. Dropping the handle joins the
/// thread after asking it to drain and stop.
pub struct Worker {
    tx: Sender<Job>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn the worker against a registry that must outlive it.
    pub fn spawn(registry: Arc<Registry>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("genpd-poweroff".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::PowerOff(id) => {
                            debug!("genpd: deferred power-off worker processing {:?}", id);
                            if let Err(e) = crate::walker::power_off(&registry, id, true) {
                                warn!("genpd: deferred power-off of {:?} failed: {}", id, e);
                            }
                        }
                        Job::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn genpd power-off worker");

        Worker {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a domain for a retried power-off. Never blocks; if the
    /// worker has already shut down the job is silently dropped, matching
    /// the advisory nature of a deferred power-off.
    pub fn schedule_power_off(&self, domain: DomainId) {
        let _ = self.tx.send(Job::PowerOff(domain));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
