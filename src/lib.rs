//! # genpd
//!
//! A generic power-domain engine: devices are grouped into named power
//! domains arranged as a DAG of master/subdomain relationships, and each
//! domain transitions between active and powered-off while the engine
//! preserves the dependency invariants of the graph (a domain never powers
//! off while a subdomain is still active, never powers on before its own
//! masters do).
//!
//! Three entry points sit on top of the domain graph:
//!
//! - [`runtime`]: the one-shot `runtime_suspend`/`runtime_resume` pair a
//!   device's own runtime-PM transition drives, idling or waking its
//!   domain as a side effect.
//! - [`sleep`]: the multi-phase system-sleep pipeline (`prepare` through
//!   `complete`, plus the freeze/thaw/restore variants used around a
//!   hibernation image).
//! - [`registry::Registry::poweroff_unused`]: a periodic sweep that powers
//!   off any domain left idle.
//!
//! [`qos`] propagates PM-QoS constraint changes up a device's owning
//! domain's master chain so the next power-off attempt re-evaluates them.
//!
//! Hardware access never happens directly in this crate: every transition
//! is dispatched through the [`ops`] traits an integrator implements.

pub mod device;
pub mod domain;
pub mod error;
pub mod ops;
pub mod qos;
pub mod registry;
pub mod runtime;
pub mod sleep;
pub mod walker;
pub mod worker;

pub use device::{DeviceBinding, TimingData};
pub use domain::{Domain, Link, Status};
pub use error::{PmError, PmResult};
pub use ops::{DeviceOps, DomainOps, Governor, SleepOps};
pub use registry::{DeviceId, DomainId, Registry};
pub use worker::Worker;
