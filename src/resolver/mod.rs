// src/resolver/mod.rs

//! Dependency resolver
//!
//! The resolver is a pure function over a registry snapshot and a candidate
//! set: it computes wirings and fragment attachments but never mutates
//! shared state. The lifecycle manager commits the returned `Resolution`
//! under the global resolution lock.
//!
//! Key properties:
//!
//! - **Sticky wiring**: modules that already have a wiring are never
//!   re-wired here; only `refresh` may change an existing binding.
//! - **Highest version wins** for new bindings; exact-version ties go to
//!   the exporter with the lowest module id (least recently installed).
//! - **Transactional per module**: either every mandatory requirement is
//!   satisfied and the module resolves, or none of its wiring is committed.
//! - Fragments that would introduce an unsatisfiable constraint are left
//!   unattached; the host still resolves without them.

mod engine;
mod wiring;

pub use engine::{Resolution, Resolver};
pub use wiring::{ExportedPackage, PackageWire, RequireWire, Wiring, exported_packages};
