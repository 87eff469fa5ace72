//! Settlement engines.
//!
//! `rtgs` does gross settlement and the Queue-2 release scan, `offsetting`
//! the entry-disposition probe, `lsm` the bilateral and cycle passes, and
//! `deferred` the end-of-tick credit application.

pub mod deferred;
pub mod lsm;
pub mod offsetting;
pub mod rtgs;

pub use deferred::DeferredCredits;
pub use rtgs::{queue2_scan_order, release_scan, submit_release, EscalationConfig, ReleaseOutcome};
