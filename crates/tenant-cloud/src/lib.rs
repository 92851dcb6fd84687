//! Tenant Cloud: provisioning orchestration for isolated tenant instances.
//!
//! The [`provisioning`] module carries the resumable state machine that takes a
//! subscription from `Requested` to `Active`: site creation, app installation,
//! tenant bootstrap, DNS registration, and asynchronous certificate issuance.

pub mod config;
pub mod error;
pub mod provisioning;
pub mod telemetry;
