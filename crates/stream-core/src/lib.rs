//! Stream fallback selection, rotation and health monitoring for a radio
//! player backend.
//!
//! `FallbackManager` is the context object for picking and rotating stream
//! URLs; `HealthMonitor` runs the periodic checks on top of it.  Both talk
//! to the outside world only through the `StreamProber` and `SettingsStore`
//! traits.

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod health;
pub mod monitor;
pub mod platform;
pub mod probe;
pub mod protocol;
pub mod rotation;
pub mod selector;
pub mod sources;
pub mod store;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
