//! Frisquet gateway: peripheral roles on a boiler's radio accessory bus
//!
//! This library impersonates the peripherals of a Frisquet boiler (the
//! "Connect" gateway module, zone satellites and the outdoor probe) so that a
//! home-automation controller can read and change the boiler's state.
//! [`device::Manager`] owns the zones and roles and is driven by a radio
//! implementing [`network::Radio`].

pub mod core;
pub mod device;
pub mod hooks;
pub mod network;
pub mod protocol;
pub mod util;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use crate::core::{Error, GatewayConfig, Result, Zone, ZoneSlot};
pub use crate::device::Manager;
pub use crate::hooks::{Command, CommandHandle, Publisher, Store, Telemetry};
pub use crate::network::Radio;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
