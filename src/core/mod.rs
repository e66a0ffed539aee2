//! Core types shared by every layer of the gateway
//!
//! This module contains the error type, configuration, unit identifiers and
//! the zone entity.

pub mod error;
pub mod types;
pub mod serde;
pub mod zone;

pub use self::error::{Error, Result};
pub use self::types::{
    ConnectConfig,
    GatewayConfig,
    NetworkId,
    ProbeSource,
    RetryPolicy,
    SatelliteMode,
    TimingConfig,
    ZoneConfig,
    ZoneSlot,
};
pub use self::zone::{ModeOptions, Zone, ZoneMode, ZoneSettings, ZoneSource, Zones};

/// Unit id of the boiler
pub const BOILER_ID: u8 = 0x80;

/// Unit id of the gateway ("Connect") role
pub const CONNECT_ID: u8 = 0x7E;

/// Unit id of the outdoor probe role
pub const OUTDOOR_PROBE_ID: u8 = 0x20;

/// Wire id of zone 1, also the unit id of its satellite
pub const ZONE_1_ID: u8 = 0x08;

/// Wire id of zone 2
pub const ZONE_2_ID: u8 = 0x09;

/// Wire id of zone 3
pub const ZONE_3_ID: u8 = 0x0A;

/// Association id of a unit that never paired
pub const UNASSOCIATED: u8 = 0xFF;
