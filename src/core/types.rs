use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use super::error::Error;
use super::zone::ZoneSource;

/// Network identifier shared by every unit paired with one boiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetworkId(pub [u8; 4]);

impl NetworkId {
    /// Filter value that lets every network's frames through
    pub const BROADCAST: NetworkId = NetworkId([0xFF; 4]);

    /// Returns whether this is the broadcast identifier
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Returns the raw bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d)
    }
}

impl FromStr for NetworkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 4];
        let mut parts = s.trim().split(|c| c == ':' || c == '-' || c == ' ');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::config(format!("NetworkId too short: '{}'", s)))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::config(format!("invalid NetworkId byte '{}'", part)))?;
        }
        if parts.next().is_some() {
            return Err(Error::config(format!("NetworkId too long: '{}'", s)));
        }
        Ok(NetworkId(bytes))
    }
}

/// One of the three heating zones a boiler can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ZoneSlot {
    Z1,
    Z2,
    Z3,
}

impl ZoneSlot {
    /// All slots in zone order
    pub const ALL: [ZoneSlot; 3] = [ZoneSlot::Z1, ZoneSlot::Z2, ZoneSlot::Z3];

    /// Zone number, 1..=3
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    /// Index into per-zone arrays
    pub fn index(self) -> usize {
        match self {
            ZoneSlot::Z1 => 0,
            ZoneSlot::Z2 => 1,
            ZoneSlot::Z3 => 2,
        }
    }

    /// Wire identifier of the zone, also the unit id of its satellite
    pub fn unit_id(self) -> u8 {
        match self {
            ZoneSlot::Z1 => super::ZONE_1_ID,
            ZoneSlot::Z2 => super::ZONE_2_ID,
            ZoneSlot::Z3 => super::ZONE_3_ID,
        }
    }

    /// Looks a slot up by its wire identifier
    pub fn from_unit_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.unit_id() == id)
    }

    /// Looks a slot up by zone number
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(ZoneSlot::Z1),
            2 => Some(ZoneSlot::Z2),
            3 => Some(ZoneSlot::Z3),
            _ => None,
        }
    }
}

impl fmt::Display for ZoneSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone{}", self.number())
    }
}

/// How a zone's satellite thermostat is provided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SatelliteMode {
    /// No satellite role for this zone
    #[default]
    None,
    /// A real thermostat is on the bus; its reports are relayed
    Physical,
    /// The gateway answers the boiler in place of a thermostat
    Virtual,
}

/// Where the outdoor probe role takes its reading from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeSource {
    /// Value pushed in through the command hook
    External,
    /// Wired temperature sensor collaborator
    Wired,
}

/// Per-zone configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Whether the zone exists on this installation
    pub enabled: bool,
    /// Satellite role for the zone
    pub satellite: SatelliteMode,
}

/// Gateway ("Connect") role configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Whether the gateway role runs
    pub enabled: bool,
    /// Passive mode: the gateway never runs an active association
    pub passive: bool,
}

/// Cadences of the periodic exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Telemetry pull period
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub telemetry_interval: Duration,
    /// Delay before retrying a failed telemetry or consumption pull
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub failure_retry: Duration,
    /// Gas consumption pull period
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub consumption_interval: Duration,
    /// Domestic hot water mode pull period
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub dhw_mode_interval: Duration,
    /// Dirty zone check period
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub zone_push_interval: Duration,
    /// Outdoor temperature push period
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub probe_interval: Duration,
    /// Overall deadline of the passive network id capture
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub capture_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            telemetry_interval: Duration::from_secs(300),
            failure_retry: Duration::from_secs(240),
            consumption_interval: Duration::from_secs(3600),
            dhw_mode_interval: Duration::from_secs(3600),
            zone_push_interval: Duration::from_secs(30),
            probe_interval: Duration::from_secs(600),
            capture_timeout: Duration::from_secs(30),
        }
    }
}

/// Attempt bounds and back-off of the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per write exchange
    pub write_attempts: u8,
    /// Attempts per read exchange
    pub read_attempts: u8,
    /// Attempts per acknowledgment
    pub ack_attempts: u8,
    /// Pause between two attempts of the same exchange
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub backoff: Duration,
    /// How long one attempt waits for its reply
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub response_timeout: Duration,
    /// How long an association request waits for the boiler
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub association_window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            write_attempts: 2,
            read_attempts: 2,
            ack_attempts: 5,
            backoff: Duration::from_millis(100),
            response_timeout: Duration::from_secs(1),
            association_window: Duration::from_secs(10),
        }
    }
}

/// Configuration of the whole gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Network the boiler and its peripherals share
    #[serde(serialize_with = "super::serde::serialize_network_id")]
    #[serde(deserialize_with = "super::serde::deserialize_network_id")]
    pub network_id: NetworkId,
    /// Unit id of the boiler
    pub boiler_id: u8,
    /// Gateway role
    pub connect: ConnectConfig,
    /// Outdoor probe role, disabled when `None`
    pub outdoor_probe: Option<ProbeSource>,
    /// Zones 1..=3
    pub zones: [ZoneConfig; 3],
    /// Cadences
    pub timing: TimingConfig,
    /// Transport retry discipline
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            network_id: NetworkId::BROADCAST,
            boiler_id: super::BOILER_ID,
            connect: ConnectConfig { enabled: true, passive: false },
            outdoor_probe: None,
            zones: [
                ZoneConfig { enabled: true, satellite: SatelliteMode::None },
                ZoneConfig::default(),
                ZoneConfig::default(),
            ],
            timing: TimingConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    /// Configuration of one zone
    pub fn zone(&self, slot: ZoneSlot) -> &ZoneConfig {
        &self.zones[slot.index()]
    }

    /// Which role feeds a zone, `None` when the zone is disabled
    pub fn zone_source(&self, slot: ZoneSlot) -> Option<ZoneSource> {
        let zone = self.zone(slot);
        if !zone.enabled {
            return None;
        }
        Some(if zone.satellite == SatelliteMode::Virtual {
            ZoneSource::VirtualSatellite
        } else if self.connect.enabled {
            ZoneSource::Connect
        } else {
            ZoneSource::PhysicalSatellite
        })
    }

    /// Checks the configuration for contradictions
    pub fn validate(&self) -> Result<(), Error> {
        let role_ids = [
            super::CONNECT_ID,
            super::OUTDOOR_PROBE_ID,
            super::ZONE_1_ID,
            super::ZONE_2_ID,
            super::ZONE_3_ID,
        ];
        if role_ids.contains(&self.boiler_id) {
            return Err(Error::config(format!(
                "boiler id 0x{:02X} collides with a peripheral unit id",
                self.boiler_id
            )));
        }

        for slot in ZoneSlot::ALL {
            let zone = self.zone(slot);
            if !zone.enabled && zone.satellite != SatelliteMode::None {
                return Err(Error::config(format!("{} has a satellite but is disabled", slot)));
            }
        }

        let retry = &self.retry;
        if retry.write_attempts == 0 || retry.read_attempts == 0 || retry.ack_attempts == 0 {
            return Err(Error::config("attempt bounds must be at least 1"));
        }

        let timing = &self.timing;
        let periods = [
            timing.telemetry_interval,
            timing.consumption_interval,
            timing.dhw_mode_interval,
            timing.zone_push_interval,
            timing.probe_interval,
        ];
        if periods.iter().any(|p| p.is_zero()) {
            return Err(Error::config("polling periods must be non-zero"));
        }

        Ok(())
    }
}
