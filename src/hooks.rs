//! Boundaries towards persistence and the home-automation side
//!
//! The gateway loads and saves through [`Store`], reports observable state
//! through [`Publisher`] and receives requested changes as [`Command`]s sent
//! through a [`CommandHandle`].

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use tokio::sync::mpsc;

use crate::core::{Error, NetworkId, Result, ZoneMode, ZoneSettings, ZoneSlot};
use crate::protocol::records::DhwMode;

/// Role whose association is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKey {
    Connect,
    OutdoorProbe,
    Satellite(ZoneSlot),
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKey::Connect => f.write_str("connect"),
            RoleKey::OutdoorProbe => f.write_str("outdoor"),
            RoleKey::Satellite(slot) => write!(f, "satellite/{}", slot),
        }
    }
}

/// Persistence collaborator, used at startup and on configuration changes only
pub trait Store: Send {
    fn load_association(&self, role: RoleKey) -> Result<Option<u8>>;
    fn save_association(&mut self, role: RoleKey, association_id: u8) -> Result<()>;
    fn load_network_id(&self) -> Result<Option<NetworkId>>;
    fn save_network_id(&mut self, network_id: NetworkId) -> Result<()>;
    fn load_zone(&self, slot: ZoneSlot) -> Result<Option<ZoneSettings>>;
    fn save_zone(&mut self, slot: ZoneSlot, settings: &ZoneSettings) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    associations: HashMap<RoleKey, u8>,
    network_id: Option<NetworkId>,
    zones: HashMap<ZoneSlot, ZoneSettings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load_association(&self, role: RoleKey) -> Result<Option<u8>> {
        Ok(self.associations.get(&role).copied())
    }

    fn save_association(&mut self, role: RoleKey, association_id: u8) -> Result<()> {
        self.associations.insert(role, association_id);
        Ok(())
    }

    fn load_network_id(&self) -> Result<Option<NetworkId>> {
        Ok(self.network_id)
    }

    fn save_network_id(&mut self, network_id: NetworkId) -> Result<()> {
        self.network_id = Some(network_id);
        Ok(())
    }

    fn load_zone(&self, slot: ZoneSlot) -> Result<Option<ZoneSettings>> {
        Ok(self.zones.get(&slot).cloned())
    }

    fn save_zone(&mut self, slot: ZoneSlot, settings: &ZoneSettings) -> Result<()> {
        self.zones.insert(slot, settings.clone());
        Ok(())
    }
}

/// Value published for a key
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Temperature(f32),
    Pressure(f32),
    Consumption(i16),
    DhwMode(DhwMode),
    ZoneMode(ZoneMode),
    Flag(bool),
    Clock(NaiveDateTime),
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Telemetry::Temperature(value) => write!(f, "{:.1}", value),
            Telemetry::Pressure(value) => write!(f, "{:.2}", value),
            Telemetry::Consumption(value) => write!(f, "{}", value),
            Telemetry::DhwMode(mode) => write!(f, "{}", mode),
            Telemetry::ZoneMode(mode) => write!(f, "{}", mode),
            Telemetry::Flag(on) => f.write_str(if *on { "ON" } else { "OFF" }),
            Telemetry::Clock(at) => write!(f, "{}", at.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// Telemetry consumer
pub trait Publisher: Send {
    fn publish(&mut self, key: &str, value: &Telemetry);
}

/// Publisher that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&mut self, _key: &str, _value: &Telemetry) {}
}

/// Change requested from outside
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetDhwMode(DhwMode),
    SetZoneMode(ZoneSlot, ZoneMode),
    SetComfort(ZoneSlot, f32),
    SetReduced(ZoneSlot, f32),
    SetFrost(ZoneSlot, f32),
    SetBoost(ZoneSlot, bool),
    SetBoostOffset(ZoneSlot, f32),
    /// Ambient temperature of a zone whose satellite is virtual
    SetAmbient(ZoneSlot, f32),
    /// Outdoor temperature for an externally fed probe
    SetOutdoorTemperature(f32),
}

fn parse_temperature(payload: &str) -> Result<f32> {
    let value: f32 = payload
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid temperature '{}'", payload)))?;
    if !value.is_finite() {
        return Err(Error::config(format!("invalid temperature '{}'", payload)));
    }
    Ok(value)
}

fn parse_flag(payload: &str) -> Result<bool> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(Error::config(format!("invalid switch value '{}'", payload))),
    }
}

impl Command {
    /// Parses a `key`/`payload` pair such as `zone1/comfort` = `21.5`
    pub fn from_key(key: &str, payload: &str) -> Result<Self> {
        let (entity, field) = key
            .split_once('/')
            .ok_or_else(|| Error::config(format!("invalid command key '{}'", key)))?;

        match (entity, field) {
            ("connect", "dhw_mode") => Ok(Command::SetDhwMode(payload.parse()?)),
            ("outdoor", "temperature") => Ok(Command::SetOutdoorTemperature(parse_temperature(payload)?)),
            (zone, field) => {
                let slot = zone
                    .strip_prefix("zone")
                    .and_then(|n| n.parse().ok())
                    .and_then(ZoneSlot::from_number)
                    .ok_or_else(|| Error::config(format!("invalid command key '{}'", key)))?;

                match field {
                    "mode" => Ok(Command::SetZoneMode(slot, payload.parse()?)),
                    "comfort" => Ok(Command::SetComfort(slot, parse_temperature(payload)?)),
                    "reduced" => Ok(Command::SetReduced(slot, parse_temperature(payload)?)),
                    "frost" => Ok(Command::SetFrost(slot, parse_temperature(payload)?)),
                    "boost" => Ok(Command::SetBoost(slot, parse_flag(payload)?)),
                    "boost_offset" => Ok(Command::SetBoostOffset(slot, parse_temperature(payload)?)),
                    "ambient" => Ok(Command::SetAmbient(slot, parse_temperature(payload)?)),
                    _ => Err(Error::config(format!("invalid command key '{}'", key))),
                }
            }
        }
    }
}

/// Cloneable sender of commands into the scheduling loop
#[derive(Debug, Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<Command>,
}

impl CommandHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        CommandHandle { tx }
    }

    /// Queues a command, waiting for room
    pub async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|e| Error::protocol(format!("Failed to queue command: {}", e)))
    }

    /// Parses and queues a command without waiting
    pub fn on_command(&self, key: &str, payload: &str) -> Result<()> {
        let command = Command::from_key(key, payload)?;
        self.tx
            .try_send(command)
            .map_err(|e| Error::protocol(format!("Failed to queue command: {}", e)))
    }
}
