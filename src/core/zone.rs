//! Heating zone entity
//!
//! A zone is edited from two directions: locally (command hook, restored
//! settings) and by the boiler (configuration pushes, telemetry). Only local
//! configuration edits make a zone dirty; a dirty zone is pushed to the boiler
//! until a successful send catches up with the last edit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::error::{Error, Result};
use super::types::{GatewayConfig, ZoneSlot};
use crate::protocol::records::ZoneRecord;
use crate::protocol::values::Temp8;

/// Operating mode of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ZoneMode {
    Auto,
    Comfort,
    Reduced,
    FrostProtection,
    #[default]
    Unknown,
}

impl ZoneMode {
    /// Decodes a mode byte, unmapped values become `Unknown`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x05 => ZoneMode::Auto,
            0x06 => ZoneMode::Comfort,
            0x07 => ZoneMode::Reduced,
            0x08 => ZoneMode::FrostProtection,
            _ => ZoneMode::Unknown,
        }
    }

    /// Wire value
    pub fn as_u8(self) -> u8 {
        match self {
            ZoneMode::Auto => 0x05,
            ZoneMode::Comfort => 0x06,
            ZoneMode::Reduced => 0x07,
            ZoneMode::FrostProtection => 0x08,
            ZoneMode::Unknown => 0xFF,
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            ZoneMode::Auto => "Auto",
            ZoneMode::Comfort => "Confort",
            ZoneMode::Reduced => "Reduit",
            ZoneMode::FrostProtection => "Hors gel",
            ZoneMode::Unknown => "Inconnu",
        }
    }
}

impl fmt::Display for ZoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ZoneMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ZoneMode::Auto),
            "confort" | "comfort" => Ok(ZoneMode::Comfort),
            "reduit" | "réduit" | "reduced" => Ok(ZoneMode::Reduced),
            "hors gel" | "hors-gel" | "frost" => Ok(ZoneMode::FrostProtection),
            _ => Err(Error::config(format!("unknown zone mode '{}'", s))),
        }
    }
}

/// Vendor option bits that accompany the zone mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeOptions(pub u8);

impl ModeOptions {
    pub const BOOST: u8 = 0x02;
    pub const DEROGATION: u8 = 0x40;
    pub const COMFORT: u8 = 0x80;

    /// Boost bit
    pub fn boost(self) -> bool {
        self.0 & Self::BOOST != 0
    }

    /// Derogation (temporary override) bit
    pub fn derogation(self) -> bool {
        self.0 & Self::DEROGATION != 0
    }

    /// Comfort-period bit
    pub fn comfort(self) -> bool {
        self.0 & Self::COMFORT != 0
    }

    /// Returns a copy with `bit` set or cleared
    pub fn with(self, bit: u8, on: bool) -> Self {
        if on {
            ModeOptions(self.0 | bit)
        } else {
            ModeOptions(self.0 & !bit)
        }
    }
}

impl Default for ModeOptions {
    fn default() -> Self {
        ModeOptions(0x04)
    }
}

/// Which role writes a zone's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneSource {
    /// A real thermostat on the bus
    PhysicalSatellite,
    /// The gateway answers in place of a thermostat
    VirtualSatellite,
    /// Managed through the gateway role
    Connect,
}

/// Persisted subset of a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSettings {
    pub mode: ZoneMode,
    pub options: u8,
    pub comfort: Option<f32>,
    pub reduced: Option<f32>,
    pub frost: Option<f32>,
    pub boost_offset: f32,
}

/// One heating zone
#[derive(Debug, Clone)]
pub struct Zone {
    slot: ZoneSlot,
    source: Option<ZoneSource>,
    mode: ZoneMode,
    options: ModeOptions,
    comfort: Option<f32>,
    reduced: Option<f32>,
    frost: Option<f32>,
    boost_offset: f32,
    boost_active: bool,
    ambient: Option<f32>,
    target: Option<f32>,
    supply: Option<f32>,
    last_change: Option<Instant>,
    last_sent: Option<Instant>,
}

impl Zone {
    /// Default boost offset in degrees
    pub const DEFAULT_BOOST_OFFSET: f32 = 2.0;

    /// Creates a zone; `source` is `None` for a disabled zone
    pub fn new(slot: ZoneSlot, source: Option<ZoneSource>) -> Self {
        Zone {
            slot,
            source,
            mode: ZoneMode::Unknown,
            options: ModeOptions::default(),
            comfort: None,
            reduced: None,
            frost: None,
            boost_offset: Self::DEFAULT_BOOST_OFFSET,
            boost_active: false,
            ambient: None,
            target: None,
            supply: None,
            last_change: None,
            last_sent: None,
        }
    }

    pub fn slot(&self) -> ZoneSlot {
        self.slot
    }

    /// Zone number, 1..=3
    pub fn number(&self) -> u8 {
        self.slot.number()
    }

    /// Wire identifier, also used as reception slot of zone exchanges
    pub fn unit_id(&self) -> u8 {
        self.slot.unit_id()
    }

    pub fn source(&self) -> Option<ZoneSource> {
        self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    pub fn mode(&self) -> ZoneMode {
        self.mode
    }

    pub fn options(&self) -> ModeOptions {
        self.options
    }

    pub fn comfort(&self) -> Option<f32> {
        self.comfort
    }

    pub fn reduced(&self) -> Option<f32> {
        self.reduced
    }

    pub fn frost(&self) -> Option<f32> {
        self.frost
    }

    pub fn boost_offset(&self) -> f32 {
        self.boost_offset
    }

    pub fn boost_active(&self) -> bool {
        self.boost_active
    }

    pub fn ambient(&self) -> Option<f32> {
        self.ambient
    }

    pub fn target(&self) -> Option<f32> {
        self.target
    }

    pub fn supply(&self) -> Option<f32> {
        self.supply
    }

    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    fn touch(&mut self, now: Instant) {
        self.last_change = Some(match self.last_change {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }

    /// Local mode change
    pub fn set_mode(&mut self, mode: ZoneMode, now: Instant) {
        self.mode = mode;
        self.touch(now);
    }

    /// Local comfort setpoint change
    pub fn set_comfort(&mut self, value: f32, now: Instant) {
        self.comfort = Some(value);
        self.touch(now);
    }

    /// Local reduced setpoint change
    pub fn set_reduced(&mut self, value: f32, now: Instant) {
        self.reduced = Some(value);
        self.touch(now);
    }

    /// Local frost-protection setpoint change
    pub fn set_frost(&mut self, value: f32, now: Instant) {
        self.frost = Some(value);
        self.touch(now);
    }

    /// Starts or stops a boost, mirrored in the option bits
    pub fn set_boost(&mut self, active: bool, now: Instant) {
        self.boost_active = active;
        self.options = self.options.with(ModeOptions::BOOST, active);
        self.touch(now);
    }

    /// Changes the boost offset; only makes the zone dirty while a boost runs
    pub fn set_boost_offset(&mut self, offset: f32, now: Instant) {
        self.boost_offset = offset;
        if self.boost_active {
            self.touch(now);
        }
    }

    /// Ambient temperature measured in the zone
    pub fn set_ambient(&mut self, value: f32) {
        self.ambient = Some(value);
    }

    /// Ambient and target temperatures reported by the boiler
    pub fn update_temperatures(&mut self, ambient: f32, target: f32) {
        self.ambient = Some(ambient);
        self.target = Some(target);
    }

    /// Supply temperature reported by the boiler
    pub fn set_supply(&mut self, value: f32) {
        self.supply = Some(value);
    }

    /// Applies a configuration pushed by the boiler. The boost state follows
    /// the pushed BOOST bit; while it is set the pushed comfort carries the
    /// offset and the local setpoint is kept. Does not make the zone dirty.
    pub fn apply_remote(&mut self, record: &ZoneRecord) {
        let options = ModeOptions(record.options);
        self.mode = ZoneMode::from_u8(record.mode);
        self.options = options;
        self.boost_active = options.boost();
        self.reduced = Some(record.reduced.to_celsius());
        self.frost = Some(record.frost.to_celsius());
        if !self.boost_active {
            self.comfort = Some(record.comfort.to_celsius());
        }
    }

    /// Whether local edits have not reached the boiler yet
    pub fn is_dirty(&self) -> bool {
        match (self.last_change, self.last_sent) {
            (Some(change), Some(sent)) => change > sent,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Records a successful push; never moves backwards
    pub fn mark_sent(&mut self, at: Instant) {
        self.last_sent = Some(match self.last_sent {
            Some(previous) if previous > at => previous,
            _ => at,
        });
    }

    /// Checks that every field of the outbound record is known
    pub fn validate_for_push(&self) -> Result<()> {
        if !self.is_enabled() {
            return Err(Error::protocol(format!("{} is disabled", self.slot)));
        }
        if self.comfort.is_none() || self.reduced.is_none() || self.frost.is_none() {
            return Err(Error::protocol(format!("{} has incomplete setpoints", self.slot)));
        }
        if self.mode == ZoneMode::Unknown {
            return Err(Error::protocol(format!("{} has no known mode", self.slot)));
        }
        Ok(())
    }

    /// Builds the outbound record, comfort raised by the boost offset while
    /// a boost is active
    pub fn record(&self) -> Result<ZoneRecord> {
        self.validate_for_push()?;
        let comfort = self.comfort.unwrap_or(Temp8::MIN);
        let comfort = if self.boost_active { comfort + self.boost_offset } else { comfort };
        Ok(ZoneRecord {
            comfort: Temp8::from_celsius(comfort),
            reduced: Temp8::from_celsius(self.reduced.unwrap_or(Temp8::MIN)),
            frost: Temp8::from_celsius(self.frost.unwrap_or(Temp8::MIN)),
            mode: self.mode.as_u8(),
            options: self.options.0,
            reserved: 0,
        })
    }

    /// Persisted subset
    pub fn settings(&self) -> ZoneSettings {
        ZoneSettings {
            mode: self.mode,
            options: self.options.0,
            comfort: self.comfort,
            reduced: self.reduced,
            frost: self.frost,
            boost_offset: self.boost_offset,
        }
    }

    /// Restores persisted settings without making the zone dirty
    pub fn restore(&mut self, settings: &ZoneSettings) {
        self.mode = settings.mode;
        self.options = ModeOptions(settings.options);
        self.boost_active = self.options.boost();
        self.comfort = settings.comfort;
        self.reduced = settings.reduced;
        self.frost = settings.frost;
        self.boost_offset = settings.boost_offset;
    }
}

/// The three zones of an installation
#[derive(Debug, Clone)]
pub struct Zones {
    zones: [Zone; 3],
}

impl Zones {
    /// Creates the zones with the sources the configuration assigns
    pub fn new(config: &GatewayConfig) -> Self {
        Zones {
            zones: ZoneSlot::ALL.map(|slot| Zone::new(slot, config.zone_source(slot))),
        }
    }

    pub fn get(&self, slot: ZoneSlot) -> &Zone {
        &self.zones[slot.index()]
    }

    pub fn get_mut(&mut self, slot: ZoneSlot) -> &mut Zone {
        &mut self.zones[slot.index()]
    }

    /// Looks a zone up by its wire identifier
    pub fn by_unit_id(&self, id: u8) -> Option<&Zone> {
        ZoneSlot::from_unit_id(id).map(|slot| self.get(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Zone> {
        self.zones.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn configured(now: Instant) -> Zone {
        let mut zone = Zone::new(ZoneSlot::Z1, Some(ZoneSource::Connect));
        zone.restore(&ZoneSettings {
            mode: ZoneMode::Auto,
            options: 0x04,
            comfort: Some(20.0),
            reduced: Some(17.0),
            frost: Some(8.0),
            boost_offset: 2.0,
        });
        zone.mark_sent(now);
        zone
    }

    #[test]
    fn test_mode_codes() {
        for mode in [ZoneMode::Auto, ZoneMode::Comfort, ZoneMode::Reduced, ZoneMode::FrostProtection] {
            assert_eq!(ZoneMode::from_u8(mode.as_u8()), mode);
            assert_eq!(mode.name().parse::<ZoneMode>().unwrap(), mode);
        }
        assert_eq!(ZoneMode::from_u8(0x42), ZoneMode::Unknown);
        assert!("turbo".parse::<ZoneMode>().is_err());
    }

    #[test]
    fn test_mode_option_bits() {
        let options = ModeOptions(0x80 | 0x40 | 0x02);
        assert!(options.boost() && options.derogation() && options.comfort());
        assert!(!ModeOptions::default().boost());
        assert_eq!(ModeOptions::default().with(ModeOptions::BOOST, true).0, 0x06);
    }

    #[test]
    fn test_local_edit_makes_dirty() {
        let start = Instant::now();
        let mut zone = configured(start);
        assert!(!zone.is_dirty());

        zone.set_comfort(21.5, start + Duration::from_secs(10));
        assert!(zone.is_dirty());

        zone.mark_sent(start + Duration::from_secs(10));
        assert!(!zone.is_dirty());
    }

    #[test]
    fn test_failed_push_keeps_last_sent() {
        // last_change = 10, last_sent = 5: a failed push leaves both untouched
        let start = Instant::now();
        let mut zone = configured(start + Duration::from_secs(5));
        zone.set_mode(ZoneMode::Comfort, start + Duration::from_secs(10));

        assert!(zone.is_dirty());
        assert_eq!(zone.last_sent(), Some(start + Duration::from_secs(5)));

        zone.mark_sent(start + Duration::from_secs(12));
        assert!(zone.last_sent().unwrap() >= start + Duration::from_secs(10));
        assert!(!zone.is_dirty());
    }

    #[test]
    fn test_mark_sent_never_regresses() {
        let start = Instant::now();
        let mut zone = configured(start + Duration::from_secs(20));
        zone.mark_sent(start + Duration::from_secs(5));
        assert_eq!(zone.last_sent(), Some(start + Duration::from_secs(20)));
    }

    #[test]
    fn test_remote_update_is_not_dirty() {
        let start = Instant::now();
        let mut zone = configured(start);
        let record = ZoneRecord {
            comfort: Temp8::from_celsius(22.0),
            reduced: Temp8::from_celsius(16.0),
            frost: Temp8::from_celsius(7.0),
            mode: 0x06,
            options: 0x84,
            reserved: 0,
        };
        zone.apply_remote(&record);

        assert!(!zone.is_dirty());
        assert_eq!(zone.mode(), ZoneMode::Comfort);
        assert_eq!(zone.comfort(), Some(22.0));
        assert_eq!(zone.reduced(), Some(16.0));
        assert_eq!(zone.frost(), Some(7.0));
        assert!(zone.options().comfort());
    }

    #[test]
    fn test_boost_preserves_local_comfort() {
        let start = Instant::now();
        let mut zone = configured(start);
        zone.set_boost(true, start + Duration::from_secs(1));

        let record = zone.record().unwrap();
        assert_eq!(record.comfort.to_celsius(), 22.0);
        assert!(ModeOptions(record.options).boost());

        let mut pushed = record;
        pushed.comfort = Temp8::from_celsius(25.0);
        zone.apply_remote(&pushed);
        assert_eq!(zone.comfort(), Some(20.0));
        assert!(zone.boost_active());
    }

    #[test]
    fn test_remote_boost_bit_drives_boost_state() {
        let start = Instant::now();
        let mut zone = configured(start);
        zone.set_boost(true, start + Duration::from_secs(1));

        // Boiler ends the boost
        let mut pushed = zone.record().unwrap();
        pushed.options &= !ModeOptions::BOOST;
        pushed.comfort = Temp8::from_celsius(19.0);
        zone.apply_remote(&pushed);
        assert!(!zone.boost_active());
        assert!(!zone.options().boost());
        assert_eq!(zone.comfort(), Some(19.0));

        // Boiler starts one
        pushed.options |= ModeOptions::BOOST;
        pushed.comfort = Temp8::from_celsius(21.0);
        zone.apply_remote(&pushed);
        assert!(zone.boost_active());
        assert_eq!(zone.comfort(), Some(19.0));
    }

    #[test]
    fn test_incomplete_zone_is_not_pushed() {
        let zone = Zone::new(ZoneSlot::Z2, Some(ZoneSource::Connect));
        assert!(zone.record().is_err());

        let disabled = Zone::new(ZoneSlot::Z3, None);
        assert!(disabled.validate_for_push().is_err());
    }

    #[test]
    fn test_zones_follow_configuration() {
        let zones = Zones::new(&GatewayConfig::default());
        assert_eq!(zones.get(ZoneSlot::Z1).source(), Some(ZoneSource::Connect));
        assert!(!zones.get(ZoneSlot::Z2).is_enabled());
        assert_eq!(zones.by_unit_id(0x0A).map(Zone::number), Some(3));
        assert!(zones.by_unit_id(0x01).is_none());
    }
}
