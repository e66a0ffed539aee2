//! Byte layouts of the boiler register regions
//!
//! Every record is decoded field by field from a slice with bounds checks;
//! a short slice is a decode error.

use std::fmt;
use std::str::FromStr;

use crate::core::{Error, Result, ZoneSlot};
use super::values::{word_at, Pressure16, RawWord, Temp16, Temp8};

fn require(data: &[u8], len: usize, what: &str) -> Result<()> {
    if data.len() < len {
        return Err(Error::decode(format!(
            "{} needs {} bytes, got {}",
            what,
            len,
            data.len()
        )));
    }
    Ok(())
}

/// Zone configuration record written to and pushed from region 0xA154
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRecord {
    pub comfort: Temp8,
    pub reduced: Temp8,
    pub frost: Temp8,
    pub mode: u8,
    pub options: u8,
    pub reserved: u8,
}

impl ZoneRecord {
    /// Encoded size
    pub const LEN: usize = 6;

    /// Size of a boiler push: the record followed by seven 6-byte day schedules
    pub const PUSH_LEN: usize = 48;

    /// Decodes the record from the first six bytes of `data`
    pub fn decode(data: &[u8]) -> Result<Self> {
        require(data, Self::LEN, "zone record")?;
        Ok(ZoneRecord {
            comfort: Temp8(data[0]),
            reduced: Temp8(data[1]),
            frost: Temp8(data[2]),
            mode: data[3],
            options: data[4],
            reserved: data[5],
        })
    }

    pub fn encode(&self) -> [u8; 6] {
        [
            self.comfort.0,
            self.reduced.0,
            self.frost.0,
            self.mode,
            self.options,
            self.reserved,
        ]
    }
}

/// Telemetry block read from region 0x79E0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    /// Domestic hot water temperature
    pub dhw: f32,
    /// Heating circuit temperature
    pub heating_circuit: f32,
    /// Supply temperature per zone
    pub supply: [f32; 3],
    /// System pressure in bar
    pub pressure: f32,
    /// Raw DHW mode byte
    pub dhw_mode: u8,
    /// Instantaneous DHW temperature
    pub dhw_instant: f32,
    /// Ambient temperature per zone
    pub ambient: [f32; 3],
    /// Target temperature per zone
    pub target: [f32; 3],
    /// Outdoor temperature
    pub outdoor: f32,
}

impl TelemetryRecord {
    pub const LEN: usize = 56;

    pub fn decode(data: &[u8]) -> Result<Self> {
        require(data, Self::LEN, "telemetry block")?;
        let temp = |offset| word_at(data, offset).map(|w| Temp16::from_bytes(w).to_celsius());

        Ok(TelemetryRecord {
            dhw: temp(0)?,
            heating_circuit: temp(2)?,
            supply: [temp(4)?, temp(6)?, temp(8)?],
            pressure: Pressure16::from_bytes(word_at(data, 20)?).to_bar(),
            dhw_mode: data[23],
            dhw_instant: temp(24)?,
            ambient: [temp(36)?, temp(38)?, temp(40)?],
            target: [temp(48)?, temp(50)?, temp(52)?],
            outdoor: temp(54)?,
        })
    }

    /// Ambient and target temperature of one zone
    pub fn zone(&self, slot: ZoneSlot) -> (f32, f32) {
        (self.ambient[slot.index()], self.target[slot.index()])
    }
}

/// Gas consumption counters read from region 0x7A18
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionRecord {
    pub dhw: i16,
    pub heating: i16,
}

impl ConsumptionRecord {
    pub const LEN: usize = 56;

    pub fn decode(data: &[u8]) -> Result<Self> {
        require(data, Self::LEN, "consumption block")?;
        Ok(ConsumptionRecord {
            dhw: RawWord::from_bytes(word_at(data, 18)?).as_i16(),
            heating: RawWord::from_bytes(word_at(data, 20)?).as_i16(),
        })
    }
}

/// Domestic hot water mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DhwMode {
    Stop,
    Max,
    Eco,
    EcoScheduled,
    EcoPlus,
    EcoPlusScheduled,
    #[default]
    Unknown,
}

impl DhwMode {
    /// Every settable mode
    pub const ALL: [DhwMode; 6] = [
        DhwMode::Max,
        DhwMode::Eco,
        DhwMode::EcoScheduled,
        DhwMode::EcoPlus,
        DhwMode::EcoPlusScheduled,
        DhwMode::Stop,
    ];

    /// Decodes a mode byte after masking the high bit
    pub fn from_u8(value: u8) -> Self {
        match value & 0x7F {
            0x29 => DhwMode::Stop,
            0x01 => DhwMode::Max,
            0x09 => DhwMode::Eco,
            0x11 => DhwMode::EcoScheduled,
            0x19 => DhwMode::EcoPlus,
            0x21 => DhwMode::EcoPlusScheduled,
            _ => DhwMode::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DhwMode::Stop => 0x29,
            DhwMode::Max => 0x01,
            DhwMode::Eco => 0x09,
            DhwMode::EcoScheduled => 0x11,
            DhwMode::EcoPlus => 0x19,
            DhwMode::EcoPlusScheduled => 0x21,
            DhwMode::Unknown => 0xFF,
        }
    }

    /// Display name, as offered to the home-automation side
    pub fn name(self) -> &'static str {
        match self {
            DhwMode::Stop => "Stop",
            DhwMode::Max => "Max",
            DhwMode::Eco => "Eco",
            DhwMode::EcoScheduled => "Eco Horaires",
            DhwMode::EcoPlus => "Eco+",
            DhwMode::EcoPlusScheduled => "Eco+ Horaires",
            DhwMode::Unknown => "Inconnu",
        }
    }

    /// Decodes the one-word DHW mode region
    pub fn decode_region(data: &[u8]) -> Result<Self> {
        require(data, 2, "DHW mode word")?;
        Ok(Self::from_u8(data[1]))
    }

    /// Payload written to the DHW mode region
    pub fn encode_region(self) -> [u8; 2] {
        [0x00, self.as_u8()]
    }
}

impl fmt::Display for DhwMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DhwMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::config(format!("unknown DHW mode '{}'", s)))
    }
}

/// What a satellite reports about its zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatelliteStatus {
    pub ambient: Temp16,
    pub target: Temp16,
    pub mode: u8,
    pub options: u8,
}

impl SatelliteStatus {
    pub const LEN: usize = 8;

    pub fn decode(data: &[u8]) -> Result<Self> {
        require(data, Self::LEN, "satellite status")?;
        Ok(SatelliteStatus {
            ambient: Temp16::from_bytes(word_at(data, 0)?),
            target: Temp16::from_bytes(word_at(data, 2)?),
            mode: data[4],
            options: data[5],
        })
    }

    pub fn encode(&self) -> [u8; 8] {
        let [a0, a1] = self.ambient.to_bytes();
        let [t0, t1] = self.target.to_bytes();
        [a0, a1, t0, t1, self.mode, self.options, 0, 0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry_block() -> Vec<u8> {
        let mut data = vec![0u8; TelemetryRecord::LEN];
        data[0..2].copy_from_slice(&[0x02, 0x1C]); // 54.0
        data[2..4].copy_from_slice(&[0x01, 0x90]); // 40.0
        data[4..6].copy_from_slice(&[0x01, 0x5E]); // 35.0
        data[20..22].copy_from_slice(&[0x1F, 0x00]); // 1.55 bar
        data[23] = 0x89;
        data[36..38].copy_from_slice(&[0x00, 0xD2]); // 21.0
        data[48..50].copy_from_slice(&[0x00, 0xD7]); // 21.5
        data[54..56].copy_from_slice(&[0xFF, 0xE2]); // -3.0
        data
    }

    #[test]
    fn test_telemetry_offsets() {
        let record = TelemetryRecord::decode(&telemetry_block()).unwrap();
        assert_eq!(record.dhw, 54.0);
        assert_eq!(record.heating_circuit, 40.0);
        assert_eq!(record.supply[0], 35.0);
        assert_eq!(record.pressure, 1.55);
        assert_eq!(DhwMode::from_u8(record.dhw_mode), DhwMode::Eco);
        assert_eq!(record.zone(ZoneSlot::Z1), (21.0, 21.5));
        assert_eq!(record.outdoor, -3.0);

        assert!(TelemetryRecord::decode(&telemetry_block()[..40]).is_err());
    }

    #[test]
    fn test_consumption_counters() {
        let mut data = vec![0u8; ConsumptionRecord::LEN];
        data[18..20].copy_from_slice(&[0x00, 0x2A]);
        data[20..22].copy_from_slice(&[0x01, 0x00]);
        let record = ConsumptionRecord::decode(&data).unwrap();
        assert_eq!(record, ConsumptionRecord { dhw: 42, heating: 256 });
    }

    #[test]
    fn test_zone_record_from_push() {
        let mut push = vec![0xFFu8; ZoneRecord::PUSH_LEN];
        push[..6].copy_from_slice(&[165, 120, 30, 0x05, 0x04, 0x00]);
        let record = ZoneRecord::decode(&push).unwrap();
        assert_eq!(record.comfort.to_celsius(), 21.5);
        assert_eq!(record.reduced.to_celsius(), 17.0);
        assert_eq!(record.frost.to_celsius(), 8.0);
        assert_eq!(record.encode(), [165, 120, 30, 0x05, 0x04, 0x00]);
        assert!(ZoneRecord::decode(&push[..5]).is_err());
    }

    #[test]
    fn test_dhw_mode_names() {
        assert_eq!("eco+ horaires".parse::<DhwMode>().unwrap(), DhwMode::EcoPlusScheduled);
        assert_eq!("MAX".parse::<DhwMode>().unwrap(), DhwMode::Max);
        assert!("Inconnu".parse::<DhwMode>().is_err());
        assert_eq!(DhwMode::decode_region(&[0x00, 0xA9]).unwrap(), DhwMode::Stop);
        assert_eq!(DhwMode::Eco.encode_region(), [0x00, 0x09]);
    }

    #[test]
    fn test_satellite_status_layout() {
        let status = SatelliteStatus {
            ambient: Temp16::from_celsius(19.5),
            target: Temp16::from_celsius(20.0),
            mode: 0x05,
            options: 0x04,
        };
        let bytes = status.encode();
        assert_eq!(bytes, [0x00, 0xC3, 0x00, 0xC8, 0x05, 0x04, 0x00, 0x00]);
        assert_eq!(SatelliteStatus::decode(&bytes).unwrap(), status);
    }
}
