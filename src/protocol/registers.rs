//! Boiler memory access
//!
//! Register regions are addressed by a 16-bit address and a length in 16-bit
//! words. Every operation refuses to transmit while the unit is unassociated.

use bytes::Bytes;
use tracing::{debug, info};

use crate::core::{Error, Result};
use crate::network::{Radio, Transport};
use super::frame::{Frame, Header, MessageKind, Region};
use super::state::Device;

/// Zone configuration, full read-back length
pub const ZONE_CONFIG: Region = Region::new(0xA154, 0x18);
/// Zone configuration, part written by a peripheral
pub const ZONE_CONFIG_WRITE: Region = Region::new(0xA154, 0x03);
/// Domestic hot water mode word
pub const DHW_MODE: Region = Region::new(0xA0FC, 0x01);
/// Telemetry block of the default boiler
pub const TELEMETRY: Region = Region::new(0x79E0, 0x1C);
/// Gas consumption counters of the default boiler
pub const CONSUMPTION: Region = Region::new(0x7A18, 0x1C);
/// Boiler clock, six BCD bytes; reconstructed, not confirmed by capture
pub const CLOCK: Region = Region::new(0xA02B, 0x03);
/// Outdoor temperature written by the probe; reconstructed
pub const OUTDOOR_TEMPERATURE: Region = Region::new(0x9C54, 0x01);
/// Satellite status read back by the boiler; reconstructed
pub const SATELLITE_STATUS: Region = Region::new(0xA029, 0x15);
/// Satellite status written by a satellite; reconstructed
pub const SATELLITE_STATUS_WRITE: Region = Region::new(0xA02F, 0x04);

/// Boiler id whose telemetry and consumption blocks are shifted
const SHIFTED_BOILER_ID: u8 = 0x84;
const SHIFT: u16 = 0xC8;

/// Reception slot of exchanges that concern no particular zone
pub const DEFAULT_RECEPTION: u8 = 0x01;

fn shifted(region: Region, boiler_id: u8) -> Region {
    if boiler_id == SHIFTED_BOILER_ID {
        Region::new(region.address + SHIFT, region.words)
    } else {
        region
    }
}

/// Telemetry block for `boiler_id`
pub fn telemetry_region(boiler_id: u8) -> Region {
    shifted(TELEMETRY, boiler_id)
}

/// Consumption block for `boiler_id`
pub fn consumption_region(boiler_id: u8) -> Region {
    shifted(CONSUMPTION, boiler_id)
}

/// Memory scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    /// First address
    pub start: u16,
    /// Number of addresses probed
    pub count: u16,
    /// Address increment, at least 1
    pub step: u16,
    /// Words read at each address
    pub words: u16,
    /// Stop at the first address that answers
    pub stop_on_first: bool,
}

impl ScanRequest {
    /// Largest number of probes in one scan
    pub const MAX_COUNT: u16 = 512;
    /// Largest step between probes
    pub const MAX_STEP: u16 = 256;

    fn validate(&self) -> Result<()> {
        if self.count == 0 || self.count > Self::MAX_COUNT {
            return Err(Error::config(format!("scan count must be 1..={}", Self::MAX_COUNT)));
        }
        if self.step == 0 || self.step > Self::MAX_STEP {
            return Err(Error::config(format!("scan step must be 1..={}", Self::MAX_STEP)));
        }
        if self.words == 0 {
            return Err(Error::config("scan needs at least one word per probe"));
        }
        Ok(())
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordProbe {
    pub address: u16,
    /// Data read, `None` when the boiler did not answer
    pub data: Option<Bytes>,
}

/// Result of a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub probes: Vec<WordProbe>,
}

impl ScanReport {
    /// Probes that returned data
    pub fn answered(&self) -> impl Iterator<Item = &WordProbe> {
        self.probes.iter().filter(|probe| probe.data.is_some())
    }
}

/// Register access for one unit
pub struct Session<'a, R> {
    device: &'a mut Device,
    transport: &'a mut Transport<R>,
    boiler_id: u8,
}

impl<'a, R: Radio> Session<'a, R> {
    pub fn new(device: &'a mut Device, transport: &'a mut Transport<R>, boiler_id: u8) -> Self {
        Session { device, transport, boiler_id }
    }

    /// Reads `words` words at `address`; a short reply is a decode error
    pub async fn read_region(&mut self, address: u16, words: u16) -> Result<Bytes> {
        self.device.require_associated()?;
        let region = Region::new(address, words);
        let header = self.device.header(self.boiler_id, DEFAULT_RECEPTION, MessageKind::Read);
        let reply = self.transport.read(header, region).await?;

        let data = reply.payload();
        if data.len() < region.byte_len() {
            return Err(Error::decode(format!(
                "read of {} returned {} bytes",
                region,
                data.len()
            )));
        }
        Ok(Bytes::copy_from_slice(data))
    }

    /// Writes `payload` to `words` words at `address`
    pub async fn write_region(&mut self, address: u16, words: u16, payload: &[u8]) -> Result<()> {
        let region = Region::new(address, words);
        self.write_with_echo(DEFAULT_RECEPTION, region, region, payload).await?;
        Ok(())
    }

    /// Write naming both the target and the echo region
    pub async fn write_with_echo(
        &mut self,
        reception: u8,
        target: Region,
        echo: Region,
        payload: &[u8],
    ) -> Result<Frame> {
        self.device.require_associated()?;
        let header = self.device.header(self.boiler_id, reception, MessageKind::Init);
        debug!(seq = header.sequence, target = %target, echo = %echo, "write");
        self.transport.write(header, target, echo, payload).await
    }

    /// Answers a frame addressed to this unit
    pub async fn acknowledge(&mut self, request: &Header, payload: &[u8]) -> Result<()> {
        self.device.require_associated()?;
        self.transport.acknowledge(request, payload).await
    }

    /// Reads `count` consecutive single words starting at `start`
    pub async fn read_words(&mut self, start: u16, count: u16) -> Result<Vec<WordProbe>> {
        let report = self
            .scan(ScanRequest { start, count, step: 1, words: 1, stop_on_first: false })
            .await?;
        Ok(report.probes)
    }

    /// Probes a range of addresses; unanswered probes are recorded, not fatal
    pub async fn scan(&mut self, request: ScanRequest) -> Result<ScanReport> {
        request.validate()?;
        self.device.require_associated()?;

        let mut report = ScanReport::default();
        for i in 0..request.count {
            let Some(address) = i
                .checked_mul(request.step)
                .and_then(|offset| request.start.checked_add(offset))
            else {
                break;
            };

            let data = match self.read_region(address, request.words).await {
                Ok(data) => Some(data),
                Err(err) if err.is_transport() || matches!(err, Error::Decode(_)) => None,
                Err(err) => return Err(err),
            };
            let found = data.is_some();
            report.probes.push(WordProbe { address, data });

            if found && request.stop_on_first {
                break;
            }
        }

        info!(probes = report.probes.len(), answered = report.answered().count(), "scan complete");
        Ok(report)
    }
}
