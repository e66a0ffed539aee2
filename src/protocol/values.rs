//! Fixed-point encodings of the values exchanged on the wire
//!
//! Every codec is total: NaN and out-of-range inputs map to a documented
//! value instead of panicking.

use chrono::{NaiveDate, NaiveDateTime};

use crate::core::{Error, Result};

/// Setpoint temperature, half-degree steps from 5 °C (code 0) to 30 °C (code 250)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temp8(pub u8);

impl Temp8 {
    /// Lowest encodable setpoint
    pub const MIN: f32 = 5.0;
    /// Highest encodable setpoint
    pub const MAX: f32 = 30.0;

    /// Encodes a temperature. NaN becomes 5 °C and inputs outside 5–30 °C are clamped.
    pub fn from_celsius(value: f32) -> Self {
        let value = if value.is_nan() {
            Self::MIN
        } else {
            value.clamp(Self::MIN, Self::MAX)
        };
        let code = (value * 2.0).round() / 2.0 * 10.0 - 50.0;
        Temp8(code.round() as u8)
    }

    /// Decodes to degrees Celsius
    pub fn to_celsius(self) -> f32 {
        (f32::from(self.0) + 50.0) / 10.0
    }
}

/// Signed temperature in tenths of a degree, big-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temp16(pub i16);

impl Temp16 {
    /// Encodes a temperature, NaN becomes 0
    pub fn from_celsius(value: f32) -> Self {
        if value.is_nan() {
            return Temp16(0);
        }
        Temp16((value * 10.0).round() as i16)
    }

    /// Decodes to degrees Celsius
    pub fn to_celsius(self) -> f32 {
        f32::from(self.0) / 10.0
    }

    /// Reads the value from two big-endian bytes
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Temp16(i16::from_be_bytes(bytes))
    }

    /// Big-endian wire bytes
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

/// Signed pressure in 1/5120 bar, big-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pressure16(pub i16);

impl Pressure16 {
    const SCALE: f32 = 5120.0;

    /// Encodes a pressure in bar, NaN becomes 0
    pub fn from_bar(value: f32) -> Self {
        if value.is_nan() {
            return Pressure16(0);
        }
        Pressure16((value * Self::SCALE).round() as i16)
    }

    /// Decodes to bar
    pub fn to_bar(self) -> f32 {
        f32::from(self.0) / Self::SCALE
    }

    /// Reads the value from two big-endian bytes
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Pressure16(i16::from_be_bytes(bytes))
    }

    /// Big-endian wire bytes
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

/// Unscaled big-endian register word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawWord(pub u16);

impl RawWord {
    /// Reads the word from two big-endian bytes
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        RawWord(u16::from_be_bytes(bytes))
    }

    /// Big-endian wire bytes
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Signed interpretation, used for energy counters
    pub fn as_i16(self) -> i16 {
        self.0 as i16
    }
}

/// Boiler clock: six BCD bytes, yy mm dd hh mm ss, years counted from 2000
pub struct BcdDate;

impl BcdDate {
    /// Encoded size in bytes
    pub const LEN: usize = 6;

    /// Decodes the clock, rejecting non-BCD nibbles and impossible dates
    pub fn decode(bytes: &[u8]) -> Result<NaiveDateTime> {
        if bytes.len() < Self::LEN {
            return Err(Error::decode(format!(
                "clock needs {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }

        let mut fields = [0u32; 6];
        for (field, &byte) in fields.iter_mut().zip(bytes) {
            let (high, low) = (byte >> 4, byte & 0x0F);
            if high > 9 || low > 9 {
                return Err(Error::decode(format!("0x{:02X} is not a BCD byte", byte)));
            }
            *field = u32::from(high) * 10 + u32::from(low);
        }

        let [year, month, day, hour, minute, second] = fields;
        NaiveDate::from_ymd_opt(2000 + year as i32, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .ok_or_else(|| Error::decode(format!("invalid clock value {:?}", fields)))
    }
}

/// Reads the big-endian word at `offset`
pub fn word_at(data: &[u8], offset: usize) -> Result<[u8; 2]> {
    data.get(offset..offset + 2)
        .map(|bytes| [bytes[0], bytes[1]])
        .ok_or_else(|| {
            Error::decode(format!("word at offset {} beyond {} bytes", offset, data.len()))
        })
}
