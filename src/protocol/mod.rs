//! Protocol implementation module
//!
//! This module defines the frame layout of the boiler's radio bus, the value
//! encodings and register records carried in frames, per-unit pairing state
//! and register access.

pub mod codec;
pub mod frame;
pub mod records;
pub mod registers;
pub mod state;
pub mod values;

pub use self::codec::{BridgeCodec, BridgePacket};
pub use self::frame::{Body, Frame, Header, MessageKind, Region};
pub use self::records::{ConsumptionRecord, DhwMode, SatelliteStatus, TelemetryRecord, ZoneRecord};
pub use self::registers::{ScanReport, ScanRequest, Session, WordProbe};
pub use self::state::{AssociationState, Device};
pub use self::values::{BcdDate, Pressure16, RawWord, Temp16, Temp8};
