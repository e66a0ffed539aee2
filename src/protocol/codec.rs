use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, NetworkId};

const TAG_FRAME: u8 = 0x01;
const TAG_FILTER: u8 = 0x02;
const TAG_LISTEN: u8 = 0x03;
const TAG_STATUS: u8 = 0x04;

/// Packet exchanged with a radio modem over a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgePacket {
    /// Radio frame, sent to be transmitted or received from the air
    Frame(Bytes),
    /// Network filter to apply
    Filter(NetworkId),
    /// Re-arm reception
    Listen,
    /// Result code reported by the modem, 0 = success
    Status(i16),
}

/// Stream codec for the modem link: `tag(1) len(1) payload(len)`
#[derive(Debug, Clone, Default)]
pub struct BridgeCodec;

impl BridgeCodec {
    /// Creates a new bridge codec
    pub fn new() -> Self {
        BridgeCodec
    }
}

impl Decoder for BridgeCodec {
    type Item = BridgePacket;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let len = usize::from(src[1]);
        if src.len() < 2 + len {
            src.reserve(2 + len - src.len());
            return Ok(None);
        }

        let tag = src[0];
        src.advance(2);
        let payload = src.split_to(len).freeze();

        let packet = match (tag, payload.len()) {
            (TAG_FRAME, _) => BridgePacket::Frame(payload),
            (TAG_FILTER, 4) => {
                BridgePacket::Filter(NetworkId([payload[0], payload[1], payload[2], payload[3]]))
            }
            (TAG_LISTEN, 0) => BridgePacket::Listen,
            (TAG_STATUS, 2) => BridgePacket::Status(i16::from_be_bytes([payload[0], payload[1]])),
            (tag, len) => {
                return Err(Error::decode(format!(
                    "invalid bridge packet tag 0x{:02X} with {} bytes",
                    tag, len
                )))
            }
        };

        Ok(Some(packet))
    }
}

impl Encoder<BridgePacket> for BridgeCodec {
    type Error = Error;

    fn encode(&mut self, item: BridgePacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            BridgePacket::Frame(frame) => {
                let len = u8::try_from(frame.len()).map_err(|_| {
                    Error::protocol(format!("frame of {} bytes does not fit the bridge", frame.len()))
                })?;
                dst.reserve(2 + frame.len());
                dst.put_u8(TAG_FRAME);
                dst.put_u8(len);
                dst.extend_from_slice(&frame);
            }
            BridgePacket::Filter(network) => {
                dst.put_u8(TAG_FILTER);
                dst.put_u8(4);
                dst.extend_from_slice(network.as_bytes());
            }
            BridgePacket::Listen => {
                dst.put_u8(TAG_LISTEN);
                dst.put_u8(0);
            }
            BridgePacket::Status(code) => {
                dst.put_u8(TAG_STATUS);
                dst.put_u8(2);
                dst.put_i16(code);
            }
        }

        Ok(())
    }
}
