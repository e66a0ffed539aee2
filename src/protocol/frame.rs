use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::{Error, Result};

/// Size of the addressing header that starts every frame
pub const HEADER_LEN: usize = 6;

/// Bit of the reception field marking a reply
pub const ACK_FLAG: u8 = 0x80;

/// Largest payload a single length byte can announce
pub const MAX_DATA_LEN: usize = u8::MAX as usize;

/// Message kind carried in the last header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Memory write ("init"), carries two regions and data
    Init,
    /// Memory read ("ask") and its response
    Read,
    /// Association request, reply or announcement
    Association,
    /// Anything this stack does not interpret
    Other(u8),
}

impl MessageKind {
    /// Decodes a kind byte
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x17 => MessageKind::Init,
            0x03 => MessageKind::Read,
            0x41 => MessageKind::Association,
            other => MessageKind::Other(other),
        }
    }

    /// Wire value
    pub fn as_u8(self) -> u8 {
        match self {
            MessageKind::Init => 0x17,
            MessageKind::Read => 0x03,
            MessageKind::Association => 0x41,
            MessageKind::Other(value) => value,
        }
    }
}

/// The 6-byte addressing header
///
/// ```text
/// +------+------+-------+-----+-----------+------+
/// | Dest | Src  | Assoc | Seq | Reception | Kind |
/// +------+------+-------+-----+-----------+------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Destination unit id
    pub destination: u8,
    /// Source unit id
    pub source: u8,
    /// Association id of the pairing the exchange belongs to
    pub association: u8,
    /// Message sequence number, one per logical exchange
    pub sequence: u8,
    /// Zone/unit selector, bit 7 set on replies
    pub reception: u8,
    /// Message kind
    pub kind: MessageKind,
}

impl Header {
    /// Creates a header
    pub fn new(
        destination: u8,
        source: u8,
        association: u8,
        sequence: u8,
        reception: u8,
        kind: MessageKind,
    ) -> Self {
        Header { destination, source, association, sequence, reception, kind }
    }

    /// Whether this frame answers another one
    pub fn is_ack(&self) -> bool {
        self.reception & ACK_FLAG != 0
    }

    /// Reception field without the acknowledgment flag
    pub fn slot(&self) -> u8 {
        self.reception & !ACK_FLAG
    }

    /// Header of the reply to this frame: peers swapped, ack flag set
    pub fn reply(&self) -> Header {
        Header {
            destination: self.source,
            source: self.destination,
            reception: self.reception | ACK_FLAG,
            ..*self
        }
    }

    /// Whether this header is the reply correlated with `request`
    pub fn answers(&self, request: &Header) -> bool {
        self.is_ack()
            && self.source == request.destination
            && self.destination == request.source
            && self.sequence == request.sequence
            && self.kind == request.kind
    }

    /// Appends the header to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.destination);
        dst.put_u8(self.source);
        dst.put_u8(self.association);
        dst.put_u8(self.sequence);
        dst.put_u8(self.reception);
        dst.put_u8(self.kind.as_u8());
    }

    /// Reads the header from the start of `src`
    pub fn decode(src: &[u8]) -> Result<Header> {
        if src.len() < HEADER_LEN {
            return Err(Error::decode(format!(
                "frame of {} bytes is shorter than the {}-byte header",
                src.len(),
                HEADER_LEN
            )));
        }
        Ok(Header {
            destination: src[0],
            source: src[1],
            association: src[2],
            sequence: src[3],
            reception: src[4],
            kind: MessageKind::from_u8(src[5]),
        })
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}->{:02X} assoc={:02X} seq={:02X} slot={:02X}{} kind={:?}",
            self.source,
            self.destination,
            self.association,
            self.sequence,
            self.slot(),
            if self.is_ack() { " ack" } else { "" },
            self.kind
        )
    }
}

/// A boiler memory region, length counted in 16-bit words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Start address
    pub address: u16,
    /// Length in words
    pub words: u16,
}

impl Region {
    /// Creates a region
    pub const fn new(address: u16, words: u16) -> Self {
        Region { address, words }
    }

    /// Length in bytes
    pub fn byte_len(&self) -> usize {
        usize::from(self.words) * 2
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.address);
        dst.put_u16(self.words);
    }

    fn decode(src: &mut &[u8]) -> Result<Region> {
        if src.remaining() < 4 {
            return Err(Error::decode(format!(
                "region needs 4 bytes, {} left",
                src.remaining()
            )));
        }
        Ok(Region { address: src.get_u16(), words: src.get_u16() })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}+{}w", self.address, self.words)
    }
}

/// Frame body, shape selected by kind and ack flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Read request: the region to read
    ReadRequest(Region),
    /// Write request: target region, echo region and the data written
    Write {
        /// Region the write addresses
        target: Region,
        /// Second region of the request, read back by the boiler
        echo: Region,
        /// Data bytes
        data: Bytes,
    },
    /// Length-prefixed data (replies, association frames)
    Data(Bytes),
    /// Uninterpreted bytes following the header of an unknown kind
    Raw(Bytes),
}

/// A complete radio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Addressing header
    pub header: Header,
    /// Body
    pub body: Body,
}

impl Frame {
    /// Builds a read request
    pub fn read_request(header: Header, region: Region) -> Self {
        Frame { header, body: Body::ReadRequest(region) }
    }

    /// Builds a write request
    pub fn write(header: Header, target: Region, echo: Region, data: impl Into<Bytes>) -> Self {
        Frame { header, body: Body::Write { target, echo, data: data.into() } }
    }

    /// Builds a frame with a length-prefixed body
    pub fn data(header: Header, data: impl Into<Bytes>) -> Self {
        Frame { header, body: Body::Data(data.into()) }
    }

    /// Payload bytes; empty for read requests
    pub fn payload(&self) -> &[u8] {
        match &self.body {
            Body::ReadRequest(_) => &[],
            Body::Write { data, .. } | Body::Data(data) | Body::Raw(data) => data,
        }
    }

    /// Serializes the frame
    pub fn encode(&self) -> Result<BytesMut> {
        let mut dst = BytesMut::with_capacity(HEADER_LEN + 9 + self.payload().len());
        self.header.encode(&mut dst);

        match &self.body {
            Body::ReadRequest(region) => region.encode(&mut dst),
            Body::Write { target, echo, data } => {
                target.encode(&mut dst);
                echo.encode(&mut dst);
                put_length_prefixed(&mut dst, data)?;
            }
            Body::Data(data) => put_length_prefixed(&mut dst, data)?,
            Body::Raw(data) => dst.extend_from_slice(data),
        }

        Ok(dst)
    }

    /// Parses a frame, failing on any truncation
    pub fn decode(src: &[u8]) -> Result<Frame> {
        let header = Header::decode(src)?;
        let mut rest = &src[HEADER_LEN..];

        let body = match (header.kind, header.is_ack()) {
            (MessageKind::Read, false) => Body::ReadRequest(Region::decode(&mut rest)?),
            (MessageKind::Init, false) => {
                let target = Region::decode(&mut rest)?;
                let echo = Region::decode(&mut rest)?;
                Body::Write { target, echo, data: get_length_prefixed(&mut rest)? }
            }
            (MessageKind::Other(_), _) => Body::Raw(Bytes::copy_from_slice(rest)),
            _ => Body::Data(get_length_prefixed(&mut rest)?),
        };

        Ok(Frame { header, body })
    }
}

fn put_length_prefixed(dst: &mut BytesMut, data: &[u8]) -> Result<()> {
    if data.len() > MAX_DATA_LEN {
        return Err(Error::protocol(format!(
            "payload of {} bytes exceeds {} bytes",
            data.len(),
            MAX_DATA_LEN
        )));
    }
    dst.put_u8(data.len() as u8);
    dst.extend_from_slice(data);
    Ok(())
}

fn get_length_prefixed(src: &mut &[u8]) -> Result<Bytes> {
    if !src.has_remaining() {
        return Err(Error::decode("missing payload length byte"));
    }
    let len = usize::from(src.get_u8());
    if src.remaining() < len {
        return Err(Error::decode(format!(
            "payload declares {} bytes, {} present",
            len,
            src.remaining()
        )));
    }
    Ok(src.copy_to_bytes(len))
}
