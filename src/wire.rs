// wire.rs - Datagram framing for the URFT protocol
use byteorder::{BigEndian, ByteOrder};

/// Maximum payload carried by a single data packet.
pub const CHUNK_SIZE: usize = 1024;
/// Upper bound on any datagram this protocol sends or accepts.
pub const MAX_DATAGRAM: usize = 4096;
/// Data packets carry two big-endian u32 fields: sequence number and total count.
pub const DATA_HEADER_SIZE: usize = 8;
/// An ACK is exactly one big-endian u32: the sequence number being acknowledged.
pub const ACK_SIZE: usize = 4;

/// Control tokens exchanged outside the data stream, as ASCII literals.
pub const HEADER_ACK: &[u8] = b"HEADER_ACK";
pub const RTT_PROBE: &[u8] = b"RTT_PROBE";
pub const RTT_ACK: &[u8] = b"RTT_ACK";

/// Errors raised by the framing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Datagram too small or otherwise undecodable. Dropped without an ACK.
    Malformed,
    /// File name that cannot be carried in the textual header.
    InvalidName(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Malformed => write!(f, "malformed datagram"),
            WireError::InvalidName(name) => {
                write!(f, "file name {:?} cannot be carried in a header", name)
            }
        }
    }
}

impl std::error::Error for WireError {}

/// A decoded data packet. The payload borrows from the receive buffer.
///
/// A packet whose sequence number equals its total count is the termination
/// marker and carries no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket<'a> {
    pub seq: u32,
    pub total: u32,
    pub payload: &'a [u8],
}

/// Frame a data packet: `seq:u32 | total:u32 | payload`, big-endian fields.
pub fn encode_data(seq: u32, total: u32, payload: &[u8]) -> Vec<u8> {
    let mut header = [0u8; DATA_HEADER_SIZE];
    BigEndian::write_u32(&mut header[0..4], seq);
    BigEndian::write_u32(&mut header[4..8], total);

    let mut datagram = Vec::with_capacity(DATA_HEADER_SIZE + payload.len());
    datagram.extend_from_slice(&header);
    datagram.extend_from_slice(payload);
    datagram
}

/// Decode a data packet, failing if the datagram cannot hold the header.
pub fn decode_data(datagram: &[u8]) -> Result<DataPacket<'_>, WireError> {
    if datagram.len() < DATA_HEADER_SIZE {
        return Err(WireError::Malformed);
    }
    Ok(DataPacket {
        seq: BigEndian::read_u32(&datagram[0..4]),
        total: BigEndian::read_u32(&datagram[4..8]),
        payload: &datagram[DATA_HEADER_SIZE..],
    })
}

/// Frame an acknowledgment for `seq`.
pub fn encode_ack(seq: u32) -> [u8; ACK_SIZE] {
    let mut ack = [0u8; ACK_SIZE];
    BigEndian::write_u32(&mut ack, seq);
    ack
}

/// Decode an acknowledgment. ACKs are exactly four bytes.
pub fn decode_ack(datagram: &[u8]) -> Result<u32, WireError> {
    if datagram.len() != ACK_SIZE {
        return Err(WireError::Malformed);
    }
    Ok(BigEndian::read_u32(datagram))
}

/// The textual header announcing a transfer: `name:size[:hexdigest]`.
///
/// The digest is optional for compatibility with peers that never learned to
/// send one; such transfers are verified by size alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    name: String,
    size: u64,
    digest: Option<String>,
}

impl FileHeader {
    /// Build a header, rejecting names the colon-delimited format cannot
    /// carry (and path-like names a receiver must not trust).
    pub fn new(name: String, size: u64, digest: Option<String>) -> Result<Self, WireError> {
        if !valid_name(&name) {
            return Err(WireError::InvalidName(name));
        }
        Ok(Self { name, size, digest })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Number of chunks the announced size splits into.
    pub fn total_chunks(&self) -> u64 {
        self.size.div_ceil(CHUNK_SIZE as u64)
    }

    pub fn encode(&self) -> Vec<u8> {
        let text = match &self.digest {
            Some(digest) => format!("{}:{}:{}", self.name, self.size, digest),
            None => format!("{}:{}", self.name, self.size),
        };
        text.into_bytes()
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(datagram).map_err(|_| WireError::Malformed)?;
        let fields: Vec<&str> = text.split(':').collect();
        if fields.len() < 2 || fields.len() > 3 {
            return Err(WireError::Malformed);
        }

        let name = fields[0];
        if !valid_name(name) {
            return Err(WireError::Malformed);
        }
        let size: u64 = fields[1].parse().map_err(|_| WireError::Malformed)?;
        // An empty third field is treated the same as no digest at all.
        let digest = fields
            .get(2)
            .filter(|d| !d.is_empty())
            .map(|d| d.to_string());

        Ok(Self {
            name: name.to_string(),
            size,
            digest,
        })
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(&[':', '/', '\\'][..])
}
