//! RTP/RTCP datagram inspection.

use bytes::Bytes;

/// Fixed RTP header length; CSRC lists are not used by the voice server.
pub const RTP_HEADER_LEN: usize = 12;

/// Opus frame the server sends while nobody is speaking.
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Profile marker of a one-byte RTP header extension.
const EXTENSION_PROFILE: [u8; 2] = [0xBE, 0xDE];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("datagram of {len} bytes is shorter than an RTP header")]
    TooShort { len: usize },
}

/// RTCP packet types occupy 200..=204 in the second byte, where RTP keeps its payload type.
pub fn is_rtcp(datagram: &[u8]) -> bool {
    datagram.get(1).is_some_and(|kind| (200..=204).contains(kind))
}

pub fn is_silence(payload: &[u8]) -> bool {
    payload == SILENCE_FRAME
}

/// Drop a leading one-byte header extension (`BE DE`, length in 32-bit words) from a decrypted
/// payload. Payloads without one are returned unchanged.
pub fn strip_header_extension(payload: &[u8]) -> &[u8] {
    if payload.len() > 4 && payload[..2] == EXTENSION_PROFILE {
        let words = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        let offset = 4 + words * 4;
        return payload.get(offset..).unwrap_or(&[]);
    }
    payload
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn parse(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < RTP_HEADER_LEN {
            return Err(PacketError::TooShort { len: datagram.len() });
        }
        let word = |at: usize| {
            u32::from_be_bytes([datagram[at], datagram[at + 1], datagram[at + 2], datagram[at + 3]])
        };
        Ok(Self {
            sequence: u16::from_be_bytes([datagram[2], datagram[3]]),
            timestamp: word(4),
            ssrc: word(8),
        })
    }
}

/// An RTP datagram split into its header and (still encrypted) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    raw_header: Bytes,
    payload: Bytes,
}

impl RtpPacket {
    pub fn parse(datagram: Bytes) -> Result<Self, PacketError> {
        let header = RtpHeader::parse(&datagram)?;
        Ok(Self {
            header,
            raw_header: datagram.slice(..RTP_HEADER_LEN),
            payload: datagram.slice(RTP_HEADER_LEN..),
        })
    }

    /// The 12 header bytes as received; decryptors use them as associated data or nonce input.
    pub fn raw_header(&self) -> &[u8] {
        &self.raw_header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
