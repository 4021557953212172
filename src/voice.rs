//! Voice receive path.
//!
//! - [`packet`]: RTP header parsing, RTCP and silence detection, header-extension stripping.
//! - [`VoiceReceiver`]: drives a connected UDP socket and forwards decrypted frames over a channel.
//!
//! Encryption is left to the caller through the [`Decryptor`] trait; this module never sees keys.

pub mod packet;
pub mod receiver;

pub use packet::{PacketError, RtpHeader, RtpPacket};
pub use receiver::{DecryptError, Decryptor, ReceiveError, VoiceFrame, VoiceReceiver};
