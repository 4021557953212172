//! UDP receive loop for voice data.

use super::packet::{self, RtpPacket};
use crate::{Sleeper, TokioSleeper};
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BUFFER_SIZE: usize = 4096;
const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

pub type DecryptError = Box<dyn std::error::Error + Send + Sync>;

/// Turns an encrypted RTP payload into an Opus frame.
pub trait Decryptor: Send + Sync + fmt::Debug {
    fn decrypt(&self, header: &[u8], payload: &[u8]) -> Result<Vec<u8>, DecryptError>;
}

/// A decrypted audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrame {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("voice socket failed: {0}")]
    Socket(#[from] io::Error),
}

/// Errors worth waiting out rather than giving up on the socket.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
    )
}

/// Reads datagrams from a connected voice socket and forwards decrypted audio frames.
///
/// RTCP packets, malformed datagrams, payloads that fail to decrypt and silence frames are
/// dropped.
#[derive(Debug)]
pub struct VoiceReceiver<D> {
    socket: UdpSocket,
    decryptor: D,
    sleeper: Arc<dyn Sleeper>,
    pause: Duration,
}

impl<D: Decryptor> VoiceReceiver<D> {
    pub fn new(socket: UdpSocket, decryptor: D) -> Self {
        Self { socket, decryptor, sleeper: Arc::new(TokioSleeper), pause: DEFAULT_PAUSE }
    }

    /// How long to wait after a transient socket error.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Turn one datagram into a frame, or `None` if it carries no audio.
    pub fn handle_datagram(&self, datagram: Bytes) -> Option<VoiceFrame> {
        if packet::is_rtcp(&datagram) {
            return None;
        }
        let packet = match RtpPacket::parse(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(target: "bucketwise::voice", error = %err, "dropping malformed datagram");
                return None;
            }
        };
        let decrypted = match self.decryptor.decrypt(packet.raw_header(), packet.payload()) {
            Ok(decrypted) => decrypted,
            Err(err) => {
                debug!(
                    target: "bucketwise::voice",
                    ssrc = packet.header.ssrc, sequence = packet.header.sequence, error = %err,
                    "failed to decrypt voice packet"
                );
                return None;
            }
        };
        let audio = packet::strip_header_extension(&decrypted);
        if packet::is_silence(audio) {
            return None;
        }
        Some(VoiceFrame {
            sequence: packet.header.sequence,
            timestamp: packet.header.timestamp,
            ssrc: packet.header.ssrc,
            data: Bytes::copy_from_slice(audio),
        })
    }

    /// Receive until the consumer hangs up (`Ok`) or the socket fails for good.
    pub async fn run(self, frames: mpsc::Sender<VoiceFrame>) -> Result<(), ReceiveError> {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let received = tokio::select! {
                biased;
                _ = frames.closed() => {
                    debug!(target: "bucketwise::voice", "frame consumer closed; stopping receiver");
                    return Ok(());
                }
                received = self.socket.recv(&mut buffer) => received,
            };

            let len = match received {
                Ok(len) => len,
                Err(err) if is_transient(&err) => {
                    warn!(
                        target: "bucketwise::voice",
                        error = %err, pause_ms = self.pause.as_millis() as u64,
                        "transient voice socket error; pausing"
                    );
                    self.sleeper.sleep(self.pause).await;
                    continue;
                }
                Err(err) => {
                    warn!(target: "bucketwise::voice", error = %err, "voice socket failed");
                    return Err(err.into());
                }
            };

            let Some(frame) = self.handle_datagram(Bytes::copy_from_slice(&buffer[..len])) else {
                continue;
            };
            if frames.send(frame).await.is_err() {
                return Ok(());
            }
        }
    }
}
