//! TCP bearer and MUX segment framing

use byteorder::{ByteOrder, NetworkEndian};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::Instant;
use tracing::{error, trace};

const HEADER_LEN: usize = 8;

/// Largest payload a single MUX segment may carry
pub const MAX_SEGMENT_PAYLOAD_LENGTH: usize = 12_288;

pub type Timestamp = u32;

pub type Payload = Vec<u8>;

/// 16-bit protocol field of a segment header: mode bit (MSB) plus the
/// 15-bit mini-protocol number
pub type Protocol = u16;

/// Bit flagging a frame as sent by the responder side
pub const RESPONDER_BIT: Protocol = 0x8000;

#[derive(Debug)]
pub struct Header {
    pub protocol: Protocol,
    pub timestamp: Timestamp,
    pub payload_len: u16,
}

impl Header {
    /// Mini-protocol number without the mode bit
    pub fn protocol_id(&self) -> u16 {
        self.protocol & !RESPONDER_BIT
    }

    /// True when the sender acted as responder
    pub fn is_responder(&self) -> bool {
        self.protocol & RESPONDER_BIT != 0
    }
}

impl From<&[u8]> for Header {
    fn from(value: &[u8]) -> Self {
        let timestamp = NetworkEndian::read_u32(&value[0..4]);
        let protocol = NetworkEndian::read_u16(&value[4..6]);
        let payload_len = NetworkEndian::read_u16(&value[6..8]);

        Self {
            timestamp,
            protocol,
            payload_len,
        }
    }
}

impl From<Header> for [u8; 8] {
    fn from(value: Header) -> Self {
        let mut out = [0u8; 8];
        NetworkEndian::write_u32(&mut out[0..4], value.timestamp);
        NetworkEndian::write_u16(&mut out[4..6], value.protocol);
        NetworkEndian::write_u16(&mut out[6..8], value.payload_len);

        out
    }
}

pub enum Bearer {
    Tcp(TcpStream),
}

const BUFFER_LEN: usize = 1024 * 10;

impl Bearer {
    pub async fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self, tokio::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::Tcp(stream))
    }

    pub async fn accept_tcp(listener: &TcpListener) -> tokio::io::Result<(Self, SocketAddr)> {
        let (stream, addr) = listener.accept().await?;
        Ok((Self::Tcp(stream), addr))
    }

    pub async fn readable(&self) -> tokio::io::Result<()> {
        match self {
            Bearer::Tcp(x) => x.readable().await,
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> tokio::io::Result<usize> {
        match self {
            Bearer::Tcp(x) => x.try_read(buf),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> tokio::io::Result<()> {
        match self {
            Bearer::Tcp(x) => x.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> tokio::io::Result<()> {
        match self {
            Bearer::Tcp(x) => x.flush().await,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no data available in bearer to complete segment")]
    EmptyBearer,

    #[error("bearer I/O error")]
    BearerIo(#[source] tokio::io::Error),

    #[error("outbound payload exceeds the segment limit")]
    PayloadTooLarge,
}

pub struct SegmentBuffer(Bearer, Vec<u8>);

impl SegmentBuffer {
    pub fn new(bearer: Bearer) -> Self {
        Self(bearer, Vec::with_capacity(BUFFER_LEN))
    }

    /// Cancel-safe loop that reads from the bearer until a certain len
    async fn cancellable_read(&mut self, required: usize) -> Result<(), Error> {
        loop {
            self.0.readable().await.map_err(Error::BearerIo)?;

            let remaining = required - self.1.len();
            let mut buf = vec![0u8; remaining];

            match self.0.try_read(&mut buf) {
                Ok(0) => {
                    error!("empty bearer");
                    break Err(Error::EmptyBearer);
                }
                Ok(n) => {
                    trace!(n, "found data on bearer");
                    self.1.extend_from_slice(&buf[0..n]);

                    if self.1.len() >= required {
                        break Ok(());
                    }
                }
                Err(ref e) if e.kind() == tokio::io::ErrorKind::WouldBlock => {
                    continue;
                }
                Err(err) => {
                    error!(?err, "bearer IO error");
                    break Err(Error::BearerIo(err));
                }
            }
        }
    }

    /// Peek the available data in search for a frame header
    async fn peek_header(&mut self) -> Result<Header, Error> {
        self.cancellable_read(HEADER_LEN).await?;
        let header = &self.1[..HEADER_LEN];

        Ok(Header::from(header))
    }

    /// Cancel-safe read of a full segment from the bearer
    pub async fn read_segment(&mut self) -> Result<(Protocol, Payload), Error> {
        let header = self.peek_header().await?;

        let segment_size = HEADER_LEN + header.payload_len as usize;
        self.cancellable_read(segment_size).await?;

        let segment = self.1.drain(..segment_size);
        let payload = segment.skip(HEADER_LEN).collect();

        Ok((header.protocol, payload))
    }

    pub async fn write_segment(
        &mut self,
        protocol: Protocol,
        clock: &Instant,
        payload: &[u8],
    ) -> Result<(), Error> {
        if payload.len() > MAX_SEGMENT_PAYLOAD_LENGTH {
            return Err(Error::PayloadTooLarge);
        }

        let header = Header {
            protocol,
            timestamp: clock.elapsed().as_micros() as u32,
            payload_len: payload.len() as u16,
        };

        let buf: [u8; 8] = header.into();
        self.0.write_all(&buf).await.map_err(Error::BearerIo)?;
        self.0.write_all(payload).await.map_err(Error::BearerIo)?;

        self.0.flush().await.map_err(Error::BearerIo)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_keeps_mode_bit() {
        let header = Header {
            protocol: 2 | RESPONDER_BIT,
            timestamp: 123_456,
            payload_len: 99,
        };

        let raw: [u8; 8] = header.into();
        let back = Header::from(&raw[..]);

        assert_eq!(back.protocol, 2 | RESPONDER_BIT);
        assert_eq!(back.protocol_id(), 2);
        assert!(back.is_responder());
        assert_eq!(back.timestamp, 123_456);
        assert_eq!(back.payload_len, 99);
    }

    #[test]
    fn initiator_frames_leave_mode_bit_clear() {
        let header = Header {
            protocol: 3,
            timestamp: 0,
            payload_len: 0,
        };

        let raw: [u8; 8] = header.into();
        let back = Header::from(&raw[..]);

        assert!(!back.is_responder());
        assert_eq!(back.protocol_id(), 3);
    }
}
