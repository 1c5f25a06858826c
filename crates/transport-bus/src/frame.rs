//! Datagram framing for the UDP domain transport.
//!
//! Layout (big-endian):
//!
//! ```text
//! magic "DSCV" | version u8 | domain u16 | origin guid [16] | topic_len u8 | topic | payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

pub const MAGIC: &[u8; 4] = b"DSCV";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4 + 1 + 2 + 16 + 1;
/// Largest UDP payload that fits an IPv4 datagram.
pub const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub domain: u16,
    pub origin: Uuid,
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("datagram too short ({0} bytes)")]
    Truncated(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported frame version {0}")]
    Version(u8),
    #[error("topic is not utf-8")]
    Topic,
    #[error("topic longer than 255 bytes")]
    TopicTooLong,
    #[error("frame of {0} bytes exceeds datagram limit")]
    TooLarge(usize),
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let topic = self.topic.as_bytes();
        let topic_len = u8::try_from(topic.len()).map_err(|_| FrameError::TopicTooLong)?;
        let total = HEADER_LEN + topic.len() + self.payload.len();
        if total > MAX_DATAGRAM {
            return Err(FrameError::TooLarge(total));
        }
        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u16(self.domain);
        buf.put_slice(self.origin.as_bytes());
        buf.put_u8(topic_len);
        buf.put_slice(topic);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub fn decode(datagram: &[u8]) -> Result<Frame, FrameError> {
        if datagram.len() < HEADER_LEN {
            return Err(FrameError::Truncated(datagram.len()));
        }
        let mut buf = datagram;
        if &buf[..4] != MAGIC {
            return Err(FrameError::BadMagic);
        }
        buf.advance(4);
        let version = buf.get_u8();
        if version != VERSION {
            return Err(FrameError::Version(version));
        }
        let domain = buf.get_u16();
        let mut guid = [0u8; 16];
        buf.copy_to_slice(&mut guid);
        let topic_len = buf.get_u8() as usize;
        if buf.remaining() < topic_len {
            return Err(FrameError::Truncated(datagram.len()));
        }
        let topic = std::str::from_utf8(&buf[..topic_len])
            .map_err(|_| FrameError::Topic)?
            .to_string();
        buf.advance(topic_len);
        Ok(Frame {
            domain,
            origin: Uuid::from_bytes(guid),
            topic,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
