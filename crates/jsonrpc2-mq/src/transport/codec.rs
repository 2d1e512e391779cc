//! Length-prefixed multipart framing for stream transports
//!
//! ```text
//! u32 BE  body length
//! u32 BE  part count
//! repeated: u32 BE part length, part bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::Multipart;
use crate::error::TransportError;

/// Maximum body size of one message (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const LEN_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct MultipartCodec {
    max_message_size: usize,
}

impl MultipartCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for MultipartCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

fn read_len(buf: &mut Bytes) -> Result<usize, TransportError> {
    if buf.remaining() < LEN_SIZE {
        return Err(TransportError::Protocol("truncated length field".to_string()));
    }
    Ok(buf.get_u32() as usize)
}

impl Decoder for MultipartCodec {
    type Item = Multipart;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; LEN_SIZE];
        header.copy_from_slice(&src[..LEN_SIZE]);
        let body_len = u32::from_be_bytes(header) as usize;

        if body_len > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body_len,
                max: self.max_message_size,
            });
        }

        if src.len() < LEN_SIZE + body_len {
            src.reserve(LEN_SIZE + body_len - src.len());
            return Ok(None);
        }

        src.advance(LEN_SIZE);
        let mut body = src.split_to(body_len).freeze();

        let count = read_len(&mut body)?;
        let mut parts = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let len = read_len(&mut body)?;
            if body.remaining() < len {
                return Err(TransportError::Protocol("truncated message part".to_string()));
            }
            parts.push(body.split_to(len));
        }

        if body.has_remaining() {
            return Err(TransportError::Protocol(format!(
                "{} trailing bytes after message parts",
                body.remaining()
            )));
        }

        Ok(Some(parts))
    }
}

impl Encoder<Multipart> for MultipartCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Multipart, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = LEN_SIZE + item.iter().map(|p| LEN_SIZE + p.len()).sum::<usize>();
        if body_len > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body_len,
                max: self.max_message_size,
            });
        }

        dst.reserve(LEN_SIZE + body_len);
        dst.put_u32(body_len as u32);
        dst.put_u32(item.len() as u32);
        for part in &item {
            dst.put_u32(part.len() as u32);
            dst.put_slice(part);
        }
        Ok(())
    }
}
