//! Length-prefixed JSON framing for [`Request`] and [`Response`] values.
//!
//! Each frame is a 4-byte big-endian payload length followed by the JSON
//! encoding of one message. The same codec type serves both ends of a
//! connection: the server decodes requests and encodes responses, the client
//! does the reverse.

use super::messages::{Request, Response};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;
use std::marker::PhantomData;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
}

impl From<CodecError> for crate::TidemqError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => crate::TidemqError::Storage(e),
            other => crate::TidemqError::Protocol(other.to_string()),
        }
    }
}

/// Frame codec decoding `D` and encoding `E`
#[derive(Debug)]
pub struct JsonFrameCodec<D, E> {
    max_frame_size: usize,
    _types: PhantomData<fn(E) -> D>,
}

/// Broker side: reads requests, writes responses
pub type ServerCodec = JsonFrameCodec<Request, Response>;
/// Client side: reads responses, writes requests
pub type ClientCodec = JsonFrameCodec<Response, Request>;

impl<D, E> JsonFrameCodec<D, E> {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _types: PhantomData,
        }
    }
}

impl<D, E> Default for JsonFrameCodec<D, E> {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl<D: DeserializeOwned, E> Decoder for JsonFrameCodec<D, E> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, CodecError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        // Peek at the length without consuming
        let frame_len = Cursor::new(src.as_ref()).get_u32() as usize;
        if frame_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: frame_len,
                limit: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX + frame_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(LENGTH_PREFIX);
        let item = serde_json::from_slice(&frame)?;
        Ok(Some(item))
    }
}

impl<D, E: Serialize> Encoder<E> for JsonFrameCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                limit: self.max_frame_size,
            });
        }

        dst.reserve(LENGTH_PREFIX + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        debug!("Encoded frame of {} bytes", payload.len());
        Ok(())
    }
}
