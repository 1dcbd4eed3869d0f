//! Event socket framing
//!
//! A frame is a header block terminated by a blank line, followed by exactly
//! `Content-Length` bytes of body when that header is present. Outbound
//! commands are a single line terminated by a blank line.

use bytes::{BufMut, BytesMut};
use talktime_core::AppError;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::MAX_FRAME_BYTES;
use crate::event::EslEvent;

#[derive(Debug, Error)]
pub enum EslCodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Frame exceeds {0} bytes")]
    FrameTooLarge(usize),
}

impl From<EslCodecError> for AppError {
    fn from(e: EslCodecError) -> Self {
        AppError::EslConnection(e.to_string())
    }
}

#[derive(Debug, Default)]
pub struct EslCodec;

impl EslCodec {
    pub fn new() -> Self {
        Self
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

impl Decoder for EslCodec {
    type Item = EslEvent;
    type Error = EslCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<EslEvent>, EslCodecError> {
        // Stray separators between frames
        let leading = src.iter().take_while(|b| **b == b'\n' || **b == b'\r').count();
        if leading > 0 {
            let _ = src.split_to(leading);
        }

        let Some(end) = header_end(src) else {
            if src.len() > MAX_FRAME_BYTES {
                return Err(EslCodecError::FrameTooLarge(MAX_FRAME_BYTES));
            }
            return Ok(None);
        };

        let head = String::from_utf8_lossy(&src[..end]).replace('\r', "");
        let mut frame = EslEvent::parse(&head);

        let body_len = match frame.get_header("Content-Length") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| EslCodecError::InvalidContentLength(raw.to_string()))?,
            None => 0,
        };

        let total = end + 2 + body_len;
        if total > MAX_FRAME_BYTES {
            return Err(EslCodecError::FrameTooLarge(MAX_FRAME_BYTES));
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let _ = src.split_to(end + 2);
        let body = src.split_to(body_len);
        if body_len > 0 {
            frame.set_body(String::from_utf8_lossy(&body).into_owned());
        }

        Ok(Some(frame))
    }
}

impl Encoder<String> for EslCodec {
    type Error = EslCodecError;

    fn encode(&mut self, command: String, dst: &mut BytesMut) -> Result<(), EslCodecError> {
        let command = command.trim_end();
        dst.reserve(command.len() + 2);
        dst.put_slice(command.as_bytes());
        dst.put_slice(b"\n\n");
        Ok(())
    }
}
