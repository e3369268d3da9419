//! Newline-delimited framing for the subprocess streams

use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::OutboundCommand;

/// Codec splitting stdout into lines and framing outbound commands
///
/// Decoding strips a trailing `\r`, replaces invalid UTF-8 lossily, and has no
/// line-length limit, so a malformed line never stops the stream. A final line
/// without a newline is delivered at EOF.
#[derive(Debug, Clone, Default)]
pub struct RpcLineCodec {
    /// Bytes already scanned for a newline
    next_index: usize,
}

impl RpcLineCodec {
    /// Create a new codec
    #[must_use]
    pub const fn new() -> Self {
        Self { next_index: 0 }
    }
}

fn into_line(mut frame: BytesMut) -> String {
    if frame.last() == Some(&b'\r') {
        frame.truncate(frame.len() - 1);
    }
    String::from_utf8_lossy(&frame).into_owned()
}

impl Decoder for RpcLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let Some(offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') else {
            self.next_index = buf.len();
            return Ok(None);
        };

        let newline = self.next_index + offset;
        self.next_index = 0;
        let mut frame = buf.split_to(newline + 1);
        frame.truncate(newline);
        Ok(Some(into_line(frame)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let frame = buf.split_to(buf.len());
        Ok(Some(into_line(frame)))
    }
}

impl Encoder<OutboundCommand> for RpcLineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: OutboundCommand, dst: &mut BytesMut) -> Result<(), io::Error> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
