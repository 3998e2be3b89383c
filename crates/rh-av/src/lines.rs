//! Line splitting for process output.
//!
//! ffmpeg rewrites its status line in place with `\r`, so a plain
//! newline splitter would only see one huge line per run. [`LineCodec`]
//! treats either byte as a terminator and skips the empty token produced by
//! `\r\n`.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Longest line buffered before it is flushed without a terminator.
const DEFAULT_MAX_LENGTH: usize = 64 * 1024;

/// Decoder yielding lines split on `\r` or `\n`, decoded as lossy UTF-8.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn is_terminator(b: &u8) -> bool {
    *b == b'\n' || *b == b'\r'
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let Some(pos) = buf.iter().position(is_terminator) else {
                if buf.len() >= self.max_length {
                    let chunk = buf.split_to(self.max_length);
                    return Ok(Some(String::from_utf8_lossy(&chunk).into_owned()));
                }
                return Ok(None);
            };

            let line = buf.split_to(pos + 1);
            if pos == 0 {
                continue;
            }
            return Ok(Some(String::from_utf8_lossy(&line[..pos]).into_owned()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}
