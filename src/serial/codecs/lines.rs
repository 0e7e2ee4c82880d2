use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::serial::error::SerialPortError;

/// The terminator the autochanger uses in both directions.
pub const CARRIAGE_RETURN: u8 = b'\r';

/// Reassembles the device byte stream into lines.
///
/// Everything up to a read delimiter is one line, delimiter excluded.
/// Other bytes are kept verbatim (including control bytes); cleaning is done
/// by whoever consumes the line. There is no upper bound on line length.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// If provided, which byte to append when writing (encoding) messages.
    /// If `None`, forwards the data as-is.
    write_delimiter: Option<u8>,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8, write_delimiter: Option<u8>) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_delimiter,
        }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(CARRIAGE_RETURN, Some(CARRIAGE_RETURN))
    }
}

impl Decoder for LinesCodec {
    type Item = Vec<u8>;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            let line = src.split_to(actual_position);

            // Discard the delimiter.
            src.advance(1);

            Ok(Some(line[..].to_vec()))
        } else {
            // Only new bytes need looking at next time.
            self.cursor = read_to;

            Ok(None)
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None => {
                if !buf.is_empty() {
                    debug!(
                        "Discarding {} bytes of an unterminated line at end of stream",
                        buf.len()
                    );
                    buf.clear();
                    self.cursor = 0;
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Vec<u8>> for LinesCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);

        if let Some(character) = self.write_delimiter {
            dst.extend_from_slice(&[character]);
        }
        Ok(())
    }
}
