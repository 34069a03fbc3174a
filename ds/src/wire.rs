//! Line-delimited JSON framing: one [`Envelope`] per line.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

use crate::{envelope::Envelope, DeliveryServiceError};

/// Longest accepted line, in bytes.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Debug)]
pub struct EnvelopeCodec {
    lines: LinesCodec,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = DeliveryServiceError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, Self::Error> {
        match self.lines.decode(src)? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, Self::Error> {
        match self.lines.decode_eof(src)? {
            Some(line) if !line.trim().is_empty() => Ok(Some(serde_json::from_str(&line)?)),
            _ => Ok(None),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = DeliveryServiceError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_string(&item)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}
