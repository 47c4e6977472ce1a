//! Line-framed JSON codec for the supervisor/worker control channel.
//!
//! One JSON object per line, matching the framing Node-style IPC channels
//! use. Works over any AsyncRead/AsyncWrite (child stdio, in-memory duplex).

use std::io;
use std::marker::PhantomData;

use bytes::BytesMut;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Control messages are small; anything bigger is a corrupted stream.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Codec that frames messages as newline-terminated JSON documents.
pub struct JsonLinesCodec<T> {
    inner: LinesCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonLinesCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            _phantom: PhantomData,
        }
    }

    fn parse(line: &str) -> Result<T, io::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn into_io_error(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => io::Error::new(
            io::ErrorKind::InvalidData,
            "control message exceeds maximum line length",
        ),
    }
}

impl<T: DeserializeOwned> Decoder for JsonLinesCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.inner.decode(src).map_err(into_io_error)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Self::parse(&line).map(Some),
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.inner.decode_eof(src).map_err(into_io_error)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Self::parse(&line).map(Some),
                None => return Ok(None),
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonLinesCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding control frame");
        self.inner.encode(json, dst).map_err(into_io_error)
    }
}
