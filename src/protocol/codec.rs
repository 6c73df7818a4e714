//! Newline framing codec for FSCP script streams.
//!
//! Wraps [`tokio_util::codec::AnyDelimiterCodec`] with a fixed maximum frame
//! length so a script that never writes a newline cannot make the host buffer
//! without bound. Each `\n`-terminated frame is one record. Frames are handed
//! out as raw bytes; UTF-8 validation happens in the reader so an invalid
//! record can still be reported and transcribed.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};

use crate::{AppError, Result};

/// Maximum line length accepted on a script's stdout: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for FSCP streams.
///
/// Frames longer than [`MAX_LINE_BYTES`] decode to
/// [`AppError::Protocol`]`("line too long: …")`; I/O failures map to
/// [`AppError::Io`]. A trailing `\r` is stripped.
#[derive(Debug)]
pub struct FscpCodec(AnyDelimiterCodec);

impl FscpCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            Vec::new(),
            MAX_LINE_BYTES,
        ))
    }
}

impl Default for FscpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FscpCodec {
    type Item = Bytes;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0
            .decode(src)
            .map(|frame| frame.map(strip_carriage_return))
            .map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0
            .decode_eof(src)
            .map(|frame| frame.map(strip_carriage_return))
            .map_err(map_codec_error)
    }
}

fn strip_carriage_return(frame: Bytes) -> Bytes {
    match frame.last() {
        Some(b'\r') => frame.slice(..frame.len() - 1),
        _ => frame,
    }
}

fn map_codec_error(e: AnyDelimiterCodecError) -> AppError {
    match e {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        AnyDelimiterCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
