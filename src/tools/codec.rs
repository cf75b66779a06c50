//! NDJSON codec for tool-server streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized message from a misbehaving tool process cannot
//! exhaust memory. Each `\n`-terminated UTF-8 line is one JSON-RPC message.
//!
//! ```rust,ignore
//! use tokio_util::codec::{FramedRead, FramedWrite};
//! use job_coach::tools::codec::ToolCodec;
//!
//! let inbound = FramedRead::new(child_stdout, ToolCodec::new());
//! let outbound = FramedWrite::new(child_stdin, ToolCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::errors::ToolError;

/// Maximum inbound line length: 4 MiB.
///
/// A `search_jobs` page is a few dozen kilobytes; anything near this limit
/// is a broken server.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// Line codec for JSON-RPC messages exchanged with the tool process.
///
/// Oversized inbound lines fail with
/// [`ToolErrorKind::MalformedResponse`](crate::errors::ToolErrorKind::MalformedResponse);
/// I/O failures map to
/// [`ToolErrorKind::TransportFailure`](crate::errors::ToolErrorKind::TransportFailure).
#[derive(Debug)]
pub struct ToolCodec(LinesCodec);

impl ToolCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for ToolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ToolCodec {
    type Item = String;
    type Error = ToolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, ToolError> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, ToolError> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for ToolCodec {
    type Error = ToolError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), ToolError> {
        // Requests are built locally; only inbound lines are capped.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> ToolError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            ToolError::malformed(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => ToolError::transport(format!("stream error: {io_err}")),
    }
}
