//! Binary codec for replication payloads.
//!
//! Every replication record and checksum goes through these functions, so all
//! peers share one bincode configuration and produce identical bytes for
//! identical values.
//!
//! # Examples
//!
//! ```
//! use netsim_model::network::codec::{encode, decode};
//!
//! let data: u32 = 42;
//! let bytes = encode(&data).expect("encoding should succeed");
//! let (decoded, _bytes_read): (u32, _) = decode(&bytes).expect("decoding should succeed");
//! assert_eq!(data, decoded);
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

// Fixed-size integers keep record sizes independent of the values, which keeps
// sync-state checksums comparable across peers.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Direction of a failed codec call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecOperation {
    /// Turning a value into bytes.
    Encode,
    /// Turning bytes back into a value.
    Decode,
}

/// A bincode failure, flattened to its message.
///
/// `offset` is the position inside a replication payload where the failing
/// record started, when the caller knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    /// Which direction failed.
    pub operation: CodecOperation,
    /// Byte offset of the failing record within its payload.
    pub offset: Option<usize>,
    /// The underlying bincode error message.
    pub message: String,
}

impl CodecError {
    fn new(operation: CodecOperation, message: impl fmt::Display) -> Self {
        Self {
            operation,
            offset: None,
            message: message.to_string(),
        }
    }

    /// Records where in the payload the failing record started.
    #[must_use]
    pub fn at_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.operation {
            CodecOperation::Encode => "encoding",
            CodecOperation::Decode => "decoding",
        };
        match self.offset {
            Some(offset) => write!(f, "{verb} failed at byte {offset}: {}", self.message),
            None => write!(f, "{verb} failed: {}", self.message),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a value into a new `Vec<u8>`.
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::new(CodecOperation::Encode, e))
}

/// Appends the encoding of `value` to `buffer`, returning the number of bytes written.
pub fn encode_append<T: Serialize>(value: &T, buffer: &mut Vec<u8>) -> CodecResult<usize> {
    let start_len = buffer.len();
    bincode::serde::encode_into_std_write(value, buffer, config())
        .map(|_| buffer.len() - start_len)
        .map_err(|e| CodecError::new(CodecOperation::Encode, e).at_offset(start_len))
}

/// Decodes a value from the front of `bytes`, returning it with the number of bytes consumed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::new(CodecOperation::Decode, e))
}

/// Decodes a value, ignoring the bytes consumed.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    decode(bytes).map(|(value, _)| value)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::frame_info::InputFrame;
    use crate::{Keyframe, SimTime};

    #[test]
    fn input_frame_survives_encoding() {
        let original = InputFrame::new(SimTime::from_millis(16), [1u8, 2, 3]);
        let bytes = encode(&original).unwrap();
        let (decoded, len): (InputFrame<[u8; 3]>, _) = decode(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(len, bytes.len());
    }

    #[test]
    fn fixed_int_encoding_is_value_independent() {
        let small = encode(&Keyframe::new(1)).unwrap();
        let large = encode(&Keyframe::new(1_000_000)).unwrap();
        assert_eq!(small.len(), large.len());
    }

    #[test]
    fn append_reports_bytes_written() {
        let mut buffer = vec![0xFF];
        let written = encode_append(&7u32, &mut buffer).unwrap();
        assert_eq!(written, 4);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn truncated_input_fails_to_decode() {
        let bytes = encode(&123_456u64).unwrap();
        let result: CodecResult<u64> = decode_value(&bytes[..3]);
        let err = result.unwrap_err();
        assert_eq!(err.operation, CodecOperation::Decode);
        assert_eq!(err.offset, None);
    }

    #[test]
    fn error_display_names_offset() {
        let err = CodecError::new(CodecOperation::Decode, "boom").at_offset(12);
        assert_eq!(err.to_string(), "decoding failed at byte 12: boom");
    }
}
