//! The serialization context handed to replicators.
//!
//! A [`NetArchive`] is either *saving* (the local replicator writes what it wants
//! to send) or *loading* (the local replicator reads what the remote peer sent).
//! Replicators write and read the same sequence of records, so one
//! `net_serialize` implementation covers both directions.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::NetSimError;
use crate::network::codec;

enum ArchiveMode<'a> {
    Saving { buffer: Vec<u8> },
    Loading { bytes: &'a [u8], cursor: usize },
}

/// Bidirectional record stream used by `NetSerializeProxy`.
///
/// # Examples
///
/// ```
/// use netsim_model::NetArchive;
///
/// let mut out = NetArchive::saving();
/// out.write(&7u32).unwrap();
/// out.write(&"hello").unwrap();
/// let bytes = out.into_bytes();
///
/// let mut input = NetArchive::loading(&bytes);
/// assert_eq!(input.read::<u32>().unwrap(), 7);
/// assert_eq!(input.read::<String>().unwrap(), "hello");
/// assert_eq!(input.remaining(), 0);
/// ```
pub struct NetArchive<'a> {
    mode: ArchiveMode<'a>,
}

impl NetArchive<'static> {
    /// Creates an empty archive for writing.
    #[must_use]
    pub fn saving() -> Self {
        Self {
            mode: ArchiveMode::Saving { buffer: Vec::new() },
        }
    }
}

impl<'a> NetArchive<'a> {
    /// Creates an archive that reads records from `bytes`.
    #[must_use]
    pub fn loading(bytes: &'a [u8]) -> Self {
        Self {
            mode: ArchiveMode::Loading { bytes, cursor: 0 },
        }
    }

    /// Returns `true` if this archive collects outgoing records.
    #[must_use]
    pub fn is_saving(&self) -> bool {
        matches!(self.mode, ArchiveMode::Saving { .. })
    }

    /// Returns `true` if this archive reads incoming records.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        !self.is_saving()
    }

    /// Appends a record.
    ///
    /// # Errors
    /// Returns [`NetSimError::InvalidRequest`] on a loading archive, or
    /// [`NetSimError::Serialization`] if encoding fails.
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), NetSimError> {
        match &mut self.mode {
            ArchiveMode::Saving { buffer } => {
                codec::encode_append(value, buffer)?;
                Ok(())
            },
            ArchiveMode::Loading { .. } => Err(NetSimError::InvalidRequest {
                info: "cannot write to a loading archive".to_owned(),
            }),
        }
    }

    /// Reads the next record.
    ///
    /// # Errors
    /// Returns [`NetSimError::InvalidRequest`] on a saving archive, or
    /// [`NetSimError::Serialization`] if the bytes do not decode.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, NetSimError> {
        match &mut self.mode {
            ArchiveMode::Loading { bytes, cursor } => {
                let rest = bytes.get(*cursor..).unwrap_or_default();
                let (value, consumed) =
                    codec::decode::<T>(rest).map_err(|e| e.at_offset(*cursor))?;
                *cursor += consumed;
                Ok(value)
            },
            ArchiveMode::Saving { .. } => Err(NetSimError::InvalidRequest {
                info: "cannot read from a saving archive".to_owned(),
            }),
        }
    }

    /// Bytes not yet read (loading) or written so far (saving).
    #[must_use]
    pub fn remaining(&self) -> usize {
        match &self.mode {
            ArchiveMode::Loading { bytes, cursor } => bytes.len().saturating_sub(*cursor),
            ArchiveMode::Saving { buffer } => buffer.len(),
        }
    }

    /// Consumes the archive and returns the written bytes. Loading archives return an empty vector.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self.mode {
            ArchiveMode::Saving { buffer } => buffer,
            ArchiveMode::Loading { .. } => Vec::new(),
        }
    }
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

    #[test]
    fn direction_is_reported() {
        assert!(NetArchive::saving().is_saving());
        assert!(NetArchive::loading(&[]).is_loading());
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let mut saving = NetArchive::saving();
        assert!(matches!(
            saving.read::<u32>(),
            Err(NetSimError::InvalidRequest { .. })
        ));
        let mut loading = NetArchive::loading(&[]);
        assert!(matches!(
            loading.write(&1u32),
            Err(NetSimError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn reading_past_end_is_a_serialization_error() {
        let mut out = NetArchive::saving();
        out.write(&1u16).unwrap();
        let bytes = out.into_bytes();
        let mut input = NetArchive::loading(&bytes);
        assert_eq!(input.read::<u16>().unwrap(), 1);
        assert!(matches!(
            input.read::<u16>(),
            Err(NetSimError::Serialization { .. })
        ));
    }
}
