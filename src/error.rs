use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::network::codec::CodecError;
use crate::registry::SimHandle;
use crate::Keyframe;

/// Names the buffer an invariant violation was detected in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// The input command buffer.
    Input,
    /// The sync state buffer.
    Sync,
    /// The auxiliary state buffer.
    Aux,
    /// The debug state buffer.
    Debug,
}

impl Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Sync => write!(f, "sync"),
            Self::Aux => write!(f, "aux"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// This enum contains all errors this library can return.
///
/// Conditions documented as *fatal* indicate corrupted buffers or a broken
/// caller contract. The simulation reports them as critical violations and the
/// host is expected to stop driving the affected simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum NetSimError {
    /// A configuration value was rejected.
    InvalidConfig {
        /// Why the value was rejected.
        info: String,
    },
    /// A buffer entry that must exist was missing. Fatal.
    MissingBufferEntry {
        /// Debug name of the simulation.
        debug_name: String,
        /// The buffer that was missing the entry.
        buffer: BufferKind,
        /// The keyframe that was looked up.
        keyframe: Keyframe,
    },
    /// A replication target was not recognised or is not available. Fatal.
    UnknownReplicationTarget {
        /// The raw target value.
        target: u8,
    },
    /// A dependent was registered twice with the same parent. Fatal.
    DuplicateDependent {
        /// The parent simulation.
        parent: SimHandle,
        /// The dependent simulation.
        dependent: SimHandle,
    },
    /// You made an invalid request, usually by passing a stale handle.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// Serializing or deserializing a replication payload failed.
    Serialization {
        /// Which target and what failed.
        context: String,
    },
}

impl NetSimError {
    /// Returns `true` for conditions the host must treat as fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingBufferEntry { .. }
                | Self::UnknownReplicationTarget { .. }
                | Self::DuplicateDependent { .. }
        )
    }
}

impl Display for NetSimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { info } => write!(f, "Invalid configuration: {}", info),
            Self::MissingBufferEntry {
                debug_name,
                buffer,
                keyframe,
            } => write!(
                f,
                "{}: missing {} buffer entry at keyframe {} (buffer corruption)",
                debug_name, buffer, keyframe
            ),
            Self::UnknownReplicationTarget { target } => {
                write!(f, "Unknown replication target: {}", target)
            },
            Self::DuplicateDependent { parent, dependent } => write!(
                f,
                "Simulation {} is already a dependent of simulation {}",
                dependent, parent
            ),
            Self::InvalidRequest { info } => write!(f, "Invalid request: {}", info),
            Self::Serialization { context } => write!(f, "Serialization error: {}", context),
        }
    }
}

impl Error for NetSimError {}

impl From<CodecError> for NetSimError {
    fn from(err: CodecError) -> Self {
        Self::Serialization {
            context: err.to_string(),
        }
    }
}
