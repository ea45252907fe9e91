use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Keyframe, SimTime};

/// An input command together with the simulation time it advances.
///
/// The user command is produced by the owning peer (or synthesized by a
/// simulated proxy); the frame delta time is stamped by the simulation when the
/// command is written. Input commands are immutable once written.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing.
/// It is not part of the stable public API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFrame<I> {
    /// Simulation time consumed when this command is processed.
    pub frame_delta_time: SimTime,
    /// The command given by the user.
    pub cmd: I,
}

impl<I> InputFrame<I> {
    /// Creates a new input frame.
    pub fn new(frame_delta_time: SimTime, cmd: I) -> Self {
        Self {
            frame_delta_time,
            cmd,
        }
    }
}

/// Per-tick diagnostic snapshot.
///
/// Recorded only when debug buffers are enabled. Never read by the simulation itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugState {
    /// The host frame delta this tick was given.
    pub local_delta_time_seconds: f32,
    /// The host frame number passed into the tick.
    pub local_frame_number: u64,
    /// Input keyframes consumed during this tick.
    pub processed_keyframes: SmallVec<[Keyframe; 4]>,
    /// Newest input keyframe received from the remote peer before this tick.
    pub last_received_input_keyframe: Keyframe,
    /// Newest keyframe serialized to the remote peer after this tick.
    pub last_sent_input_keyframe: Keyframe,
    /// `LastProcessedInputKeyframe` at the end of the tick.
    pub last_processed_keyframe: Keyframe,
    /// Input buffer head at the end of the tick.
    pub head_keyframe: Keyframe,
    /// Budget left unconsumed at the end of the tick.
    pub remaining_allowed_simulation_time_seconds: f32,
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
    fn default_input_frame_has_zero_delta() {
        let frame: InputFrame<u8> = InputFrame::default();
        assert_eq!(frame.frame_delta_time, SimTime::ZERO);
        assert_eq!(frame.cmd, 0);
    }

    #[test]
    fn debug_state_collects_keyframes_inline() {
        let mut state = DebugState::default();
        for k in 1..=4 {
            state.processed_keyframes.push(Keyframe::new(k));
        }
        assert!(!state.processed_keyframes.spilled());
        assert_eq!(state.processed_keyframes.len(), 4);
    }
}
