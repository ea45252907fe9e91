//! The keyed buffers owned by a simulation.
//!
//! A simulation keeps four live buffers:
//!
//! - **Input**: commands produced by whichever peer owns input (or synthesized
//!   by a simulated proxy). Input keyframe 0 is a placeholder that is never processed.
//! - **Sync**: the evolving state. `Sync[K] = Update(Sync[K-1], Input[K])`.
//! - **Aux**: auxiliary input state (see [`Simulation::Aux`](crate::Simulation::Aux)).
//! - **Debug**: per-tick diagnostics, allocated only when debug buffers are enabled.
//!
//! [`HistoricBuffers`] are longer append-merged copies of input/sync/aux kept
//! for post-hoc inspection. The live algorithm never reads them.

mod ring_buffer;

pub use ring_buffer::KeyedRingBuffer;

use crate::frame_info::{DebugState, InputFrame};
use crate::{BufferSizes, Simulation};

/// The live buffers of one simulation.
pub struct BufferSet<S: Simulation> {
    /// Input commands.
    pub input: KeyedRingBuffer<InputFrame<S::Input>>,
    /// Sync states.
    pub sync: KeyedRingBuffer<S::Sync>,
    /// Auxiliary states.
    pub aux: KeyedRingBuffer<S::Aux>,
    /// Debug states, `None` when debug buffers are disabled.
    pub debug: Option<KeyedRingBuffer<DebugState>>,
}

impl<S: Simulation> BufferSet<S> {
    /// Allocates buffers with the given sizes.
    #[must_use]
    pub fn new(sizes: &BufferSizes, debug: bool) -> Self {
        Self {
            input: KeyedRingBuffer::with_capacity(sizes.input),
            sync: KeyedRingBuffer::with_capacity(sizes.sync),
            aux: KeyedRingBuffer::with_capacity(sizes.aux),
            debug: debug.then(|| KeyedRingBuffer::with_capacity(sizes.debug)),
        }
    }
}

/// Long-lived mirrors of the input, sync and aux buffers.
pub struct HistoricBuffers<S: Simulation> {
    /// Input history.
    pub input: KeyedRingBuffer<InputFrame<S::Input>>,
    /// Sync history.
    pub sync: KeyedRingBuffer<S::Sync>,
    /// Aux history.
    pub aux: KeyedRingBuffer<S::Aux>,
}

impl<S: Simulation> HistoricBuffers<S> {
    /// Allocates history buffers of `size` entries each.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            input: KeyedRingBuffer::with_capacity(size),
            sync: KeyedRingBuffer::with_capacity(size),
            aux: KeyedRingBuffer::with_capacity(size),
        }
    }

    /// Appends whatever the live buffers hold beyond the current history heads.
    pub fn merge_from(&mut self, live: &BufferSet<S>) {
        self.input.copy_and_merge(&live.input);
        self.sync.copy_and_merge(&live.sync);
        self.aux.copy_and_merge(&live.aux);
    }
}
