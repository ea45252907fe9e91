use crate::buffers::{BufferSet, KeyedRingBuffer};
use crate::error::NetSimError;
use crate::{Keyframe, NetArchive, Simulation};

use super::{load_sequence, save_sequence, ProxyContext, ProxyReplicator};

/// Replicates the newest few sync states for replay recording.
///
/// The sender writes its last `length` sync states every time; the receiver
/// keeps them in a buffer of the same length, ignoring ones it already has.
#[derive(Debug, Clone)]
pub(crate) struct SequenceReplicator<T> {
    length: usize,
    received: KeyedRingBuffer<T>,
    last_serialized_keyframe: Keyframe,
}

impl<T: Default> SequenceReplicator<T> {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            received: KeyedRingBuffer::with_capacity(length),
            last_serialized_keyframe: Keyframe::NULL,
        }
    }
}

impl<T> SequenceReplicator<T> {
    pub fn received(&self) -> &KeyedRingBuffer<T> {
        &self.received
    }
}

impl<S: Simulation> ProxyReplicator<S> for SequenceReplicator<S::Sync> {
    fn net_serialize(
        &mut self,
        archive: &mut NetArchive<'_>,
        ctx: &mut ProxyContext<'_, S>,
    ) -> Result<(), NetSimError> {
        if archive.is_saving() {
            self.last_serialized_keyframe =
                save_sequence(archive, &ctx.buffers.sync, Keyframe::NULL, self.length)?;
        } else {
            let newest = load_sequence(archive, &mut self.received)?;
            if !newest.is_null() {
                self.last_serialized_keyframe = newest;
            }
        }
        Ok(())
    }

    fn dirty_count(&self, buffers: &BufferSet<S>) -> u32 {
        buffers.sync.dirty_count()
    }

    fn last_serialized_keyframe(&self) -> Keyframe {
        self.last_serialized_keyframe
    }
}
