use crate::buffers::{BufferSet, KeyedRingBuffer};
use crate::error::NetSimError;
use crate::frame_info::DebugState;
use crate::{Keyframe, NetArchive, ReplicationTarget, Simulation};

use super::{load_sequence, save_sequence, ProxyContext, ProxyReplicator};

/// Replicates the authority's debug states to clients.
///
/// Each send carries the states recorded since the previous send (bounded by
/// the debug buffer size). Received states accumulate in a buffer of their own
/// so a client can line up what the server processed against its own debug
/// states.
#[derive(Debug, Clone)]
pub(crate) struct DebugReplicator {
    remote: KeyedRingBuffer<DebugState>,
    last_sent_keyframe: Keyframe,
    last_serialized_keyframe: Keyframe,
}

impl DebugReplicator {
    pub fn new(size: usize) -> Self {
        Self {
            remote: KeyedRingBuffer::with_capacity(size),
            last_sent_keyframe: Keyframe::NULL,
            last_serialized_keyframe: Keyframe::NULL,
        }
    }

    /// Debug states received from the authority.
    pub fn remote(&self) -> &KeyedRingBuffer<DebugState> {
        &self.remote
    }
}

impl<S: Simulation> ProxyReplicator<S> for DebugReplicator {
    fn net_serialize(
        &mut self,
        archive: &mut NetArchive<'_>,
        ctx: &mut ProxyContext<'_, S>,
    ) -> Result<(), NetSimError> {
        if archive.is_saving() {
            let Some(debug) = ctx.buffers.debug.as_ref() else {
                return Err(NetSimError::UnknownReplicationTarget {
                    target: ReplicationTarget::Debug.as_u8(),
                });
            };
            self.last_sent_keyframe =
                save_sequence(archive, debug, self.last_sent_keyframe, debug.capacity())?;
            self.last_serialized_keyframe = self.last_sent_keyframe;
        } else {
            let newest = load_sequence(archive, &mut self.remote)?;
            if !newest.is_null() {
                self.last_serialized_keyframe = newest;
            }
        }
        Ok(())
    }

    fn dirty_count(&self, buffers: &BufferSet<S>) -> u32 {
        buffers.debug.as_ref().map_or(0, KeyedRingBuffer::dirty_count)
    }

    fn last_serialized_keyframe(&self) -> Keyframe {
        self.last_serialized_keyframe
    }
}
