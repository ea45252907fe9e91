//! Client to server input replication and the authority's tick behavior.

use crate::buffers::{BufferSet, KeyedRingBuffer};
use crate::error::NetSimError;
use crate::frame_info::InputFrame;
use crate::report_violation_to;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::tick_state::TickState;
use crate::{Keyframe, NetArchive, SimTime, Simulation, SimulationDriver, TickParameters};

use super::{load_sequence, save_sequence, ProxyContext, ProxyReplicator, SimContext};

/// Replicates input commands from the owning client to the authority.
///
/// The client resends its newest `server_rpc_redundancy` commands every time,
/// so the authority skips what it already has and repairs gaps left by lost
/// packets.
#[derive(Debug, Clone)]
pub(crate) struct ServerRpcReplicator {
    last_serialized_keyframe: Keyframe,
}

impl ServerRpcReplicator {
    pub fn new() -> Self {
        Self {
            last_serialized_keyframe: Keyframe::NULL,
        }
    }

    /// Authority pre-tick: every buffered command may be consumed, budget permitting.
    pub fn pre_tick<S: Simulation, D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        params: &TickParameters,
        delta: SimTime,
    ) {
        if params.generate_local_input && delta.is_positive() {
            ctx.produce_input(delta);
        }
        ctx.tick.max_allowed_input_keyframe = ctx.buffers.input.head_keyframe();
        ctx.tick.give_simulation_time(delta);
    }

    fn load<S: Simulation>(
        &mut self,
        archive: &mut NetArchive<'_>,
        ctx: &mut ProxyContext<'_, S>,
    ) -> Result<(), NetSimError> {
        let mut received: KeyedRingBuffer<InputFrame<S::Input>> =
            KeyedRingBuffer::with_capacity(ctx.buffers.input.capacity());
        let newest = load_sequence(archive, &mut received)?;
        if newest.is_null() {
            return Ok(());
        }

        let head = ctx.buffers.input.head_keyframe();
        if let Some((keyframe, frame)) = received
            .iter()
            .find(|(keyframe, frame)| *keyframe > head && !frame.frame_delta_time.is_positive())
        {
            report_violation_to!(
                ctx.observer,
                ViolationSeverity::Error,
                ViolationKind::Replication,
                "rejected input at keyframe {} with delta time {}",
                keyframe,
                frame.frame_delta_time
            );
            return Err(NetSimError::Serialization {
                context: format!(
                    "input command at keyframe {} has non-positive delta time {}",
                    keyframe, frame.frame_delta_time
                ),
            });
        }

        for (keyframe, frame) in received.iter() {
            let head = ctx.buffers.input.head_keyframe();
            if keyframe <= head {
                continue;
            }
            let expected = head + 1;
            if keyframe > expected {
                report_violation_to!(
                    ctx.observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Replication,
                    "gap in received input: expected keyframe {}, got {}",
                    expected,
                    keyframe
                );
                repair_gap(ctx.buffers, ctx.tick, keyframe);
            }
            ctx.buffers.input.push(frame.clone());
        }
        self.last_serialized_keyframe = newest;
        Ok(())
    }
}

/// Moves the consumption point so `keyframe` is the next input processed.
///
/// The newest sync state is carried over to `keyframe - 1`, so the missing
/// commands are skipped instead of rebasing from the driver's initial state.
fn repair_gap<S: Simulation>(
    buffers: &mut BufferSet<S>,
    tick: &mut TickState,
    keyframe: Keyframe,
) {
    buffers.input.reset_next_head_keyframe(keyframe);
    let skipped_to = keyframe - 1;
    if skipped_to <= tick.last_processed_input_keyframe {
        return;
    }
    if let Some(state) = buffers.sync.head().cloned() {
        buffers.sync.reset_next_head_keyframe(skipped_to);
        buffers.sync.push(state);
    }
    tick.last_processed_input_keyframe = skipped_to;
    let total = tick.total_processed_simulation_time();
    tick.set_total_processed_simulation_time(total, skipped_to);
}

impl<S: Simulation> ProxyReplicator<S> for ServerRpcReplicator {
    fn net_serialize(
        &mut self,
        archive: &mut NetArchive<'_>,
        ctx: &mut ProxyContext<'_, S>,
    ) -> Result<(), NetSimError> {
        if archive.is_saving() {
            // Input keyframe 0 is the unprocessed placeholder and is never sent.
            self.last_serialized_keyframe = save_sequence(
                archive,
                &ctx.buffers.input,
                Keyframe::new(0),
                ctx.config.server_rpc_redundancy,
            )?;
            Ok(())
        } else {
            self.load(archive, ctx)
        }
    }

    fn dirty_count(&self, buffers: &BufferSet<S>) -> u32 {
        buffers.input.dirty_count()
    }

    fn last_serialized_keyframe(&self) -> Keyframe {
        self.last_serialized_keyframe
    }
}
