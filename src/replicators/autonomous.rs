//! Server to owning client replication and the owning client's tick behavior.

use crate::buffers::BufferSet;
use crate::error::NetSimError;
use crate::{Keyframe, NetArchive, SimTime, Simulation, SimulationDriver};

use super::{
    load_authoritative, reconcile_prediction, save_authoritative, AuthoritativeFrame,
    ProxyContext, ProxyReplicator, ReconcileOutcome, SimContext,
};

/// Replicates the authority's newest sync state to the owning client, which
/// predicts ahead with local input and corrects itself on [`reconcile`](Self::reconcile).
pub(crate) struct AutonomousReplicator<S: Simulation> {
    /// Received but not yet reconciled.
    pending: Option<AuthoritativeFrame<S::Sync>>,
    /// Kept for forced reconciles triggered by a dependent.
    last_received: Option<AuthoritativeFrame<S::Sync>>,
    last_serialized_keyframe: Keyframe,
}

impl<S: Simulation> AutonomousReplicator<S> {
    pub fn new() -> Self {
        Self {
            pending: None,
            last_received: None,
            last_serialized_keyframe: Keyframe::NULL,
        }
    }

    /// Produces one local command per tick and allows everything produced to be consumed.
    pub fn pre_tick<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        delta: SimTime,
    ) {
        if delta.is_positive() {
            ctx.produce_input(delta);
        }
        ctx.tick.max_allowed_input_keyframe = ctx.buffers.input.head_keyframe();
        ctx.tick.give_simulation_time(delta);
    }

    pub fn reconcile<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        forced: bool,
    ) -> Result<ReconcileOutcome, NetSimError> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None if forced => match self.last_received.clone() {
                Some(frame) => frame,
                None => return Ok(ReconcileOutcome::default()),
            },
            None => return Ok(ReconcileOutcome::default()),
        };
        reconcile_prediction(ctx, &frame, forced)
    }
}

impl<S: Simulation> ProxyReplicator<S> for AutonomousReplicator<S> {
    fn net_serialize(
        &mut self,
        archive: &mut NetArchive<'_>,
        ctx: &mut ProxyContext<'_, S>,
    ) -> Result<(), NetSimError> {
        if archive.is_saving() {
            self.last_serialized_keyframe = save_authoritative(archive, ctx.buffers, ctx.tick)?;
            return Ok(());
        }
        if let Some(frame) = load_authoritative::<S>(archive)? {
            self.last_serialized_keyframe = frame.keyframe;
            self.last_received = Some(frame.clone());
            self.pending = Some(frame);
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
