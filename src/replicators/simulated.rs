//! Server to observing client replication and the simulated proxy's tick behavior.
//!
//! A simulated proxy has no input of its own. In [`SimulatedUpdateMode::Interpolate`]
//! it never runs the update function: received states are appended to the sync
//! buffer, stamped with the authority's simulation time, and blended at a
//! playback time trailing the newest state. In [`SimulatedUpdateMode::Extrapolate`]
//! it repeats the last command to predict ahead and reconciles like the owning
//! client, unless it depends on a parent, in which case the parent's rollback
//! drives it.

use crate::buffers::BufferSet;
use crate::error::NetSimError;
use crate::frame_info::InputFrame;
use crate::report_violation_to;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::{Keyframe, NetArchive, SimTime, Simulation, SimulatedUpdateMode, SimulationDriver};

use super::{
    load_authoritative, reconcile_prediction, save_authoritative, AuthoritativeFrame,
    ProxyContext, ProxyReplicator, ReconcileOutcome, SimContext, TickOutcome,
};

pub(crate) struct SimulatedReplicator<S: Simulation> {
    mode: SimulatedUpdateMode,
    interpolation_delay: SimTime,
    pending: Option<AuthoritativeFrame<S::Sync>>,
    last_received: Option<AuthoritativeFrame<S::Sync>>,
    /// A correction left to the parent's rollback.
    deferred: Option<AuthoritativeFrame<S::Sync>>,
    last_serialized_keyframe: Keyframe,
    in_rollback: bool,
    /// Authority keyframe of the newest appended state (interpolation).
    newest_applied_keyframe: Keyframe,
    newest_server_time: SimTime,
    playback_time: Option<SimTime>,
}

impl<S: Simulation> SimulatedReplicator<S> {
    pub fn new(mode: SimulatedUpdateMode, interpolation_delay: SimTime) -> Self {
        Self {
            mode,
            interpolation_delay,
            pending: None,
            last_received: None,
            deferred: None,
            last_serialized_keyframe: Keyframe::NULL,
            in_rollback: false,
            newest_applied_keyframe: Keyframe::NULL,
            newest_server_time: SimTime::ZERO,
            playback_time: None,
        }
    }

    pub fn mode(&self) -> SimulatedUpdateMode {
        self.mode
    }

    pub fn in_rollback(&self) -> bool {
        self.in_rollback
    }

    pub fn playback_time(&self) -> Option<SimTime> {
        self.playback_time
    }

    pub fn runs_simulation(&self) -> bool {
        self.mode == SimulatedUpdateMode::Extrapolate && !self.in_rollback
    }

    pub fn pre_tick<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        delta: SimTime,
    ) {
        if !self.runs_simulation() {
            ctx.tick.max_allowed_input_keyframe = ctx.tick.last_processed_input_keyframe;
            ctx.tick.revoke_simulation_time();
            return;
        }
        if delta.is_positive() {
            let cmd = ctx
                .buffers
                .input
                .head()
                .map(|frame| frame.cmd.clone())
                .unwrap_or_default();
            ctx.buffers.input.push(InputFrame::new(delta, cmd));
        }
        ctx.tick.max_allowed_input_keyframe = ctx.buffers.input.head_keyframe();
        ctx.tick.give_simulation_time(delta);
    }

    pub fn post_tick<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        outcome: &TickOutcome,
        delta: SimTime,
    ) {
        match self.mode {
            SimulatedUpdateMode::Extrapolate => {
                if outcome.produced_state() {
                    ctx.finalize_head();
                }
            },
            SimulatedUpdateMode::Interpolate => self.advance_playback(ctx, delta),
        }
    }

    /// Moves the playback clock by `delta` and presents the blended state.
    fn advance_playback<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        delta: SimTime,
    ) {
        if ctx.buffers.sync.is_empty() {
            return;
        }
        let newest = self.newest_server_time;
        let target = newest.saturating_sub(self.interpolation_delay);
        let mut playback = match self.playback_time {
            Some(time) => time + delta,
            None => target,
        };
        if playback > newest {
            playback = newest;
        }
        if newest - playback > self.interpolation_delay + self.interpolation_delay {
            tracing::debug!(
                group = S::GROUP_NAME,
                %playback,
                %newest,
                "interpolation fell behind, snapping playback"
            );
            playback = target;
        }
        self.playback_time = Some(playback);

        let Some((from, to, alpha)) = ctx.tick.bracket(playback) else {
            return;
        };
        let blended = match (ctx.buffers.sync.find(from), ctx.buffers.sync.find(to)) {
            (Some(from), Some(to)) => S::interpolate(from, to, alpha),
            _ => return,
        };
        ctx.driver.finalize_frame(&blended);
    }

    pub fn reconcile<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        forced: bool,
        has_parent: bool,
    ) -> Result<ReconcileOutcome, NetSimError> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None if forced => match self.last_received.clone() {
                Some(frame) => frame,
                None => return Ok(ReconcileOutcome::default()),
            },
            None => return Ok(ReconcileOutcome::default()),
        };

        match self.mode {
            SimulatedUpdateMode::Interpolate => {
                self.append_received(ctx, frame);
                Ok(ReconcileOutcome::default())
            },
            SimulatedUpdateMode::Extrapolate if has_parent => {
                self.deferred = Some(frame);
                Ok(ReconcileOutcome {
                    defer_to_parent: true,
                    ..ReconcileOutcome::default()
                })
            },
            SimulatedUpdateMode::Extrapolate => reconcile_prediction(ctx, &frame, forced),
        }
    }

    /// Appends a received state at the next local keyframe, stamped with the authority's time.
    fn append_received<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        frame: AuthoritativeFrame<S::Sync>,
    ) {
        if !self.newest_applied_keyframe.is_null() && frame.keyframe <= self.newest_applied_keyframe
        {
            return;
        }
        let keyframe = ctx.tick.last_processed_input_keyframe + 1;
        if ctx.buffers.sync.next_keyframe() != keyframe {
            ctx.buffers.sync.reset_next_head_keyframe(keyframe);
        }
        ctx.buffers.sync.push(frame.state);
        ctx.tick
            .set_total_processed_simulation_time(frame.total_time, keyframe);
        ctx.tick.last_processed_input_keyframe = keyframe;
        self.newest_applied_keyframe = frame.keyframe;
        self.newest_server_time = frame.total_time;
    }

    /// Rewinds by `rollback_delta` so the parent's replay can be mirrored step by step.
    ///
    /// The starting state is the deferred correction if there is one, else the
    /// local state at the rewound time. No-op when interpolating.
    pub fn begin_rollback<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        rollback_delta: SimTime,
        parent_keyframe: Keyframe,
    ) {
        if self.mode == SimulatedUpdateMode::Interpolate {
            return;
        }
        let last_processed = ctx.tick.last_processed_input_keyframe;
        let rewound_time = ctx
            .tick
            .total_processed_simulation_time()
            .saturating_sub(rollback_delta);

        let state = match self.deferred.take() {
            Some(frame) => frame.state,
            None => {
                let historic = ctx
                    .tick
                    .keyframe_at_or_before(rewound_time)
                    .and_then(|keyframe| ctx.buffers.sync.find(keyframe))
                    .or_else(|| ctx.buffers.sync.find(last_processed))
                    .cloned();
                match historic {
                    Some(state) => state,
                    None => {
                        let mut state = S::Sync::default();
                        ctx.driver.init_sync_state(&mut state);
                        state
                    },
                }
            },
        };

        tracing::debug!(
            group = S::GROUP_NAME,
            %parent_keyframe,
            %rollback_delta,
            %last_processed,
            "dependent rollback"
        );
        ctx.buffers.sync.reset_next_head_keyframe(last_processed);
        ctx.buffers.sync.push(state);
        ctx.buffers.input.reset_next_head_keyframe(last_processed + 1);
        ctx.tick
            .set_total_processed_simulation_time(rewound_time, last_processed);
        self.in_rollback = true;
    }

    /// Re-simulates one step of the parent's replay. `final_step` ends the rollback.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] outside of a rollback, or a missing buffer entry.
    pub fn step_rollback<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        step: SimTime,
        parent_keyframe: Keyframe,
        final_step: bool,
    ) -> Result<(), NetSimError> {
        if self.mode == SimulatedUpdateMode::Interpolate {
            return Ok(());
        }
        if !self.in_rollback {
            report_violation_to!(
                ctx.observer,
                ViolationSeverity::Error,
                ViolationKind::Rollback,
                "rollback step for parent keyframe {} without a rollback in progress",
                parent_keyframe
            );
            return Err(NetSimError::InvalidRequest {
                info: format!(
                    "{}: step_rollback called before begin_rollback",
                    ctx.driver.debug_name()
                ),
            });
        }

        if step.is_positive() {
            let keyframe = ctx.tick.last_processed_input_keyframe + 1;
            let cmd = ctx
                .buffers
                .input
                .head()
                .map(|frame| frame.cmd.clone())
                .unwrap_or_default();
            let frame = InputFrame::new(step, cmd);
            if ctx.buffers.input.next_keyframe() != keyframe {
                ctx.buffers.input.reset_next_head_keyframe(keyframe);
            }
            ctx.buffers.input.push(frame.clone());
            ctx.simulate(keyframe, &frame)?;
        }

        if final_step {
            self.in_rollback = false;
            ctx.finalize_head();
        }
        Ok(())
    }
}

impl<S: Simulation> ProxyReplicator<S> for SimulatedReplicator<S> {
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
