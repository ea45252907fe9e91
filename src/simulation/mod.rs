//! The per-entity simulation instance.
//!
//! A [`NetworkSimulation`] owns the keyed buffers, the time tracker and one
//! replicator per [`ReplicationTarget`]. The host calls [`tick`](NetworkSimulation::tick)
//! once per frame, [`net_serialize_proxy`](NetworkSimulation::net_serialize_proxy)
//! whenever the replication layer sends or receives, and
//! [`reconcile`](NetworkSimulation::reconcile) after a network update was applied.

pub mod builder;
pub mod config;

use std::sync::Arc;

use crate::buffers::{BufferSet, HistoricBuffers, KeyedRingBuffer};
use crate::error::NetSimError;
use crate::frame_info::{DebugState, InputFrame};
use crate::hash;
use crate::replicators::{ProxyContext, ReconcileOutcome, Replicators, SimContext, TickOutcome};
use crate::telemetry::{SimViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::throttle::ServerRpcThrottle;
use crate::tick_state::TickState;
use crate::{
    debug_check_invariants, report_violation_to, BufferSizes, Keyframe, NetArchive, NetRole,
    ReplicationTarget, SimTime, SimulatedUpdateMode, Simulation, SimulationConfig,
    SimulationDriver, TickParameters,
};

/// One networked simulation instance: buffers, time tracker and replicators
/// for a [`Simulation`], driven by a [`SimulationDriver`].
///
/// Create it with a [`SimulationBuilder`](crate::SimulationBuilder).
pub struct NetworkSimulation<S: Simulation, D: SimulationDriver<S>> {
    driver: D,
    role: NetRole,
    config: SimulationConfig,
    buffers: BufferSet<S>,
    historic: Option<HistoricBuffers<S>>,
    tick_state: TickState,
    replicators: Replicators<S>,
    throttle: ServerRpcThrottle,
    observer: Option<Arc<dyn ViolationObserver>>,
    dependent_needs_reconcile: bool,
}

impl<S: Simulation, D: SimulationDriver<S>> std::fmt::Debug for NetworkSimulation<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSimulation")
            .field("debug_name", &self.driver.debug_name())
            .field("role", &self.role)
            .field("config", &self.config)
            .field("tick_state", &self.tick_state)
            .field("input_head", &self.buffers.input.head_keyframe())
            .field("sync_head", &self.buffers.sync.head_keyframe())
            .field("dependent_needs_reconcile", &self.dependent_needs_reconcile)
            .finish_non_exhaustive()
    }
}

impl<S: Simulation, D: SimulationDriver<S>> NetworkSimulation<S, D> {
    pub(crate) fn new(
        driver: D,
        role: NetRole,
        config: SimulationConfig,
        observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Result<Self, NetSimError> {
        let mut throttle = ServerRpcThrottle::new();
        config
            .validate()
            .and_then(|()| throttle.set_desired_frequency(config.server_rpc_send_frequency_hz))
            .map_err(|err| rejected_config(&observer, &driver.debug_name(), err))?;
        let mut sim = Self {
            driver,
            role,
            config,
            buffers: BufferSet::new(&config.buffer_sizes, config.debug_buffers),
            historic: None,
            tick_state: TickState::new(config.buffer_sizes.sync, config.budget_mode),
            replicators: Replicators::new(&config),
            throttle,
            observer,
            dependent_needs_reconcile: false,
        };
        sim.initialize_for_network_role(role, config.buffer_sizes)?;
        Ok(sim)
    }

    /// Resets every buffer for `role` with the given sizes.
    ///
    /// Writes the placeholder input at keyframe 0, so the first command
    /// produced lands at keyframe 1. The sync state at keyframe 0 is created
    /// by the first tick through [`SimulationDriver::init_sync_state`].
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidConfig`] if a size is zero. Nothing is reset then.
    pub fn initialize_for_network_role(
        &mut self,
        role: NetRole,
        sizes: BufferSizes,
    ) -> Result<(), NetSimError> {
        sizes
            .validate()
            .map_err(|err| rejected_config(&self.observer, &self.driver.debug_name(), err))?;
        self.config.buffer_sizes = sizes;
        self.role = role;

        self.buffers = BufferSet::new(&sizes, self.config.debug_buffers);
        self.historic = self
            .config
            .debug_buffers
            .then(|| HistoricBuffers::new(sizes.historic));
        self.tick_state = TickState::new(sizes.sync, self.config.budget_mode);
        self.tick_state.init_simulation_time_buffer(sizes.sync);
        self.replicators = Replicators::new(&self.config);
        self.dependent_needs_reconcile = false;

        self.buffers.input.get_write_next();

        tracing::info!(
            group = S::GROUP_NAME,
            debug_name = %self.driver.debug_name(),
            %role,
            ?sizes,
            "initialized simulation for network role"
        );
        Ok(())
    }

    /// Advances the simulation by one host frame.
    ///
    /// 1. Role pre-tick: produce or synthesize input and refill the time budget.
    /// 2. Rebase the sync buffer if it no longer ends at the last processed keyframe.
    /// 3. Consume input commands while the budget covers them.
    /// 4. Role post-tick: finalize the frame.
    /// 5. Record debug states and merge the historic buffers.
    ///
    /// # Errors
    ///
    /// [`NetSimError::MissingBufferEntry`] if the sync state preceding a command
    /// is gone. This means the buffers are corrupted and is fatal.
    pub fn tick(&mut self, params: &TickParameters) -> Result<(), NetSimError> {
        self.role = params.role;
        let delta = SimTime::from_seconds(params.local_delta_time_seconds);
        self.begin_debug_state(params);

        let Self {
            driver,
            config,
            buffers,
            tick_state,
            replicators,
            observer,
            ..
        } = self;
        let mut ctx = SimContext {
            buffers,
            tick: tick_state,
            driver,
            observer,
            config,
        };

        let mut role = replicators.for_role(params.role);
        role.pre_tick(&mut ctx, params, delta);
        let outcome = if role.runs_simulation() {
            consume_input(&mut ctx)?
        } else {
            TickOutcome::default()
        };
        role.post_tick(&mut ctx, &outcome, delta);

        tracing::trace!(
            group = S::GROUP_NAME,
            processed = outcome.processed,
            rebased = outcome.rebased,
            last_processed = %self.tick_state.last_processed_input_keyframe,
            "tick"
        );

        self.finish_debug_state();
        if let Some(historic) = self.historic.as_mut() {
            historic.merge_from(&self.buffers);
        }

        let debug_name = self.driver.debug_name();
        debug_check_invariants!(self.tick_state, debug_name);
        debug_check_invariants!(self.buffers.sync, debug_name);
        Ok(())
    }

    /// Applies received authoritative data for `role`. Call after a network update.
    ///
    /// Same as [`reconcile_as`](Self::reconcile_as) for a simulation without a parent.
    pub fn reconcile(&mut self, role: NetRole) -> Result<ReconcileOutcome, NetSimError> {
        self.reconcile_as(role, false)
    }

    /// Applies received authoritative data for `role`.
    ///
    /// An extrapolating simulated proxy with a parent only records the state and
    /// reports [`ReconcileOutcome::defer_to_parent`]; the parent's rollback
    /// then drives it through [`begin_rollback`](Self::begin_rollback).
    ///
    /// # Errors
    ///
    /// [`NetSimError::MissingBufferEntry`] if replaying inputs hit a corrupted buffer.
    pub fn reconcile_as(
        &mut self,
        role: NetRole,
        has_parent: bool,
    ) -> Result<ReconcileOutcome, NetSimError> {
        let forced = self.dependent_needs_reconcile;
        let Self {
            driver,
            config,
            buffers,
            tick_state,
            replicators,
            observer,
            ..
        } = self;
        let mut ctx = SimContext {
            buffers,
            tick: tick_state,
            driver,
            observer,
            config,
        };
        let outcome = replicators
            .for_role(role)
            .reconcile(&mut ctx, forced, has_parent)?;
        // Stays set until authoritative data actually produced a plan.
        if outcome.dependent_rollback.is_some() {
            self.dependent_needs_reconcile = false;
        }

        if let Some(corrected) = outcome.corrected_at {
            tracing::debug!(
                group = S::GROUP_NAME,
                debug_name = %self.driver.debug_name(),
                %corrected,
                "reconciled"
            );
        }
        if let Some(historic) = self.historic.as_mut() {
            historic.merge_from(&self.buffers);
        }
        Ok(outcome)
    }

    /// Runs the replicator for `target` against `archive`: writes if the archive
    /// is saving, reads if it is loading.
    ///
    /// # Errors
    ///
    /// - [`NetSimError::UnknownReplicationTarget`] for [`ReplicationTarget::Debug`]
    ///   without debug buffers. Fatal.
    /// - [`NetSimError::Serialization`] if the payload cannot be encoded or decoded.
    /// - [`NetSimError::InvalidRequest`] when writing to a loading archive.
    pub fn net_serialize_proxy(
        &mut self,
        target: ReplicationTarget,
        archive: &mut NetArchive<'_>,
    ) -> Result<(), NetSimError> {
        let debug_name = self.driver.debug_name();
        let Self {
            config,
            buffers,
            tick_state,
            replicators,
            observer,
            ..
        } = self;
        let Some(replicator) = replicators.for_target(target) else {
            return Err(unavailable_target(observer, &debug_name, target));
        };
        let mut ctx = ProxyContext {
            buffers,
            tick: tick_state,
            config,
            observer,
        };
        replicator
            .net_serialize(archive, &mut ctx)
            .map_err(|err| match err {
                NetSimError::Serialization { context } => NetSimError::Serialization {
                    context: format!("{} {}: {}", debug_name, target, context),
                },
                other => other,
            })
    }

    /// Like [`net_serialize_proxy`](Self::net_serialize_proxy) for a target carried as its wire value.
    ///
    /// # Errors
    ///
    /// [`NetSimError::UnknownReplicationTarget`] if `target` names no target.
    pub fn net_serialize_proxy_raw(
        &mut self,
        target: u8,
        archive: &mut NetArchive<'_>,
    ) -> Result<(), NetSimError> {
        let target = ReplicationTarget::try_from(target).map_err(|err| {
            report_violation_to!(
                self.observer,
                ViolationSeverity::Critical,
                ViolationKind::Replication,
                "unknown replication target {}",
                target
            );
            err
        })?;
        self.net_serialize_proxy(target, archive)
    }

    /// Change counter for `target`; the replication layer sends when it differs
    /// from the last value it saw.
    ///
    /// # Errors
    ///
    /// [`NetSimError::UnknownReplicationTarget`] for an unavailable target.
    pub fn proxy_dirty_count(&self, target: ReplicationTarget) -> Result<u32, NetSimError> {
        self.replicators
            .target(target)
            .map(|replicator| replicator.dirty_count(&self.buffers))
            .ok_or_else(|| unavailable_target(&self.observer, &self.driver.debug_name(), target))
    }

    /// Rewinds this simulation by `rollback_delta` because its parent was
    /// corrected at `parent_keyframe`. Follow with [`step_rollback`](Self::step_rollback).
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] unless this is a simulated proxy.
    pub fn begin_rollback(
        &mut self,
        rollback_delta: SimTime,
        parent_keyframe: Keyframe,
    ) -> Result<(), NetSimError> {
        self.require_simulated_proxy("begin_rollback")?;
        let Self {
            driver,
            config,
            buffers,
            tick_state,
            replicators,
            observer,
            ..
        } = self;
        let mut ctx = SimContext {
            buffers,
            tick: tick_state,
            driver,
            observer,
            config,
        };
        replicators
            .simulated
            .begin_rollback(&mut ctx, rollback_delta, parent_keyframe);
        Ok(())
    }

    /// Re-simulates `step` of the parent's replay. `final_step` ends the rollback
    /// and finalizes the frame.
    ///
    /// # Errors
    ///
    /// - [`NetSimError::InvalidRequest`] without a preceding
    ///   [`begin_rollback`](Self::begin_rollback), or unless this is a simulated proxy.
    /// - [`NetSimError::MissingBufferEntry`] on a corrupted buffer.
    pub fn step_rollback(
        &mut self,
        step: SimTime,
        parent_keyframe: Keyframe,
        final_step: bool,
    ) -> Result<(), NetSimError> {
        self.require_simulated_proxy("step_rollback")?;
        let Self {
            driver,
            config,
            buffers,
            tick_state,
            replicators,
            observer,
            ..
        } = self;
        let mut ctx = SimContext {
            buffers,
            tick: tick_state,
            driver,
            observer,
            config,
        };
        replicators
            .simulated
            .step_rollback(&mut ctx, step, parent_keyframe, final_step)
    }

    /// Marks this simulation for a forced reconcile: the next
    /// [`reconcile`](Self::reconcile) that has authoritative data replays even
    /// if the states match, so dependents receive a rollback plan. The mark is
    /// cleared once that plan is produced.
    pub fn notify_dependent_needs_reconcile(&mut self) {
        self.dependent_needs_reconcile = true;
    }

    /// Whether a forced reconcile is pending.
    #[must_use]
    pub fn dependent_needs_reconcile(&self) -> bool {
        self.dependent_needs_reconcile
    }

    /// Gates the client to server RPC. Call once per host frame; send when it returns `true`.
    pub fn should_send_server_rpc(&mut self, delta_seconds: f32) -> bool {
        self.throttle.should_send(delta_seconds)
    }

    /// Sets the maximum server RPC send rate.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidConfig`] if `hz` is not positive.
    pub fn set_desired_server_rpc_send_frequency(&mut self, hz: f32) -> Result<(), NetSimError> {
        self.throttle
            .set_desired_frequency(hz)
            .map_err(|err| rejected_config(&self.observer, &self.driver.debug_name(), err))?;
        self.config.server_rpc_send_frequency_hz = hz;
        Ok(())
    }

    /// Appends an input command covering `delta` at the next input keyframe.
    ///
    /// For hosts that deliver input through their own channel instead of
    /// [`ReplicationTarget::ServerRpc`]. Returns the keyframe the command landed at.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] if `delta` is not positive. Nothing is buffered then.
    pub fn enqueue_input(
        &mut self,
        cmd: S::Input,
        delta: SimTime,
    ) -> Result<Keyframe, NetSimError> {
        if !delta.is_positive() {
            return Err(NetSimError::InvalidRequest {
                info: format!(
                    "{}: input command delta time must be positive, got {}",
                    self.driver.debug_name(),
                    delta
                ),
            });
        }
        self.buffers.input.push(InputFrame::new(delta, cmd));
        Ok(self.buffers.input.head_keyframe())
    }

    /// Sets the aux state seen by updates after the last processed keyframe.
    pub fn set_aux_state(&mut self, aux: S::Aux) {
        let keyframe = self.tick_state.last_processed_input_keyframe;
        if let Some(slot) = self.buffers.aux.find_mut(keyframe) {
            *slot = aux;
            return;
        }
        self.buffers.aux.reset_next_head_keyframe(keyframe);
        self.buffers.aux.push(aux);
    }

    /// Deterministic checksum of the sync state at `keyframe`, if retained.
    ///
    /// # Errors
    ///
    /// [`NetSimError::Serialization`] if the state cannot be encoded.
    pub fn sync_checksum(&self, keyframe: Keyframe) -> Result<Option<u64>, NetSimError> {
        self.buffers
            .sync
            .find(keyframe)
            .map(hash::checksum)
            .transpose()
            .map_err(NetSimError::from)
    }

    /// The role of the most recent tick (or initialization).
    #[must_use]
    pub fn role(&self) -> NetRole {
        self.role
    }

    /// The driver's debug name.
    #[must_use]
    pub fn debug_name(&self) -> String {
        self.driver.debug_name()
    }

    /// The host driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the host driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The last input keyframe run through the update function.
    #[must_use]
    pub fn last_processed_input_keyframe(&self) -> Keyframe {
        self.tick_state.last_processed_input_keyframe
    }

    /// Total simulation time processed.
    #[must_use]
    pub fn total_processed_simulation_time(&self) -> SimTime {
        self.tick_state.total_processed_simulation_time()
    }

    /// Simulation time left over from the last tick.
    #[must_use]
    pub fn remaining_allowed_simulation_time(&self) -> SimTime {
        self.tick_state.remaining_allowed_simulation_time()
    }

    /// The sync state at `keyframe`, if retained.
    #[must_use]
    pub fn sync_state(&self, keyframe: Keyframe) -> Option<&S::Sync> {
        self.buffers.sync.find(keyframe)
    }

    /// The newest sync state.
    #[must_use]
    pub fn latest_sync_state(&self) -> Option<&S::Sync> {
        self.buffers.sync.head()
    }

    /// The input command at `keyframe`, if retained.
    #[must_use]
    pub fn input_command(&self, keyframe: Keyframe) -> Option<&S::Input> {
        self.buffers.input.find(keyframe).map(|frame| &frame.cmd)
    }

    /// The aux state recorded at `keyframe`, if retained.
    #[must_use]
    pub fn aux_state(&self, keyframe: Keyframe) -> Option<&S::Aux> {
        self.buffers.aux.find(keyframe)
    }

    /// How this simulation presents state while it is a simulated proxy.
    #[must_use]
    pub fn simulated_update_mode(&self) -> SimulatedUpdateMode {
        self.replicators.simulated.mode()
    }

    /// The interpolation playback clock, once a simulated proxy has presented a state.
    #[must_use]
    pub fn interpolation_playback_time(&self) -> Option<SimTime> {
        self.replicators.simulated.playback_time()
    }

    /// Whether a dependent rollback is in progress.
    #[must_use]
    pub fn in_rollback(&self) -> bool {
        self.replicators.simulated.in_rollback()
    }

    /// The live buffers.
    #[doc(hidden)]
    #[must_use]
    pub fn buffers(&self) -> &BufferSet<S> {
        &self.buffers
    }

    /// The time tracker.
    #[doc(hidden)]
    #[must_use]
    pub fn tick_state(&self) -> &TickState {
        &self.tick_state
    }

    /// Historic mirrors, present with debug buffers enabled.
    #[must_use]
    pub fn historic_buffers(&self) -> Option<&HistoricBuffers<S>> {
        self.historic.as_ref()
    }

    /// Local debug states, present with debug buffers enabled.
    #[must_use]
    pub fn debug_buffer(&self) -> Option<&KeyedRingBuffer<DebugState>> {
        self.buffers.debug.as_ref()
    }

    /// Debug states received from the authority, present with debug buffers enabled.
    #[must_use]
    pub fn remote_debug_buffer(&self) -> Option<&KeyedRingBuffer<DebugState>> {
        self.replicators.debug.as_ref().map(|debug| debug.remote())
    }

    /// Sync states received through [`ReplicationTarget::Replay`].
    #[must_use]
    pub fn replay_buffer(&self) -> &KeyedRingBuffer<S::Sync> {
        self.replicators.replay.received()
    }

    fn last_serialized(&self, target: ReplicationTarget) -> Keyframe {
        self.replicators
            .target(target)
            .map_or(Keyframe::NULL, |replicator| replicator.last_serialized_keyframe())
    }

    fn begin_debug_state(&mut self, params: &TickParameters) {
        if self.buffers.debug.is_none() {
            return;
        }
        let (received, sent) = match params.role {
            NetRole::Authority => (
                self.last_serialized(ReplicationTarget::ServerRpc),
                self.last_serialized(ReplicationTarget::AutonomousProxy),
            ),
            NetRole::AutonomousProxy => (
                self.last_serialized(ReplicationTarget::AutonomousProxy),
                self.last_serialized(ReplicationTarget::ServerRpc),
            ),
            NetRole::SimulatedProxy => (
                self.last_serialized(ReplicationTarget::SimulatedProxy),
                Keyframe::NULL,
            ),
        };
        if let Some(debug) = self.buffers.debug.as_mut() {
            // What went out since the previous tick belongs to that tick's entry.
            if let Some(previous) = debug.head_mut() {
                previous.last_sent_input_keyframe = sent;
            }
            let state = debug.get_write_next();
            state.local_delta_time_seconds = params.local_delta_time_seconds;
            state.local_frame_number = params.frame_number;
            state.last_received_input_keyframe = received;
        }
    }

    fn finish_debug_state(&mut self) {
        let last_processed = self.tick_state.last_processed_input_keyframe;
        let input_head = self.buffers.input.head_keyframe();
        let remaining = self.tick_state.remaining_allowed_simulation_time();
        if let Some(state) = self.buffers.debug.as_mut().and_then(KeyedRingBuffer::head_mut) {
            state.last_processed_keyframe = last_processed;
            state.head_keyframe = input_head;
            state.remaining_allowed_simulation_time_seconds = remaining.to_real_seconds();
        }
    }

    fn require_simulated_proxy(&self, operation: &str) -> Result<(), NetSimError> {
        if self.role == NetRole::SimulatedProxy {
            return Ok(());
        }
        report_violation_to!(
            self.observer,
            ViolationSeverity::Error,
            ViolationKind::Rollback,
            "{} on a {} simulation",
            operation,
            self.role
        );
        Err(NetSimError::InvalidRequest {
            info: format!(
                "{}: {} requires the SimulatedProxy role, not {}",
                self.driver.debug_name(),
                operation,
                self.role
            ),
        })
    }
}

/// Rebases the sync buffer if needed, then consumes input commands while the
/// budget and `max_allowed_input_keyframe` allow.
fn consume_input<S: Simulation, D: SimulationDriver<S>>(
    ctx: &mut SimContext<'_, S, D>,
) -> Result<TickOutcome, NetSimError> {
    let mut outcome = TickOutcome::default();
    let last_processed = ctx.tick.last_processed_input_keyframe;

    if ctx.buffers.sync.head_keyframe() != last_processed {
        // Keyframe 0 is expected to be missing until the first tick creates it.
        if last_processed != Keyframe::new(0) {
            let debug_name = ctx.driver.debug_name();
            let violation = SimViolation::new(
                ViolationSeverity::Warning,
                ViolationKind::Continuity,
                format!("{}: break in sync state continuity", debug_name),
                concat!(file!(), ":", line!()),
            )
            .with_keyframe(last_processed)
            .with_context("debug_name", debug_name)
            .with_context("last_processed", last_processed.to_string())
            .with_context("sync_head", ctx.buffers.sync.head_keyframe().to_string());
            report_violation_to!(ctx.observer, violation);
        }
        ctx.buffers.sync.reset_next_head_keyframe(last_processed);
        let starting_state = ctx.buffers.sync.get_write_next();
        ctx.driver.init_sync_state(starting_state);
        let total = ctx.tick.total_processed_simulation_time();
        ctx.tick.set_total_processed_simulation_time(total, last_processed);
        outcome.rebased = true;
    }

    loop {
        let keyframe = ctx.tick.last_processed_input_keyframe + 1;
        if keyframe > ctx.tick.max_allowed_input_keyframe {
            break;
        }
        let Some(frame) = ctx.buffers.input.find(keyframe) else {
            break;
        };
        if ctx.tick.remaining_allowed_simulation_time() < frame.frame_delta_time {
            break;
        }
        let frame = frame.clone();
        ctx.simulate(keyframe, &frame)?;
        ctx.tick.consume_simulation_time(frame.frame_delta_time);
        if let Some(debug) = ctx.buffers.debug.as_mut().and_then(KeyedRingBuffer::head_mut) {
            debug.processed_keyframes.push(keyframe);
        }
        outcome.processed += 1;
    }
    Ok(outcome)
}

fn unavailable_target(
    observer: &Option<Arc<dyn ViolationObserver>>,
    debug_name: &str,
    target: ReplicationTarget,
) -> NetSimError {
    let violation = SimViolation::new(
        ViolationSeverity::Critical,
        ViolationKind::Replication,
        format!("{}: replication target {} is not available", debug_name, target),
        concat!(file!(), ":", line!()),
    )
    .with_context("target", target.to_string());
    report_violation_to!(observer, violation);
    NetSimError::UnknownReplicationTarget {
        target: target.as_u8(),
    }
}

fn rejected_config(
    observer: &Option<Arc<dyn ViolationObserver>>,
    debug_name: &str,
    err: NetSimError,
) -> NetSimError {
    report_violation_to!(
        observer,
        ViolationSeverity::Error,
        ViolationKind::Configuration,
        "{}: {}",
        debug_name,
        err
    );
    err
}
