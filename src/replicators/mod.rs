//! Role replicators.
//!
//! Every simulation owns one replicator per [`ReplicationTarget`]. Each decides
//! what is written to and read from a [`NetArchive`] for its target, and how
//! often the replication layer should consider it dirty ([`ProxyReplicator`]).
//!
//! The three role replicators additionally decide how buffers are populated
//! before a tick, what happens after it, and how a received authoritative
//! state is reconciled. [`RoleReplicator`] is the tagged variant selecting one of
//! them by [`NetRole`].
//!
//! | Target | Saving side | Loading side |
//! |---|---|---|
//! | `ServerRpc` | owning client: newest input commands | authority |
//! | `AutonomousProxy` | authority: newest sync state | owning client |
//! | `SimulatedProxy` | authority: newest sync state | observing clients |
//! | `Replay` | authority: newest 3 sync states | replay recorder |
//! | `Debug` | authority: debug states since last send | clients |

mod autonomous;
mod debug;
mod replay;
mod server;
mod simulated;

pub(crate) use autonomous::AutonomousReplicator;
pub(crate) use debug::DebugReplicator;
pub(crate) use replay::SequenceReplicator;
pub(crate) use server::ServerRpcReplicator;
pub(crate) use simulated::SimulatedReplicator;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::buffers::BufferSet;
use crate::error::{BufferKind, NetSimError};
use crate::frame_info::InputFrame;
use crate::report_violation_to;
use crate::simulation::config::SimulationConfig;
use crate::telemetry::{SimViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::tick_state::TickState;
use crate::{
    Keyframe, NetArchive, NetRole, ReplicationTarget, SimTime, Simulation, SimulationDriver,
    TickParameters,
};

/// Number of sync states the replay target carries.
pub const REPLAY_SEQUENCE_LENGTH: usize = 3;

/// Everything a role replicator may touch during a tick, reconcile or rollback.
pub(crate) struct SimContext<'a, S: Simulation, D> {
    pub buffers: &'a mut BufferSet<S>,
    pub tick: &'a mut TickState,
    pub driver: &'a mut D,
    pub observer: &'a Option<Arc<dyn ViolationObserver>>,
    pub config: &'a SimulationConfig,
}

impl<S: Simulation, D: SimulationDriver<S>> SimContext<'_, S, D> {
    /// Reports a missing buffer entry as a critical violation and builds the fatal error.
    pub fn missing_entry(&self, buffer: BufferKind, keyframe: Keyframe) -> NetSimError {
        let debug_name = self.driver.debug_name();
        let violation = SimViolation::new(
            ViolationSeverity::Critical,
            ViolationKind::BufferIntegrity,
            format!("{}: missing {} buffer entry", debug_name, buffer),
            concat!(file!(), ":", line!()),
        )
        .with_keyframe(keyframe)
        .with_context("debug_name", debug_name.clone())
        .with_context("buffer", buffer.to_string());
        report_violation_to!(self.observer, violation);
        NetSimError::MissingBufferEntry {
            debug_name,
            buffer,
            keyframe,
        }
    }

    /// Runs the update function for `keyframe` (see [`simulate_keyframe`]).
    pub fn simulate(
        &mut self,
        keyframe: Keyframe,
        frame: &InputFrame<S::Input>,
    ) -> Result<(), NetSimError> {
        simulate_keyframe(self.buffers, self.tick, keyframe, frame)
            .map_err(|buffer| self.missing_entry(buffer, keyframe - 1))
    }

    /// Appends a locally produced input command covering `delta`.
    pub fn produce_input(&mut self, delta: SimTime) {
        let frame = self.buffers.input.get_write_next();
        frame.frame_delta_time = delta;
        self.driver.produce_input(delta, &mut frame.cmd);
    }

    /// Hands the newest sync state to the driver.
    pub fn finalize_head(&mut self) {
        if let Some(state) = self.buffers.sync.head() {
            self.driver.finalize_frame(state);
        }
    }
}

/// Runs `Sync[keyframe] = update(Sync[keyframe - 1], Input[keyframe])`.
///
/// Aux state carries forward from `keyframe - 1` (or its default) and is
/// recorded at `keyframe`. The processed time is stamped at `keyframe` and the
/// last processed keyframe never moves backwards. The budget is not charged.
///
/// Returns the buffer that lacked a required entry.
pub(crate) fn simulate_keyframe<S: Simulation>(
    buffers: &mut BufferSet<S>,
    tick: &mut TickState,
    keyframe: Keyframe,
    frame: &InputFrame<S::Input>,
) -> Result<(), BufferKind> {
    let prev_keyframe = keyframe - 1;
    let prev = buffers
        .sync
        .find(prev_keyframe)
        .cloned()
        .ok_or(BufferKind::Sync)?;
    let aux = buffers.aux.find(prev_keyframe).cloned().unwrap_or_default();

    if buffers.sync.next_keyframe() != keyframe {
        buffers.sync.reset_next_head_keyframe(keyframe);
    }
    let next = buffers.sync.get_write_next();
    S::update(
        frame.frame_delta_time.to_real_seconds(),
        &frame.cmd,
        &prev,
        next,
        &aux,
    );

    if buffers.aux.next_keyframe() != keyframe {
        buffers.aux.reset_next_head_keyframe(keyframe);
    }
    buffers.aux.push(aux);

    tick.increment_total_processed_simulation_time(frame.frame_delta_time, keyframe);
    if keyframe > tick.last_processed_input_keyframe {
        tick.last_processed_input_keyframe = keyframe;
    }
    tracing::trace!(group = S::GROUP_NAME, %keyframe, "simulated keyframe");
    Ok(())
}

/// What the input-consumption loop did during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TickOutcome {
    /// Sync was rebased after a continuity break (or initialized on the first tick).
    pub rebased: bool,
    /// Number of input commands consumed.
    pub processed: usize,
}

impl TickOutcome {
    pub fn produced_state(&self) -> bool {
        self.rebased || self.processed > 0
    }
}

/// One step of a dependent rollback: re-simulate `delta` tied to the parent's `keyframe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackStep {
    /// Simulation time of this step.
    pub delta: SimTime,
    /// The parent keyframe this step replays.
    pub keyframe: Keyframe,
}

/// The window of time a corrected parent re-simulated, to be replayed by its dependents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackPlan {
    /// The parent keyframe the correction started from.
    pub parent_keyframe: Keyframe,
    /// Total simulation time covered by the steps.
    pub rollback_delta: SimTime,
    /// The replayed steps, oldest first. May be empty.
    pub steps: SmallVec<[RollbackStep; 8]>,
}

impl RollbackPlan {
    fn starting_at(parent_keyframe: Keyframe) -> Self {
        Self {
            parent_keyframe,
            rollback_delta: SimTime::ZERO,
            steps: SmallVec::new(),
        }
    }

    fn push(&mut self, delta: SimTime, keyframe: Keyframe) {
        self.rollback_delta += delta;
        self.steps.push(RollbackStep { delta, keyframe });
    }
}

/// Result of reconciling one simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The keyframe the local state was corrected at, if a correction happened.
    pub corrected_at: Option<Keyframe>,
    /// Window dependents of this simulation must roll back over.
    pub dependent_rollback: Option<RollbackPlan>,
    /// A dependent simulated proxy left its correction to its parent.
    pub defer_to_parent: bool,
}

/// The newest authoritative state received for a simulation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AuthoritativeFrame<T> {
    pub keyframe: Keyframe,
    pub total_time: SimTime,
    pub state: T,
}

/// Writes the authority's newest sync state, or an empty marker if it has none yet.
///
/// Returns the keyframe written ([`Keyframe::NULL`] for the marker).
pub(crate) fn save_authoritative<S: Simulation>(
    archive: &mut NetArchive<'_>,
    buffers: &BufferSet<S>,
    tick: &TickState,
) -> Result<Keyframe, NetSimError> {
    let keyframe = buffers.sync.head_keyframe();
    let Some(state) = buffers.sync.head() else {
        archive.write(&false)?;
        return Ok(Keyframe::NULL);
    };
    let total_time = tick
        .simulation_time_at(keyframe)
        .unwrap_or_else(|| tick.total_processed_simulation_time());
    archive.write(&true)?;
    archive.write(&keyframe)?;
    archive.write(&total_time)?;
    archive.write(state)?;
    Ok(keyframe)
}

/// Reads what [`save_authoritative`] wrote.
pub(crate) fn load_authoritative<S: Simulation>(
    archive: &mut NetArchive<'_>,
) -> Result<Option<AuthoritativeFrame<S::Sync>>, NetSimError> {
    if !archive.read::<bool>()? {
        return Ok(None);
    }
    let keyframe: Keyframe = archive.read()?;
    let total_time: SimTime = archive.read()?;
    let state: S::Sync = archive.read()?;
    if !keyframe.is_acceptable_remote() {
        return Err(NetSimError::Serialization {
            context: format!("authoritative state at out-of-range keyframe {}", keyframe),
        });
    }
    Ok(Some(AuthoritativeFrame {
        keyframe,
        total_time,
        state,
    }))
}

/// Corrects the local prediction against `frame` and replays inputs up to the
/// last processed keyframe.
///
/// Shared by the owning client and extrapolating simulated proxies. With
/// `forced`, the rollback plan for dependents is produced even if the states match.
pub(crate) fn reconcile_prediction<S: Simulation, D: SimulationDriver<S>>(
    ctx: &mut SimContext<'_, S, D>,
    frame: &AuthoritativeFrame<S::Sync>,
    forced: bool,
) -> Result<ReconcileOutcome, NetSimError> {
    let keyframe = frame.keyframe;
    let last_processed = ctx.tick.last_processed_input_keyframe;

    if keyframe > last_processed {
        // The authority is ahead of the local prediction: jump to its state.
        tracing::debug!(
            group = S::GROUP_NAME,
            %keyframe,
            %last_processed,
            "authoritative state ahead of prediction"
        );
        ctx.buffers.sync.reset_next_head_keyframe(keyframe);
        ctx.buffers.sync.push(frame.state.clone());
        if ctx.buffers.input.next_keyframe() <= keyframe {
            ctx.buffers.input.reset_next_head_keyframe(keyframe + 1);
        }
        ctx.tick.last_processed_input_keyframe = keyframe;
        ctx.tick
            .set_total_processed_simulation_time(frame.total_time, keyframe);
        ctx.finalize_head();
        return Ok(ReconcileOutcome {
            corrected_at: Some(keyframe),
            dependent_rollback: Some(RollbackPlan::starting_at(keyframe)),
            defer_to_parent: false,
        });
    }

    let diverged = match ctx.buffers.sync.find(keyframe) {
        Some(predicted) => S::should_reconcile(&frame.state, predicted),
        None => {
            let debug_name = ctx.driver.debug_name();
            let violation = SimViolation::new(
                ViolationSeverity::Warning,
                ViolationKind::Reconciliation,
                format!("{}: no local history at authoritative keyframe", debug_name),
                concat!(file!(), ":", line!()),
            )
            .with_keyframe(keyframe)
            .with_context("sync_tail", ctx.buffers.sync.tail_keyframe().to_string())
            .with_context("last_processed", last_processed.to_string());
            report_violation_to!(ctx.observer, violation);
            true
        },
    };

    if !diverged && !forced {
        return Ok(ReconcileOutcome::default());
    }

    if diverged {
        tracing::debug!(
            group = S::GROUP_NAME,
            %keyframe,
            %last_processed,
            "correcting predicted state"
        );
        ctx.buffers.sync.reset_next_head_keyframe(keyframe);
        ctx.buffers.sync.push(frame.state.clone());
        ctx.tick
            .set_total_processed_simulation_time(frame.total_time, keyframe);
    }

    let mut plan = RollbackPlan::starting_at(keyframe);
    let mut replay_keyframe = keyframe + 1;
    while replay_keyframe <= last_processed {
        let Some(input) = ctx.buffers.input.find(replay_keyframe).cloned() else {
            // Leaves Sync behind LastProcessedInputKeyframe; the next tick rebases.
            report_violation_to!(
                ctx.observer,
                ViolationSeverity::Warning,
                ViolationKind::Reconciliation,
                "input {} evicted before it could be replayed",
                replay_keyframe
            );
            break;
        };
        if diverged {
            ctx.simulate(replay_keyframe, &input)?;
        }
        plan.push(input.frame_delta_time, replay_keyframe);
        replay_keyframe += 1;
    }

    if diverged && ctx.buffers.sync.head_keyframe() == last_processed {
        ctx.finalize_head();
    }

    Ok(ReconcileOutcome {
        corrected_at: diverged.then_some(keyframe),
        dependent_rollback: Some(plan),
        defer_to_parent: false,
    })
}

/// Buffers and settings a replicator may touch while serializing.
pub(crate) struct ProxyContext<'a, S: Simulation> {
    pub buffers: &'a mut BufferSet<S>,
    pub tick: &'a mut TickState,
    pub config: &'a SimulationConfig,
    pub observer: &'a Option<Arc<dyn ViolationObserver>>,
}

/// Serialization side of a replicator.
pub(crate) trait ProxyReplicator<S: Simulation> {
    /// Writes to a saving archive or reads from a loading one.
    fn net_serialize(
        &mut self,
        archive: &mut NetArchive<'_>,
        ctx: &mut ProxyContext<'_, S>,
    ) -> Result<(), NetSimError>;

    /// Change counter the replication layer compares to decide whether to send.
    fn dirty_count(&self, buffers: &BufferSet<S>) -> u32;

    /// The newest keyframe written or read by the last `net_serialize`.
    fn last_serialized_keyframe(&self) -> Keyframe;
}

/// All replicators of one simulation.
pub(crate) struct Replicators<S: Simulation> {
    pub server_rpc: ServerRpcReplicator,
    pub autonomous: AutonomousReplicator<S>,
    pub simulated: SimulatedReplicator<S>,
    pub replay: SequenceReplicator<S::Sync>,
    pub debug: Option<DebugReplicator>,
}

impl<S: Simulation> Replicators<S> {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            server_rpc: ServerRpcReplicator::new(),
            autonomous: AutonomousReplicator::new(),
            simulated: SimulatedReplicator::new(
                config.simulated_update_mode,
                config.interpolation_delay.into(),
            ),
            replay: SequenceReplicator::new(REPLAY_SEQUENCE_LENGTH),
            debug: config
                .debug_buffers
                .then(|| DebugReplicator::new(config.buffer_sizes.debug)),
        }
    }

    /// Selects the role replicator for `role`.
    pub fn for_role(&mut self, role: NetRole) -> RoleReplicator<'_, S> {
        match role {
            NetRole::Authority => RoleReplicator::Authority(&mut self.server_rpc),
            NetRole::AutonomousProxy => RoleReplicator::AutonomousProxy(&mut self.autonomous),
            NetRole::SimulatedProxy => RoleReplicator::SimulatedProxy(&mut self.simulated),
        }
    }

    /// Selects the replicator serializing `target`. `None` for an unavailable target.
    pub fn for_target(&mut self, target: ReplicationTarget) -> Option<&mut dyn ProxyReplicator<S>> {
        match target {
            ReplicationTarget::ServerRpc => Some(&mut self.server_rpc),
            ReplicationTarget::AutonomousProxy => Some(&mut self.autonomous),
            ReplicationTarget::SimulatedProxy => Some(&mut self.simulated),
            ReplicationTarget::Replay => Some(&mut self.replay),
            ReplicationTarget::Debug => self
                .debug
                .as_mut()
                .map(|debug| debug as &mut dyn ProxyReplicator<S>),
        }
    }

    /// Read-only variant of [`for_target`](Self::for_target).
    pub fn target(&self, target: ReplicationTarget) -> Option<&dyn ProxyReplicator<S>> {
        match target {
            ReplicationTarget::ServerRpc => Some(&self.server_rpc),
            ReplicationTarget::AutonomousProxy => Some(&self.autonomous),
            ReplicationTarget::SimulatedProxy => Some(&self.simulated),
            ReplicationTarget::Replay => Some(&self.replay),
            ReplicationTarget::Debug => self
                .debug
                .as_ref()
                .map(|debug| debug as &dyn ProxyReplicator<S>),
        }
    }
}

/// The role-specific behavior of a simulation, selected by [`NetRole`].
pub(crate) enum RoleReplicator<'r, S: Simulation> {
    Authority(&'r mut ServerRpcReplicator),
    AutonomousProxy(&'r mut AutonomousReplicator<S>),
    SimulatedProxy(&'r mut SimulatedReplicator<S>),
}

impl<S: Simulation> RoleReplicator<'_, S> {
    /// Whether the input-consumption loop runs for this role this tick.
    pub fn runs_simulation(&self) -> bool {
        match self {
            Self::Authority(_) | Self::AutonomousProxy(_) => true,
            Self::SimulatedProxy(simulated) => simulated.runs_simulation(),
        }
    }

    /// Populates the input buffer and refills the budget before consumption.
    pub fn pre_tick<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        params: &TickParameters,
        delta: SimTime,
    ) {
        match self {
            Self::Authority(server) => server.pre_tick(ctx, params, delta),
            Self::AutonomousProxy(autonomous) => autonomous.pre_tick(ctx, delta),
            Self::SimulatedProxy(simulated) => simulated.pre_tick(ctx, delta),
        }
    }

    /// Finalizes the frame after consumption.
    pub fn post_tick<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        outcome: &TickOutcome,
        delta: SimTime,
    ) {
        match self {
            Self::Authority(_) | Self::AutonomousProxy(_) => {
                if outcome.produced_state() {
                    ctx.finalize_head();
                }
            },
            Self::SimulatedProxy(simulated) => simulated.post_tick(ctx, outcome, delta),
        }
    }

    /// Applies received authoritative data.
    pub fn reconcile<D: SimulationDriver<S>>(
        &mut self,
        ctx: &mut SimContext<'_, S, D>,
        forced: bool,
        has_parent: bool,
    ) -> Result<ReconcileOutcome, NetSimError> {
        match self {
            Self::Authority(_) => Ok(ReconcileOutcome::default()),
            Self::AutonomousProxy(autonomous) => autonomous.reconcile(ctx, forced),
            Self::SimulatedProxy(simulated) => simulated.reconcile(ctx, forced, has_parent),
        }
    }
}

/// Writes the newest `count` entries of `buffer` newer than `after`.
///
/// Returns the newest keyframe written, or `after` if nothing was.
pub(crate) fn save_sequence<T: serde::Serialize>(
    archive: &mut NetArchive<'_>,
    buffer: &crate::buffers::KeyedRingBuffer<T>,
    after: Keyframe,
    count: usize,
) -> Result<Keyframe, NetSimError> {
    let entries: SmallVec<[(Keyframe, &T); 8]> = buffer
        .iter()
        .filter(|(keyframe, _)| after.is_null() || *keyframe > after)
        .collect();
    let skip = entries.len().saturating_sub(count);
    let entries = entries.get(skip..).unwrap_or_default();

    archive.write(&(entries.len() as u32))?;
    let Some((first, _)) = entries.first() else {
        return Ok(after);
    };
    archive.write(first)?;
    for (_, element) in entries {
        archive.write(*element)?;
    }
    Ok(entries
        .last()
        .map_or(after, |(keyframe, _)| *keyframe))
}

/// Reads what [`save_sequence`] wrote, appending entries newer than `dest`'s head.
///
/// Returns the newest keyframe read, or [`Keyframe::NULL`] if the sequence was empty.
pub(crate) fn load_sequence<T>(
    archive: &mut NetArchive<'_>,
    dest: &mut crate::buffers::KeyedRingBuffer<T>,
) -> Result<Keyframe, NetSimError>
where
    T: serde::de::DeserializeOwned + Default,
{
    let count: u32 = archive.read()?;
    if count == 0 {
        return Ok(Keyframe::NULL);
    }
    let first: Keyframe = archive.read()?;
    let last = i32::try_from(count - 1)
        .ok()
        .and_then(|span| first.checked_add(span))
        .filter(|last| first.is_valid() && last.is_acceptable_remote())
        .ok_or_else(|| NetSimError::Serialization {
            context: format!(
                "sequence of {} entries starting at keyframe {} is out of range",
                count, first
            ),
        })?;
    for keyframe in (first.as_i32()..=last.as_i32()).map(Keyframe::new) {
        let element: T = archive.read()?;
        let head = dest.head_keyframe();
        if head.is_null() || keyframe > head {
            if dest.next_keyframe() != keyframe {
                dest.reset_next_head_keyframe(keyframe);
            }
            dest.push(element);
        }
    }
    Ok(last)
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
    use crate::buffers::KeyedRingBuffer;

    fn filled(values: &[u32]) -> KeyedRingBuffer<u32> {
        let mut buffer = KeyedRingBuffer::with_capacity(8);
        for value in values {
            buffer.push(*value);
        }
        buffer
    }

    #[test]
    fn sequence_sends_only_newest_entries() {
        let source = filled(&[10, 11, 12, 13, 14]);
        let mut archive = NetArchive::saving();
        let newest = save_sequence(&mut archive, &source, Keyframe::NULL, 3).unwrap();
        assert_eq!(newest, Keyframe::new(4));

        let bytes = archive.into_bytes();
        let mut dest = KeyedRingBuffer::with_capacity(3);
        let mut loading = NetArchive::loading(&bytes);
        assert_eq!(load_sequence(&mut loading, &mut dest).unwrap(), Keyframe::new(4));
        assert_eq!(dest.tail_keyframe(), Keyframe::new(2));
        assert_eq!(dest.find(Keyframe::new(2)), Some(&12));
        assert_eq!(dest.head(), Some(&14));
        assert_eq!(loading.remaining(), 0);
    }

    #[test]
    fn sequence_skips_already_sent_entries() {
        let source = filled(&[1, 2, 3]);
        let mut archive = NetArchive::saving();
        let newest = save_sequence(&mut archive, &source, Keyframe::new(2), 8).unwrap();
        assert_eq!(newest, Keyframe::new(2));

        let mut archive = NetArchive::saving();
        let newest = save_sequence(&mut archive, &source, Keyframe::new(1), 8).unwrap();
        assert_eq!(newest, Keyframe::new(2));
        let bytes = archive.into_bytes();
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(8);
        load_sequence(&mut NetArchive::loading(&bytes), &mut dest).unwrap();
        assert_eq!(dest.head_keyframe(), Keyframe::new(2));
        assert_eq!(dest.len(), 1);
    }

    #[test]
    fn redundant_entries_are_ignored_on_load() {
        let source = filled(&[5, 6, 7]);
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(8);
        for _ in 0..2 {
            let mut archive = NetArchive::saving();
            save_sequence(&mut archive, &source, Keyframe::NULL, 8).unwrap();
            let bytes = archive.into_bytes();
            load_sequence(&mut NetArchive::loading(&bytes), &mut dest).unwrap();
        }
        assert_eq!(dest.len(), 3);
        assert_eq!(dest.dirty_count(), 3);
    }

    #[test]
    fn empty_sequence_reads_as_null() {
        let source: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(4);
        let mut archive = NetArchive::saving();
        save_sequence(&mut archive, &source, Keyframe::NULL, 4).unwrap();
        let bytes = archive.into_bytes();
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(4);
        assert!(load_sequence(&mut NetArchive::loading(&bytes), &mut dest)
            .unwrap()
            .is_null());
        assert!(dest.is_empty());
    }

    #[test]
    fn truncated_sequence_is_a_serialization_error() {
        let source = filled(&[1, 2, 3]);
        let mut archive = NetArchive::saving();
        save_sequence(&mut archive, &source, Keyframe::NULL, 3).unwrap();
        let bytes = archive.into_bytes();
        let truncated = &bytes[..bytes.len() - 2];
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(4);
        assert!(matches!(
            load_sequence(&mut NetArchive::loading(truncated), &mut dest),
            Err(NetSimError::Serialization { .. })
        ));
    }

    #[test]
    fn sequence_past_remote_keyframe_range_is_rejected() {
        let mut archive = NetArchive::saving();
        archive.write(&3u32).unwrap();
        archive.write(&Keyframe::new(i32::MAX - 1)).unwrap();
        for value in [1u32, 2, 3] {
            archive.write(&value).unwrap();
        }
        let bytes = archive.into_bytes();
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(4);
        assert!(matches!(
            load_sequence(&mut NetArchive::loading(&bytes), &mut dest),
            Err(NetSimError::Serialization { .. })
        ));
        assert!(dest.is_empty());
    }

    #[test]
    fn sequence_ending_at_max_remote_keyframe_loads() {
        let first = Keyframe::MAX_REMOTE - 1;
        let mut archive = NetArchive::saving();
        archive.write(&2u32).unwrap();
        archive.write(&first).unwrap();
        archive.write(&7u32).unwrap();
        archive.write(&8u32).unwrap();
        let bytes = archive.into_bytes();
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(4);
        let newest = load_sequence(&mut NetArchive::loading(&bytes), &mut dest).unwrap();
        assert_eq!(newest, Keyframe::MAX_REMOTE);
        assert_eq!(dest.head(), Some(&8));
    }

    #[test]
    fn rollback_plan_sums_steps() {
        let mut plan = RollbackPlan::starting_at(Keyframe::new(3));
        plan.push(SimTime::from_millis(16), Keyframe::new(4));
        plan.push(SimTime::from_millis(17), Keyframe::new(5));
        assert_eq!(plan.rollback_delta, SimTime::from_millis(33));
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].keyframe, Keyframe::new(5));
    }
}
