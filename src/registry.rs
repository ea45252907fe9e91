//! Registry of simulations and the parent/dependent links between them.
//!
//! A dependent simulation is attached to a parent (a passenger to a vehicle,
//! for example). When the parent is corrected during reconciliation, its
//! dependents must roll back over the same window of time and re-simulate it
//! in lockstep. The [`SimulationRegistry`] owns type-erased simulations and
//! the [`DependencyGraph`], and performs that cascade in
//! [`SimulationRegistry::reconcile`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::NetSimError;
use crate::replicators::{ReconcileOutcome, RollbackPlan};
use crate::telemetry::{SimViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    report_violation_to, Keyframe, MaybeSendSync, NetArchive, NetRole, NetworkSimulation,
    ReplicationTarget, SimTime, Simulation, SimulationDriver, TickParameters,
};

/// Identifies a simulation registered in a [`SimulationRegistry`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimHandle(u32);

impl SimHandle {
    /// Creates a handle from a raw id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SimHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sim#{}", self.0)
    }
}

/// Parent/dependent links. Every simulation has at most one parent and the
/// links never form a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    parents: BTreeMap<SimHandle, SimHandle>,
    dependents: BTreeMap<SimHandle, BTreeSet<SimHandle>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The parent of `handle`.
    #[must_use]
    pub fn parent_of(&self, handle: SimHandle) -> Option<SimHandle> {
        self.parents.get(&handle).copied()
    }

    /// The dependents of `handle`, in handle order.
    pub fn dependents_of(&self, handle: SimHandle) -> impl Iterator<Item = SimHandle> + '_ {
        self.dependents
            .get(&handle)
            .into_iter()
            .flat_map(|dependents| dependents.iter().copied())
    }

    /// Whether `dependent` is registered under `parent`.
    #[must_use]
    pub fn is_dependent(&self, parent: SimHandle, dependent: SimHandle) -> bool {
        self.dependents
            .get(&parent)
            .is_some_and(|dependents| dependents.contains(&dependent))
    }

    /// Registers `dependent` under `parent`, detaching it from any previous parent.
    ///
    /// # Errors
    ///
    /// - [`NetSimError::DuplicateDependent`] if it is already registered under `parent`.
    /// - [`NetSimError::InvalidRequest`] if the link would create a cycle.
    pub fn add_dependent(
        &mut self,
        parent: SimHandle,
        dependent: SimHandle,
    ) -> Result<(), NetSimError> {
        if self.is_dependent(parent, dependent) {
            return Err(NetSimError::DuplicateDependent { parent, dependent });
        }
        if self.would_cycle(parent, dependent) {
            return Err(NetSimError::InvalidRequest {
                info: format!(
                    "making {} a dependent of {} would create a cycle",
                    dependent, parent
                ),
            });
        }
        self.detach(dependent);
        self.parents.insert(dependent, parent);
        self.dependents.entry(parent).or_default().insert(dependent);
        Ok(())
    }

    /// Removes `dependent` from `parent`. Returns `false` if it was not registered.
    pub fn remove_dependent(&mut self, parent: SimHandle, dependent: SimHandle) -> bool {
        if !self.is_dependent(parent, dependent) {
            return false;
        }
        self.detach(dependent);
        true
    }

    /// Sets or clears the parent of `child`. Setting the current parent again is a no-op.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] if the link would create a cycle.
    pub fn set_parent(
        &mut self,
        child: SimHandle,
        parent: Option<SimHandle>,
    ) -> Result<(), NetSimError> {
        match parent {
            Some(parent) if self.parent_of(child) == Some(parent) => Ok(()),
            Some(parent) => self.add_dependent(parent, child),
            None => {
                self.detach(child);
                Ok(())
            },
        }
    }

    /// Detaches every dependent of `parent`. Returns how many there were.
    pub fn clear_dependents(&mut self, parent: SimHandle) -> usize {
        let Some(dependents) = self.dependents.remove(&parent) else {
            return 0;
        };
        for dependent in &dependents {
            self.parents.remove(dependent);
        }
        dependents.len()
    }

    /// Removes `handle` and every link to or from it.
    pub fn remove(&mut self, handle: SimHandle) {
        self.detach(handle);
        self.clear_dependents(handle);
    }

    fn detach(&mut self, child: SimHandle) {
        let Some(parent) = self.parents.remove(&child) else {
            return;
        };
        if let Some(siblings) = self.dependents.get_mut(&parent) {
            siblings.remove(&child);
            if siblings.is_empty() {
                self.dependents.remove(&parent);
            }
        }
    }

    /// `dependent` is `parent` or one of its ancestors.
    fn would_cycle(&self, parent: SimHandle, dependent: SimHandle) -> bool {
        let mut current = Some(parent);
        while let Some(handle) = current {
            if handle == dependent {
                return true;
            }
            current = self.parent_of(handle);
        }
        false
    }
}

/// Object-safe view of a [`NetworkSimulation`], so simulations of different
/// [`Simulation`] types can share a registry.
pub trait NetworkSimulationModel: MaybeSendSync {
    /// The driver's debug name.
    fn debug_name(&self) -> String;
    /// The role of the most recent tick.
    fn role(&self) -> NetRole;
    /// See [`NetworkSimulation::tick`].
    fn tick(&mut self, params: &TickParameters) -> Result<(), NetSimError>;
    /// See [`NetworkSimulation::reconcile_as`].
    fn reconcile_as(
        &mut self,
        role: NetRole,
        has_parent: bool,
    ) -> Result<ReconcileOutcome, NetSimError>;
    /// See [`NetworkSimulation::net_serialize_proxy`].
    fn net_serialize_proxy(
        &mut self,
        target: ReplicationTarget,
        archive: &mut NetArchive<'_>,
    ) -> Result<(), NetSimError>;
    /// See [`NetworkSimulation::proxy_dirty_count`].
    fn proxy_dirty_count(&self, target: ReplicationTarget) -> Result<u32, NetSimError>;
    /// See [`NetworkSimulation::begin_rollback`].
    fn begin_rollback(
        &mut self,
        rollback_delta: SimTime,
        parent_keyframe: Keyframe,
    ) -> Result<(), NetSimError>;
    /// See [`NetworkSimulation::step_rollback`].
    fn step_rollback(
        &mut self,
        step: SimTime,
        parent_keyframe: Keyframe,
        final_step: bool,
    ) -> Result<(), NetSimError>;
    /// See [`NetworkSimulation::notify_dependent_needs_reconcile`].
    fn notify_dependent_needs_reconcile(&mut self);
    /// See [`NetworkSimulation::last_processed_input_keyframe`].
    fn last_processed_input_keyframe(&self) -> Keyframe;
    /// See [`NetworkSimulation::sync_checksum`].
    fn sync_checksum(&self, keyframe: Keyframe) -> Result<Option<u64>, NetSimError>;
}

impl<S: Simulation, D: SimulationDriver<S>> NetworkSimulationModel for NetworkSimulation<S, D> {
    fn debug_name(&self) -> String {
        NetworkSimulation::debug_name(self)
    }

    fn role(&self) -> NetRole {
        NetworkSimulation::role(self)
    }

    fn tick(&mut self, params: &TickParameters) -> Result<(), NetSimError> {
        NetworkSimulation::tick(self, params)
    }

    fn reconcile_as(
        &mut self,
        role: NetRole,
        has_parent: bool,
    ) -> Result<ReconcileOutcome, NetSimError> {
        NetworkSimulation::reconcile_as(self, role, has_parent)
    }

    fn net_serialize_proxy(
        &mut self,
        target: ReplicationTarget,
        archive: &mut NetArchive<'_>,
    ) -> Result<(), NetSimError> {
        NetworkSimulation::net_serialize_proxy(self, target, archive)
    }

    fn proxy_dirty_count(&self, target: ReplicationTarget) -> Result<u32, NetSimError> {
        NetworkSimulation::proxy_dirty_count(self, target)
    }

    fn begin_rollback(
        &mut self,
        rollback_delta: SimTime,
        parent_keyframe: Keyframe,
    ) -> Result<(), NetSimError> {
        NetworkSimulation::begin_rollback(self, rollback_delta, parent_keyframe)
    }

    fn step_rollback(
        &mut self,
        step: SimTime,
        parent_keyframe: Keyframe,
        final_step: bool,
    ) -> Result<(), NetSimError> {
        NetworkSimulation::step_rollback(self, step, parent_keyframe, final_step)
    }

    fn notify_dependent_needs_reconcile(&mut self) {
        NetworkSimulation::notify_dependent_needs_reconcile(self);
    }

    fn last_processed_input_keyframe(&self) -> Keyframe {
        NetworkSimulation::last_processed_input_keyframe(self)
    }

    fn sync_checksum(&self, keyframe: Keyframe) -> Result<Option<u64>, NetSimError> {
        NetworkSimulation::sync_checksum(self, keyframe)
    }
}

/// Owns simulations by [`SimHandle`] and the links between them.
///
/// # Example
///
/// ```
/// use netsim_model::prelude::*;
///
/// # struct Counter;
/// # impl Simulation for Counter {
/// #     type Input = u8;
/// #     type Sync = u32;
/// #     type Aux = ();
/// #     fn update(_dt: f32, input: &u8, prev: &u32, next: &mut u32, _aux: &()) {
/// #         *next = prev + u32::from(*input);
/// #     }
/// # }
/// # struct Host(&'static str);
/// # impl SimulationDriver<Counter> for Host {
/// #     fn debug_name(&self) -> String { self.0.into() }
/// #     fn init_sync_state(&self, out: &mut u32) { *out = 0; }
/// #     fn produce_input(&mut self, _dt: SimTime, out: &mut u8) { *out = 1; }
/// #     fn finalize_frame(&mut self, _state: &u32) {}
/// # }
/// let mut registry = SimulationRegistry::new();
/// let vehicle = registry.insert(
///     SimulationBuilder::<Counter>::new().build(Host("vehicle"), NetRole::AutonomousProxy)?,
/// );
/// let passenger = registry.insert(
///     SimulationBuilder::<Counter>::new().build(Host("passenger"), NetRole::SimulatedProxy)?,
/// );
///
/// registry.set_parent_simulation(passenger, Some(vehicle))?;
/// assert_eq!(registry.parent_simulation(passenger), Some(vehicle));
/// assert!(registry.add_dependent_simulation(vehicle, passenger).is_err());
/// # Ok::<(), NetSimError>(())
/// ```
#[derive(Default)]
pub struct SimulationRegistry {
    simulations: BTreeMap<SimHandle, Box<dyn NetworkSimulationModel>>,
    graph: DependencyGraph,
    next_handle: u32,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for SimulationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            simulations,
            graph,
            next_handle,
            violation_observer,
        } = self;

        f.debug_struct("SimulationRegistry")
            .field("simulations", &simulations.keys())
            .field("graph", graph)
            .field("next_handle", next_handle)
            .field("violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl SimulationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the observer graph violations are reported to.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Registers a simulation and returns its handle.
    pub fn insert<M: NetworkSimulationModel + 'static>(&mut self, simulation: M) -> SimHandle {
        let handle = SimHandle::new(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.simulations.insert(handle, Box::new(simulation));
        handle
    }

    /// Unregisters a simulation, detaching it from its parent and its dependents.
    pub fn remove(&mut self, handle: SimHandle) -> Option<Box<dyn NetworkSimulationModel>> {
        self.graph.remove(handle);
        self.simulations.remove(&handle)
    }

    /// Number of registered simulations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.simulations.len()
    }

    /// Returns `true` if no simulation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.simulations.is_empty()
    }

    /// The simulation behind `handle`.
    #[must_use]
    pub fn get(&self, handle: SimHandle) -> Option<&dyn NetworkSimulationModel> {
        self.simulations.get(&handle).map(|simulation| &**simulation)
    }

    /// Mutable access to the simulation behind `handle`.
    pub fn get_mut(
        &mut self,
        handle: SimHandle,
    ) -> Option<&mut (dyn NetworkSimulationModel + 'static)> {
        self.simulations
            .get_mut(&handle)
            .map(|simulation| &mut **simulation)
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Attaches `child` to `parent` (or detaches it with `None`).
    ///
    /// The new parent is flagged to reconcile, so the dependent is brought in
    /// line with it on the next network update.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] for an unknown handle or a cycle.
    pub fn set_parent_simulation(
        &mut self,
        child: SimHandle,
        parent: Option<SimHandle>,
    ) -> Result<(), NetSimError> {
        self.require(child)?;
        if let Some(parent) = parent {
            self.require(parent)?;
        }
        let changed = self.graph.parent_of(child) != parent;
        self.graph.set_parent(child, parent)?;
        if let (true, Some(parent)) = (changed, parent) {
            self.simulation_mut(parent)?.notify_dependent_needs_reconcile();
        }
        Ok(())
    }

    /// The parent of `child`.
    #[must_use]
    pub fn parent_simulation(&self, child: SimHandle) -> Option<SimHandle> {
        self.graph.parent_of(child)
    }

    /// Registers `dependent` under `parent` and flags the parent to reconcile.
    ///
    /// # Errors
    ///
    /// - [`NetSimError::DuplicateDependent`] if already registered. Fatal; also
    ///   reported as a critical violation.
    /// - [`NetSimError::InvalidRequest`] for an unknown handle or a cycle.
    pub fn add_dependent_simulation(
        &mut self,
        parent: SimHandle,
        dependent: SimHandle,
    ) -> Result<(), NetSimError> {
        self.require(parent)?;
        self.require(dependent)?;
        if let Err(err) = self.graph.add_dependent(parent, dependent) {
            if err.is_fatal() {
                let violation = SimViolation::new(
                    ViolationSeverity::Critical,
                    ViolationKind::DependencyGraph,
                    err.to_string(),
                    concat!(file!(), ":", line!()),
                )
                .with_context("parent", parent.to_string())
                .with_context("dependent", dependent.to_string());
                report_violation_to!(self.violation_observer, violation);
            }
            return Err(err);
        }
        self.simulation_mut(parent)?.notify_dependent_needs_reconcile();
        Ok(())
    }

    /// Removes `dependent` from `parent`. Returns `false` if it was not registered.
    pub fn remove_dependent_simulation(&mut self, parent: SimHandle, dependent: SimHandle) -> bool {
        self.graph.remove_dependent(parent, dependent)
    }

    /// Detaches every dependent of `parent`. Returns how many there were.
    pub fn clear_all_dependent_simulations(&mut self, parent: SimHandle) -> usize {
        self.graph.clear_dependents(parent)
    }

    /// The dependents of `parent`, in handle order.
    #[must_use]
    pub fn dependents(&self, parent: SimHandle) -> Vec<SimHandle> {
        self.graph.dependents_of(parent).collect()
    }

    /// Ticks one simulation.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] for an unknown handle, else see [`NetworkSimulation::tick`].
    pub fn tick(&mut self, handle: SimHandle, params: &TickParameters) -> Result<(), NetSimError> {
        self.simulation_mut(handle)?.tick(params)
    }

    /// Serializes one simulation for `target`.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] for an unknown handle, else see
    /// [`NetworkSimulation::net_serialize_proxy`].
    pub fn net_serialize_proxy(
        &mut self,
        handle: SimHandle,
        target: ReplicationTarget,
        archive: &mut NetArchive<'_>,
    ) -> Result<(), NetSimError> {
        self.simulation_mut(handle)?
            .net_serialize_proxy(target, archive)
    }

    /// Dirty count of one simulation for `target`.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] for an unknown handle, else see
    /// [`NetworkSimulation::proxy_dirty_count`].
    pub fn proxy_dirty_count(
        &self,
        handle: SimHandle,
        target: ReplicationTarget,
    ) -> Result<u32, NetSimError> {
        self.simulation(handle)?.proxy_dirty_count(target)
    }

    /// Reconciles one simulation and propagates the result through the graph.
    ///
    /// - If it deferred to its parent, the parent is flagged so its next
    ///   reconcile produces a rollback plan.
    /// - If it produced a rollback plan, every simulated-proxy dependent (and
    ///   theirs, recursively) rewinds and replays the plan step by step.
    ///
    /// # Errors
    ///
    /// [`NetSimError::InvalidRequest`] for an unknown handle, or any error of
    /// the reconcile or of a dependent's rollback.
    pub fn reconcile(
        &mut self,
        handle: SimHandle,
        role: NetRole,
    ) -> Result<ReconcileOutcome, NetSimError> {
        let parent = self.graph.parent_of(handle);
        let outcome = self
            .simulation_mut(handle)?
            .reconcile_as(role, parent.is_some())?;

        if outcome.defer_to_parent {
            if let Some(parent) = parent {
                self.simulation_mut(parent)?
                    .notify_dependent_needs_reconcile();
            }
        }
        if let Some(plan) = outcome.dependent_rollback.as_ref() {
            self.cascade_rollback(handle, plan)?;
        }
        Ok(outcome)
    }

    fn cascade_rollback(&mut self, parent: SimHandle, plan: &RollbackPlan) -> Result<(), NetSimError> {
        let dependents: Vec<SimHandle> = self.graph.dependents_of(parent).collect();
        for dependent in dependents {
            let simulation = self.simulation_mut(dependent)?;
            if simulation.role() != NetRole::SimulatedProxy {
                tracing::trace!(%parent, %dependent, "skipping rollback of non simulated proxy dependent");
                continue;
            }
            tracing::debug!(
                %parent,
                %dependent,
                parent_keyframe = %plan.parent_keyframe,
                steps = plan.steps.len(),
                "cascading rollback"
            );
            simulation.begin_rollback(plan.rollback_delta, plan.parent_keyframe)?;
            match plan.steps.split_last() {
                None => simulation.step_rollback(SimTime::ZERO, plan.parent_keyframe, true)?,
                Some((last, rest)) => {
                    for step in rest {
                        simulation.step_rollback(step.delta, step.keyframe, false)?;
                    }
                    simulation.step_rollback(last.delta, last.keyframe, true)?;
                },
            }
            self.cascade_rollback(dependent, plan)?;
        }
        Ok(())
    }

    fn require(&self, handle: SimHandle) -> Result<(), NetSimError> {
        self.simulation(handle).map(|_| ())
    }

    fn simulation(&self, handle: SimHandle) -> Result<&dyn NetworkSimulationModel, NetSimError> {
        self.get(handle).ok_or_else(|| unknown_handle(handle))
    }

    fn simulation_mut(
        &mut self,
        handle: SimHandle,
    ) -> Result<&mut (dyn NetworkSimulationModel + 'static), NetSimError> {
        self.get_mut(handle).ok_or_else(|| unknown_handle(handle))
    }
}

fn unknown_handle(handle: SimHandle) -> NetSimError {
    NetSimError::InvalidRequest {
        info: format!("unknown simulation handle {}", handle),
    }
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

    fn h(id: u32) -> SimHandle {
        SimHandle::new(id)
    }

    #[test]
    fn duplicate_dependent_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependent(h(0), h(1)).unwrap();
        assert_eq!(
            graph.add_dependent(h(0), h(1)),
            Err(NetSimError::DuplicateDependent {
                parent: h(0),
                dependent: h(1),
            })
        );
    }

    #[test]
    fn reparenting_detaches_from_old_parent() {
        let mut graph = DependencyGraph::new();
        graph.set_parent(h(2), Some(h(0))).unwrap();
        graph.set_parent(h(2), Some(h(1))).unwrap();
        assert_eq!(graph.parent_of(h(2)), Some(h(1)));
        assert_eq!(graph.dependents_of(h(0)).count(), 0);
        assert_eq!(graph.dependents_of(h(1)).collect::<Vec<_>>(), vec![h(2)]);
    }

    #[test]
    fn setting_same_parent_twice_is_a_no_op() {
        let mut graph = DependencyGraph::new();
        graph.set_parent(h(1), Some(h(0))).unwrap();
        graph.set_parent(h(1), Some(h(0))).unwrap();
        assert_eq!(graph.dependents_of(h(0)).count(), 1);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependent(h(0), h(1)).unwrap();
        graph.add_dependent(h(1), h(2)).unwrap();
        assert!(matches!(
            graph.add_dependent(h(2), h(0)),
            Err(NetSimError::InvalidRequest { .. })
        ));
        assert!(graph.set_parent(h(3), Some(h(3))).is_err());
    }

    #[test]
    fn remove_clears_both_directions() {
        let mut graph = DependencyGraph::new();
        graph.add_dependent(h(0), h(1)).unwrap();
        graph.add_dependent(h(1), h(2)).unwrap();
        graph.remove(h(1));
        assert_eq!(graph.parent_of(h(2)), None);
        assert_eq!(graph.dependents_of(h(0)).count(), 0);
        assert_eq!(graph, DependencyGraph::new());
    }

    #[test]
    fn clear_dependents_counts() {
        let mut graph = DependencyGraph::new();
        graph.add_dependent(h(0), h(1)).unwrap();
        graph.add_dependent(h(0), h(2)).unwrap();
        assert_eq!(graph.clear_dependents(h(0)), 2);
        assert_eq!(graph.parent_of(h(1)), None);
        assert!(!graph.remove_dependent(h(0), h(2)));
    }

    #[test]
    fn handle_display() {
        assert_eq!(h(7).to_string(), "sim#7");
    }
}
