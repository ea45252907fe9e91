//! # netsim-model
//!
//! A client/server predictive simulation model. Each simulated entity advances a
//! deterministic update function over keyframed input commands, replicates its
//! buffers according to its network role, and reconciles local predictions
//! against authoritative state after network updates arrive.
//!
//! The host drives everything synchronously:
//!
//! - [`NetworkSimulation::tick`] once per host frame,
//! - [`NetworkSimulation::net_serialize_proxy`] when the replication layer sends or receives,
//! - [`NetworkSimulation::reconcile`] after a network update was applied.
//!
//! Parent/dependent links between simulations (so a parent correction can
//! roll dependents back) live in a [`SimulationRegistry`].
//!
//! ```
//! use netsim_model::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! struct Mover;
//!
//! #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
//! struct Position(i64);
//!
//! impl Simulation for Mover {
//!     type Input = i64;
//!     type Sync = Position;
//!     type Aux = ();
//!
//!     fn update(_dt: f32, input: &i64, prev: &Position, next: &mut Position, _aux: &()) {
//!         next.0 = prev.0 + input;
//!     }
//! }
//!
//! struct Pawn;
//!
//! impl SimulationDriver<Mover> for Pawn {
//!     fn debug_name(&self) -> String {
//!         "pawn".to_owned()
//!     }
//!     fn init_sync_state(&self, out: &mut Position) {
//!         *out = Position(0);
//!     }
//!     fn produce_input(&mut self, _dt: SimTime, out: &mut i64) {
//!         *out = 1;
//!     }
//!     fn finalize_frame(&mut self, _state: &Position) {}
//! }
//!
//! let mut sim = SimulationBuilder::<Mover>::new()
//!     .build(Pawn, NetRole::AutonomousProxy)
//!     .unwrap();
//! for _ in 0..3 {
//!     sim.tick(&TickParameters::new(NetRole::AutonomousProxy, 1.0 / 60.0)).unwrap();
//! }
//! assert_eq!(sim.last_processed_input_keyframe(), Keyframe::new(3));
//! assert_eq!(sim.sync_state(Keyframe::new(3)), Some(&Position(3)));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

pub use error::{BufferKind, NetSimError};
pub use network::archive::NetArchive;
pub use registry::{DependencyGraph, NetworkSimulationModel, SimHandle, SimulationRegistry};
pub use replicators::{ReconcileOutcome, RollbackPlan, RollbackStep};
pub use sim_time::SimTime;
pub use simulation::builder::SimulationBuilder;
pub use simulation::config::{BufferSizes, SimulationConfig};
pub use simulation::NetworkSimulation;
pub use throttle::{ServerRpcThrottle, DEFAULT_SERVER_RPC_FREQUENCY_HZ};
pub use tick_state::BudgetMode;

#[doc(hidden)]
pub mod buffers;
#[doc(hidden)]
pub mod error;
#[doc(hidden)]
pub mod frame_info;
pub mod hash;
pub mod prelude;
#[doc(hidden)]
pub mod registry;
#[doc(hidden)]
pub mod replicators;
#[doc(hidden)]
pub mod sim_time;
#[doc(hidden)]
pub mod simulation;
pub mod telemetry;
#[doc(hidden)]
pub mod throttle;
#[doc(hidden)]
pub mod tick_state;
#[doc(hidden)]
pub mod network {
    /// Serialization context handed to replicators.
    pub mod archive;
    /// Binary codec for replication payloads.
    ///
    /// Centralizes the bincode configuration so every peer encodes identically.
    pub mod codec;
}

/// Internal module exposing implementation details for testing and benchmarks.
///
/// # WARNING: No Stability Guarantees
///
/// **This module is NOT part of the public API.** Everything here may change
/// without notice and is not covered by semver. It exists so property tests
/// and benchmarks can drive the buffers and time tracker directly.
#[doc(hidden)]
pub mod __internal {
    pub use crate::buffers::{BufferSet, HistoricBuffers, KeyedRingBuffer};
    pub use crate::frame_info::{DebugState, InputFrame};
    pub use crate::network::codec::{decode, decode_value, encode, encode_append};
    pub use crate::tick_state::TickState;
}

// #############
// # KEYFRAMES #
// #############

/// Raw value of [`Keyframe::NULL`].
pub const NULL_KEYFRAME: i32 = -1;

/// One discrete simulation step.
///
/// Keyframes increase strictly. Keyframe 0 holds the synthesized initial sync
/// state, so input keyframe 0 is never processed. [`Keyframe::NULL`] (-1) is the
/// "empty" sentinel returned by buffers that hold nothing.
///
/// # Examples
///
/// ```
/// use netsim_model::Keyframe;
///
/// let first = Keyframe::new(0);
/// assert!(first.is_valid());
/// assert!(Keyframe::NULL.is_null());
///
/// let next = first + 1;
/// assert_eq!(next.as_i32(), 1);
/// assert_eq!(next - first, 1);
/// assert!(next > first);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Keyframe(i32);

impl Keyframe {
    /// The "no keyframe" sentinel.
    pub const NULL: Keyframe = Keyframe(NULL_KEYFRAME);

    /// Largest keyframe accepted from a remote peer.
    ///
    /// Leaves headroom so buffers advancing past a received keyframe cannot overflow.
    pub const MAX_REMOTE: Keyframe = Keyframe(i32::MAX / 2);

    /// Creates a keyframe. Does not validate the value.
    #[inline]
    #[must_use]
    pub const fn new(keyframe: i32) -> Self {
        Keyframe(keyframe)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` for [`Keyframe::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_KEYFRAME
    }

    /// Returns `true` if this keyframe is non-negative.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// `self + rhs`, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: i32) -> Option<Keyframe> {
        match self.0.checked_add(rhs) {
            Some(keyframe) => Some(Keyframe(keyframe)),
            None => None,
        }
    }

    /// Returns `true` for keyframes a remote peer may legitimately send:
    /// valid and no larger than [`Keyframe::MAX_REMOTE`].
    #[inline]
    #[must_use]
    pub const fn is_acceptable_remote(self) -> bool {
        self.is_valid() && self.0 <= Self::MAX_REMOTE.0
    }

    /// `Some(self)` for valid keyframes, `None` otherwise.
    #[inline]
    #[must_use]
    pub const fn to_option(self) -> Option<Keyframe> {
        if self.is_valid() {
            Some(self)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Keyframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_KEYFRAME")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Keyframe {
    type Output = Keyframe;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Keyframe(self.0 + rhs)
    }
}

impl std::ops::AddAssign<i32> for Keyframe {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 += rhs;
    }
}

impl std::ops::Sub<i32> for Keyframe {
    type Output = Keyframe;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        Keyframe(self.0 - rhs)
    }
}

impl std::ops::Sub<Keyframe> for Keyframe {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Keyframe) -> Self::Output {
        self.0 - rhs.0
    }
}

impl std::ops::SubAssign<i32> for Keyframe {
    #[inline]
    fn sub_assign(&mut self, rhs: i32) {
        self.0 -= rhs;
    }
}

impl From<i32> for Keyframe {
    #[inline]
    fn from(value: i32) -> Self {
        Keyframe(value)
    }
}

impl From<Keyframe> for i32 {
    #[inline]
    fn from(keyframe: Keyframe) -> Self {
        keyframe.0
    }
}

impl PartialEq<i32> for Keyframe {
    #[inline]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Keyframe {
    #[inline]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

// #############
// #   ENUMS   #
// #############

/// The network role a simulation is ticked under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum NetRole {
    /// The server. Has final say over the simulation outcome.
    Authority,
    /// The client that owns the input for this simulation and predicts ahead.
    AutonomousProxy,
    /// A client observing a simulation it does not control.
    SimulatedProxy,
}

impl std::fmt::Display for NetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authority => write!(f, "Authority"),
            Self::AutonomousProxy => write!(f, "AutonomousProxy"),
            Self::SimulatedProxy => write!(f, "SimulatedProxy"),
        }
    }
}

/// Selects which replicator [`NetworkSimulation::net_serialize_proxy`] runs.
///
/// Hosts that carry the target on the wire convert it with `u8::from` and
/// [`ReplicationTarget::try_from`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReplicationTarget {
    /// Client to server input commands.
    ServerRpc = 0,
    /// Server to owning client: authoritative state for reconciliation.
    AutonomousProxy = 1,
    /// Server to observing clients: authoritative state for interpolation/extrapolation.
    SimulatedProxy = 2,
    /// Recent sync states for replays.
    Replay = 3,
    /// Server to client debug states. Only available with debug buffers enabled.
    Debug = 4,
}

impl ReplicationTarget {
    /// All targets, in wire order.
    pub const ALL: [ReplicationTarget; 5] = [
        Self::ServerRpc,
        Self::AutonomousProxy,
        Self::SimulatedProxy,
        Self::Replay,
        Self::Debug,
    ];

    /// The wire value of this target.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<ReplicationTarget> for u8 {
    fn from(target: ReplicationTarget) -> Self {
        target.as_u8()
    }
}

impl TryFrom<u8> for ReplicationTarget {
    type Error = NetSimError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|target| target.as_u8() == value)
            .ok_or(NetSimError::UnknownReplicationTarget { target: value })
    }
}

impl std::fmt::Display for ReplicationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerRpc => write!(f, "ServerRPC"),
            Self::AutonomousProxy => write!(f, "AutonomousProxy"),
            Self::SimulatedProxy => write!(f, "SimulatedProxy"),
            Self::Replay => write!(f, "Replay"),
            Self::Debug => write!(f, "Debug"),
        }
    }
}

/// How a simulated proxy presents replicated state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SimulatedUpdateMode {
    /// Never run the update function locally. Received states are buffered and
    /// blended with [`Simulation::interpolate`] at a delayed playback time.
    #[default]
    Interpolate,
    /// Synthesize input locally and simulate ahead, reconciling like the owning client.
    Extrapolate,
}

/// Arguments of one [`NetworkSimulation::tick`] call.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TickParameters {
    /// The role this simulation is ticked under.
    pub role: NetRole,
    /// The host frame delta in seconds. Refills the simulation time budget.
    pub local_delta_time_seconds: f32,
    /// The host frame counter, recorded in debug states.
    pub frame_number: u64,
    /// Whether an authority produces its own input (listen server, bots).
    /// Autonomous proxies always produce input; simulated proxies never do.
    pub generate_local_input: bool,
}

impl TickParameters {
    /// Parameters for a tick of `local_delta_time_seconds` under `role`.
    #[must_use]
    pub fn new(role: NetRole, local_delta_time_seconds: f32) -> Self {
        Self {
            role,
            local_delta_time_seconds,
            frame_number: 0,
            generate_local_input: false,
        }
    }

    /// Sets the host frame number.
    #[must_use]
    pub fn with_frame_number(mut self, frame_number: u64) -> Self {
        self.frame_number = frame_number;
        self
    }

    /// Lets an authority produce local input this tick.
    #[must_use]
    pub fn with_local_input(mut self, generate_local_input: bool) -> Self {
        self.generate_local_input = generate_local_input;
        self
    }
}

// #############
// #  TRAITS   #
// #############

/// `Send + Sync` when the `sync-send` feature is enabled, no bound otherwise.
#[cfg(feature = "sync-send")]
pub trait MaybeSendSync: Send + Sync {}
#[cfg(feature = "sync-send")]
impl<T: Send + Sync + ?Sized> MaybeSendSync for T {}

/// `Send + Sync` when the `sync-send` feature is enabled, no bound otherwise.
#[cfg(not(feature = "sync-send"))]
pub trait MaybeSendSync {}
#[cfg(not(feature = "sync-send"))]
impl<T: ?Sized> MaybeSendSync for T {}

/// The simulation being synchronized: its buffer types and its update function.
///
/// Implement this on a marker type.
///
/// # Determinism
///
/// [`update`](Self::update) must be a pure function of its arguments and
/// produce identical output for identical input on every peer. Client-side
/// prediction and server reconciliation are only valid if it is. Reading any
/// hidden state from it is a bug.
pub trait Simulation: 'static {
    /// The command produced once per tick by whoever owns input.
    type Input: Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + MaybeSendSync;
    /// The evolving state. `Sync[K] = update(Sync[K-1], Input[K])`.
    type Sync: Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + MaybeSendSync;
    /// Auxiliary state that feeds the update function but does not evolve by itself.
    type Aux: Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + MaybeSendSync;

    /// Name used in log output.
    const GROUP_NAME: &'static str = "NetworkSimulation";

    /// Advances `prev` by `delta_seconds` using `input`, writing into `next`.
    ///
    /// `next` is a default-constructed slot.
    fn update(
        delta_seconds: f32,
        input: &Self::Input,
        prev: &Self::Sync,
        next: &mut Self::Sync,
        aux: &Self::Aux,
    );

    /// Decides whether a locally predicted state must be corrected to the authoritative one.
    ///
    /// Defaults to strict inequality. Override for tolerance-based comparison.
    fn should_reconcile(authoritative: &Self::Sync, predicted: &Self::Sync) -> bool {
        authoritative != predicted
    }

    /// Blends two received states for simulated proxies in
    /// [`SimulatedUpdateMode::Interpolate`]. `alpha` is in `[0, 1]`.
    ///
    /// Defaults to snapping: `from` until `alpha` reaches 1.
    fn interpolate(from: &Self::Sync, to: &Self::Sync, alpha: f32) -> Self::Sync {
        if alpha >= 1.0 {
            to.clone()
        } else {
            from.clone()
        }
    }
}

/// The host object driving a simulation. This is the interface to the outside world.
pub trait SimulationDriver<S: Simulation>: MaybeSendSync {
    /// Name for diagnostics. Recommended to include the entity name and role.
    fn debug_name(&self) -> String;

    /// Writes the initial (or current) sync state. Called on the first tick and
    /// whenever the sync buffer must be rebased after a discontinuity.
    fn init_sync_state(&self, out: &mut S::Sync);

    /// Writes a new local input command covering `delta` of simulation time.
    fn produce_input(&mut self, delta: SimTime, out: &mut S::Input);

    /// Called at the end of a frame in which new sync state became available.
    fn finalize_frame(&mut self, state: &S::Sync);
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
    fn keyframe_display_names_null() {
        assert_eq!(Keyframe::NULL.to_string(), "NULL_KEYFRAME");
        assert_eq!(Keyframe::new(12).to_string(), "12");
    }

    #[test]
    fn keyframe_arithmetic() {
        let mut k = Keyframe::new(5);
        k += 2;
        assert_eq!(k, 7);
        k -= 3;
        assert_eq!(k, Keyframe::new(4));
        assert_eq!(Keyframe::new(9) - Keyframe::new(4), 5);
        assert_eq!((Keyframe::new(9) - 4).as_i32(), 5);
        assert!(Keyframe::new(3) > 2);
    }

    #[test]
    fn remote_keyframes_are_bounded() {
        assert_eq!(Keyframe::new(i32::MAX).checked_add(1), None);
        assert_eq!(Keyframe::new(1).checked_add(2), Some(Keyframe::new(3)));
        assert!(Keyframe::new(0).is_acceptable_remote());
        assert!(Keyframe::MAX_REMOTE.is_acceptable_remote());
        assert!(!(Keyframe::MAX_REMOTE + 1).is_acceptable_remote());
        assert!(!Keyframe::NULL.is_acceptable_remote());
    }

    #[test]
    fn keyframe_option_round_trip() {
        assert_eq!(Keyframe::new(0).to_option(), Some(Keyframe::new(0)));
        assert_eq!(Keyframe::NULL.to_option(), None);
        assert_eq!(i32::from(Keyframe::from(17)), 17);
    }

    #[test]
    fn replication_target_wire_values() {
        for target in ReplicationTarget::ALL {
            assert_eq!(ReplicationTarget::try_from(u8::from(target)).unwrap(), target);
        }
        assert_eq!(ReplicationTarget::Debug.as_u8(), 4);
    }

    #[test]
    fn unknown_replication_target_is_fatal() {
        let err = ReplicationTarget::try_from(9).unwrap_err();
        assert_eq!(err, NetSimError::UnknownReplicationTarget { target: 9 });
        assert!(err.is_fatal());
    }

    #[test]
    fn tick_parameters_builder() {
        let params = TickParameters::new(NetRole::Authority, 0.5)
            .with_frame_number(42)
            .with_local_input(true);
        assert_eq!(params.frame_number, 42);
        assert!(params.generate_local_input);
        assert_eq!(params.role, NetRole::Authority);
    }

    #[test]
    fn simulated_mode_defaults_to_interpolate() {
        assert_eq!(SimulatedUpdateMode::default(), SimulatedUpdateMode::Interpolate);
    }
}
