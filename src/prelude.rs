//! Convenient re-exports for common usage.
//!
//! ```rust
//! use netsim_model::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - **Core traits**: [`Simulation`], [`SimulationDriver`], [`NetworkSimulationModel`]
//! - **Simulation types**: [`NetworkSimulation`], [`SimulationBuilder`], [`SimulationRegistry`], [`SimHandle`]
//! - **Fundamental types**: [`Keyframe`], [`SimTime`], [`NetRole`], [`TickParameters`], [`NULL_KEYFRAME`]
//! - **Replication**: [`ReplicationTarget`], [`NetArchive`], [`ServerRpcThrottle`], [`SimulatedUpdateMode`]
//! - **Reconciliation**: [`ReconcileOutcome`], [`RollbackPlan`], [`RollbackStep`]
//! - **Configuration**: [`SimulationConfig`], [`BufferSizes`], [`BudgetMode`]
//! - **Error handling**: [`NetSimError`]

pub use crate::{
    BudgetMode, BufferSizes, Keyframe, NetArchive, NetRole, NetSimError, NetworkSimulation,
    NetworkSimulationModel, ReconcileOutcome, ReplicationTarget, RollbackPlan, RollbackStep,
    ServerRpcThrottle, SimHandle, SimTime, SimulatedUpdateMode, Simulation, SimulationBuilder,
    SimulationConfig, SimulationDriver, SimulationRegistry, TickParameters, NULL_KEYFRAME,
};

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
    fn prelude_exports_fundamentals() {
        assert!(Keyframe::new(NULL_KEYFRAME).is_null());
        assert_eq!(SimTime::from_millis(5).as_millis(), 5);
        assert_eq!(BufferSizes::default(), SimulationConfig::default().buffer_sizes);
        assert_eq!(ReplicationTarget::try_from(2).unwrap(), ReplicationTarget::SimulatedProxy);
    }
}
