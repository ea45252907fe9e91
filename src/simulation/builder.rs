use std::marker::PhantomData;
use std::sync::Arc;

use web_time::Duration;

use crate::telemetry::ViolationObserver;
use crate::{
    BudgetMode, BufferSizes, NetRole, NetSimError, NetworkSimulation, SimulatedUpdateMode,
    Simulation, SimulationConfig, SimulationDriver,
};

/// The [`SimulationBuilder`] builds [`NetworkSimulation`]s.
///
/// After setting all appropriate values, use [`SimulationBuilder::build`] to
/// consume the builder and create a simulation for a driver and role.
///
/// # Example
///
/// ```
/// use netsim_model::prelude::*;
/// use web_time::Duration;
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
/// # struct Host;
/// # impl SimulationDriver<Counter> for Host {
/// #     fn debug_name(&self) -> String { "host".into() }
/// #     fn init_sync_state(&self, out: &mut u32) { *out = 0; }
/// #     fn produce_input(&mut self, _dt: SimTime, out: &mut u8) { *out = 1; }
/// #     fn finalize_frame(&mut self, _state: &u32) {}
/// # }
/// let sim = SimulationBuilder::<Counter>::new()
///     .with_buffer_sizes(BufferSizes::minimal())
///     .with_simulated_update_mode(SimulatedUpdateMode::Extrapolate)
///     .with_interpolation_delay(Duration::from_millis(50))
///     .build(Host, NetRole::SimulatedProxy)
///     .unwrap();
/// assert_eq!(sim.simulated_update_mode(), SimulatedUpdateMode::Extrapolate);
/// ```
#[must_use = "SimulationBuilder must be consumed by calling build()"]
pub struct SimulationBuilder<S: Simulation> {
    config: SimulationConfig,
    /// Optional observer for violations. Defaults to logging through `tracing`.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    _simulation: PhantomData<fn() -> S>,
}

impl<S: Simulation> std::fmt::Debug for SimulationBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            config,
            violation_observer,
            _simulation,
        } = self;

        f.debug_struct("SimulationBuilder")
            .field("group", &S::GROUP_NAME)
            .field("config", config)
            .field("violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl<S: Simulation> Default for SimulationBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Simulation> SimulationBuilder<S> {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            config: SimulationConfig::default(),
            violation_observer: None,
            _simulation: PhantomData,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the buffer capacities.
    pub fn with_buffer_sizes(mut self, sizes: BufferSizes) -> Self {
        self.config.buffer_sizes = sizes;
        self
    }

    /// Allocates the debug and historic buffers and enables [`ReplicationTarget::Debug`](crate::ReplicationTarget::Debug).
    pub fn with_debug_buffers(mut self, enabled: bool) -> Self {
        self.config.debug_buffers = enabled;
        self
    }

    /// Sets how the frame delta refills the time budget.
    pub fn with_budget_mode(mut self, mode: BudgetMode) -> Self {
        self.config.budget_mode = mode;
        self
    }

    /// Sets how many of the newest input commands each server RPC carries.
    pub fn with_server_rpc_redundancy(mut self, redundancy: usize) -> Self {
        self.config.server_rpc_redundancy = redundancy;
        self
    }

    /// Sets the maximum server RPC send rate.
    ///
    /// # Errors
    /// Returns [`NetSimError::InvalidConfig`] if `hz` is not a positive finite number.
    pub fn with_send_frequency(mut self, hz: f32) -> Result<Self, NetSimError> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(NetSimError::InvalidConfig {
                info: format!("server RPC send frequency must be positive, got {}", hz),
            });
        }
        self.config.server_rpc_send_frequency_hz = hz;
        Ok(self)
    }

    /// Sets how a simulated proxy presents replicated state.
    pub fn with_simulated_update_mode(mut self, mode: SimulatedUpdateMode) -> Self {
        self.config.simulated_update_mode = mode;
        self
    }

    /// Sets how far interpolation trails the newest received state.
    pub fn with_interpolation_delay(mut self, delay: Duration) -> Self {
        self.config.interpolation_delay = delay;
        self
    }

    /// Sets a custom observer for violations.
    ///
    /// Without one, violations are logged through `tracing`.
    ///
    /// # Example
    ///
    /// ```
    /// use netsim_model::telemetry::CollectingObserver;
    /// use std::sync::Arc;
    ///
    /// let observer = Arc::new(CollectingObserver::new());
    /// // let builder = SimulationBuilder::<MySim>::new()
    /// //     .with_violation_observer(observer.clone());
    /// assert!(observer.is_empty());
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Validates the configuration and creates a simulation initialized for `role`.
    ///
    /// # Errors
    /// Returns [`NetSimError::InvalidConfig`] if the configuration is invalid.
    pub fn build<D: SimulationDriver<S>>(
        self,
        driver: D,
        role: NetRole,
    ) -> Result<NetworkSimulation<S, D>, NetSimError> {
        NetworkSimulation::new(driver, role, self.config, self.violation_observer)
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
    use crate::SimTime;

    struct Counter;

    impl Simulation for Counter {
        type Input = u8;
        type Sync = u32;
        type Aux = ();

        fn update(_dt: f32, input: &u8, prev: &u32, next: &mut u32, _aux: &()) {
            *next = prev + u32::from(*input);
        }
    }

    struct Host;

    impl SimulationDriver<Counter> for Host {
        fn debug_name(&self) -> String {
            "host".to_owned()
        }
        fn init_sync_state(&self, out: &mut u32) {
            *out = 0;
        }
        fn produce_input(&mut self, _delta: SimTime, out: &mut u8) {
            *out = 1;
        }
        fn finalize_frame(&mut self, _state: &u32) {}
    }

    #[test]
    fn build_rejects_zero_buffer() {
        let result = SimulationBuilder::<Counter>::new()
            .with_buffer_sizes(BufferSizes {
                sync: 0,
                ..BufferSizes::default()
            })
            .build(Host, NetRole::Authority);
        assert!(matches!(result, Err(NetSimError::InvalidConfig { .. })));
    }

    #[test]
    fn send_frequency_is_validated() {
        assert!(SimulationBuilder::<Counter>::new()
            .with_send_frequency(-1.0)
            .is_err());
        assert!(SimulationBuilder::<Counter>::new()
            .with_send_frequency(30.0)
            .is_ok());
    }

    #[test]
    fn build_initializes_for_role() {
        let sim = SimulationBuilder::<Counter>::new()
            .with_debug_buffers(true)
            .build(Host, NetRole::AutonomousProxy)
            .unwrap();
        assert_eq!(sim.role(), NetRole::AutonomousProxy);
        // Placeholder input at keyframe 0.
        assert_eq!(sim.buffers().input.head_keyframe(), crate::Keyframe::new(0));
        assert!(sim.historic_buffers().is_some());
        assert!(sim.debug_buffer().is_some());
    }
}
