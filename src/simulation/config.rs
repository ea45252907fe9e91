//! Configuration types for a [`NetworkSimulation`](crate::NetworkSimulation).
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `BufferSizes` | Capacity of each keyed buffer | `minimal()`, `high_latency()` |
//! | `SimulationConfig` | Buffers, budget, replication and proxy behavior | `Default` |
//!
//! # Example
//!
//! ```
//! use netsim_model::{BufferSizes, SimulationConfig};
//!
//! let config = SimulationConfig {
//!     buffer_sizes: BufferSizes::high_latency(),
//!     debug_buffers: true,
//!     ..SimulationConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use web_time::Duration;

use crate::error::NetSimError;
use crate::throttle::DEFAULT_SERVER_RPC_FREQUENCY_HZ;
use crate::{BudgetMode, SimulatedUpdateMode};

/// Default number of input commands the owning client resends with each server RPC.
pub const DEFAULT_SERVER_RPC_REDUNDANCY: usize = 4;

/// Capacity of each buffer, the parameters of `InitializeForNetworkRole`.
///
/// # Forward Compatibility
///
/// Use the `..BufferSizes::default()` pattern when constructing instances.
///
/// # Example
///
/// ```
/// use netsim_model::BufferSizes;
///
/// let sizes = BufferSizes { input: 64, ..BufferSizes::default() };
/// assert_eq!(sizes.sync, 32);
/// assert!(BufferSizes { aux: 0, ..sizes }.validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "BufferSizes has no effect unless passed to SimulationBuilder::with_buffer_sizes()"]
pub struct BufferSizes {
    /// Input command history. Bounds how far back a reconcile can replay.
    ///
    /// Default: 32
    pub input: usize,
    /// Sync state history. Also sizes the time stamp buffer.
    ///
    /// Default: 32
    pub sync: usize,
    /// Aux state history.
    ///
    /// Default: 32
    pub aux: usize,
    /// Debug state history, allocated only with debug buffers enabled.
    ///
    /// Default: 32
    pub debug: usize,
    /// Historic mirror size, allocated only with debug buffers enabled.
    ///
    /// Default: 128
    pub historic: usize,
}

impl Default for BufferSizes {
    fn default() -> Self {
        Self {
            input: 32,
            sync: 32,
            aux: 32,
            debug: 32,
            historic: 128,
        }
    }
}

impl BufferSizes {
    /// Creates sizes with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Small buffers for tests and simulations that never reconcile far back.
    pub fn minimal() -> Self {
        Self {
            input: 8,
            sync: 8,
            aux: 8,
            debug: 8,
            historic: 16,
        }
    }

    /// Deep history for links with long round trips, where corrections arrive
    /// many keyframes after the prediction.
    pub fn high_latency() -> Self {
        Self {
            input: 128,
            sync: 128,
            aux: 128,
            debug: 64,
            historic: 512,
        }
    }

    /// Validates that every buffer can hold at least one element.
    ///
    /// # Errors
    ///
    /// Returns [`NetSimError::InvalidConfig`] naming the first zero-sized buffer.
    pub fn validate(&self) -> Result<(), NetSimError> {
        let fields = [
            ("input", self.input),
            ("sync", self.sync),
            ("aux", self.aux),
            ("debug", self.debug),
            ("historic", self.historic),
        ];
        for (field, size) in fields {
            if size == 0 {
                return Err(NetSimError::InvalidConfig {
                    info: format!("{} buffer size must be at least 1", field),
                });
            }
        }
        Ok(())
    }
}

/// Everything a simulation is configured with.
///
/// # Forward Compatibility
///
/// Use the `..SimulationConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "SimulationConfig has no effect unless passed to SimulationBuilder::with_config()"]
pub struct SimulationConfig {
    /// Buffer capacities.
    pub buffer_sizes: BufferSizes,
    /// Allocate and populate the debug and historic buffers.
    ///
    /// Default: `false`
    pub debug_buffers: bool,
    /// How the frame delta refills the per-tick budget.
    ///
    /// Default: [`BudgetMode::PerTick`]
    pub budget_mode: BudgetMode,
    /// Newest input commands resent with every server RPC, so a lost packet does
    /// not stall the server.
    ///
    /// Default: 4
    pub server_rpc_redundancy: usize,
    /// Maximum server RPC send rate.
    ///
    /// Default: 999 Hz
    pub server_rpc_send_frequency_hz: f32,
    /// How a simulated proxy presents replicated state.
    ///
    /// Default: [`SimulatedUpdateMode::Interpolate`]
    pub simulated_update_mode: SimulatedUpdateMode,
    /// How far the interpolation playback clock trails the newest received state.
    ///
    /// Default: 100ms
    pub interpolation_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            buffer_sizes: BufferSizes::default(),
            debug_buffers: false,
            budget_mode: BudgetMode::default(),
            server_rpc_redundancy: DEFAULT_SERVER_RPC_REDUNDANCY,
            server_rpc_send_frequency_hz: DEFAULT_SERVER_RPC_FREQUENCY_HZ,
            simulated_update_mode: SimulatedUpdateMode::default(),
            interpolation_delay: Duration::from_millis(100),
        }
    }
}

impl SimulationConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NetSimError::InvalidConfig`] for zero buffer sizes, a zero
    /// redundancy, or a non-positive send frequency.
    pub fn validate(&self) -> Result<(), NetSimError> {
        self.buffer_sizes.validate()?;
        if self.server_rpc_redundancy == 0 {
            return Err(NetSimError::InvalidConfig {
                info: "server_rpc_redundancy must be at least 1".to_owned(),
            });
        }
        if self.server_rpc_redundancy > self.buffer_sizes.input {
            return Err(NetSimError::InvalidConfig {
                info: format!(
                    "server_rpc_redundancy ({}) exceeds the input buffer size ({})",
                    self.server_rpc_redundancy, self.buffer_sizes.input
                ),
            });
        }
        if !self.server_rpc_send_frequency_hz.is_finite() || self.server_rpc_send_frequency_hz <= 0.0
        {
            return Err(NetSimError::InvalidConfig {
                info: format!(
                    "server RPC send frequency must be positive, got {}",
                    self.server_rpc_send_frequency_hz
                ),
            });
        }
        Ok(())
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

    #[test]
    fn presets_are_valid() {
        assert!(BufferSizes::default().validate().is_ok());
        assert!(BufferSizes::minimal().validate().is_ok());
        assert!(BufferSizes::high_latency().validate().is_ok());
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_sized_buffer_is_named() {
        let err = BufferSizes {
            historic: 0,
            ..BufferSizes::default()
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("historic"));
    }

    #[test]
    fn redundancy_bounds() {
        let zero = SimulationConfig {
            server_rpc_redundancy: 0,
            ..SimulationConfig::default()
        };
        assert!(zero.validate().is_err());

        let too_many = SimulationConfig {
            buffer_sizes: BufferSizes::minimal(),
            server_rpc_redundancy: 9,
            ..SimulationConfig::default()
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn send_frequency_must_be_positive() {
        let config = SimulationConfig {
            server_rpc_send_frequency_hz: 0.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NetSimError::InvalidConfig { .. })
        ));
    }
}
