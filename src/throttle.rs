//! Send-rate gate for the client to server input RPC.
//!
//! Decouples the simulation tick rate from the network send rate: the host
//! asks [`ServerRpcThrottle::should_send`] once per frame and only invokes the
//! RPC when it returns `true`.

use crate::error::NetSimError;

/// Default maximum send rate.
pub const DEFAULT_SERVER_RPC_FREQUENCY_HZ: f32 = 999.0;

/// Leaky-bucket gate for the server RPC.
///
/// # Examples
///
/// ```
/// use netsim_model::ServerRpcThrottle;
///
/// let mut throttle = ServerRpcThrottle::new();
/// throttle.set_desired_frequency(10.0).unwrap();
///
/// // 60 fps host frames: one send within the first 7 frames.
/// let fired = (0..7).filter(|_| throttle.should_send(1.0 / 60.0)).count();
/// assert_eq!(fired, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerRpcThrottle {
    accumulated_seconds: f32,
    threshold_seconds: f32,
}

impl Default for ServerRpcThrottle {
    fn default() -> Self {
        Self {
            accumulated_seconds: 0.0,
            threshold_seconds: 1.0 / DEFAULT_SERVER_RPC_FREQUENCY_HZ,
        }
    }
}

impl ServerRpcThrottle {
    /// Creates a throttle sending at most [`DEFAULT_SERVER_RPC_FREQUENCY_HZ`] times per second.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the desired maximum send frequency.
    ///
    /// # Errors
    /// Returns [`NetSimError::InvalidConfig`] if `hz` is not a positive finite number.
    pub fn set_desired_frequency(&mut self, hz: f32) -> Result<(), NetSimError> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(NetSimError::InvalidConfig {
                info: format!("server RPC send frequency must be positive, got {}", hz),
            });
        }
        self.threshold_seconds = 1.0 / hz;
        Ok(())
    }

    /// The minimum interval between sends, in seconds.
    #[must_use]
    pub fn threshold_seconds(&self) -> f32 {
        self.threshold_seconds
    }

    /// Accumulates `delta_seconds` and reports whether the RPC should be sent now.
    ///
    /// A single delta is capped at the threshold, so one long stall yields at
    /// most one send and does not inflate later decisions.
    pub fn should_send(&mut self, delta_seconds: f32) -> bool {
        let delta = if delta_seconds.is_finite() {
            delta_seconds.clamp(0.0, self.threshold_seconds)
        } else {
            0.0
        };
        self.accumulated_seconds += delta;
        if self.accumulated_seconds >= self.threshold_seconds {
            self.accumulated_seconds -= self.threshold_seconds;
            return true;
        }
        false
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
    fn rejects_non_positive_frequency() {
        let mut throttle = ServerRpcThrottle::new();
        assert!(throttle.set_desired_frequency(0.0).is_err());
        assert!(throttle.set_desired_frequency(-5.0).is_err());
        assert!(throttle.set_desired_frequency(f32::NAN).is_err());
        assert!((throttle.threshold_seconds() - 1.0 / 999.0).abs() < 1e-9);
    }

    #[test]
    fn does_not_fire_before_threshold() {
        let mut throttle = ServerRpcThrottle::new();
        throttle.set_desired_frequency(10.0).unwrap();
        assert!(!throttle.should_send(0.05));
        assert!(!throttle.should_send(0.04));
        assert!(throttle.should_send(0.02));
    }

    #[test]
    fn long_stall_fires_once() {
        let mut throttle = ServerRpcThrottle::new();
        throttle.set_desired_frequency(10.0).unwrap();
        assert!(throttle.should_send(5.0));
        assert!(!throttle.should_send(0.0));
        assert!(!throttle.should_send(0.05));
    }

    #[test]
    fn fires_at_most_desired_rate() {
        let mut throttle = ServerRpcThrottle::new();
        throttle.set_desired_frequency(20.0).unwrap();
        let fired = (0..120).filter(|_| throttle.should_send(1.0 / 60.0)).count();
        // two seconds of 60 fps frames at 20 Hz
        assert!(fired <= 40);
        assert!(fired >= 39);
    }

    #[test]
    fn fast_rate_fires_every_frame() {
        let mut throttle = ServerRpcThrottle::new();
        let fired = (0..60).filter(|_| throttle.should_send(1.0 / 60.0)).count();
        assert_eq!(fired, 60);
    }
}
