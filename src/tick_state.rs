//! Simulation time bookkeeping for one simulation instance.
//!
//! [`TickState`] tracks which input keyframe was consumed last, how much
//! simulation time the current tick may still consume, and the total processed
//! simulation time stamped against each keyframe.

use crate::buffers::KeyedRingBuffer;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{Keyframe, SimTime};

/// How the per-tick frame delta refills the simulation time budget.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BudgetMode {
    /// Each tick's frame delta replaces whatever budget is left over.
    #[default]
    PerTick,
    /// Unspent time carries over into the next tick.
    Accumulate,
}

/// Time tracker for a simulation.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing.
/// It is not part of the stable public API.
#[derive(Debug, Clone)]
pub struct TickState {
    /// The last input keyframe that was run through the update function. Only increases.
    pub(crate) last_processed_input_keyframe: Keyframe,
    /// Upper bound on the input keyframe that may be consumed this tick.
    pub(crate) max_allowed_input_keyframe: Keyframe,
    remaining_allowed_simulation_time: SimTime,
    total_processed_simulation_time: SimTime,
    /// Total processed simulation time at each keyframe.
    simulation_time_buffer: KeyedRingBuffer<SimTime>,
    budget_mode: BudgetMode,
}

impl Default for TickState {
    fn default() -> Self {
        Self::new(1, BudgetMode::default())
    }
}

impl TickState {
    /// Creates a tracker whose time stamp buffer holds `history` keyframes.
    #[must_use]
    pub fn new(history: usize, budget_mode: BudgetMode) -> Self {
        Self {
            last_processed_input_keyframe: Keyframe::new(0),
            max_allowed_input_keyframe: Keyframe::new(0),
            remaining_allowed_simulation_time: SimTime::ZERO,
            total_processed_simulation_time: SimTime::ZERO,
            simulation_time_buffer: KeyedRingBuffer::with_capacity(history),
            budget_mode,
        }
    }

    /// Resizes the time stamp buffer, discarding stamps.
    pub fn init_simulation_time_buffer(&mut self, history: usize) {
        self.simulation_time_buffer.set_capacity(history);
    }

    /// The last input keyframe consumed by the update function.
    #[must_use]
    pub fn last_processed_input_keyframe(&self) -> Keyframe {
        self.last_processed_input_keyframe
    }

    /// The newest input keyframe this tick is allowed to consume.
    #[must_use]
    pub fn max_allowed_input_keyframe(&self) -> Keyframe {
        self.max_allowed_input_keyframe
    }

    /// Simulation time still available to the current tick.
    #[must_use]
    pub fn remaining_allowed_simulation_time(&self) -> SimTime {
        self.remaining_allowed_simulation_time
    }

    /// Total simulation time processed so far.
    #[must_use]
    pub fn total_processed_simulation_time(&self) -> SimTime {
        self.total_processed_simulation_time
    }

    /// The configured budget refill mode.
    #[must_use]
    pub fn budget_mode(&self) -> BudgetMode {
        self.budget_mode
    }

    /// Refills the budget from this tick's frame delta.
    pub fn give_simulation_time(&mut self, delta: SimTime) {
        let delta = if delta.is_positive() {
            delta
        } else {
            SimTime::ZERO
        };
        match self.budget_mode {
            BudgetMode::PerTick => self.remaining_allowed_simulation_time = delta,
            BudgetMode::Accumulate => self.remaining_allowed_simulation_time += delta,
        }
    }

    /// Withdraws the whole budget, e.g. while a simulation must not advance this tick.
    pub fn revoke_simulation_time(&mut self) {
        self.remaining_allowed_simulation_time = SimTime::ZERO;
    }

    /// Charges `delta` against the remaining budget.
    ///
    /// Non-positive deltas are ignored, so the budget only shrinks here.
    /// Callers check the budget first; the remaining time never goes negative.
    pub fn consume_simulation_time(&mut self, delta: SimTime) {
        if !delta.is_positive() {
            return;
        }
        self.remaining_allowed_simulation_time =
            self.remaining_allowed_simulation_time.saturating_sub(delta);
    }

    /// Advances the processed time and stamps the new total against `keyframe`.
    ///
    /// A negative `delta` leaves the total where it is.
    pub fn increment_total_processed_simulation_time(&mut self, delta: SimTime, keyframe: Keyframe) {
        if delta.is_positive() {
            self.total_processed_simulation_time += delta;
        }
        self.stamp(keyframe);
    }

    /// Rebases the processed time at `keyframe`. Only used after a discontinuity or correction.
    pub fn set_total_processed_simulation_time(&mut self, time: SimTime, keyframe: Keyframe) {
        self.total_processed_simulation_time = time;
        self.simulation_time_buffer.reset_next_head_keyframe(keyframe);
        self.stamp(keyframe);
    }

    /// Total processed time recorded at `keyframe`, if still retained.
    #[must_use]
    pub fn simulation_time_at(&self, keyframe: Keyframe) -> Option<SimTime> {
        self.simulation_time_buffer.find(keyframe).copied()
    }

    /// The newest retained keyframe whose stamped time is at or before `time`.
    #[must_use]
    pub fn keyframe_at_or_before(&self, time: SimTime) -> Option<Keyframe> {
        self.simulation_time_buffer
            .iter()
            .take_while(|(_, stamped)| **stamped <= time)
            .map(|(keyframe, _)| keyframe)
            .last()
    }

    /// The two retained keyframes bracketing `time` and the interpolation fraction between them.
    ///
    /// Returns `(from, to, alpha)` with `alpha` in `[0, 1]`. When `time` is
    /// outside the stamped range the nearest keyframe is returned on both ends.
    #[must_use]
    pub fn bracket(&self, time: SimTime) -> Option<(Keyframe, Keyframe, f32)> {
        let mut previous: Option<(Keyframe, SimTime)> = None;
        for (keyframe, stamped) in self.simulation_time_buffer.iter() {
            let stamped = *stamped;
            if stamped >= time {
                return Some(match previous {
                    Some((from, from_time)) if stamped > from_time => {
                        let span = (stamped - from_time).as_millis() as f32;
                        let offset = (time - from_time).as_millis() as f32;
                        (from, keyframe, (offset / span).clamp(0.0, 1.0))
                    },
                    _ => (keyframe, keyframe, 1.0),
                });
            }
            previous = Some((keyframe, stamped));
        }
        previous.map(|(keyframe, _)| (keyframe, keyframe, 1.0))
    }

    fn stamp(&mut self, keyframe: Keyframe) {
        if keyframe != self.simulation_time_buffer.next_keyframe() {
            self.simulation_time_buffer.reset_next_head_keyframe(keyframe);
        }
        *self.simulation_time_buffer.get_write_next() = self.total_processed_simulation_time;
    }
}

impl InvariantChecker for TickState {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.remaining_allowed_simulation_time < SimTime::ZERO {
            return Err(InvariantViolation::new(
                "TickState",
                "remaining allowed simulation time is negative",
            )
            .with_details(format!(
                "remaining={}",
                self.remaining_allowed_simulation_time
            )));
        }
        if !self.last_processed_input_keyframe.is_valid() {
            return Err(InvariantViolation::new(
                "TickState",
                "last processed input keyframe must be non-negative",
            ));
        }
        self.simulation_time_buffer.check_invariants()
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
    fn per_tick_mode_replaces_budget() {
        let mut state = TickState::new(8, BudgetMode::PerTick);
        state.give_simulation_time(SimTime::from_millis(250));
        state.consume_simulation_time(SimTime::from_millis(200));
        state.give_simulation_time(SimTime::from_millis(250));
        assert_eq!(
            state.remaining_allowed_simulation_time(),
            SimTime::from_millis(250)
        );
    }

    #[test]
    fn accumulate_mode_carries_over() {
        let mut state = TickState::new(8, BudgetMode::Accumulate);
        state.give_simulation_time(SimTime::from_millis(250));
        state.consume_simulation_time(SimTime::from_millis(200));
        state.give_simulation_time(SimTime::from_millis(250));
        assert_eq!(
            state.remaining_allowed_simulation_time(),
            SimTime::from_millis(300)
        );
    }

    #[test]
    fn negative_delta_gives_nothing() {
        let mut state = TickState::new(8, BudgetMode::Accumulate);
        state.give_simulation_time(SimTime::from_millis(-40));
        assert_eq!(state.remaining_allowed_simulation_time(), SimTime::ZERO);
    }

    #[test]
    fn consume_never_goes_negative() {
        let mut state = TickState::new(8, BudgetMode::PerTick);
        state.give_simulation_time(SimTime::from_millis(10));
        state.consume_simulation_time(SimTime::from_millis(30));
        assert_eq!(state.remaining_allowed_simulation_time(), SimTime::ZERO);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn non_positive_commands_neither_refund_nor_rewind() {
        let mut state = TickState::new(8, BudgetMode::PerTick);
        state.give_simulation_time(SimTime::from_millis(100));
        state.increment_total_processed_simulation_time(SimTime::from_millis(40), Keyframe::new(1));

        state.consume_simulation_time(SimTime::from_millis(-1000));
        state.consume_simulation_time(SimTime::ZERO);
        state.increment_total_processed_simulation_time(SimTime::from_millis(-1000), Keyframe::new(2));

        assert_eq!(state.remaining_allowed_simulation_time(), SimTime::from_millis(100));
        assert_eq!(state.total_processed_simulation_time(), SimTime::from_millis(40));
        assert_eq!(state.simulation_time_at(Keyframe::new(2)), Some(SimTime::from_millis(40)));
    }

    #[test]
    fn increments_are_stamped_per_keyframe() {
        let mut state = TickState::new(8, BudgetMode::PerTick);
        state.set_total_processed_simulation_time(SimTime::ZERO, Keyframe::new(0));
        state.increment_total_processed_simulation_time(SimTime::from_millis(100), Keyframe::new(1));
        state.increment_total_processed_simulation_time(SimTime::from_millis(50), Keyframe::new(2));
        assert_eq!(
            state.simulation_time_at(Keyframe::new(1)),
            Some(SimTime::from_millis(100))
        );
        assert_eq!(
            state.simulation_time_at(Keyframe::new(2)),
            Some(SimTime::from_millis(150))
        );
        assert_eq!(
            state.total_processed_simulation_time(),
            SimTime::from_millis(150)
        );
    }

    #[test]
    fn rebase_discards_newer_stamps() {
        let mut state = TickState::new(8, BudgetMode::PerTick);
        state.set_total_processed_simulation_time(SimTime::ZERO, Keyframe::new(0));
        for k in 1..=4 {
            state.increment_total_processed_simulation_time(SimTime::from_millis(10), Keyframe::new(k));
        }
        state.set_total_processed_simulation_time(SimTime::from_millis(15), Keyframe::new(2));
        assert_eq!(
            state.simulation_time_at(Keyframe::new(2)),
            Some(SimTime::from_millis(15))
        );
        assert!(state.simulation_time_at(Keyframe::new(3)).is_none());
        assert_eq!(
            state.simulation_time_at(Keyframe::new(1)),
            Some(SimTime::from_millis(10))
        );
    }

    #[test]
    fn keyframe_lookup_by_time() {
        let mut state = TickState::new(8, BudgetMode::PerTick);
        state.set_total_processed_simulation_time(SimTime::ZERO, Keyframe::new(0));
        for k in 1..=3 {
            state.increment_total_processed_simulation_time(SimTime::from_millis(100), Keyframe::new(k));
        }
        assert_eq!(
            state.keyframe_at_or_before(SimTime::from_millis(250)),
            Some(Keyframe::new(2))
        );
        assert_eq!(
            state.keyframe_at_or_before(SimTime::from_millis(300)),
            Some(Keyframe::new(3))
        );
    }

    #[test]
    fn bracket_interpolates_between_stamps() {
        let mut state = TickState::new(8, BudgetMode::PerTick);
        state.set_total_processed_simulation_time(SimTime::from_millis(100), Keyframe::new(4));
        state.increment_total_processed_simulation_time(SimTime::from_millis(100), Keyframe::new(5));

        let (from, to, alpha) = state.bracket(SimTime::from_millis(150)).unwrap();
        assert_eq!(from, Keyframe::new(4));
        assert_eq!(to, Keyframe::new(5));
        assert!((alpha - 0.5).abs() < 1e-6);

        let (from, to, alpha) = state.bracket(SimTime::from_millis(500)).unwrap();
        assert_eq!((from, to), (Keyframe::new(5), Keyframe::new(5)));
        assert!((alpha - 1.0).abs() < 1e-6);

        let (from, to, _) = state.bracket(SimTime::from_millis(0)).unwrap();
        assert_eq!((from, to), (Keyframe::new(4), Keyframe::new(4)));
    }

    #[test]
    fn bracket_on_empty_tracker_is_none() {
        let state = TickState::new(8, BudgetMode::PerTick);
        assert!(state.bracket(SimTime::from_millis(10)).is_none());
    }
}
