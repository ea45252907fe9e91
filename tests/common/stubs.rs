//! A deterministic integer movement simulation for tests.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::derive_partial_eq_without_eq
)]

use serde::{Deserialize, Serialize};

use netsim_model::{SimTime, Simulation, SimulationDriver};

/// Moves a point along one axis.
pub struct Mover;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInput {
    pub velocity: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveState {
    pub position: i64,
    pub steps: u32,
}

impl MoveState {
    pub const fn new(position: i64, steps: u32) -> Self {
        Self { position, steps }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveAux {
    pub boost: i32,
}

impl Simulation for Mover {
    type Input = MoveInput;
    type Sync = MoveState;
    type Aux = MoveAux;

    const GROUP_NAME: &'static str = "Mover";

    fn update(_dt: f32, input: &MoveInput, prev: &MoveState, next: &mut MoveState, aux: &MoveAux) {
        next.position = prev.position + i64::from(input.velocity) + i64::from(aux.boost);
        next.steps = prev.steps + 1;
    }

    fn interpolate(from: &MoveState, to: &MoveState, alpha: f32) -> MoveState {
        let span = (to.position - from.position) as f32;
        MoveState {
            position: from.position + (span * alpha).round() as i64,
            steps: if alpha >= 1.0 { to.steps } else { from.steps },
        }
    }
}

/// Produces velocities from a script (repeating the last entry once it runs
/// out) and records every finalized state.
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    pub name: String,
    pub start: MoveState,
    pub script: Vec<i32>,
    pub produced: usize,
    pub finalized: Vec<MoveState>,
}

impl ScriptedDriver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            start: MoveState::default(),
            script: vec![1],
            produced: 0,
            finalized: Vec::new(),
        }
    }

    pub fn with_script(mut self, script: Vec<i32>) -> Self {
        self.script = script;
        self
    }

    pub fn last_finalized(&self) -> Option<MoveState> {
        self.finalized.last().copied()
    }
}

impl SimulationDriver<Mover> for ScriptedDriver {
    fn debug_name(&self) -> String {
        self.name.clone()
    }

    fn init_sync_state(&self, out: &mut MoveState) {
        *out = self.start;
    }

    fn produce_input(&mut self, _delta: SimTime, out: &mut MoveInput) {
        let velocity = self
            .script
            .get(self.produced)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or_default();
        out.velocity = velocity;
        self.produced += 1;
    }

    fn finalize_frame(&mut self, state: &MoveState) {
        self.finalized.push(*state);
    }
}
