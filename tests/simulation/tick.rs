//! Tick, time budget and buffer bookkeeping tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{MoveAux, MoveInput, MoveState, Mover, ScriptedDriver};
use crate::common::{build, build_with, payload, tick, DT_MILLIS};
use netsim_model::telemetry::ViolationKind;
use netsim_model::{
    hash, BudgetMode, BufferSizes, Keyframe, NetRole, NetSimError, ReplicationTarget, SimTime,
    SimulationBuilder, TickParameters,
};

fn enqueue(sim: &mut crate::common::MoverSim, count: usize, velocity: i32, millis: i64) {
    for _ in 0..count {
        sim.enqueue_input(MoveInput { velocity }, SimTime::from_millis(millis)).unwrap();
    }
}

#[test]
fn test_budget_limits_consumption_per_tick() -> Result<(), NetSimError> {
    let (mut sim, observer) = build("server", NetRole::Authority);
    enqueue(&mut sim, 5, 1, 100);

    let params = TickParameters::new(NetRole::Authority, 0.25);
    let mut processed = Vec::new();
    for _ in 0..3 {
        sim.tick(&params)?;
        processed.push(sim.last_processed_input_keyframe().as_i32());
    }

    assert_eq!(processed, vec![2, 4, 5]);
    assert_eq!(sim.latest_sync_state(), Some(&MoveState::new(5, 5)));
    assert_eq!(
        sim.total_processed_simulation_time(),
        SimTime::from_millis(500)
    );
    // Leftover time is not carried into the next tick.
    assert_eq!(
        sim.remaining_allowed_simulation_time(),
        SimTime::from_millis(150)
    );
    assert!(observer.is_empty());
    Ok(())
}

#[test]
fn test_accumulate_mode_carries_unspent_time() -> Result<(), NetSimError> {
    let (mut sim, _observer) = build_with(
        SimulationBuilder::new().with_budget_mode(BudgetMode::Accumulate),
        "server",
        NetRole::Authority,
    );
    enqueue(&mut sim, 5, 1, 100);

    let params = TickParameters::new(NetRole::Authority, 0.25);
    sim.tick(&params)?;
    assert_eq!(sim.last_processed_input_keyframe(), 2);
    sim.tick(&params)?;
    assert_eq!(sim.last_processed_input_keyframe(), 5);
    assert_eq!(sim.remaining_allowed_simulation_time(), SimTime::ZERO);
    Ok(())
}

#[test]
fn test_command_longer_than_budget_waits() -> Result<(), NetSimError> {
    let (mut sim, _observer) = build("server", NetRole::Authority);
    enqueue(&mut sim, 1, 1, 100);

    sim.tick(&TickParameters::new(NetRole::Authority, 0.05))?;
    assert_eq!(sim.last_processed_input_keyframe(), 0);
    // The first tick still creates the initial state.
    assert_eq!(sim.latest_sync_state(), Some(&MoveState::default()));

    sim.tick(&TickParameters::new(NetRole::Authority, 0.1))?;
    assert_eq!(sim.last_processed_input_keyframe(), 1);
    Ok(())
}

#[test]
fn test_first_tick_reports_no_violation() {
    let (mut client, observer) = build("client", NetRole::AutonomousProxy);
    tick(&mut client, NetRole::AutonomousProxy);

    assert!(observer.is_empty());
    assert_eq!(client.last_processed_input_keyframe(), 1);
    assert_eq!(client.sync_state(Keyframe::new(0)), Some(&MoveState::default()));
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(1, 1)));
    assert_eq!(client.driver().finalized, vec![MoveState::new(1, 1)]);
    assert_eq!(
        client.total_processed_simulation_time(),
        SimTime::from_millis(DT_MILLIS)
    );
}

#[test]
fn test_autonomous_proxy_produces_one_command_per_tick() {
    let driver = ScriptedDriver::new("client").with_script(vec![3, -1, 2]);
    let mut client = SimulationBuilder::<Mover>::new()
        .build(driver, NetRole::AutonomousProxy)
        .unwrap();

    for _ in 0..4 {
        tick(&mut client, NetRole::AutonomousProxy);
    }

    assert_eq!(client.driver().produced, 4);
    assert_eq!(client.input_command(Keyframe::new(1)), Some(&MoveInput { velocity: 3 }));
    assert_eq!(client.input_command(Keyframe::new(4)), Some(&MoveInput { velocity: 2 }));
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(6, 4)));
}

#[test]
fn test_zero_delta_produces_nothing() -> Result<(), NetSimError> {
    let (mut client, _observer) = build("client", NetRole::AutonomousProxy);
    client.tick(&TickParameters::new(NetRole::AutonomousProxy, 0.0))?;

    assert_eq!(client.driver().produced, 0);
    assert_eq!(client.last_processed_input_keyframe(), 0);
    Ok(())
}

#[test]
fn test_listen_server_generates_local_input() -> Result<(), NetSimError> {
    let (mut server, _observer) = build("listen", NetRole::Authority);
    let params = TickParameters::new(NetRole::Authority, 1.0 / 60.0).with_local_input(true);
    server.tick(&params)?;
    server.tick(&params)?;

    assert_eq!(server.driver().produced, 2);
    assert_eq!(server.last_processed_input_keyframe(), 2);

    // Without the flag the authority waits for the owning client.
    server.tick(&TickParameters::new(NetRole::Authority, 1.0 / 60.0))?;
    assert_eq!(server.last_processed_input_keyframe(), 2);
    Ok(())
}

#[test]
fn test_aux_state_carries_forward() {
    let (mut sim, _observer) = build("server", NetRole::Authority);
    enqueue(&mut sim, 3, 1, DT_MILLIS);

    let mut positions = Vec::new();
    tick(&mut sim, NetRole::Authority);
    positions.push(sim.latest_sync_state().unwrap().position);

    sim.set_aux_state(MoveAux { boost: 10 });
    tick(&mut sim, NetRole::Authority);
    positions.push(sim.latest_sync_state().unwrap().position);
    tick(&mut sim, NetRole::Authority);
    positions.push(sim.latest_sync_state().unwrap().position);

    assert_eq!(positions, vec![1, 12, 23]);
    assert_eq!(sim.aux_state(Keyframe::new(3)), Some(&MoveAux { boost: 10 }));
}

#[test]
fn test_debug_states_record_processed_keyframes() {
    let (mut sim, _observer) = build_with(
        SimulationBuilder::new().with_debug_buffers(true),
        "server",
        NetRole::Authority,
    );
    enqueue(&mut sim, 5, 1, 100);
    sim.tick(&TickParameters::new(NetRole::Authority, 0.25).with_frame_number(42))
        .unwrap();

    let debug = sim.debug_buffer().unwrap();
    let state = debug.head().unwrap();
    assert_eq!(debug.head_keyframe(), Keyframe::new(0));
    assert_eq!(state.local_frame_number, 42);
    assert_eq!(
        state.processed_keyframes.as_slice(),
        &[Keyframe::new(1), Keyframe::new(2)]
    );
    assert_eq!(state.last_processed_keyframe, Keyframe::new(2));
    assert_eq!(state.head_keyframe, Keyframe::new(5));
    assert!((state.remaining_allowed_simulation_time_seconds - 0.05).abs() < 1e-6);
    assert_eq!(state.last_sent_input_keyframe, Keyframe::NULL);

    let historic = sim.historic_buffers().unwrap();
    assert_eq!(historic.sync.head_keyframe(), Keyframe::new(2));
    assert_eq!(historic.input.head_keyframe(), Keyframe::new(5));

    // The send between two ticks is credited to the earlier tick's entry.
    payload(&mut sim, ReplicationTarget::AutonomousProxy).unwrap();
    sim.tick(&TickParameters::new(NetRole::Authority, 0.25))
        .unwrap();
    let debug = sim.debug_buffer().unwrap();
    assert_eq!(debug.head_keyframe(), Keyframe::new(1));
    assert_eq!(
        debug.find(Keyframe::new(0)).unwrap().last_sent_input_keyframe,
        Keyframe::new(2)
    );
    assert_eq!(debug.head().unwrap().last_sent_input_keyframe, Keyframe::NULL);
}

#[test]
fn test_historic_buffers_outlive_live_buffers() {
    let (mut sim, _observer) = build_with(
        SimulationBuilder::new()
            .with_debug_buffers(true)
            .with_buffer_sizes(BufferSizes::minimal()),
        "server",
        NetRole::Authority,
    );
    for _ in 0..12 {
        enqueue(&mut sim, 1, 1, DT_MILLIS);
        tick(&mut sim, NetRole::Authority);
    }

    assert!(sim.sync_state(Keyframe::new(1)).is_none());
    let historic = sim.historic_buffers().unwrap();
    assert_eq!(historic.sync.find(Keyframe::new(1)), Some(&MoveState::new(1, 1)));
    assert_eq!(historic.sync.head_keyframe(), Keyframe::new(12));
}

#[test]
fn test_checksums_match_for_identical_runs() -> Result<(), NetSimError> {
    let (mut a, _) = build("a", NetRole::Authority);
    let (mut b, _) = build("b", NetRole::Authority);
    for sim in [&mut a, &mut b] {
        enqueue(sim, 4, 2, DT_MILLIS);
        for _ in 0..4 {
            tick(sim, NetRole::Authority);
        }
    }

    let expected = hash::checksum(&MoveState::new(8, 4))?;
    assert_eq!(a.sync_checksum(Keyframe::new(4))?, Some(expected));
    assert_eq!(a.sync_checksum(Keyframe::new(4))?, b.sync_checksum(Keyframe::new(4))?);
    assert_ne!(a.sync_checksum(Keyframe::new(3))?, Some(expected));
    assert_eq!(a.sync_checksum(Keyframe::new(40))?, None);
    Ok(())
}

#[test]
fn test_reinitialize_resets_everything() -> Result<(), NetSimError> {
    let (mut sim, _observer) = build("sim", NetRole::AutonomousProxy);
    for _ in 0..3 {
        tick(&mut sim, NetRole::AutonomousProxy);
    }

    sim.initialize_for_network_role(NetRole::Authority, BufferSizes::minimal())?;
    assert_eq!(sim.role(), NetRole::Authority);
    assert_eq!(sim.last_processed_input_keyframe(), 0);
    assert!(sim.latest_sync_state().is_none());
    assert_eq!(sim.buffers().input.head_keyframe(), Keyframe::new(0));
    assert_eq!(sim.buffers().sync.capacity(), 8);

    let rejected = sim.initialize_for_network_role(
        NetRole::Authority,
        BufferSizes {
            input: 0,
            ..BufferSizes::default()
        },
    );
    assert!(matches!(rejected, Err(NetSimError::InvalidConfig { .. })));
    assert_eq!(sim.buffers().sync.capacity(), 8);
    Ok(())
}

#[test]
fn test_server_rpc_throttle() -> Result<(), NetSimError> {
    let (mut client, _observer) = build("client", NetRole::AutonomousProxy);
    client.set_desired_server_rpc_send_frequency(30.0)?;

    let sent = (0..60)
        .filter(|_| client.should_send_server_rpc(1.0 / 60.0))
        .count();
    assert!((29..=30).contains(&sent), "sent {} times", sent);
    Ok(())
}

#[test]
fn test_rejected_configuration_is_reported() {
    let (mut client, observer) = build("client", NetRole::AutonomousProxy);
    assert!(matches!(
        client.set_desired_server_rpc_send_frequency(0.0),
        Err(NetSimError::InvalidConfig { .. })
    ));
    assert_eq!(observer.violations_of_kind(ViolationKind::Configuration).len(), 1);

    let result = client.initialize_for_network_role(
        NetRole::Authority,
        BufferSizes {
            input: 0,
            ..BufferSizes::default()
        },
    );
    assert!(matches!(result, Err(NetSimError::InvalidConfig { .. })));
    assert_eq!(observer.violations_of_kind(ViolationKind::Configuration).len(), 2);

    let (_, observer) = build("unused", NetRole::AutonomousProxy);
    let result = SimulationBuilder::<Mover>::new()
        .with_buffer_sizes(BufferSizes {
            sync: 0,
            ..BufferSizes::default()
        })
        .with_violation_observer(observer.clone())
        .build(ScriptedDriver::new("client"), NetRole::AutonomousProxy);
    assert!(matches!(result, Err(NetSimError::InvalidConfig { .. })));
    assert!(observer.has_violation(ViolationKind::Configuration));
}
