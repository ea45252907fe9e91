//! Replication target tests: server RPC, proxies, replay and debug.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{MoveInput, MoveState};
use crate::common::{
    build, build_with, init_tracing, lockstep, payload, tick, transfer, DT_MILLIS,
};
use netsim_model::telemetry::{ViolationKind, ViolationSeverity};
use netsim_model::__internal::InputFrame;
use netsim_model::{
    Keyframe, NetArchive, NetRole, NetSimError, ReplicationTarget, SimTime, SimulationBuilder,
    TickParameters,
};

#[test]
fn test_lockstep_client_and_server_agree() -> Result<(), NetSimError> {
    let (mut client, client_observer) = build("client", NetRole::AutonomousProxy);
    let (mut server, server_observer) = build("server", NetRole::Authority);

    lockstep(&mut client, &mut server, 5);

    assert_eq!(client.last_processed_input_keyframe(), 5);
    assert_eq!(server.last_processed_input_keyframe(), 5);
    for k in 1..=5 {
        let keyframe = Keyframe::new(k);
        assert_eq!(server.input_command(keyframe), client.input_command(keyframe));
        assert_eq!(server.sync_checksum(keyframe)?, client.sync_checksum(keyframe)?);
    }
    assert!(client_observer.is_empty());
    assert!(server_observer.is_empty());

    // Matching authoritative state needs no correction.
    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    let outcome = client.reconcile(NetRole::AutonomousProxy)?;
    assert_eq!(outcome.corrected_at, None);
    assert!(outcome.dependent_rollback.is_none());
    Ok(())
}

#[test]
fn test_redundant_commands_cover_skipped_sends() -> Result<(), NetSimError> {
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    let (mut server, server_observer) = build("server", NetRole::Authority);

    for _ in 0..3 {
        tick(&mut client, NetRole::AutonomousProxy);
    }
    transfer(&mut client, &mut server, ReplicationTarget::ServerRpc)?;
    // Resending the same window adds nothing.
    transfer(&mut client, &mut server, ReplicationTarget::ServerRpc)?;
    assert_eq!(server.buffers().input.head_keyframe(), Keyframe::new(3));

    for _ in 0..3 {
        tick(&mut server, NetRole::Authority);
    }
    assert_eq!(server.last_processed_input_keyframe(), 3);
    assert_eq!(server.latest_sync_state(), client.latest_sync_state());
    assert!(server_observer.is_empty());
    Ok(())
}

#[test]
fn test_server_repairs_gap_in_received_input() -> Result<(), NetSimError> {
    init_tracing();
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    let (mut server, server_observer) = build("server", NetRole::Authority);
    lockstep(&mut client, &mut server, 1);

    // Keyframes 2 and 3 fall out of the redundancy window.
    for _ in 0..6 {
        tick(&mut client, NetRole::AutonomousProxy);
    }
    transfer(&mut client, &mut server, ReplicationTarget::ServerRpc)?;

    let gaps = server_observer.violations_of_kind(ViolationKind::Replication);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].severity, ViolationSeverity::Warning);
    assert!(server.input_command(Keyframe::new(2)).is_none());
    assert_eq!(server.last_processed_input_keyframe(), 3);
    assert_eq!(server.sync_state(Keyframe::new(3)), Some(&MoveState::new(1, 1)));

    for _ in 0..4 {
        tick(&mut server, NetRole::Authority);
    }
    assert_eq!(server.last_processed_input_keyframe(), 7);
    assert_eq!(server.latest_sync_state(), Some(&MoveState::new(5, 5)));
    assert_eq!(
        server.total_processed_simulation_time(),
        SimTime::from_millis(5 * DT_MILLIS)
    );
    // The carried-over state keeps the sync buffer continuous.
    assert!(!server_observer.has_violation(ViolationKind::Continuity));
    Ok(())
}

#[test]
fn test_empty_authoritative_payload_is_ignored() -> Result<(), NetSimError> {
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    let (mut server, _) = build("server", NetRole::Authority);

    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    let outcome = client.reconcile(NetRole::AutonomousProxy)?;
    assert_eq!(outcome, Default::default());
    assert!(client.latest_sync_state().is_none());
    Ok(())
}

#[test]
fn test_dirty_counts_track_new_content() -> Result<(), NetSimError> {
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    let (mut server, _) = build("server", NetRole::Authority);

    let before = client.proxy_dirty_count(ReplicationTarget::ServerRpc)?;
    tick(&mut client, NetRole::AutonomousProxy);
    assert!(client.proxy_dirty_count(ReplicationTarget::ServerRpc)? > before);

    transfer(&mut client, &mut server, ReplicationTarget::ServerRpc)?;
    tick(&mut server, NetRole::Authority);
    let settled = server.proxy_dirty_count(ReplicationTarget::AutonomousProxy)?;
    assert_eq!(
        settled,
        server.proxy_dirty_count(ReplicationTarget::SimulatedProxy)?
    );

    // Nothing new to consume: nothing new to send.
    tick(&mut server, NetRole::Authority);
    assert_eq!(
        server.proxy_dirty_count(ReplicationTarget::AutonomousProxy)?,
        settled
    );
    Ok(())
}

#[test]
fn test_debug_target_requires_debug_buffers() {
    let (mut client, observer) = build("client", NetRole::AutonomousProxy);

    let result = payload(&mut client, ReplicationTarget::Debug);
    assert_eq!(
        result,
        Err(NetSimError::UnknownReplicationTarget {
            target: ReplicationTarget::Debug.as_u8()
        })
    );
    assert!(result.unwrap_err().is_fatal());
    assert!(observer.has_severity(ViolationSeverity::Critical));
    assert!(observer.has_violation(ViolationKind::Replication));
    assert!(client.proxy_dirty_count(ReplicationTarget::Debug).is_err());
}

#[test]
fn test_raw_target_values() {
    let (mut server, observer) = build("server", NetRole::Authority);
    tick(&mut server, NetRole::Authority);

    let mut archive = NetArchive::saving();
    assert_eq!(
        server.net_serialize_proxy_raw(9, &mut archive),
        Err(NetSimError::UnknownReplicationTarget { target: 9 })
    );
    assert!(observer.has_severity(ViolationSeverity::Critical));

    let mut archive = NetArchive::saving();
    server
        .net_serialize_proxy_raw(ReplicationTarget::SimulatedProxy.as_u8(), &mut archive)
        .unwrap();
    assert!(!archive.into_bytes().is_empty());
}

#[test]
fn test_debug_states_replicate_incrementally() -> Result<(), NetSimError> {
    let builder = || SimulationBuilder::new().with_debug_buffers(true);
    let (mut server, _) = build_with(builder(), "server", NetRole::Authority);
    let (mut client, _) = build_with(builder(), "client", NetRole::AutonomousProxy);

    for _ in 0..3 {
        server.enqueue_input(MoveInput { velocity: 1 }, SimTime::from_millis(DT_MILLIS)).unwrap();
        tick(&mut server, NetRole::Authority);
    }
    transfer(&mut server, &mut client, ReplicationTarget::Debug)?;
    let remote = client.remote_debug_buffer().unwrap();
    assert_eq!(remote.len(), 3);
    assert_eq!(remote.head_keyframe(), Keyframe::new(2));
    assert_eq!(
        remote.head().unwrap().processed_keyframes.as_slice(),
        &[Keyframe::new(3)]
    );

    // Already sent states are not sent again.
    let size = transfer(&mut server, &mut client, ReplicationTarget::Debug)?;
    assert!(size < 8);
    assert_eq!(client.remote_debug_buffer().unwrap().len(), 3);

    server.enqueue_input(MoveInput { velocity: 1 }, SimTime::from_millis(DT_MILLIS)).unwrap();
    tick(&mut server, NetRole::Authority);
    transfer(&mut server, &mut client, ReplicationTarget::Debug)?;
    assert_eq!(
        client.remote_debug_buffer().unwrap().head_keyframe(),
        Keyframe::new(3)
    );
    Ok(())
}

#[test]
fn test_replay_carries_newest_three_states() -> Result<(), NetSimError> {
    let (mut server, _) = build("server", NetRole::Authority);
    let (mut recorder, _) = build("recorder", NetRole::SimulatedProxy);
    for _ in 0..5 {
        server.enqueue_input(MoveInput { velocity: 1 }, SimTime::from_millis(DT_MILLIS)).unwrap();
        tick(&mut server, NetRole::Authority);
    }

    transfer(&mut server, &mut recorder, ReplicationTarget::Replay)?;
    let replay = recorder.replay_buffer();
    assert_eq!(replay.tail_keyframe(), Keyframe::new(3));
    assert_eq!(replay.head_keyframe(), Keyframe::new(5));
    assert_eq!(replay.find(Keyframe::new(3)), Some(&MoveState::new(3, 3)));
    Ok(())
}

#[test]
fn test_truncated_payload_names_the_simulation() {
    let (mut server, _) = build("server", NetRole::Authority);
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    tick(&mut server, NetRole::Authority);

    let bytes = payload(&mut server, ReplicationTarget::AutonomousProxy).unwrap();
    let mut archive = NetArchive::loading(&bytes[..2]);
    match client.net_serialize_proxy(ReplicationTarget::AutonomousProxy, &mut archive) {
        Err(NetSimError::Serialization { context }) => {
            assert!(context.contains("client"), "{}", context);
            assert!(context.contains("AutonomousProxy"), "{}", context);
        },
        other => panic!("expected a serialization error, got {:?}", other),
    }
}

fn server_rpc_archive(first: Keyframe, millis: &[i64]) -> Vec<u8> {
    let mut archive = NetArchive::saving();
    archive.write(&(millis.len() as u32)).unwrap();
    archive.write(&first).unwrap();
    for millis in millis {
        archive
            .write(&InputFrame::new(
                SimTime::from_millis(*millis),
                MoveInput { velocity: 1 },
            ))
            .unwrap();
    }
    archive.into_bytes()
}

#[test]
fn test_non_positive_input_cannot_refund_the_budget() {
    let (mut server, observer) = build("server", NetRole::Authority);
    let bytes = server_rpc_archive(Keyframe::new(1), &[-1000, -1000, -1000]);
    let result =
        server.net_serialize_proxy(ReplicationTarget::ServerRpc, &mut NetArchive::loading(&bytes));
    assert!(matches!(result, Err(NetSimError::Serialization { .. })));
    assert!(observer.has_violation(ViolationKind::Replication));
    assert_eq!(server.buffers().input.head_keyframe(), Keyframe::new(0));

    server
        .tick(&TickParameters::new(NetRole::Authority, 0.1))
        .unwrap();
    assert_eq!(server.last_processed_input_keyframe(), Keyframe::new(0));
    assert_eq!(server.remaining_allowed_simulation_time(), SimTime::from_millis(100));
    assert_eq!(server.total_processed_simulation_time(), SimTime::ZERO);

    // A single bad command poisons the whole payload.
    let bytes = server_rpc_archive(Keyframe::new(1), &[DT_MILLIS, 0]);
    let result =
        server.net_serialize_proxy(ReplicationTarget::ServerRpc, &mut NetArchive::loading(&bytes));
    assert!(result.is_err());
    assert_eq!(server.buffers().input.head_keyframe(), Keyframe::new(0));

    assert!(matches!(
        server.enqueue_input(MoveInput { velocity: 1 }, SimTime::from_millis(-5)),
        Err(NetSimError::InvalidRequest { .. })
    ));
}

#[test]
fn test_sequence_overflowing_keyframes_is_rejected() {
    let (mut server, _) = build("server", NetRole::Authority);
    let bytes = server_rpc_archive(Keyframe::new(i32::MAX - 1), &[DT_MILLIS; 3]);
    match server.net_serialize_proxy(ReplicationTarget::ServerRpc, &mut NetArchive::loading(&bytes)) {
        Err(NetSimError::Serialization { context }) => {
            assert!(context.contains("out of range"), "{}", context);
        },
        other => panic!("expected a serialization error, got {:?}", other),
    }
    assert_eq!(server.buffers().input.head_keyframe(), Keyframe::new(0));
}

#[test]
fn test_authoritative_state_at_max_keyframe_is_rejected() {
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    tick(&mut client, NetRole::AutonomousProxy);

    let mut archive = NetArchive::saving();
    archive.write(&true).unwrap();
    archive.write(&Keyframe::new(i32::MAX)).unwrap();
    archive.write(&SimTime::from_millis(DT_MILLIS)).unwrap();
    archive.write(&MoveState::new(7, 1)).unwrap();
    let bytes = archive.into_bytes();

    let result = client.net_serialize_proxy(
        ReplicationTarget::AutonomousProxy,
        &mut NetArchive::loading(&bytes),
    );
    assert!(matches!(result, Err(NetSimError::Serialization { .. })));
    let outcome = client.reconcile(NetRole::AutonomousProxy).unwrap();
    assert_eq!(outcome.corrected_at, None);
    assert_eq!(client.last_processed_input_keyframe(), Keyframe::new(1));
}
