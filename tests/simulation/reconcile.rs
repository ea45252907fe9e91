//! Reconciliation of the owning client's prediction against the authority.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{MoveAux, MoveInput, MoveState};
use crate::common::{build, build_with, init_tracing, lockstep, tick, transfer, DT_MILLIS};
use netsim_model::telemetry::{ViolationKind, ViolationSeverity};
use netsim_model::{
    BufferSizes, Keyframe, NetRole, NetSimError, ReconcileOutcome, ReplicationTarget, SimTime,
    SimulationBuilder,
};

#[test]
fn test_misprediction_is_corrected_and_replayed() -> Result<(), NetSimError> {
    let (mut client, client_observer) = build("client", NetRole::AutonomousProxy);
    let (mut server, _) = build("server", NetRole::Authority);
    lockstep(&mut client, &mut server, 3);

    // Only the server knows about the boost, so the client mispredicts from keyframe 4.
    server.set_aux_state(MoveAux { boost: 10 });
    lockstep(&mut client, &mut server, 1);
    assert_eq!(server.latest_sync_state(), Some(&MoveState::new(14, 4)));

    tick(&mut client, NetRole::AutonomousProxy);
    tick(&mut client, NetRole::AutonomousProxy);
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(6, 6)));

    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    let outcome = client.reconcile(NetRole::AutonomousProxy)?;

    assert_eq!(outcome.corrected_at, Some(Keyframe::new(4)));
    let plan = outcome.dependent_rollback.unwrap();
    assert_eq!(plan.parent_keyframe, Keyframe::new(4));
    assert_eq!(plan.rollback_delta, SimTime::from_millis(2 * DT_MILLIS));
    let replayed: Vec<Keyframe> = plan.steps.iter().map(|step| step.keyframe).collect();
    assert_eq!(replayed, vec![Keyframe::new(5), Keyframe::new(6)]);

    assert_eq!(client.last_processed_input_keyframe(), 6);
    assert_eq!(client.sync_state(Keyframe::new(4)), Some(&MoveState::new(14, 4)));
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(16, 6)));
    assert_eq!(client.driver().last_finalized(), Some(MoveState::new(16, 6)));
    assert_eq!(
        client.total_processed_simulation_time(),
        SimTime::from_millis(6 * DT_MILLIS)
    );
    assert!(client_observer.is_empty());

    // The pending state was consumed.
    assert_eq!(
        client.reconcile(NetRole::AutonomousProxy)?,
        ReconcileOutcome::default()
    );
    Ok(())
}

#[test]
fn test_authority_ahead_of_prediction_rebases() -> Result<(), NetSimError> {
    let (mut server, _) = build("server", NetRole::Authority);
    let (mut client, client_observer) = build("client", NetRole::AutonomousProxy);
    for _ in 0..5 {
        server.enqueue_input(MoveInput { velocity: 2 }, SimTime::from_millis(DT_MILLIS)).unwrap();
        tick(&mut server, NetRole::Authority);
    }
    tick(&mut client, NetRole::AutonomousProxy);

    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    let outcome = client.reconcile(NetRole::AutonomousProxy)?;

    assert_eq!(outcome.corrected_at, Some(Keyframe::new(5)));
    assert!(outcome.dependent_rollback.unwrap().steps.is_empty());
    assert_eq!(client.last_processed_input_keyframe(), 5);
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(10, 5)));
    assert_eq!(
        client.total_processed_simulation_time(),
        SimTime::from_millis(5 * DT_MILLIS)
    );

    // Prediction continues from the authoritative state.
    tick(&mut client, NetRole::AutonomousProxy);
    assert_eq!(client.last_processed_input_keyframe(), 6);
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(11, 6)));
    assert!(!client_observer.has_violation(ViolationKind::Continuity));
    Ok(())
}

#[test]
fn test_evicted_input_heals_on_next_tick() -> Result<(), NetSimError> {
    init_tracing();
    let (mut client, observer) = build_with(
        SimulationBuilder::new().with_buffer_sizes(BufferSizes {
            input: 4,
            sync: 16,
            aux: 16,
            ..BufferSizes::default()
        }),
        "client",
        NetRole::AutonomousProxy,
    );
    let (mut server, _) = build("server", NetRole::Authority);
    for _ in 0..6 {
        tick(&mut client, NetRole::AutonomousProxy);
    }
    server.enqueue_input(MoveInput { velocity: 5 }, SimTime::from_millis(DT_MILLIS)).unwrap();
    tick(&mut server, NetRole::Authority);

    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    let outcome = client.reconcile(NetRole::AutonomousProxy)?;

    assert_eq!(outcome.corrected_at, Some(Keyframe::new(1)));
    assert!(outcome.dependent_rollback.unwrap().steps.is_empty());
    assert!(observer.has_violation(ViolationKind::Reconciliation));
    // Sync stops at the correction; the consumption point does not move back.
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(5, 1)));
    assert_eq!(client.last_processed_input_keyframe(), 6);

    tick(&mut client, NetRole::AutonomousProxy);
    let breaks = observer.violations_of_kind(ViolationKind::Continuity);
    assert_eq!(breaks.len(), 1);
    assert_eq!(breaks[0].keyframe, Some(Keyframe::new(6)));
    assert_eq!(client.last_processed_input_keyframe(), 7);
    assert_eq!(client.latest_sync_state(), Some(&MoveState::new(1, 1)));
    assert!(!observer.has_severity(ViolationSeverity::Error));
    Ok(())
}

#[test]
fn test_forced_reconcile_produces_plan_without_correction() -> Result<(), NetSimError> {
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    let (mut server, _) = build("server", NetRole::Authority);
    lockstep(&mut client, &mut server, 3);
    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    assert_eq!(
        client.reconcile(NetRole::AutonomousProxy)?,
        ReconcileOutcome::default()
    );

    client.notify_dependent_needs_reconcile();
    assert!(client.dependent_needs_reconcile());
    tick(&mut client, NetRole::AutonomousProxy);
    tick(&mut client, NetRole::AutonomousProxy);
    let before = client.latest_sync_state().cloned();

    let outcome = client.reconcile(NetRole::AutonomousProxy)?;
    assert!(!client.dependent_needs_reconcile());
    assert_eq!(outcome.corrected_at, None);
    let plan = outcome.dependent_rollback.unwrap();
    assert_eq!(plan.parent_keyframe, Keyframe::new(3));
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.rollback_delta, SimTime::from_millis(2 * DT_MILLIS));
    assert_eq!(client.latest_sync_state().cloned(), before);
    Ok(())
}

#[test]
fn test_forced_reconcile_waits_for_authoritative_data() -> Result<(), NetSimError> {
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    let (mut server, _) = build("server", NetRole::Authority);
    client.notify_dependent_needs_reconcile();

    let outcome = client.reconcile(NetRole::AutonomousProxy)?;
    assert_eq!(outcome.dependent_rollback, None);
    assert!(client.dependent_needs_reconcile());

    lockstep(&mut client, &mut server, 2);
    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    let outcome = client.reconcile(NetRole::AutonomousProxy)?;
    assert_eq!(outcome.corrected_at, None);
    assert_eq!(
        outcome.dependent_rollback.map(|plan| plan.parent_keyframe),
        Some(Keyframe::new(2))
    );
    assert!(!client.dependent_needs_reconcile());
    Ok(())
}

#[test]
fn test_authority_has_nothing_to_reconcile() -> Result<(), NetSimError> {
    let (mut client, _) = build("client", NetRole::AutonomousProxy);
    let (mut server, _) = build("server", NetRole::Authority);
    lockstep(&mut client, &mut server, 2);
    server.notify_dependent_needs_reconcile();

    assert_eq!(server.reconcile(NetRole::Authority)?, ReconcileOutcome::default());
    assert_eq!(server.last_processed_input_keyframe(), 2);
    Ok(())
}
