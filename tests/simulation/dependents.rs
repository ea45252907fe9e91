//! Dependent simulations: registry links and rollback cascades.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::stubs::{MoveInput, MoveState, Mover, ScriptedDriver};
use crate::common::{build, init_tracing, payload, tick, MoverSim, DT, DT_MILLIS};
use netsim_model::telemetry::{CollectingObserver, ViolationKind, ViolationSeverity};
use netsim_model::{
    hash, Keyframe, NetArchive, NetRole, NetSimError, ReplicationTarget, SimHandle, SimTime,
    SimulatedUpdateMode, SimulationBuilder, SimulationRegistry, TickParameters,
};

fn extrapolating(name: &str) -> MoverSim {
    SimulationBuilder::<Mover>::new()
        .with_simulated_update_mode(SimulatedUpdateMode::Extrapolate)
        .build(ScriptedDriver::new(name), NetRole::SimulatedProxy)
        .unwrap()
}

fn autonomous(name: &str) -> MoverSim {
    SimulationBuilder::<Mover>::new()
        .build(ScriptedDriver::new(name), NetRole::AutonomousProxy)
        .unwrap()
}

/// Loads what `from` writes for `target` into a registered simulation.
fn send_to(
    from: &mut MoverSim,
    registry: &mut SimulationRegistry,
    handle: SimHandle,
    target: ReplicationTarget,
) {
    let bytes = payload(from, target).unwrap();
    registry
        .net_serialize_proxy(handle, target, &mut NetArchive::loading(&bytes))
        .unwrap();
}

/// Loads what a registered simulation writes for `target` into `to`.
fn send_from(
    registry: &mut SimulationRegistry,
    handle: SimHandle,
    to: &mut MoverSim,
    target: ReplicationTarget,
) {
    let mut archive = NetArchive::saving();
    registry
        .net_serialize_proxy(handle, target, &mut archive)
        .unwrap();
    let bytes = archive.into_bytes();
    to.net_serialize_proxy(target, &mut NetArchive::loading(&bytes))
        .unwrap();
}

fn checksum_at(registry: &SimulationRegistry, handle: SimHandle, keyframe: i32) -> Option<u64> {
    registry
        .get(handle)
        .unwrap()
        .sync_checksum(Keyframe::new(keyframe))
        .unwrap()
}

struct Vehicle {
    registry: SimulationRegistry,
    observer: Arc<CollectingObserver>,
    vehicle: SimHandle,
    passenger: SimHandle,
    server_vehicle: MoverSim,
}

/// A predicted vehicle carrying an extrapolated passenger, five frames in.
/// The vehicle server has only processed three of them.
fn vehicle_with_passenger() -> Vehicle {
    let observer = Arc::new(CollectingObserver::new());
    let mut registry = SimulationRegistry::new().with_violation_observer(observer.clone());
    let vehicle = registry.insert(autonomous("vehicle"));
    let passenger = registry.insert(extrapolating("passenger"));
    registry.set_parent_simulation(passenger, Some(vehicle)).unwrap();

    let (mut server_vehicle, _) = build("server vehicle", NetRole::Authority);
    for frame in 0..5 {
        registry
            .tick(vehicle, &TickParameters::new(NetRole::AutonomousProxy, DT))
            .unwrap();
        registry
            .tick(passenger, &TickParameters::new(NetRole::SimulatedProxy, DT))
            .unwrap();
        send_from(
            &mut registry,
            vehicle,
            &mut server_vehicle,
            ReplicationTarget::ServerRpc,
        );
        if frame < 3 {
            tick(&mut server_vehicle, NetRole::Authority);
        }
    }

    Vehicle {
        registry,
        observer,
        vehicle,
        passenger,
        server_vehicle,
    }
}

fn server_passenger(velocity: i32, frames: usize) -> MoverSim {
    let (mut server, _) = build("server passenger", NetRole::Authority);
    for _ in 0..frames {
        server.enqueue_input(MoveInput { velocity }, SimTime::from_millis(DT_MILLIS)).unwrap();
        tick(&mut server, NetRole::Authority);
    }
    server
}

#[test]
fn test_passenger_rolls_back_with_vehicle() -> Result<(), NetSimError> {
    init_tracing();
    let Vehicle {
        mut registry,
        observer,
        vehicle,
        passenger,
        mut server_vehicle,
    } = vehicle_with_passenger();
    let mut server_passenger = server_passenger(2, 3);

    send_to(
        &mut server_vehicle,
        &mut registry,
        vehicle,
        ReplicationTarget::AutonomousProxy,
    );
    send_to(
        &mut server_passenger,
        &mut registry,
        passenger,
        ReplicationTarget::SimulatedProxy,
    );

    let deferred = registry.reconcile(passenger, NetRole::SimulatedProxy)?;
    assert!(deferred.defer_to_parent);
    assert_eq!(deferred.corrected_at, None);

    // The vehicle prediction was right, but the passenger still needs the replay window.
    let outcome = registry.reconcile(vehicle, NetRole::AutonomousProxy)?;
    assert_eq!(outcome.corrected_at, None);
    let plan = outcome.dependent_rollback.unwrap();
    assert_eq!(plan.parent_keyframe, Keyframe::new(3));
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.rollback_delta, SimTime::from_millis(2 * DT_MILLIS));

    let passenger_sim = registry.get(passenger).unwrap();
    assert_eq!(passenger_sim.last_processed_input_keyframe(), Keyframe::new(7));
    assert_eq!(
        checksum_at(&registry, passenger, 7),
        Some(hash::checksum(&MoveState::new(6, 5))?)
    );

    // Ticking resumes from the replayed state.
    registry.tick(passenger, &TickParameters::new(NetRole::SimulatedProxy, DT))?;
    assert_eq!(
        registry.get(passenger).unwrap().last_processed_input_keyframe(),
        Keyframe::new(8)
    );
    assert_eq!(
        checksum_at(&registry, passenger, 8),
        Some(hash::checksum(&MoveState::new(6, 6))?)
    );
    assert!(observer.is_empty());
    Ok(())
}

#[test]
fn test_rollback_cascades_through_nested_dependents() -> Result<(), NetSimError> {
    let Vehicle {
        mut registry,
        vehicle,
        passenger,
        mut server_vehicle,
        ..
    } = vehicle_with_passenger();
    let cargo = registry.insert(extrapolating("cargo"));
    registry.set_parent_simulation(cargo, Some(passenger))?;
    for _ in 0..5 {
        registry.tick(cargo, &TickParameters::new(NetRole::SimulatedProxy, DT))?;
    }

    send_to(
        &mut server_vehicle,
        &mut registry,
        vehicle,
        ReplicationTarget::AutonomousProxy,
    );
    registry.reconcile(vehicle, NetRole::AutonomousProxy)?;

    // Without a deferred correction the cargo replays from its own state at the rewound time.
    assert_eq!(
        registry.get(cargo).unwrap().last_processed_input_keyframe(),
        Keyframe::new(7)
    );
    assert_eq!(
        checksum_at(&registry, cargo, 7),
        Some(hash::checksum(&MoveState::new(0, 5))?)
    );
    assert_eq!(
        registry.get(passenger).unwrap().last_processed_input_keyframe(),
        Keyframe::new(7)
    );
    Ok(())
}

#[test]
fn test_only_simulated_proxies_roll_back() -> Result<(), NetSimError> {
    let Vehicle {
        mut registry,
        vehicle,
        mut server_vehicle,
        ..
    } = vehicle_with_passenger();
    let driver = registry.insert(autonomous("driver"));
    registry.add_dependent_simulation(vehicle, driver)?;
    registry.tick(driver, &TickParameters::new(NetRole::AutonomousProxy, DT))?;

    send_to(
        &mut server_vehicle,
        &mut registry,
        vehicle,
        ReplicationTarget::AutonomousProxy,
    );
    registry.reconcile(vehicle, NetRole::AutonomousProxy)?;

    assert_eq!(
        registry.get(driver).unwrap().last_processed_input_keyframe(),
        Keyframe::new(1)
    );
    Ok(())
}

#[test]
fn test_duplicate_dependent_is_fatal() {
    let Vehicle {
        mut registry,
        observer,
        vehicle,
        passenger,
        ..
    } = vehicle_with_passenger();

    let result = registry.add_dependent_simulation(vehicle, passenger);
    assert_eq!(
        result,
        Err(NetSimError::DuplicateDependent {
            parent: vehicle,
            dependent: passenger,
        })
    );
    assert!(observer.has_violation(ViolationKind::DependencyGraph));
    assert!(observer.has_severity(ViolationSeverity::Critical));
    assert_eq!(registry.dependents(vehicle), vec![passenger]);

    // Only the live link is a duplicate; a removed one can be added again.
    assert!(registry.remove_dependent_simulation(vehicle, passenger));
    assert!(registry.dependents(vehicle).is_empty());
    assert_eq!(registry.add_dependent_simulation(vehicle, passenger), Ok(()));
    assert_eq!(registry.dependents(vehicle), vec![passenger]);
}

#[test]
fn test_cycles_are_rejected() {
    let Vehicle {
        mut registry,
        vehicle,
        passenger,
        ..
    } = vehicle_with_passenger();

    assert!(matches!(
        registry.set_parent_simulation(vehicle, Some(passenger)),
        Err(NetSimError::InvalidRequest { .. })
    ));
    assert_eq!(registry.parent_simulation(vehicle), None);
}

#[test]
fn test_removed_simulation_leaves_the_graph() {
    let Vehicle {
        mut registry,
        vehicle,
        passenger,
        ..
    } = vehicle_with_passenger();

    assert!(registry.remove(passenger).is_some());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.parent_simulation(passenger), None);
    assert!(registry.dependents(vehicle).is_empty());
    assert!(matches!(
        registry.reconcile(passenger, NetRole::SimulatedProxy),
        Err(NetSimError::InvalidRequest { .. })
    ));
    assert!(registry
        .tick(passenger, &TickParameters::new(NetRole::SimulatedProxy, DT))
        .is_err());
}

#[test]
fn test_detaching_dependents() -> Result<(), NetSimError> {
    let Vehicle {
        mut registry,
        vehicle,
        passenger,
        ..
    } = vehicle_with_passenger();
    let second = registry.insert(extrapolating("second passenger"));
    registry.add_dependent_simulation(vehicle, second)?;

    assert!(registry.remove_dependent_simulation(vehicle, second));
    assert!(!registry.remove_dependent_simulation(vehicle, second));
    registry.set_parent_simulation(second, Some(vehicle))?;
    assert_eq!(registry.clear_all_dependent_simulations(vehicle), 2);
    assert_eq!(registry.parent_simulation(passenger), None);
    Ok(())
}

#[test]
fn test_step_without_begin_is_rejected() {
    let observer = Arc::new(CollectingObserver::new());
    let mut passenger = SimulationBuilder::<Mover>::new()
        .with_simulated_update_mode(SimulatedUpdateMode::Extrapolate)
        .with_violation_observer(observer.clone())
        .build(ScriptedDriver::new("passenger"), NetRole::SimulatedProxy)
        .unwrap();
    tick(&mut passenger, NetRole::SimulatedProxy);

    let result = passenger.step_rollback(SimTime::from_millis(DT_MILLIS), Keyframe::new(1), true);
    assert!(matches!(result, Err(NetSimError::InvalidRequest { .. })));
    assert!(observer.has_violation(ViolationKind::Rollback));
    assert!(!passenger.in_rollback());
}

#[test]
fn test_rollback_requires_simulated_proxy() {
    let (mut client, observer) = build("client", NetRole::AutonomousProxy);
    tick(&mut client, NetRole::AutonomousProxy);

    let result = client.begin_rollback(SimTime::from_millis(DT_MILLIS), Keyframe::new(1));
    assert!(matches!(result, Err(NetSimError::InvalidRequest { .. })));
    let rejected = observer.violations_of_kind(ViolationKind::Rollback);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].severity, ViolationSeverity::Error);
    assert_eq!(client.last_processed_input_keyframe(), 1);
}
