//! Determinism: identical input must give identical state on every peer.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{MoveAux, Mover, ScriptedDriver};
use crate::common::{build, lockstep, tick, transfer, MoverSim};
use netsim_model::{Keyframe, NetRole, NetSimError, ReplicationTarget, SimulationBuilder};

fn scripted_client(script: &[i32]) -> MoverSim {
    SimulationBuilder::<Mover>::new()
        .build(
            ScriptedDriver::new("client").with_script(script.to_vec()),
            NetRole::AutonomousProxy,
        )
        .unwrap()
}

#[test]
fn test_repeated_runs_finalize_identical_states() {
    let script = [3, -2, 7, 0, 0, 5, -9, 1];
    let run = || {
        let mut client = scripted_client(&script);
        for _ in 0..32 {
            tick(&mut client, NetRole::AutonomousProxy);
        }
        client.driver().finalized.clone()
    };

    let first = run();
    assert_eq!(first.len(), 32);
    assert_eq!(first, run());
}

#[test]
fn test_server_reproduces_client_checksums() -> Result<(), NetSimError> {
    let mut client = scripted_client(&[1, 4, -3, 2, 2, 8, -1]);
    let mut server = SimulationBuilder::<Mover>::new()
        .build(ScriptedDriver::new("server"), NetRole::Authority)
        .unwrap();

    lockstep(&mut client, &mut server, 24);

    for k in 0..=24 {
        let keyframe = Keyframe::new(k);
        let expected = client.sync_checksum(keyframe)?;
        assert!(expected.is_some());
        assert_eq!(server.sync_checksum(keyframe)?, expected, "keyframe {}", k);
    }
    Ok(())
}

#[test]
fn test_corrected_client_converges_on_server() -> Result<(), NetSimError> {
    let mut client = scripted_client(&[2, 2, -1, 3]);
    let (mut server, _) = build("server", NetRole::Authority);

    for frame in 0..30 {
        if frame % 7 == 3 {
            server.set_aux_state(MoveAux { boost: frame });
        }
        lockstep(&mut client, &mut server, 1);
        if frame % 5 == 4 {
            transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
            client.reconcile(NetRole::AutonomousProxy)?;
        }
    }
    transfer(&mut server, &mut client, ReplicationTarget::AutonomousProxy)?;
    client.reconcile(NetRole::AutonomousProxy)?;

    let newest = server.last_processed_input_keyframe();
    assert_eq!(client.last_processed_input_keyframe(), newest);
    assert_eq!(client.sync_checksum(newest)?, server.sync_checksum(newest)?);
    Ok(())
}
