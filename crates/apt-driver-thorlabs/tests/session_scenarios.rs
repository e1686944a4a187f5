//! Controller session scenarios against simulated controllers.
//!
//! Run with: `cargo test -p apt-driver-thorlabs --test session_scenarios`

use apt_core::error::AptError;
use apt_core::units::ScaleFactors;
use apt_driver_mock::{status_bits, SimConfig, SimMode, SimulatedController};
use apt_driver_thorlabs::{ControllerSession, SessionOptions};
use apt_protocol::message::HOST_ADDRESS;
use apt_protocol::{ids, ControllerTopology, Message};
use std::time::Duration;

const COMPACT_DEST: u8 = 0x50;

fn options() -> SessionOptions {
    SessionOptions::default()
        .with_enable_settle(Duration::ZERO)
        .with_read_timeout(Duration::from_millis(20))
        .with_confirmation_timeout(Some(Duration::from_millis(300)))
}

fn session(
    sim: &SimulatedController,
    topology: ControllerTopology,
    scale: ScaleFactors,
) -> ControllerSession<SimulatedController> {
    ControllerSession::new(sim.clone(), topology, scale, options()).with_label("sim")
}

fn ids_of(frames: &[Message]) -> Vec<u16> {
    frames.iter().map(|m| m.message_id).collect()
}

// =============================================================================
// Motion
// =============================================================================

#[tokio::test]
async fn move_absolute_sends_device_units_and_waits_for_completion() {
    let sim = SimulatedController::new(SimConfig::kdc101(27_000_001).enabled());
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    stage.move_absolute(25.0, 1, true).await.unwrap();

    let moves = sim.frames_with_id(ids::MOT_MOVE_ABSOLUTE);
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].destination, COMPACT_DEST);
    assert_eq!(
        moves[0].payload.as_deref(),
        Some(&[0x01, 0x00, 0x50, 0xC3, 0x00, 0x00][..])
    );
    assert_eq!(sim.position(COMPACT_DEST), 50_000);
    // the confirmation id was read off the link
    assert!(sim.bytes_delivered() >= 2);
    // flush + keep-alive close every motion command
    assert_eq!(
        sim.received().last().map(|m| m.message_id),
        Some(ids::MOT_ACK_DCSTATUSUPDATE)
    );
}

#[tokio::test]
async fn compact_commands_carry_channel_ident_one_for_any_channel() {
    let sim = SimulatedController::new(SimConfig::kdc101(27_000_001).enabled());
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    stage.home(2, false).await.unwrap();
    stage.move_absolute(1.0, 2, false).await.unwrap();
    stage.get_position(2).await.unwrap();

    let homes = sim.frames_with_id(ids::MOT_MOVE_HOME);
    assert_eq!(homes.len(), 1);
    assert_eq!(homes[0].param1, 0x01);
    assert_eq!(homes[0].destination, COMPACT_DEST);

    let moves = sim.frames_with_id(ids::MOT_MOVE_ABSOLUTE);
    assert_eq!(moves.len(), 1);
    assert_eq!(
        moves[0].payload.as_deref().map(|p| &p[..2]),
        Some(&[0x01, 0x00][..])
    );

    let requests = sim.frames_with_id(ids::MOT_REQ_POSCOUNTER);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].param1, 0x01);
}

#[tokio::test(start_paused = true)]
async fn move_wait_returns_only_after_travel_completes() {
    let sim = SimulatedController::new(
        SimConfig::default()
            .enabled()
            .with_mode(SimMode::realistic()),
    );
    let mut stage = ControllerSession::new(
        sim.clone(),
        ControllerTopology::Compact,
        ScaleFactors::DDSM100,
        options().with_confirmation_timeout(Some(Duration::from_secs(30))),
    );

    let started = tokio::time::Instant::now();
    // 50 000 device units at 20 000 units/s
    stage.move_absolute(25.0, 1, true).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(2500));
    assert!(!sim.is_moving(COMPACT_DEST));
}

#[tokio::test]
async fn home_without_wait_reads_nothing() {
    let sim = SimulatedController::new(SimConfig::default().enabled());
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    stage.home(1, false).await.unwrap();

    assert_eq!(sim.bytes_delivered(), 0);
    assert_eq!(
        ids_of(&sim.received()),
        vec![ids::MOT_MOVE_HOME, ids::MOT_ACK_DCSTATUSUPDATE]
    );
    assert!(sim.is_homed(COMPACT_DEST));
}

#[tokio::test]
async fn home_with_wait_consumes_homed_confirmation() {
    let sim = SimulatedController::new(SimConfig::default().enabled().at_position(9_000));
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    stage.home(1, true).await.unwrap();

    assert_eq!(sim.bytes_delivered(), 2);
    assert_eq!(sim.position(COMPACT_DEST), 0);
}

#[tokio::test]
async fn position_round_trips_within_one_device_unit() {
    let sim = SimulatedController::new(SimConfig::default().enabled());
    let scale = ScaleFactors::PRMTZ8;
    let mut mount = session(&sim, ControllerTopology::Compact, scale);

    for target in [12.3456, -3.5, 0.0, 359.99] {
        mount.move_absolute(target, 1, true).await.unwrap();
        let read_back = mount.get_position(1).await.unwrap();
        assert!(
            (read_back - target).abs() <= 1.0 / scale.position(),
            "{target} read back as {read_back}"
        );
    }
}

#[tokio::test]
async fn encoder_count_uses_position_scale() {
    let sim = SimulatedController::new(SimConfig::default().at_position(4_000));
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    let count = stage.get_encoder_count(1).await.unwrap();
    assert!((count - 2.0).abs() < 1e-12);
    assert_eq!(sim.count_of(ids::MOT_REQ_ENCCOUNTER), 1);
}

#[tokio::test]
async fn status_reports_position_and_fixed_velocity_divisor() {
    let sim = SimulatedController::new(SimConfig::default().enabled().at_position(20_000));
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    let (position, velocity) = stage.get_status(1).await.unwrap();
    assert!((position - 10.0).abs() < 1e-12);
    assert_eq!(velocity, 0.0);

    let report = stage.get_status_report(1).await.unwrap();
    assert_eq!(report.channel, 1);
    assert_ne!(report.status_bits & status_bits::ENABLED, 0);
}

#[tokio::test(start_paused = true)]
async fn status_while_moving_reports_velocity() {
    let sim = SimulatedController::new(
        SimConfig::default()
            .enabled()
            .with_mode(SimMode::realistic()),
    );
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    stage.move_absolute(10.0, 1, false).await.unwrap();
    tokio::time::advance(Duration::from_millis(200)).await;

    let report = stage.get_status_report(1).await.unwrap();
    assert!((report.velocity - 10.0).abs() < 1e-12);
    assert_ne!(report.status_bits & status_bits::MOVING_FORWARD, 0);
    assert!(report.position > 0.0 && report.position < 10.0);
}

// =============================================================================
// Keep-alive
// =============================================================================

#[tokio::test]
async fn keep_alive_is_injected_before_the_fiftieth_command() {
    let sim = SimulatedController::new(SimConfig::default().enabled());
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    let identify = Message::short(ids::MOD_IDENTIFY, 1, 0, COMPACT_DEST, HOST_ADDRESS);
    for _ in 0..49 {
        stage.send_message(&identify).await.unwrap();
    }
    assert_eq!(stage.commands_since_keep_alive(), 49);
    assert_eq!(sim.count_of(ids::MOT_ACK_DCSTATUSUPDATE), 0);

    // 50th command: a keep-alive goes out first, so the controller still confirms
    stage.home(1, true).await.unwrap();

    let frames = ids_of(&sim.received());
    let home_at = frames
        .iter()
        .position(|&id| id == ids::MOT_MOVE_HOME)
        .unwrap();
    assert_eq!(frames[home_at - 1], ids::MOT_ACK_DCSTATUSUPDATE);
    assert!(!sim.is_starved());
}

#[tokio::test]
async fn long_polling_never_starves_the_controller() {
    let sim = SimulatedController::new(SimConfig::default().enabled());
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    for _ in 0..100 {
        stage.get_position(1).await.unwrap();
    }
    stage.move_absolute(1.0, 1, true).await.unwrap();
    assert!(stage.commands_since_keep_alive() < 50);
}

// =============================================================================
// Confirmation failures
// =============================================================================

#[tokio::test]
async fn disabled_channel_times_out_with_no_confirmation() {
    let sim = SimulatedController::default();
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    let err = stage.home(1, true).await.unwrap_err();
    match err {
        AptError::NoConfirmation { message_id, waited } => {
            assert_eq!(message_id, ids::MOT_MOVE_HOMED);
            assert!(waited >= Duration::from_millis(300));
        }
        other => panic!("unexpected error: {other}"),
    }
    // cleanup still ran
    assert_eq!(
        sim.received().last().map(|m| m.message_id),
        Some(ids::MOT_ACK_DCSTATUSUPDATE)
    );
}

#[tokio::test]
async fn uninitialized_controller_withholds_confirmations() {
    let sim = SimulatedController::new(SimConfig::default().enabled().requiring_initialization());
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    assert!(matches!(
        stage.home(1, true).await,
        Err(AptError::NoConfirmation { .. })
    ));

    stage.initialize(1).await.unwrap();
    assert!(sim.is_initialized());
    stage.home(1, true).await.unwrap();
}

#[tokio::test]
async fn unbounded_wait_is_cancellable() {
    let sim = SimulatedController::default();
    let mut stage = ControllerSession::new(
        sim.clone(),
        ControllerTopology::Compact,
        ScaleFactors::DDSM100,
        options().with_confirmation_timeout(None),
    );
    let cancel = stage.cancel_handle();

    let (result, ()) = tokio::join!(stage.home(1, true), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    assert!(matches!(
        result,
        Err(AptError::Cancelled {
            message_id: ids::MOT_MOVE_HOMED
        })
    ));
    assert_eq!(
        sim.received().last().map(|m| m.message_id),
        Some(ids::MOT_ACK_DCSTATUSUPDATE)
    );
}

#[tokio::test]
async fn stray_bytes_do_not_satisfy_a_wait() {
    let sim = SimulatedController::default();
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    // move-completed id straddling a chunk boundary
    sim.push_bytes(&[0x00, 0x64, 0x04, 0x00]);
    let err = stage.move_absolute(1.0, 1, true).await.unwrap_err();
    assert!(matches!(err, AptError::NoConfirmation { .. }));
}

// =============================================================================
// Replies and transport
// =============================================================================

#[tokio::test]
async fn silent_link_yields_decode_error() {
    let sim = SimulatedController::new(SimConfig::silent());
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    let err = stage.get_position(1).await.unwrap_err();
    assert!(matches!(
        err,
        AptError::Decode {
            expected: 12,
            received: 0
        }
    ));
    assert_eq!(sim.count_of(ids::MOT_ACK_DCSTATUSUPDATE), 1);
}

#[tokio::test]
async fn disconnected_link_reports_io_error() {
    let sim = SimulatedController::default();
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);
    sim.disconnect();

    let err = stage.get_status(1).await.unwrap_err();
    assert!(matches!(err, AptError::Io(_)));
    assert!(err.is_recoverable());
}

// =============================================================================
// Topology
// =============================================================================

#[tokio::test]
async fn compact_enable_is_sent_once() {
    let sim = SimulatedController::default();
    let mut stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);

    stage.enable(1).await.unwrap();

    let enables = sim.frames_with_id(ids::MOD_SET_CHANENABLESTATE);
    assert_eq!(enables.len(), 1);
    assert_eq!((enables[0].param1, enables[0].param2), (0x01, 0x01));
    assert!(sim.is_enabled(COMPACT_DEST));
}

#[tokio::test]
async fn rack_enable_and_disable_are_sent_twice() {
    let sim = SimulatedController::new(SimConfig::bsc202(40_000_123));
    let mut bay = session(&sim, ControllerTopology::Rack, ScaleFactors::NRT150);

    bay.enable(2).await.unwrap();
    let enables = sim.frames_with_id(ids::MOD_SET_CHANENABLESTATE);
    assert_eq!(enables.len(), 2);
    for frame in &enables {
        assert_eq!(frame.destination, 0x22);
        assert_eq!((frame.param1, frame.param2), (0x01, 0x01));
    }
    assert_eq!(sim.count_of(ids::MOT_ACK_DCSTATUSUPDATE), 2);
    assert!(sim.is_enabled(0x22));
    assert!(!sim.is_enabled(0x21));

    sim.clear_received();
    bay.disable(2).await.unwrap();
    let disables = sim.frames_with_id(ids::MOD_SET_CHANENABLESTATE);
    let params: Vec<_> = disables.iter().map(|m| (m.param1, m.param2)).collect();
    assert_eq!(params, vec![(0x02, 0x02), (0x01, 0x02)]);
    assert!(!sim.is_enabled(0x22));
}

#[tokio::test]
async fn rack_commands_use_bay_address_and_channel_one() {
    let sim = SimulatedController::new(SimConfig::bsc202(40_000_123).enabled());
    let mut bay = session(&sim, ControllerTopology::Rack, ScaleFactors::NRT150);

    bay.move_absolute(0.5, 1, true).await.unwrap();
    let moves = sim.frames_with_id(ids::MOT_MOVE_ABSOLUTE);
    assert_eq!(moves[0].destination, 0x21);
    assert_eq!(moves[0].payload.as_deref().map(|p| &p[..2]), Some(&[0x01, 0x00][..]));
    assert_eq!(sim.position(0x21), 204_800);
    assert_eq!(sim.position(0x22), 0);
}

#[tokio::test]
async fn identify_addressing_depends_on_topology() {
    let cube = SimulatedController::default();
    let mut stage = session(&cube, ControllerTopology::Compact, ScaleFactors::DDSM100);
    stage.identify(2).await.unwrap();
    let blink = &cube.frames_with_id(ids::MOD_IDENTIFY)[0];
    assert_eq!((blink.param1, blink.destination), (0x01, 0x50));

    let rack = SimulatedController::new(SimConfig::bsc202(40_000_123));
    let mut bay = session(&rack, ControllerTopology::Rack, ScaleFactors::NRT150);
    bay.identify(2).await.unwrap();
    let frames = rack.received();
    assert_eq!(
        (frames[0].message_id, frames[0].param1, frames[0].destination),
        (ids::MOD_IDENTIFY, 0x02, 0x11)
    );
    assert_eq!(
        (frames[1].message_id, frames[1].destination),
        (ids::MOT_ACK_DCSTATUSUPDATE, 0x22)
    );
    assert_eq!(rack.identify_count(), 1);
}

#[tokio::test]
async fn close_releases_the_link() {
    let sim = SimulatedController::default();
    let stage = session(&sim, ControllerTopology::Compact, ScaleFactors::DDSM100);
    stage.close().await.unwrap();
}
