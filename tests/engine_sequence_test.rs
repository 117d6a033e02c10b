//! End-to-end run through the public engine API with scripted transports.

use scandaq::config::Settings;
use scandaq::engine::{Engine, EngineEvent};
use scandaq::instrument::{AcqClient, MotorClient};
use scandaq::link::Link;
use scandaq::poll::PollConfig;
use scandaq::sequence::{DeviceProfile, RunMode, SequenceConfig, SequenceOutcome};
use scandaq::storage::MemorySink;
use scandaq::transport::MockTransport;
use std::sync::Arc;
use std::time::Duration;

const SENTINEL: &str = "00000000,00000000";

fn two_axis_config() -> SequenceConfig {
    SequenceConfig {
        profiles: vec![
            DeviceProfile {
                label: "X".to_string(),
                initial: "X0+".to_string(),
                drive: "X-400".to_string(),
                destination: "acquired_data_X.csv".to_string(),
            },
            DeviceProfile {
                label: "Y".to_string(),
                initial: "Y0+".to_string(),
                drive: "Y-400".to_string(),
                destination: "acquired_data_Y.csv".to_string(),
            },
        ],
        run_mode: RunMode::SinglePass,
        settle_first: Duration::ZERO,
        settle_second: Duration::ZERO,
        inter_profile_delay: Duration::ZERO,
        poll: PollConfig {
            max_attempts: 10,
            interval: Duration::from_millis(1),
        },
        ..SequenceConfig::default()
    }
}

#[tokio::test]
async fn full_two_axis_run_persists_both_destinations() {
    let motor_transport = MockTransport::opened();
    let acq_transport = MockTransport::opened();
    // Per axis: a not-ready probe, the ready token, two records, sentinel.
    acq_transport.push_responses([
        "B", "F", "11,12", "13,14", SENTINEL, // X axis
        "B", "F", "21,22", SENTINEL, // Y axis
    ]);

    let motor = Arc::new(MotorClient::new(
        Arc::new(motor_transport.clone()),
        Link::new("motor"),
    ));
    let acq = Arc::new(AcqClient::new(
        Arc::new(acq_transport.clone()),
        Link::new("acq"),
    ));
    let sink = MemorySink::new();
    let (engine, mut events) = Engine::new(
        motor,
        acq,
        Arc::new(sink.clone()),
        PollConfig::default(),
    );

    engine.start_sequence(two_axis_config()).unwrap();

    match events.recv().await.unwrap() {
        EngineEvent::SequenceFinished(SequenceOutcome::Finished) => {}
        other => panic!("unexpected event: {other:?}"),
    }

    let x: Vec<String> = sink
        .records("acquired_data_X.csv")
        .unwrap()
        .iter()
        .map(|r| r.raw().to_string())
        .collect();
    assert_eq!(x, vec!["11,12", "13,14"]);

    let y: Vec<String> = sink
        .records("acquired_data_Y.csv")
        .unwrap()
        .iter()
        .map(|r| r.raw().to_string())
        .collect();
    assert_eq!(y, vec!["21,22"]);

    // Homing commands went out on the motor wire, framed.
    let motor_writes = motor_transport.writes();
    assert!(motor_writes[0].windows(3).any(|w| w == b"X0+"));
    assert!(motor_writes[1].windows(3).any(|w| w == b"Y0+"));
}

#[tokio::test]
async fn shipped_default_configuration_is_valid() {
    let settings = Settings::new(None).expect("config/default.toml should parse");
    assert_eq!(settings.links.motor_address, b'0');
    assert_eq!(settings.poll.max_attempts, 500);

    let sequence = settings.sequence_config();
    assert_eq!(sequence.profiles.len(), 2);
    assert_eq!(sequence.run_mode, RunMode::SinglePass);
}
