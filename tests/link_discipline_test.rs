//! Concurrency discipline on the serial links.
//!
//! Many tasks may hold a client handle, but one logical exchange (write
//! plus read) must never interleave with another caller's bytes. The mock
//! transport's ordered operation log makes violations visible.

use scandaq::instrument::{AcqClient, MotorClient};
use scandaq::link::{Link, LinkToken};
use scandaq::transport::{MockTransport, TransportOp};
use std::sync::Arc;

/// Every write on the wire must be followed directly by its read; a Write
/// next to another Write means two exchanges interleaved.
fn assert_exchanges_paired(ops: &[TransportOp]) {
    assert_eq!(ops.len() % 2, 0, "dangling half-exchange in {ops:?}");
    for pair in ops.chunks(2) {
        assert!(
            matches!(pair[0], TransportOp::Write(_)),
            "expected a write opening the exchange, got {pair:?}"
        );
        assert!(
            matches!(pair[1], TransportOp::Read(_)),
            "expected the read closing the exchange, got {pair:?}"
        );
    }
}

#[tokio::test]
async fn concurrent_motor_callers_never_interleave() {
    let transport = MockTransport::opened();
    transport.push_responses((0..10).map(|n| format!("R{n}")));
    let client = Arc::new(MotorClient::new(
        Arc::new(transport.clone()),
        Link::new("motor"),
    ));

    let mut tasks = Vec::new();
    for caller in ["A", "B"] {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let token = LinkToken::new();
            for i in 0..5 {
                client
                    .send_command(&token, &format!("{caller}{i}"))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ops = transport.ops();
    assert_eq!(ops.len(), 20);
    assert_exchanges_paired(&ops);
}

#[tokio::test]
async fn concurrent_acq_transactions_never_interleave() {
    let transport = MockTransport::opened();
    transport.push_responses((0..8).map(|n| n.to_string()));
    let client = Arc::new(AcqClient::new(
        Arc::new(transport.clone()),
        Link::new("acq"),
    ));

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let token = LinkToken::new();
            for _ in 0..4 {
                // transact re-acquires reentrantly for its inner send and read
                client.transact(&token, "A").await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ops = transport.ops();
    assert_eq!(ops.len(), 16);
    assert_exchanges_paired(&ops);
}

#[tokio::test]
async fn mixed_instruments_share_nothing() {
    // Separate links: motor traffic and acq traffic may interleave freely
    // with each other, but each exchange still stays whole on its own wire.
    let motor_transport = MockTransport::opened();
    let acq_transport = MockTransport::opened();
    motor_transport.push_responses(["m0", "m1", "m2"]);
    acq_transport.push_responses(["a0", "a1", "a2"]);

    let motor = Arc::new(MotorClient::new(
        Arc::new(motor_transport.clone()),
        Link::new("motor"),
    ));
    let acq = Arc::new(AcqClient::new(
        Arc::new(acq_transport.clone()),
        Link::new("acq"),
    ));

    let motor_task = {
        let motor = Arc::clone(&motor);
        tokio::spawn(async move {
            let token = LinkToken::new();
            for i in 0..3 {
                motor.send_command(&token, &format!("X{i}")).await.unwrap();
            }
        })
    };
    let acq_task = {
        let acq = Arc::clone(&acq);
        tokio::spawn(async move {
            let token = LinkToken::new();
            for _ in 0..3 {
                acq.transact(&token, "A").await.unwrap();
            }
        })
    };
    motor_task.await.unwrap();
    acq_task.await.unwrap();

    assert_exchanges_paired(&motor_transport.ops());
    assert_exchanges_paired(&acq_transport.ops());
}
