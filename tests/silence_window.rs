//! Silence-window termination semantics, driven on paused tokio time.

use bytes::Bytes;
use meshops::aggregate::SilenceWindow;
use meshops::link::{DataMessage, DIAGNOSTIC_CONTROL_ENDPOINT, SOURCE_ENDPOINT};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

fn message(address: u32) -> DataMessage {
    DataMessage {
        gateway_id: "gw".to_string(),
        sink_id: "sink0".to_string(),
        network_id: Some(1),
        source_address: address,
        source_endpoint: DIAGNOSTIC_CONTROL_ENDPOINT,
        destination_endpoint: SOURCE_ENDPOINT,
        travel_time_ms: 5,
        hop_count: 1,
        payload: Bytes::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn window_closes_at_last_match_plus_silence() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    // matches arrive at increasing gaps: t = 1, 3, 6, 10
    let feeder_tx = tx.clone();
    tokio::spawn(async move {
        for gap in [1u64, 2, 3, 4] {
            sleep(Duration::from_secs(gap)).await;
            let _ = feeder_tx.send(message(0x6001));
        }
    });

    let start = Instant::now();
    let stats = SilenceWindow::new(Duration::from_secs(5))
        .collect(&mut rx, |_| true)
        .await;

    // closes at 10 + 5 = 15, well past the window's total age at first match
    let elapsed = start.elapsed();
    assert_eq!(stats.accepted, 4);
    assert!(
        elapsed >= Duration::from_secs(15),
        "window closed early at {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_secs(16),
        "window closed late at {:?}",
        elapsed
    );
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn unmatched_messages_do_not_extend_the_window() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let feeder_tx = tx.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        let _ = feeder_tx.send(message(0x6001)); // match at t = 1
        sleep(Duration::from_secs(3)).await;
        let _ = feeder_tx.send(message(0xdead)); // noise at t = 4
    });

    let start = Instant::now();
    let stats = SilenceWindow::new(Duration::from_secs(5))
        .collect(&mut rx, |msg| msg.source_address == 0x6001)
        .await;

    // deadline stays at 1 + 5 = 6; the noise at t = 4 must not move it
    let elapsed = start.elapsed();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.discarded, 1);
    assert!(elapsed >= Duration::from_secs(6));
    assert!(elapsed < Duration::from_secs(7));
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn empty_stream_closes_after_one_silence_span() {
    let (tx, mut rx) = mpsc::unbounded_channel::<DataMessage>();

    let start = Instant::now();
    let stats = SilenceWindow::new(Duration::from_secs(10))
        .collect(&mut rx, |_| true)
        .await;

    assert_eq!(stats.accepted, 0);
    assert!(start.elapsed() >= Duration::from_secs(10));
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn closed_channel_ends_the_window_immediately() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = tx.send(message(0x6001));
    drop(tx);

    let start = Instant::now();
    let stats = SilenceWindow::new(Duration::from_secs(60))
        .collect(&mut rx, |_| true)
        .await;

    assert_eq!(stats.accepted, 1);
    assert!(start.elapsed() < Duration::from_secs(1));
}
