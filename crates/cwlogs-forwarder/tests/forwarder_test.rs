// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::mocks::RecordingSink;
use cwlogs_forwarder::{
    Batcher, DrainPolicy, Forwarder, ForwarderConfig, Ingestor, ShutdownTrigger, Sink,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::time::sleep;

fn input_of(n: usize) -> Vec<u8> {
    (0..n).map(|i| format!("log line {i}\n")).collect::<String>().into_bytes()
}

#[tokio::test]
async fn threshold_flushes_full_batches_and_keeps_remainder() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = Batcher::new(Arc::clone(&sink) as Arc<dyn Sink>, 100);

    for i in 0..250 {
        batcher.append(format!("line {i}"));
    }
    batcher.in_flight().wait().await;

    assert_eq!(sink.batch_sizes(), vec![100, 100]);
    assert_eq!(batcher.buffered(), 50);
}

#[tokio::test(start_paused = true)]
async fn periodic_flush_then_drain_on_end_of_input() {
    let sink = Arc::new(RecordingSink::default());
    let forwarder = Forwarder::new(
        Arc::clone(&sink) as Arc<dyn Sink>,
        ForwarderConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            drain_policy: DrainPolicy::Detach,
        },
    );
    let (mut writer, reader) = tokio::io::duplex(1_024);
    let run = tokio::spawn(forwarder.run_until(
        Ingestor::new(BufReader::new(reader)),
        std::future::pending(),
    ));

    writer.write_all(b"one\ntwo\nthree\n").await.unwrap();
    sleep(Duration::from_secs(6)).await;
    writer.write_all(b"four\nfive\n").await.unwrap();
    drop(writer);

    let report = run.await.unwrap();
    assert_eq!(report.trigger, ShutdownTrigger::EndOfInput);
    assert_eq!(report.drained, Ok(2));

    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].lines, vec!["one", "two", "three"]);
    assert_eq!(batches[1].lines, vec!["four", "five"]);
}

#[tokio::test]
async fn termination_request_drains_buffer() {
    let sink = Arc::new(RecordingSink::default());
    let forwarder = Forwarder::new(Arc::clone(&sink) as Arc<dyn Sink>, ForwarderConfig::default());
    let batcher = Arc::clone(forwarder.batcher());
    let (mut writer, reader) = tokio::io::duplex(1_024);
    let (signal_tx, signal_rx) = oneshot::channel::<()>();

    let run = tokio::spawn(forwarder.run_until(Ingestor::new(BufReader::new(reader)), async {
        let _ = signal_rx.await;
    }));

    writer.write_all(&input_of(7)).await.unwrap();
    while batcher.buffered() < 7 {
        tokio::task::yield_now().await;
    }
    signal_tx.send(()).unwrap();

    let report = run.await.unwrap();
    assert_eq!(report.trigger, ShutdownTrigger::Signal);
    assert_eq!(report.drained, Ok(7));
    assert_eq!(sink.batch_sizes(), vec![7]);

    // input arriving after the termination request is not forwarded
    let _ = writer.write_all(b"late\n").await;
    tokio::task::yield_now().await;
    assert_eq!(batcher.buffered(), 0);
    assert_eq!(sink.calls(), 1);
}

#[tokio::test]
async fn failed_batch_does_not_affect_the_next_one() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = Batcher::new(Arc::clone(&sink) as Arc<dyn Sink>, 10);

    sink.set_failing(true);
    for i in 0..10 {
        batcher.append(format!("doomed {i}"));
    }
    batcher.in_flight().wait().await;
    assert_eq!(batcher.stats().failed_batches, 1);
    assert_eq!(batcher.buffered(), 0);

    sink.set_failing(false);
    for i in 0..10 {
        batcher.append(format!("ok {i}"));
    }
    batcher.in_flight().wait().await;

    assert_eq!(sink.calls(), 2);
    assert_eq!(sink.batch_sizes(), vec![10]);
    assert!(sink.all_lines().iter().all(|l| l.starts_with("ok ")));
}

#[tokio::test]
async fn drain_is_complete_for_any_input_size() {
    for (n, batch_size) in [(0, 100), (1, 100), (99, 100), (100, 100), (101, 100), (250, 100), (1_000, 7), (64, 1)] {
        let sink = Arc::new(RecordingSink::default());
        let forwarder = Forwarder::new(
            Arc::clone(&sink) as Arc<dyn Sink>,
            ForwarderConfig {
                batch_size,
                flush_interval: Duration::from_millis(1),
                drain_policy: DrainPolicy::AwaitInFlight(Duration::from_secs(5)),
            },
        );
        let batcher = Arc::clone(forwarder.batcher());
        let input = input_of(n);

        let report = forwarder
            .run_until(Ingestor::new(input.as_slice()), std::future::pending())
            .await;
        batcher.in_flight().wait().await;

        assert_eq!(report.trigger, ShutdownTrigger::EndOfInput);
        let lines = sink.all_lines();
        assert_eq!(lines.len(), n, "n={n} batch_size={batch_size}");
        let unique: HashSet<&String> = lines.iter().collect();
        assert_eq!(unique.len(), n, "duplicate lines for n={n}");
        assert!(sink.batch_sizes().iter().all(|&s| s > 0 && s <= batch_size));
        assert_eq!(batcher.buffered(), 0);
    }
}

#[tokio::test]
async fn empty_lines_are_never_sent() {
    let sink = Arc::new(RecordingSink::default());
    let forwarder = Forwarder::new(
        Arc::clone(&sink) as Arc<dyn Sink>,
        ForwarderConfig {
            batch_size: 2,
            ..Default::default()
        },
    );
    let batcher = Arc::clone(forwarder.batcher());
    let input: &[u8] = b"\n\n\r\n\n";

    let report = forwarder
        .run_until(Ingestor::new(input), std::future::pending())
        .await;
    batcher.in_flight().wait().await;

    assert_eq!(report.drained, Ok(0));
    assert_eq!(sink.calls(), 0);
}
