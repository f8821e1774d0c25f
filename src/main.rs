// src/main.rs
//! Demo binary: wires one `RemoteInputChannel` against the in-memory test
//! doubles and a synthetic producer thread, so the crate has a runnable
//! surface without a real network transport.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

use remote_input_channel::channel::RemoteInputChannel;
use remote_input_channel::config::AppConfig;
use remote_input_channel::gate::{FakeBufferPool, FakeConnectionManager, FakeGate};
use remote_input_channel::ids::{ConnectionId, PartitionId};
use remote_input_channel::metrics::{self, ChannelMetrics};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = match env::args().nth(1) {
        Some(path) => AppConfig::from_file(&path).with_context(|| format!("loading config from {path}"))?,
        None => AppConfig::default(),
    };

    if let Some(bind) = cfg.metrics.bind.clone() {
        info!("serving metrics on {bind}");
        metrics::spawn_http(bind);
    }

    let pool = FakeBufferPool::new(cfg.pool.floating_segments, cfg.pool.segment_size);
    let gate = FakeGate::with_exclusive_segments(
        pool,
        true,
        cfg.pool.exclusive_per_channel,
        cfg.pool.segment_size,
    );
    let connection_manager = FakeConnectionManager::new();
    let channel_metrics = ChannelMetrics::for_channel("demo");

    let channel = RemoteInputChannel::new(
        gate.clone(),
        0,
        PartitionId(1),
        ConnectionId(1),
        connection_manager.clone(),
        cfg.backoff,
        channel_metrics,
    );

    gate.assign_exclusive_segments(&channel)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("assigning exclusive segments")?;
    channel.request_subpartition(0).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let producer_channel = channel.clone();
    let produced = Arc::new(AtomicU64::new(0));
    let producer_produced = produced.clone();
    let producer = thread::spawn(move || {
        for seq in 0..20u64 {
            let Some(buffer) = producer_channel.request_buffer() else {
                warn!("no destination buffer available for sequence {seq}, dropping frame");
                continue;
            };
            let backlog = 20u64.saturating_sub(seq + 1);
            if let Err(e) = producer_channel.on_buffer(buffer, seq, Some(backlog)) {
                warn!("on_buffer({seq}) failed: {e}");
                break;
            }
            producer_produced.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(2));
        }
    });

    let mut consumed = 0u64;
    while consumed < produced.load(Ordering::Relaxed) || !producer.is_finished() {
        match channel.get_next_buffer() {
            Ok(Some(delivered)) => {
                consumed += 1;
                info!(
                    "delivered buffer: more_available={} sender_backlog={}",
                    delivered.more_available, delivered.sender_backlog
                );
                delivered.buffer.recycle_buffer();
            }
            Ok(None) => thread::sleep(Duration::from_millis(1)),
            Err(e) => {
                warn!("get_next_buffer failed: {e}");
                break;
            }
        }
    }

    producer.join().expect("producer thread panicked");
    channel.release_all_resources().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!("demo channel released, unannounced_credit={}", channel.unannounced_credit());
    Ok(())
}
