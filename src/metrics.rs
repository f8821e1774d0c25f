// src/metrics.rs
//! Prometheus metrics, following the teacher's pattern of a process-wide
//! `Lazy` registry plus small per-subsystem wrapper types (see the
//! teacher's own `metrics.rs`: `Lazy<Registry>`, `IntGauge`/`IntCounterVec`
//! registered once at startup, `spawn_http` serving `/metrics`).

use std::io::Read;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static QUEUED_BUFFERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("channel_queued_buffers", "buffers currently queued for the task to consume"),
        &["channel"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

static AVAILABLE_BUFFERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("channel_available_buffers", "buffers sitting in the available buffer queue"),
        &["channel"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

static REQUIRED_BUFFERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("channel_required_buffers", "current numRequiredBuffers target"),
        &["channel"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

static CREDIT_ANNOUNCEMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("channel_credit_announcements_total", "credit announcements sent upstream"),
        &["channel"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

static BUFFER_REORDERING_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("channel_buffer_reordering_total", "sequence gaps observed on arrival"),
        &["channel"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

static RELEASED_CHANNELS_TOTAL: Lazy<prometheus::IntCounter> = Lazy::new(|| {
    let c = prometheus::IntCounter::new("channel_released_total", "channels that have completed release").expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

/// Per-channel metrics handle, pre-bound to this channel's id label so call
/// sites never format label strings on the hot path.
pub struct ChannelMetrics {
    queued_buffers: prometheus::IntGauge,
    available_buffers: prometheus::IntGauge,
    required_buffers: prometheus::IntGauge,
    credit_announcements: prometheus::IntCounter,
    buffer_reordering: prometheus::IntCounter,
}

impl ChannelMetrics {
    pub fn for_channel(label: &str) -> Arc<Self> {
        Arc::new(Self {
            queued_buffers: QUEUED_BUFFERS.with_label_values(&[label]),
            available_buffers: AVAILABLE_BUFFERS.with_label_values(&[label]),
            required_buffers: REQUIRED_BUFFERS.with_label_values(&[label]),
            credit_announcements: CREDIT_ANNOUNCEMENTS_TOTAL.with_label_values(&[label]),
            buffer_reordering: BUFFER_REORDERING_TOTAL.with_label_values(&[label]),
        })
    }

    pub fn set_queued_buffers(&self, n: usize) {
        self.queued_buffers.set(n as i64);
    }

    pub fn set_available_buffers(&self, n: usize) {
        self.available_buffers.set(n as i64);
    }

    pub fn set_required_buffers(&self, n: usize) {
        self.required_buffers.set(n as i64);
    }

    pub fn credit_announcements_total(&self) {
        self.credit_announcements.inc();
    }

    pub fn buffer_reordering_total(&self) {
        self.buffer_reordering.inc();
    }
}

pub fn record_channel_released() {
    RELEASED_CHANNELS_TOTAL.inc();
}

/// Serves `/metrics` on `addr` using a dedicated thread, mirroring the
/// teacher's `metrics::spawn_http`. Returns the thread handle so the caller
/// can decide whether to join it (the demo binary does not).
pub fn spawn_http(addr: impl ToSocketAddrs + Send + 'static) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let server = match tiny_http::Server::http(addr) {
            Ok(s) => s,
            Err(e) => {
                log::error!("metrics http server failed to start: {e}");
                return;
            }
        };
        for mut request in server.incoming_requests() {
            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);

            let metric_families = REGISTRY.gather();
            let mut buf = Vec::new();
            let encoder = prometheus::TextEncoder::new();
            if let Err(e) = encoder.encode(&metric_families, &mut buf) {
                log::error!("failed to encode metrics: {e}");
                let _ = request.respond(tiny_http::Response::from_string("internal error").with_status_code(500));
                continue;
            }
            let response = tiny_http::Response::from_data(buf);
            let _ = request.respond(response);
        }
    })
}
