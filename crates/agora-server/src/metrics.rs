//! Prometheus-compatible counters for the HTTP ingress.

use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    http_requests_total: AtomicU64,
    rpc_requests_total: AtomicU64,
    rpc_errors_total: AtomicU64,
    parse_errors_total: AtomicU64,
    agents_deleted_total: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                http_requests_total: AtomicU64::new(0),
                rpc_requests_total: AtomicU64::new(0),
                rpc_errors_total: AtomicU64::new(0),
                parse_errors_total: AtomicU64::new(0),
                agents_deleted_total: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_http_requests(&self) {
        self.inner.http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rpc_requests(&self) {
        self.inner.rpc_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls answered with an error object, parse failures included.
    pub fn inc_rpc_errors(&self) {
        self.inner.rpc_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parse_errors(&self) {
        self.inner.parse_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agents_deleted(&self) {
        self.inner.agents_deleted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Render in Prometheus text exposition format. `scheduled_tasks` is
    /// sampled by the caller.
    pub fn render_prometheus(&self, scheduled_tasks: usize) -> String {
        let m = &self.inner;
        let samples: [(&str, &str, &str, u64); 7] = [
            ("agora_uptime_seconds", "gauge", "Time since the server started.", self.uptime_secs()),
            ("agora_http_requests_total", "counter", "Total HTTP requests served.", m.http_requests_total.load(Ordering::Relaxed)),
            ("agora_rpc_requests_total", "counter", "Total agent calls dispatched.", m.rpc_requests_total.load(Ordering::Relaxed)),
            ("agora_rpc_errors_total", "counter", "Total agent calls answered with an error.", m.rpc_errors_total.load(Ordering::Relaxed)),
            ("agora_parse_errors_total", "counter", "Total request bodies that were not valid JSON-RPC.", m.parse_errors_total.load(Ordering::Relaxed)),
            ("agora_agents_deleted_total", "counter", "Total agents deregistered over HTTP.", m.agents_deleted_total.load(Ordering::Relaxed)),
            ("agora_scheduled_tasks", "gauge", "Interval tasks currently running.", scheduled_tasks as u64),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in samples {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} {kind}");
            let _ = writeln!(out, "{name} {value}\n");
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
