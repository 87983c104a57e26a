//! Metrics definitions for the coordinator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "coordinator.requests",
    metric_type: MetricType::Counter,
    description: "Coordination requests handled. Tagged with delivery (fresh, replayed, joined) and status.",
};

pub const AUTH_REJECTIONS: MetricDef = MetricDef {
    name: "coordinator.auth_rejections",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the token check before reaching the upstream",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "coordinator.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to answer a coordination request in seconds. Tagged with delivery.",
};

pub const EXECUTIONS_INFLIGHT: MetricDef = MetricDef {
    name: "coordinator.executions.inflight",
    metric_type: MetricType::Gauge,
    description: "Upstream executions currently running across all sessions",
};

pub const UPSTREAM_ATTEMPTS: MetricDef = MetricDef {
    name: "upstream.attempts",
    metric_type: MetricType::Counter,
    description: "Individual upstream attempts, including retries. Tagged with upstream.",
};

pub const UPSTREAM_FAILURES: MetricDef = MetricDef {
    name: "upstream.failures",
    metric_type: MetricType::Counter,
    description: "Failed upstream attempts. Tagged with kind (timeout, transport, http_status, business, invalid_body).",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    AUTH_REJECTIONS,
    REQUEST_DURATION,
    EXECUTIONS_INFLIGHT,
    UPSTREAM_ATTEMPTS,
    UPSTREAM_FAILURES,
];
