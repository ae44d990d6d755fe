//! Request and cache metrics.
//!
//! Instruments come from the global OpenTelemetry meter and are created on first
//! use, so [`crate::telemetry::init_telemetry`] must run before the first request
//! for them to be exported. Without a meter provider every instrument is a no-op.
//!
//! Provided metrics:
//! * `tracetour_requests_total` (counter: method, route, status)
//! * `tracetour_request_duration_seconds` (histogram: method, route)
//! * `tracetour_cache_lookups_total` (counter: result)
//! * `tracetour_panics_recovered_total` (counter: route)
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

pub const TRACETOUR_REQUESTS_TOTAL: &str = "tracetour_requests_total";
pub const TRACETOUR_REQUEST_DURATION_SECONDS: &str = "tracetour_request_duration_seconds";
pub const TRACETOUR_CACHE_LOOKUPS_TOTAL: &str = "tracetour_cache_lookups_total";
pub const TRACETOUR_PANICS_RECOVERED_TOTAL: &str = "tracetour_panics_recovered_total";

struct Instruments {
    requests_total: Counter<u64>,
    request_duration: Histogram<f64>,
    cache_lookups: Counter<u64>,
    panics_recovered: Counter<u64>,
}

static INSTRUMENTS: Lazy<Instruments> = Lazy::new(|| {
    let meter = global::meter("tracetour");
    Instruments {
        requests_total: meter
            .u64_counter(TRACETOUR_REQUESTS_TOTAL)
            .with_description("Total number of HTTP requests handled.")
            .build(),
        request_duration: meter
            .f64_histogram(TRACETOUR_REQUEST_DURATION_SECONDS)
            .with_unit("s")
            .with_description("Latency of HTTP requests.")
            .build(),
        cache_lookups: meter
            .u64_counter(TRACETOUR_CACHE_LOOKUPS_TOTAL)
            .with_description("Cache lookups by result (hit, miss, error).")
            .build(),
        panics_recovered: meter
            .u64_counter(TRACETOUR_PANICS_RECOVERED_TOTAL)
            .with_description("Handler panics converted into 500 responses.")
            .build(),
    }
});

/// Result label for [`record_cache_lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookupResult {
    Hit,
    Miss,
    Error,
}

impl CacheLookupResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLookupResult::Hit => "hit",
            CacheLookupResult::Miss => "miss",
            CacheLookupResult::Error => "error",
        }
    }
}

pub fn increment_request_total(method: &str, route: &str, status: u16) {
    INSTRUMENTS.requests_total.add(
        1,
        &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("route", route.to_string()),
            KeyValue::new("status", i64::from(status)),
        ],
    );
}

pub fn record_request_duration(method: &str, route: &str, duration: Duration) {
    INSTRUMENTS.request_duration.record(
        duration.as_secs_f64(),
        &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("route", route.to_string()),
        ],
    );
}

pub fn record_cache_lookup(result: CacheLookupResult) {
    INSTRUMENTS
        .cache_lookups
        .add(1, &[KeyValue::new("result", result.as_str())]);
}

pub fn increment_panics_recovered(route: &str) {
    INSTRUMENTS
        .panics_recovered
        .add(1, &[KeyValue::new("route", route.to_string())]);
}

/// Records the request duration when dropped.
pub struct RequestTimer {
    method: String,
    route: String,
    start: Instant,
}

impl RequestTimer {
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.method, &self.route, self.start.elapsed());
    }
}
