// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Matching --------
pub static LINES_RESOLVED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("lines_resolved_total", "inventory lines matched to an item id").unwrap());

pub static LINES_UNRESOLVED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("lines_unresolved_total", "inventory lines under the match threshold").unwrap());

pub static LINES_SKIPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("lines_skipped_total", "equipped / untradable lines dropped").unwrap());

// -------- Upstream fetch --------
pub static FETCH_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fetch_attempts_total", "upstream page requests (label: outcome)"),
        &["outcome"],
    )
    .unwrap()
});

pub static LISTINGS_REJECTED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("listings_rejected_total", "upstream listings with invalid price/quantity").unwrap());

pub static LIMITER_WAITS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("rate_limiter_waits_total", "acquire() calls that had to sleep").unwrap());

// -------- Cleaning / pricing --------
pub static ITEMS_BY_STRUCTURE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("items_priced_total", "items priced (label: structure)"),
        &["structure"],
    )
    .unwrap()
});

pub static ANCHORS_REMOVED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("anchor_levels_removed_total", "price levels stripped as anchors").unwrap());

pub static ITEMS_NO_DATA: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("items_no_data_total", "items with an empty book").unwrap());

pub static BATCHES_IN_FLIGHT: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("batches_in_flight", "pricing batches currently running").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(LINES_RESOLVED.clone())),
        REGISTRY.register(Box::new(LINES_UNRESOLVED.clone())),
        REGISTRY.register(Box::new(LINES_SKIPPED.clone())),
        REGISTRY.register(Box::new(FETCH_ATTEMPTS.clone())),
        REGISTRY.register(Box::new(LISTINGS_REJECTED.clone())),
        REGISTRY.register(Box::new(LIMITER_WAITS.clone())),
        REGISTRY.register(Box::new(ITEMS_BY_STRUCTURE.clone())),
        REGISTRY.register(Box::new(ANCHORS_REMOVED.clone())),
        REGISTRY.register(Box::new(ITEMS_NO_DATA.clone())),
        REGISTRY.register(Box::new(BATCHES_IN_FLIGHT.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}
