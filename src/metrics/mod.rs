//! Metrics module
//!
//! Provides Prometheus metrics for admission control, eviction and locking.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_int_gauge, Counter, CounterVec, IntGauge,
};

lazy_static! {
    // Admission metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_store_uploads_total",
        "Upload creation attempts by outcome",
        &["status"]
    ).unwrap();

    pub static ref EVICTIONS_TOTAL: Counter = register_counter!(
        "mizuchi_store_evictions_total",
        "Uploads terminated to free capacity"
    ).unwrap();

    pub static ref EVICTED_BYTES_TOTAL: Counter = register_counter!(
        "mizuchi_store_evicted_bytes_total",
        "Reserved bytes released by eviction"
    ).unwrap();

    pub static ref TERMINATIONS_TOTAL: Counter = register_counter!(
        "mizuchi_store_terminations_total",
        "Uploads terminated on request"
    ).unwrap();

    // Quota ledger
    pub static ref QUOTA_USED_BYTES: IntGauge = register_int_gauge!(
        "mizuchi_store_quota_used_bytes",
        "Bytes currently reserved by tracked uploads"
    ).unwrap();

    pub static ref QUOTA_CAPACITY_BYTES: IntGauge = register_int_gauge!(
        "mizuchi_store_quota_capacity_bytes",
        "Configured storage capacity (0 = unlimited)"
    ).unwrap();

    // Locking
    pub static ref LOCK_CONFLICTS_TOTAL: Counter = register_counter!(
        "mizuchi_store_lock_conflicts_total",
        "Lock attempts on an upload that was already locked"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_store_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Record an admitted upload
pub fn record_upload_created() {
    UPLOADS_TOTAL.with_label_values(&["created"]).inc();
}

/// Record an upload rejected for lack of capacity
pub fn record_upload_rejected() {
    UPLOADS_TOTAL.with_label_values(&["rejected"]).inc();
}

/// Record an eviction and the bytes it released
pub fn record_eviction(bytes: u64) {
    EVICTIONS_TOTAL.inc();
    EVICTED_BYTES_TOTAL.inc_by(bytes as f64);
}

pub fn record_termination() {
    TERMINATIONS_TOTAL.inc();
}

pub fn record_lock_conflict() {
    LOCK_CONFLICTS_TOTAL.inc();
}

pub fn set_quota_used(bytes: u64) {
    QUOTA_USED_BYTES.set(clamp_i64(bytes));
}

pub fn set_quota_capacity(bytes: u64) {
    QUOTA_CAPACITY_BYTES.set(clamp_i64(bytes));
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
