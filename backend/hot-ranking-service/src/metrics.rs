//! Prometheus metrics for the hot-ranking pipeline

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};
use std::time::Duration;

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "hot_ranking_messages_total",
        "Consumed Kafka messages by topic and outcome",
        &["topic", "outcome"]
    )
    .expect("Failed to register messages metric")
});

static DEAD_LETTER_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "hot_ranking_dead_letter_total",
        "Dead-letter messages by original topic and terminal outcome",
        &["original_topic", "outcome"]
    )
    .expect("Failed to register dead-letter metric")
});

static RANKING_PASS_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hot_ranking_pass_duration_seconds",
        "Duration of ranking passes",
        &["status"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("Failed to register ranking pass metric")
});

static CACHE_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "hot_ranking_cache_lookups_total",
        "Ranking cache lookups by serving tier",
        &["tier"]
    )
    .expect("Failed to register cache lookup metric")
});

static TASK_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "hot_ranking_task_failures_total",
        "Failed background tasks by task name",
        &["task"]
    )
    .expect("Failed to register task failure metric")
});

/// outcome: processed | skipped | dead_lettered | failed
pub fn record_message(topic: &str, outcome: &str) {
    MESSAGES_TOTAL.with_label_values(&[topic, outcome]).inc();
}

/// outcome: recovered | dropped
pub fn record_dead_letter(original_topic: &str, outcome: &str) {
    DEAD_LETTER_TOTAL
        .with_label_values(&[original_topic, outcome])
        .inc();
}

pub fn record_ranking_pass(status: &str, duration: Duration) {
    RANKING_PASS_SECONDS
        .with_label_values(&[status])
        .observe(duration.as_secs_f64());
}

/// tier: local | remote | stale | empty
pub fn record_cache_lookup(tier: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[tier]).inc();
}

pub fn record_task_failure(task: &str) {
    TASK_FAILURES_TOTAL.with_label_values(&[task]).inc();
}
