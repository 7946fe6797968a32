use chrono::{DateTime, Utc};

const GRAVITY: f64 = 1.5;
const AGE_OFFSET_SECS: f64 = 2.0;

/// Decay-weighted hotness: `(likes - 1) / (age_secs + 2)^1.5`.
///
/// The `- 1` is applied unconditionally, so an item with no likes scores
/// below zero and sinks as it ages. Stored fixtures depend on this exact
/// shape.
pub fn hot_score(like_count: i64, age_secs: f64) -> f64 {
    (like_count as f64 - 1.0) / (age_secs.max(0.0) + AGE_OFFSET_SECS).powf(GRAVITY)
}

/// Seconds elapsed since `updated_at`, zero for timestamps in the future.
pub fn age_secs(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - updated_at).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
