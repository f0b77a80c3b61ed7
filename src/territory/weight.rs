//! Per-material weight: how strongly a note shapes its territory.

const MS_PER_DAY: f64 = 86_400_000.0;

/// Slope denominator: recency loses `1 / 30` per day until the floor.
const RECENCY_WINDOW_DAYS: f64 = 30.0;
const RECENCY_FLOOR: f64 = 0.5;
const DEPTH_CAP: f64 = 1.5;

/// `max(0.5, 1 - age / 30)`: `1.0` at creation, falling linearly until it
/// hits the `0.5` floor at 15 days, then flat.
/// Timestamps in the future count as age zero.
pub fn recency_weight(age_days: f64) -> f64 {
    let age = age_days.max(0.0);
    (1.0 - age / RECENCY_WINDOW_DAYS).max(RECENCY_FLOOR)
}

/// `0.5 + log10(len + 1) / 3`, capped at `1.5`.
pub fn depth_weight(content_len: usize) -> f64 {
    (0.5 + ((content_len as f64) + 1.0).log10() / 3.0).min(DEPTH_CAP)
}

/// Weight of a material created at `created_at_ms` with `content_len` chars,
/// as seen at `now_ms`. Always in `[0.25, 1.5]`.
pub fn material_weight(created_at_ms: i64, content_len: usize, now_ms: i64) -> f64 {
    let age_days = now_ms.saturating_sub(created_at_ms) as f64 / MS_PER_DAY;
    recency_weight(age_days) * depth_weight(content_len)
}
