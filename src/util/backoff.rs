//! Redelivery delay helpers.

use std::time::Duration;

/// Exponent cap; `2^20` times any sane base is already far beyond a useful delay.
const MAX_SHIFT: u32 = 20;

/// Exponential redelivery delay: `base_ms * 2^retry_count`.
///
/// `retry_count` is the count *after* the failed attempt was recorded, so the
/// first redelivery waits `2 * base_ms`. Saturates instead of overflowing.
pub fn backoff_delay(base_ms: u64, retry_count: u32) -> Duration {
    let factor = 1u64 << retry_count.min(MAX_SHIFT);
    Duration::from_millis(base_ms.saturating_mul(factor))
}
