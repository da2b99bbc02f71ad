//! Process-wide monotonic microsecond clock.

use std::sync::OnceLock;
use std::time::Instant;

static ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the first call in this process. Monotonic.
pub fn micronow() -> i64 {
    let origin = *ORIGIN.get_or_init(Instant::now);
    Instant::now().duration_since(origin).as_micros() as i64
}
