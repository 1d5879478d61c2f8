//! "Try a few times, then settle for a default" for read-only backend queries.

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};

/// Attempts used by volume queries and playlist enumeration.
pub const QUERY_ATTEMPTS: usize = 3;

/// Run `op` up to `attempts` times and return the first success.  When every
/// attempt fails the error is logged and `fallback` is returned instead.
pub async fn retry_or<T, E, F, Fut>(what: &str, attempts: usize, fallback: T, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match op().await {
            Ok(value) => return value,
            Err(e) => {
                debug!("{}: attempt {}/{} failed: {}", what, attempt, attempts, e);
                last_err = Some(e.to_string());
            }
        }
    }
    warn!(
        "{}: giving up after {} attempts ({}), using fallback",
        what,
        attempts,
        last_err.unwrap_or_default()
    );
    fallback
}
