use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tracing::debug;

/// Make a `Notify` that is fulfilled every time SIGINT occurs.
pub fn notify_on_sigint() -> Arc<Notify> {
    let notify = Arc::new(Notify::new());

    tokio::spawn({
        let notify = Arc::clone(&notify);
        async move {
            loop {
                tokio::signal::ctrl_c().await.ok();
                debug!("Keyboard interrupt");
                notify.notify_waiters();
            }
        }
    });

    notify
}

/// Exponential back‑off schedule with ±20% jitter:
/// `base` → `2 * base` → `4 * base` → ...
pub(crate) fn backoff(base: Duration, attempt: u64) -> Duration {
    let exp = 1u64 << attempt.saturating_sub(1).min(16);
    let base_delay_ms = (base.as_millis() as u64).saturating_mul(exp);
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}
