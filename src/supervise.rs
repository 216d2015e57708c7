//! Panic-catching task supervisor (§2 SUPPLEMENT, §7).
//!
//! A panic in any long-lived loop must be caught, logged, counted, and the
//! loop restarted after a short delay rather than taking down the whole
//! agent. Wraps the teacher's plain `tokio::spawn` in a `catch_unwind`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;

const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Runs `make_task().await` in a loop, restarting it with a short delay if
/// it panics or returns an error. `name` is used only for logging.
pub async fn supervise<F, Fut>(name: &str, mut make_task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    loop {
        let result = AssertUnwindSafe(make_task()).catch_unwind().await;
        match result {
            Ok(Ok(())) => {
                tracing::info!(task = name, "task exited cleanly, stopping supervision");
                return;
            }
            Ok(Err(err)) => {
                tracing::error!(task = name, error = %err, "task returned error, restarting");
            }
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(task = name, panic = %message, "task panicked, restarting");
            }
        }
        tokio::time::sleep(RESTART_DELAY).await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn restarts_after_panic_then_exits_cleanly() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();

        supervise("test", move || {
            let attempts = attempts2.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("boom");
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
