//! Wall-clock context for the production controller.

use crate::ArchipelagoContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, debug_span, Instrument};

/// Controller context on the Tokio runtime.
///
/// `now` counts from construction, so two contexts never share an epoch.
/// Background loops run as named Tokio tasks inside a `task` span.
pub struct TokioContext {
    epoch: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Context ready to hand to a controller.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchipelagoContext for TokioContext {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = debug_span!("task", name = %name);
        tokio::spawn(
            async move {
                future.await;
                debug!("Task finished");
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_now_advances_with_sleep() {
        let ctx = TokioContext::new();
        let before = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;

        assert!(ctx.now() - before >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_spawned_task_runs() {
        let ctx = TokioContext::shared();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        ctx.spawn("flush-loop", async move {
            flag.store(true, Ordering::SeqCst);
        });

        for _ in 0..50 {
            if ran.load(Ordering::SeqCst) {
                break;
            }
            ctx.sleep(Duration::from_millis(2)).await;
        }
        assert!(ran.load(Ordering::SeqCst));
    }
}
