//! Core environment context trait for the Archipelago controller.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// The controller's flush loop, request timeouts and heartbeat sweeps only
/// see time through this trait, so tests can substitute their own clock.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
#[async_trait]
pub trait ArchipelagoContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for flush-drift correction and heartbeat ages.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time for reports.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
