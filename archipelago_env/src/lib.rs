//! Archipelago Environment Abstraction Layer
//!
//! This crate isolates everything the clustering service needs from the
//! outside world so the engine and controller stay testable:
//! - Time (`now()`, `sleep()`)
//! - Task spawning (`spawn()`)
//! - The host ↔ worker message channel (`WorkerChannel`)
//!
//! The worker never shares memory with its host. Every message crosses the
//! channel as an opaque [`Envelope`] of serialized bytes, so the in-process
//! thread channel can be swapped for a real process pipe without touching
//! the controller.
//!
//! # Example
//!
//! ```ignore
//! use archipelago_env::{ArchipelagoContext, WorkerChannel};
//!
//! async fn pump<Ctx: ArchipelagoContext, Ch: WorkerChannel>(ctx: &Ctx, channel: &Ch) {
//!     loop {
//!         tokio::select! {
//!             frame = channel.recv() => handle(frame),
//!             _ = ctx.sleep(Duration::from_secs(2)) => flush(),
//!         }
//!     }
//! }
//! ```

mod channel;
mod context;
mod error;
mod tokio_impl;
mod types;

pub use channel::{channel_pair, ThreadChannel, WorkerChannel, WorkerEndpoint};
pub use context::ArchipelagoContext;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use types::{Envelope, WorkerId};
