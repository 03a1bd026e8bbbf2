//! Host ↔ worker message channel.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{Envelope, WorkerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Host-side view of the channel to an isolated worker.
///
/// # Implementations
///
/// - **Production**: `ThreadChannel` - unbounded FIFO queues to a dedicated thread
/// - **Tests**: scripted fakes that answer (or ignore) requests on demand
///
/// # Message Flow
///
/// ```text
/// Host                       Channel                    Worker
///   |                           |                          |
///   |-- send(envelope) -------->|------------------------->|
///   |                           |                          |-- process
///   |<-- recv() ----------------|<-------------------------|-- reply / status
/// ```
///
/// Delivery is FIFO in each direction.
#[async_trait]
pub trait WorkerChannel: Send + Sync + 'static {
    /// Queues a message for the worker. Never suspends.
    ///
    /// # Returns
    /// * `Ok(())` - Message queued
    /// * `Err(EnvError::ChannelClosed)` - The worker is gone
    fn send(&self, envelope: Envelope) -> Result<(), EnvError>;

    /// Receives the next message from the worker.
    ///
    /// Returns `None` once the worker side has shut down.
    async fn recv(&self) -> Option<Envelope>;

    /// Terminates the worker without a handshake.
    ///
    /// Messages the worker has not answered yet stay unanswered.
    fn terminate(&self);

    /// Returns the worker's ID.
    fn worker_id(&self) -> WorkerId;
}

/// Host end of a thread-backed worker channel.
pub struct ThreadChannel {
    worker_id: WorkerId,

    /// Host → worker queue
    tx: mpsc::UnboundedSender<Envelope>,

    /// Worker → host queue (behind tokio mutex for async)
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,

    killed: Arc<AtomicBool>,
}

/// Worker end of a thread-backed worker channel.
///
/// Used from a plain OS thread, hence the blocking receive.
pub struct WorkerEndpoint {
    worker_id: WorkerId,

    rx: mpsc::UnboundedReceiver<Envelope>,

    tx: mpsc::UnboundedSender<Envelope>,

    killed: Arc<AtomicBool>,
}

/// Creates a connected host/worker channel pair.
pub fn channel_pair(worker_id: WorkerId) -> (ThreadChannel, WorkerEndpoint) {
    let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel();
    let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();
    let killed = Arc::new(AtomicBool::new(false));

    let host = ThreadChannel {
        worker_id,
        tx: to_worker_tx,
        rx: tokio::sync::Mutex::new(to_host_rx),
        killed: Arc::clone(&killed),
    };

    let worker = WorkerEndpoint {
        worker_id,
        rx: to_worker_rx,
        tx: to_host_tx,
        killed,
    };

    (host, worker)
}

#[async_trait]
impl WorkerChannel for ThreadChannel {
    fn send(&self, envelope: Envelope) -> Result<(), EnvError> {
        self.tx.send(envelope).map_err(|_| EnvError::ChannelClosed)
    }

    async fn recv(&self) -> Option<Envelope> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    fn terminate(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    fn worker_id(&self) -> WorkerId {
        self.worker_id
    }
}

impl WorkerEndpoint {
    /// Blocks until the next message arrives.
    ///
    /// Returns `None` when the host is gone or the worker was terminated.
    /// A message received after termination is dropped unanswered.
    pub fn recv_blocking(&mut self) -> Option<Envelope> {
        let envelope = self.rx.blocking_recv()?;
        if self.is_terminated() {
            self.rx.close();
            return None;
        }
        Some(envelope)
    }

    /// Queues a message for the host.
    pub fn send(&self, envelope: Envelope) -> Result<(), EnvError> {
        self.tx.send(envelope).map_err(|_| EnvError::ChannelClosed)
    }

    /// Returns true once the host terminated this worker.
    pub fn is_terminated(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Returns this worker's ID.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }
}
