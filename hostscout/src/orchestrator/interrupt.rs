use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

const RUNNING: u8 = 0;
const GRACEFUL: u8 = 1;
const FORCE: u8 = 2;
const ABORT: u8 = 3;

/// What a cancellation signal escalated the run to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStage {
    /// Stop dispatching; let running units finish
    Graceful,
    /// Abandon running units and return
    Force,
    /// Not handled by the orchestrator; the host process should exit
    Abort,
}

#[derive(Debug)]
struct Shared {
    stage: AtomicU8,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Cancellation state for one run, shared between the coordinator and
/// whatever receives the interrupt signal.
///
/// The stage only moves forward, so a forced stop can never be observed
/// without the graceful stage before it. Every trigger also wakes the
/// coordinator if it is blocked waiting for a worker.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    shared: Arc<Shared>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                stage: AtomicU8::new(RUNNING),
                wake_tx,
                wake_rx,
            }),
        }
    }

    /// Escalates by one stage. Safe to call from a signal-handling thread.
    pub fn trigger(&self) -> InterruptStage {
        let previous = self
            .shared
            .stage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |stage| {
                Some((stage + 1).min(ABORT))
            })
            .unwrap_or_else(|stage| stage);
        let _ = self.shared.wake_tx.send(());

        let stage = match previous {
            RUNNING => InterruptStage::Graceful,
            GRACEFUL => InterruptStage::Force,
            _ => InterruptStage::Abort,
        };
        debug!("Interrupt escalated to {:?}", stage);
        stage
    }

    /// The current stage, if any signal has arrived
    pub fn stage(&self) -> Option<InterruptStage> {
        match self.shared.stage.load(Ordering::SeqCst) {
            RUNNING => None,
            GRACEFUL => Some(InterruptStage::Graceful),
            FORCE => Some(InterruptStage::Force),
            _ => Some(InterruptStage::Abort),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.shared.stage.load(Ordering::SeqCst) >= GRACEFUL
    }

    pub fn is_force(&self) -> bool {
        self.shared.stage.load(Ordering::SeqCst) >= FORCE
    }

    pub(crate) fn wake_receiver(&self) -> Receiver<()> {
        self.shared.wake_rx.clone()
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}
