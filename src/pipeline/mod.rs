//! Gated, strictly serial stage queue
//!
//! A [`HandlerPipeline`] accepts stages from any thread but runs none of them
//! until [`release`](HandlerPipeline::release) is called. Release happens at most
//! once; it starts a dedicated worker thread that drains the queue in
//! registration order, one stage at a time. Stages pushed after release are
//! appended behind the ones still waiting.
//!
//! ```rust,ignore
//! let pipeline = HandlerPipeline::new("task-1", Arc::new(Ctx::default()));
//! pipeline.push(Box::new(|ctx: &Ctx| ctx.step("decode")));
//! pipeline.push(Box::new(|ctx: &Ctx| ctx.step("render")));
//! pipeline.release(); // stages start running, in order
//! ```

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// One unit of work, run on the pipeline worker with the shared context.
pub type Stage<C> = Box<dyn FnOnce(&C) + Send + 'static>;

/// Receiver and context held until the pipeline is released.
struct Parked<C> {
    receiver: mpsc::UnboundedReceiver<Stage<C>>,
    context: Arc<C>,
}

pub struct HandlerPipeline<C> {
    label: String,
    sender: mpsc::UnboundedSender<Stage<C>>,
    parked: Mutex<Option<Parked<C>>>,
    cancelled: Arc<AtomicBool>,
}

impl<C: Send + Sync + 'static> HandlerPipeline<C> {
    /// Create a blocked pipeline whose stages will receive `context`.
    pub fn new(label: impl Into<String>, context: Arc<C>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            label: label.into(),
            sender,
            parked: Mutex::new(Some(Parked { receiver, context })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append a stage. Returns `false` if the pipeline was cancelled or its
    /// worker is gone, in which case the stage is dropped.
    pub fn push(&self, stage: Stage<C>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.sender.send(stage).is_ok()
    }

    /// Unblock the pipeline. Only the first call has an effect.
    pub fn release(&self) -> bool {
        let Some(parked) = self.parked.lock().take() else {
            return false;
        };
        if self.is_cancelled() {
            return false;
        }

        let label = self.label.clone();
        let cancelled = self.cancelled.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("pipeline-{}", label))
            .spawn(move || drain(label, parked, cancelled));

        match spawned {
            Ok(_) => true,
            Err(e) => {
                error!(pipeline = %self.label, error = %e, "Failed to start pipeline worker");
                self.cancelled.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Drop every stage that has not started yet. A running stage finishes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Never released: discard the parked queue right away.
        self.parked.lock().take();
        // Released: wake an idle worker so it observes the flag and exits.
        let _ = self.sender.send(Box::new(|_: &C| {}));
        debug!(pipeline = %self.label, "Pipeline cancelled");
    }

    pub fn is_released(&self) -> bool {
        self.parked.lock().is_none() && !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn drain<C>(label: String, parked: Parked<C>, cancelled: Arc<AtomicBool>) {
    let Parked {
        mut receiver,
        context,
    } = parked;
    debug!(pipeline = %label, "Pipeline released");

    let mut ran = 0usize;
    while let Some(stage) = receiver.blocking_recv() {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        if catch_unwind(AssertUnwindSafe(|| stage(&context))).is_err() {
            error!(pipeline = %label, stage = ran, "Pipeline stage panicked");
        }
        ran += 1;
    }

    debug!(pipeline = %label, stages = ran, "Pipeline drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Log(Mutex<Vec<u32>>);

    fn recorder(tx: &std_mpsc::Sender<u32>, n: u32) -> Stage<Log> {
        let tx = tx.clone();
        Box::new(move |log: &Log| {
            log.0.lock().push(n);
            let _ = tx.send(n);
        })
    }

    #[test]
    fn test_stages_wait_for_release() {
        let log = Arc::new(Log::default());
        let pipeline = HandlerPipeline::new("gate", log.clone());
        let (tx, rx) = std_mpsc::channel();

        pipeline.push(recorder(&tx, 1));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(log.0.lock().is_empty());

        assert!(pipeline.release());
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);
    }

    #[test]
    fn test_release_only_once() {
        let pipeline = HandlerPipeline::new("once", Arc::new(Log::default()));
        assert!(pipeline.release());
        assert!(!pipeline.release());
        assert!(pipeline.is_released());
    }

    #[test]
    fn test_stages_run_in_order_including_late_ones() {
        let log = Arc::new(Log::default());
        let pipeline = HandlerPipeline::new("order", log.clone());
        let (tx, rx) = std_mpsc::channel();

        for n in 0..5 {
            pipeline.push(recorder(&tx, n));
        }
        pipeline.release();
        for n in 5..10 {
            pipeline.push(recorder(&tx, n));
        }

        let seen: Vec<u32> = (0..10).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(*log.0.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_before_release_discards_everything() {
        let log = Arc::new(Log::default());
        let pipeline = HandlerPipeline::new("cancel", log.clone());
        let (tx, rx) = std_mpsc::channel();

        pipeline.push(recorder(&tx, 1));
        pipeline.cancel();
        assert!(!pipeline.release());
        assert!(!pipeline.push(recorder(&tx, 2)));

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(log.0.lock().is_empty());
    }

    #[test]
    fn test_cancel_skips_pending_stages() {
        let log = Arc::new(Log::default());
        let pipeline = Arc::new(HandlerPipeline::new("midway", log.clone()));
        let (tx, rx) = std_mpsc::channel();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();

        pipeline.push(recorder(&tx, 1));
        pipeline.push(Box::new(move |_: &Log| {
            let _ = gate_rx.recv_timeout(WAIT);
        }));
        pipeline.push(recorder(&tx, 3));
        pipeline.release();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);
        pipeline.cancel();
        let _ = gate_tx.send(());

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(*log.0.lock(), vec![1]);
    }

    #[test]
    fn test_panicking_stage_does_not_stop_pipeline() {
        let log = Arc::new(Log::default());
        let pipeline = HandlerPipeline::new("panic", log.clone());
        let (tx, rx) = std_mpsc::channel();

        pipeline.push(Box::new(|_: &Log| panic!("stage failure")));
        pipeline.push(recorder(&tx, 2));
        pipeline.release();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
    }
}
