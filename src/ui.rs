//! UI-context dispatch
//!
//! `updateUI`-style stages hand their work to a [`UiDispatcher`] and block the
//! pipeline worker until it has run, so UI mutations stay single-threaded and
//! ordered with the rest of the pipeline.

use std::thread::{self, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

pub trait UiDispatcher: Send + Sync {
    /// Run `job` on the UI context and return once it has finished.
    fn dispatch_sync(&self, job: UiJob);
}

/// Runs jobs on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn dispatch_sync(&self, job: UiJob) {
        job();
    }
}

type Envelope = (UiJob, oneshot::Sender<()>);

/// A single named thread acting as the UI context.
///
/// The thread exits once the last `UiThread` clone is dropped.
#[derive(Clone)]
pub struct UiThread {
    sender: mpsc::UnboundedSender<Envelope>,
    thread_id: ThreadId,
}

impl UiThread {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope>();
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            while let Some((job, done)) = receiver.blocking_recv() {
                job();
                let _ = done.send(());
            }
        })?;

        Ok(Self {
            sender,
            thread_id: handle.thread().id(),
        })
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl UiDispatcher for UiThread {
    fn dispatch_sync(&self, job: UiJob) {
        if self.is_current() {
            job();
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send((job, done_tx)).is_err() {
            warn!("UI thread is gone, dropping UI job");
            return;
        }
        // Err means the job panicked and the UI thread went down with it.
        if done_rx.blocking_recv().is_err() {
            warn!("UI job did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_inline_runs_on_caller() {
        let caller = thread::current().id();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        InlineDispatcher.dispatch_sync(Box::new(move || {
            *slot.lock().unwrap() = Some(thread::current().id());
        }));
        assert_eq!(*seen.lock().unwrap(), Some(caller));
    }

    #[test]
    fn test_ui_thread_runs_jobs_synchronously_on_its_thread() {
        let ui = UiThread::spawn("ui-test").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let slot = seen.clone();
            ui.dispatch_sync(Box::new(move || {
                slot.lock().unwrap().push((n, thread::current().name().map(String::from)));
            }));
            // dispatch_sync returned, so the job has already run
            assert_eq!(seen.lock().unwrap().len(), n + 1);
        }

        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .all(|(_, name)| name.as_deref() == Some("ui-test")));
    }

    #[test]
    fn test_panicking_job_releases_caller() {
        let ui = UiThread::spawn("ui-panic").unwrap();
        ui.dispatch_sync(Box::new(|| panic!("ui bug")));

        // The thread is gone; later jobs are dropped instead of blocking.
        let ran = Arc::new(Mutex::new(false));
        let slot = ran.clone();
        ui.dispatch_sync(Box::new(move || *slot.lock().unwrap() = true));
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_nested_dispatch_does_not_deadlock() {
        let ui = UiThread::spawn("ui-nested").unwrap();
        let inner = ui.clone();
        let seen = Arc::new(Mutex::new(false));
        let slot = seen.clone();

        ui.dispatch_sync(Box::new(move || {
            inner.dispatch_sync(Box::new(move || {
                *slot.lock().unwrap() = true;
            }));
        }));

        assert!(*seen.lock().unwrap());
    }
}
