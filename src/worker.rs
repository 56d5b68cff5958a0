//! Background worker lifecycle.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Handle to a background thread that exits once told to stop.
///
/// Dropping the stop sender is the signal; every worker loop observes
/// it within one bounded wait.
pub(crate) struct Worker {
    stop: Option<Sender<()>>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn channel() -> (Sender<()>, Receiver<()>) {
        bounded(0)
    }

    pub(crate) fn new(stop: Sender<()>, handle: JoinHandle<()>) -> Self {
        Worker { stop: Some(stop), handle }
    }

    /// Ask the thread to stop without waiting for it.
    pub(crate) fn signal(&mut self) {
        self.stop.take();
    }

    /// Signal the thread and wait for it to exit.
    pub(crate) fn stop(mut self) {
        self.signal();
        if let Err(err) = self.handle.join() {
            log::error!("Worker thread panicked: {:?}", err);
        }
    }
}
