//! Background worker for deferred event delivery.
//!
//! Mutations post their derived events to an unbounded FIFO queue and return
//! immediately. One dedicated thread per router drains the queue and runs the
//! listeners, so delivery order always matches mutation order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use fieldwatch_proto::ChangeEvent;

use super::router::Registry;
use crate::error::Error;

/// Work item for the emission worker.
pub(crate) enum Task {
    /// Deliver the events of one mutation, in order.
    Deliver(Vec<ChangeEvent>),
    /// Signal once every task queued before it has run.
    Barrier(oneshot::Sender<()>),
}

/// Dedicated delivery thread fed by a FIFO queue.
pub(crate) struct EmissionWorker {
    /// Queue sender; `None` once the worker is stopped.
    tx: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    /// Worker thread handle.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EmissionWorker {
    /// Start a worker thread called `name` delivering through `registry`.
    pub fn start(name: String, registry: Arc<Registry>) -> Result<Self, Error> {
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::worker_loop(rx, registry))
            .map_err(|e| Error::Worker(format!("failed to spawn {}: {}", name, e)))?;

        tracing::debug!(worker = %name, "emission worker started");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue one task.
    pub fn submit(&self, task: Task) -> Result<(), Error> {
        let tx = self.tx.lock();
        let tx = tx
            .as_ref()
            .ok_or_else(|| Error::Worker("emission worker stopped".to_string()))?;
        tx.send(task)
            .map_err(|_| Error::Worker("emission worker exited".to_string()))
    }

    /// Queue a barrier and return the receiver it completes.
    pub fn barrier(&self) -> Result<oneshot::Receiver<()>, Error> {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(Task::Barrier(done_tx))?;
        Ok(done_rx)
    }

    /// Check if the worker is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Close the queue and wait for the already queued tasks to run.
    pub fn stop(&self) {
        // Dropping the sender ends the loop once the queue is drained.
        self.tx.lock().take();

        if let Some(handle) = self.handle.lock().take() {
            // A listener may drop the last router handle from the worker itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("emission worker panicked");
            }
        }
    }

    fn worker_loop(mut rx: mpsc::UnboundedReceiver<Task>, registry: Arc<Registry>) {
        while let Some(task) = rx.blocking_recv() {
            match task {
                Task::Deliver(events) => {
                    for event in &events {
                        registry.deliver(event);
                    }
                }
                Task::Barrier(done) => {
                    // The waiter may have given up; nothing to do then.
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("emission worker stopped (queue closed)");
    }
}

impl Drop for EmissionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldwatch_proto::{Document, Scope};

    fn event(name: &str) -> ChangeEvent {
        ChangeEvent::new(name, Scope::Raw, Document::new())
    }

    #[test]
    fn test_tasks_run_in_order() {
        let registry = Arc::new(Registry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.add(
            "created".to_string(),
            Arc::new(move |e: &ChangeEvent| sink.lock().push(e.name.clone())),
        );
        registry.add(
            "removed".to_string(),
            Arc::new({
                let sink = seen.clone();
                move |e: &ChangeEvent| sink.lock().push(e.name.clone())
            }),
        );

        let worker = EmissionWorker::start("fieldwatch-emit-test".into(), registry).unwrap();
        worker.submit(Task::Deliver(vec![event("created")])).unwrap();
        worker.submit(Task::Deliver(vec![event("removed"), event("created")])).unwrap();
        worker.barrier().unwrap().blocking_recv().unwrap();

        assert_eq!(*seen.lock(), vec!["created", "removed", "created"]);
        assert!(worker.is_running());
    }

    #[test]
    fn test_stop_drains_queue() {
        let registry = Arc::new(Registry::default());
        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();
        registry.add(
            "updated".to_string(),
            Arc::new(move |_: &ChangeEvent| *counter.lock() += 1),
        );

        let worker = EmissionWorker::start("fieldwatch-emit-drain".into(), registry).unwrap();
        for _ in 0..50 {
            worker.submit(Task::Deliver(vec![event("updated")])).unwrap();
        }
        worker.stop();

        assert_eq!(*seen.lock(), 50);
        assert!(!worker.is_running());
        assert!(matches!(
            worker.submit(Task::Deliver(Vec::new())),
            Err(Error::Worker(_))
        ));
    }
}
