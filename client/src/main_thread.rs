//! Deferred execution on the application's own thread
//!
//! Network workers never run UI callbacks inline. They hand a closure to the
//! [`MainThreadHandle`] and the application drains its [`MainThreadQueue`]
//! once per frame (or awaits it), in arrival order.

use tokio::sync::mpsc;

pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Producer side, cloned into whichever worker needs to defer work.
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: mpsc::UnboundedSender<DeferredTask>,
}

/// Consumer side, owned by the application thread.
pub struct MainThreadQueue {
    rx: mpsc::UnboundedReceiver<DeferredTask>,
}

pub fn main_thread_queue() -> (MainThreadHandle, MainThreadQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainThreadHandle { tx }, MainThreadQueue { rx })
}

impl MainThreadHandle {
    /// Queues `task` for the application thread. Returns `false` if the
    /// queue has been dropped, in which case the task is discarded.
    pub fn queue_in_main_thread<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MainThreadQueue {
    /// Runs every task queued so far without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits for the next task and runs it. Returns `false` once every
    /// handle is gone and the queue is empty.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_tasks_run_in_queue_order_on_caller() {
        let (handle, mut queue) = main_thread_queue();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            assert!(handle.queue_in_main_thread(move || order.lock().unwrap().push(i)));
        }

        assert!(order.lock().unwrap().is_empty());
        assert_eq!(queue.run_pending(), 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn test_queue_dropped_discards_tasks() {
        let (handle, queue) = main_thread_queue();
        drop(queue);

        assert!(handle.is_closed());
        assert!(!handle.queue_in_main_thread(|| panic!("must not run")));
    }

    #[tokio::test]
    async fn test_run_next_waits_for_task_from_other_thread() {
        let (handle, mut queue) = main_thread_queue();
        let ran_on = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&ran_on);
        std::thread::spawn(move || {
            handle.queue_in_main_thread(move || {
                *slot.lock().unwrap() = Some(std::thread::current().id());
            });
        });

        assert!(queue.run_next().await);
        assert_eq!(*ran_on.lock().unwrap(), Some(std::thread::current().id()));
        assert!(!queue.run_next().await);
    }
}
