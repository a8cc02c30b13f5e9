//! The foreground execution context.
//!
//! Consumer-facing work (data handlers, reconnect attempts) never runs on the
//! reader thread. It is posted to a [`Foreground`] and executed by whoever owns
//! the matching [`ForegroundQueue`], typically a UI event loop that calls
//! [`ForegroundQueue::run_pending`] once per iteration.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::trace;

/// A unit of work for the foreground context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Marshals work onto the foreground context.
pub trait Foreground: Send + Sync {
    /// Run `task` on the foreground context as soon as possible.
    fn post(&self, task: Task);

    /// Run `task` on the foreground context once `delay` has passed.
    fn post_after(&self, delay: Duration, task: Task);
}

enum Scheduled {
    Now(Task),
    At(Instant, Task),
}

/// Sending side of a [`ForegroundQueue`]. Cheap to clone.
#[derive(Clone)]
pub struct ForegroundHandle {
    tx: mpsc::Sender<Scheduled>,
}

impl Foreground for ForegroundHandle {
    fn post(&self, task: Task) {
        if self.tx.send(Scheduled::Now(task)).is_err() {
            trace!("foreground queue gone, dropping task");
        }
    }

    fn post_after(&self, delay: Duration, task: Task) {
        if self.tx.send(Scheduled::At(Instant::now() + delay, task)).is_err() {
            trace!("foreground queue gone, dropping delayed task");
        }
    }
}

/// Tasks waiting to run on the foreground context.
pub struct ForegroundQueue {
    rx: mpsc::Receiver<Scheduled>,
    handle: ForegroundHandle,
    ready: Vec<Task>,
    delayed: Vec<(Instant, Task)>,
}

impl Default for ForegroundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx,
            handle: ForegroundHandle { tx },
            ready: Vec::new(),
            delayed: Vec::new(),
        }
    }

    pub fn handle(&self) -> ForegroundHandle {
        self.handle.clone()
    }

    /// Run every task posted before this call and every delayed task that is
    /// due. Tasks posted while running wait for the next call.
    ///
    /// Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        self.receive();
        let mut ready = std::mem::take(&mut self.ready);

        let now = Instant::now();
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                due.push(self.delayed.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|(deadline, _)| *deadline);
        ready.extend(due.into_iter().map(|(_, task)| task));

        let count = ready.len();
        for task in ready {
            task();
        }
        count
    }

    /// When [`ForegroundQueue::run_pending`] next has work to do: now if a
    /// task is waiting, else the earliest delayed deadline. `None` when idle.
    ///
    /// An event loop sleeps until this instant (or an event) instead of
    /// polling.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.receive();
        if !self.ready.is_empty() {
            return Some(Instant::now());
        }
        self.delayed.iter().map(|(deadline, _)| *deadline).min()
    }

    fn receive(&mut self) {
        for scheduled in self.rx.try_iter() {
            match scheduled {
                Scheduled::Now(task) => self.ready.push(task),
                Scheduled::At(deadline, task) => self.delayed.push((deadline, task)),
            }
        }
    }

    /// Pump the queue until `done` returns true or `timeout` elapses.
    ///
    /// For embeddings without an event loop of their own. Returns whether
    /// `done` was satisfied.
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_posted_tasks_run_in_order() {
        let mut queue = ForegroundQueue::new();
        let handle = queue.handle();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            handle.post(Box::new(move || log.lock().unwrap().push(i)));
        }

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn test_task_posted_from_task_waits_for_next_run() {
        let mut queue = ForegroundQueue::new();
        let handle = queue.handle();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_handle = handle.clone();
        let inner_count = Arc::clone(&count);
        handle.post(Box::new(move || {
            inner_handle.post(Box::new(move || {
                inner_count.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delayed_task_waits_for_deadline() {
        let mut queue = ForegroundQueue::new();
        let handle = queue.handle();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        handle.post_after(
            Duration::from_millis(30),
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(queue.run_pending(), 0);
        assert!(queue.next_deadline().is_some());
        assert!(queue.run_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        assert!(queue.next_deadline().is_none());
    }

    #[test]
    fn test_next_deadline_sees_new_posts() {
        let mut queue = ForegroundQueue::new();
        let handle = queue.handle();
        assert!(queue.next_deadline().is_none());

        let before = Instant::now();
        handle.post_after(Duration::from_millis(100), Box::new(|| {}));
        let deadline = queue.next_deadline().unwrap();
        assert!(deadline >= before + Duration::from_millis(100));

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        handle.post(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(queue.next_deadline().unwrap() < deadline);

        // Tasks pulled in by `next_deadline` still run on the next pump.
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.next_deadline(), Some(deadline));
    }

    #[test]
    fn test_post_after_queue_dropped_is_ignored() {
        let queue = ForegroundQueue::new();
        let handle = queue.handle();
        drop(queue);
        handle.post(Box::new(|| {}));
        handle.post_after(Duration::from_millis(1), Box::new(|| {}));
    }

    #[test]
    fn test_run_until_times_out() {
        let mut queue = ForegroundQueue::new();
        assert!(!queue.run_until(Duration::from_millis(10), || false));
    }
}
