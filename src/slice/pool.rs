//! Bounded worker pool with a shared work queue.
//!
//! Each worker owns one session and loops: take a task, process it, queue
//! the follow-up tasks it produced. The pool is done when the queue is
//! empty and no worker is busy, since only a busy worker can add work.
//! The first error, or a cancellation, stops every worker from taking new
//! tasks; tasks already running finish.

use crate::error::{Result, SliceError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// How often idle workers look at the cancellation flag
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct QueueState<T> {
    tasks: VecDeque<T>,
    /// Workers currently processing a task
    active: usize,
    error: Option<SliceError>,
    stopped: bool,
}

struct Queue<T> {
    state: Mutex<QueueState<T>>,
    changed: Condvar,
}

impl<T> Queue<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fail(&self, error: SliceError) {
        let mut state = self.lock();
        if state.error.is_none() {
            state.error = Some(error);
        }
        state.stopped = true;
        self.changed.notify_all();
    }

    /// Block until a task is available, or return `None` when the pool is
    /// finished or stopped.
    fn next(&self, cancel: &CancelToken) -> Option<T> {
        let mut state = self.lock();
        loop {
            if cancel.is_cancelled() && !state.stopped {
                state.stopped = true;
                self.changed.notify_all();
            }
            if state.stopped {
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                state.active += 1;
                return Some(task);
            }
            if state.active == 0 {
                self.changed.notify_all();
                return None;
            }
            state = match self.changed.wait_timeout(state, CANCEL_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn done(&self, follow_up: Vec<T>) {
        let mut state = self.lock();
        state.active -= 1;
        state.tasks.extend(follow_up);
        self.changed.notify_all();
    }
}

/// Process `initial` and every task it transitively produces.
///
/// One worker thread runs per session. Returns the first error, or
/// `Cancelled` when the token was cancelled before the work ran out.
pub fn run<T, S, F>(sessions: &mut [S], initial: Vec<T>, cancel: &CancelToken, process: F) -> Result<()>
where
    T: Send,
    S: Send,
    F: Fn(&mut S, T) -> Result<Vec<T>> + Sync,
{
    let queue = Queue {
        state: Mutex::new(QueueState {
            tasks: initial.into(),
            active: 0,
            error: None,
            stopped: false,
        }),
        changed: Condvar::new(),
    };

    let queue = &queue;
    let process = &process;
    std::thread::scope(|scope| {
        for (worker, session) in sessions.iter_mut().enumerate() {
            scope.spawn(move || {
                let mut processed = 0usize;
                while let Some(task) = queue.next(cancel) {
                    processed += 1;
                    match process(session, task) {
                        Ok(follow_up) => queue.done(follow_up),
                        Err(e) => {
                            queue.done(Vec::new());
                            queue.fail(e);
                        }
                    }
                }
                trace!("Worker {} processed {} tasks", worker, processed);
            });
        }
    });

    let mut state = queue.lock();
    if !state.tasks.is_empty() {
        debug!("Worker pool stopped with {} tasks left", state.tasks.len());
    }
    if let Some(error) = state.error.take() {
        return Err(error);
    }
    if cancel.is_cancelled() {
        return Err(SliceError::Cancelled);
    }
    if sessions.is_empty() && !state.tasks.is_empty() {
        return Err(SliceError::Config("no workers to process tasks".to_string()));
    }
    Ok(())
}
