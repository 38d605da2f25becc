//! Task queue with strict priority bands.
//!
//! Higher bands are always drained first, FIFO within a band. Shutdown
//! sentinels sit behind every band, so a worker only sees one after all the
//! work queued before it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High = 0,
    Medium = 1,
    Low = 2,
}

const BANDS: usize = 3;

struct Bands<T> {
    tasks: [VecDeque<T>; BANDS],
}

pub struct TaskQueue<T> {
    bands: Mutex<Bands<T>>,
    /// One permit per queued task or sentinel.
    available: Semaphore,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            bands: Mutex::new(Bands {
                tasks: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            }),
            available: Semaphore::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bands<T>> {
        self.bands.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, task: T, priority: Priority) {
        self.lock().tasks[priority as usize].push_back(task);
        self.available.add_permits(1);
    }

    /// Queues `count` shutdown sentinels.
    ///
    /// A permit not backed by a task is a sentinel.
    pub fn shutdown(&self, count: usize) {
        self.available.add_permits(count);
    }

    /// Waits for the next task; `None` is a shutdown sentinel.
    pub async fn pop(&self) -> Option<T> {
        match self.available.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return None,
        }
        self.lock().tasks.iter_mut().find_map(VecDeque::pop_front)
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
