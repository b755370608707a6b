//! Hand-off of completed accelerometer chunk files to the consumer

use std::path::{Path, PathBuf};

use crossbeam::queue::SegQueue;

/// Unbounded lock-free FIFO of completed chunk file paths
///
/// Ownership of a file moves to the consumer at `enqueue`; the producer never
/// touches it again.
#[derive(Debug, Default)]
pub struct RotationQueue {
    files: SegQueue<PathBuf>,
}

impl RotationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue<P: AsRef<Path>>(&self, path: P) {
        self.files.push(path.as_ref().to_path_buf());
    }

    /// Next completed file, `None` when the queue is empty
    pub fn try_dequeue(&self) -> Option<PathBuf> {
        self.files.pop()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
