//! Per-channel ingestion queue
//!
//! Bounded FIFO with a drop-oldest overflow policy: the producer never
//! blocks, and under sustained overload the stalest frames are lost first.
//! Exactly one consumer (the channel worker) drains it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::frame::Frame;

/// Default queue capacity (frames)
pub const DEFAULT_QUEUE_CAPACITY: usize = 2000;

pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame. Returns the evicted oldest frame if the queue was full.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let mut frames = self.lock();
        let evicted = if frames.len() >= self.capacity {
            let old = frames.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("ingestion queue full, dropped oldest frame ({} dropped so far)", total);
            old
        } else {
            None
        };
        frames.push_back(frame);
        evicted
    }

    /// Dequeue the oldest frame
    pub fn pop(&self) -> Option<Frame> {
        self.lock().pop_front()
    }

    /// Current backlog
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Frames lost to the overflow policy since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything currently buffered
    pub fn clear(&self) -> usize {
        let mut frames = self.lock();
        let n = frames.len();
        frames.clear();
        n
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        // A panicking producer cannot leave the deque half-updated
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelId;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(tag: u8) -> Frame {
        Frame::new(ChannelId::new("cam").unwrap(), vec![tag], Instant::now())
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(10);
        queue.push(frame(1));
        queue.push(frame(2));
        queue.push(frame(3));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().data, vec![1]);
        assert_eq!(queue.pop().unwrap().data, vec![2]);
        assert_eq!(queue.pop().unwrap().data, vec![3]);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = FrameQueue::new(2);
        assert!(queue.push(frame(1)).is_none());
        assert!(queue.push(frame(2)).is_none());
        let evicted = queue.push(frame(3)).unwrap();
        assert_eq!(evicted.data, vec![1]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().unwrap().data, vec![2]);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(FrameQueue::new(10_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..250u32 {
                        q.push(frame((i % 255) as u8));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.dropped(), 0);
    }
}
