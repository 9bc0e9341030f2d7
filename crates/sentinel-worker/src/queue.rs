//! Bounded frame queue between decoding and classification.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use sentinel_models::Frame;

use crate::config::BackpressurePolicy;

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
    dropped: u64,
}

/// Single-producer, single-consumer frame queue with a fixed capacity.
///
/// Frames leave in the order they were pushed. Once closed, pushes are
/// refused and the consumer drains what is left.
#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    policy: BackpressurePolicy,
    state: Mutex<QueueState>,
    items: Notify,
    space: Notify,
}

impl FrameQueue {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(QueueState::default()),
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Frames evicted by [`BackpressurePolicy::DropOldest`] so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Enqueue a frame, applying the backpressure policy when full.
    ///
    /// Returns the frame back if the queue is closed.
    pub async fn push(&self, frame: Frame) -> Result<(), Frame> {
        loop {
            let space = self.space.notified();
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(frame);
                }
                let full = state.frames.len() >= self.capacity;
                if !full || self.policy == BackpressurePolicy::DropOldest {
                    if full {
                        state.frames.pop_front();
                        state.dropped += 1;
                    }
                    state.frames.push_back(frame);
                    drop(state);
                    self.items.notify_one();
                    return Ok(());
                }
            }
            space.await;
        }
    }

    /// Dequeue the oldest frame, waiting for one to arrive.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            let items = self.items.notified();
            {
                let mut state = self.lock();
                if let Some(frame) = state.frames.pop_front() {
                    drop(state);
                    self.space.notify_one();
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            items.await;
        }
    }

    /// Collect up to `max` frames.
    ///
    /// Waits as long as needed for the first frame, then at most `timeout`
    /// for the rest. Returns `None` once the queue is closed and drained.
    pub async fn next_batch(&self, max: usize, timeout: Duration) -> Option<Vec<Frame>> {
        let first = self.pop().await?;
        let mut batch = Vec::with_capacity(max.max(1));
        batch.push(first);

        let deadline = tokio::time::Instant::now() + timeout;
        while batch.len() < max {
            match tokio::time::timeout_at(deadline, self.pop()).await {
                Ok(Some(frame)) => batch.push(frame),
                Ok(None) | Err(_) => break,
            }
        }
        Some(batch)
    }

    /// Refuse further frames and wake any waiters.
    pub fn close(&self) {
        self.lock().closed = true;
        self.items.notify_one();
        self.space.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(index: u64) -> Frame {
        Frame::new(index, Duration::ZERO, 1, 1, vec![0u8; 3])
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = FrameQueue::new(8, BackpressurePolicy::Block);
        for i in 0..3 {
            queue.push(frame(i)).await.unwrap();
        }
        for i in 0..3 {
            assert_eq!(queue.pop().await.unwrap().index(), i);
        }
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_and_counts() {
        let queue = FrameQueue::new(2, BackpressurePolicy::DropOldest);
        for i in 0..5 {
            queue.push(frame(i)).await.unwrap();
        }
        assert_eq!(queue.dropped(), 3);
        assert_eq!(queue.pop().await.unwrap().index(), 3);
        assert_eq!(queue.pop().await.unwrap().index(), 4);
    }

    #[tokio::test]
    async fn test_block_waits_for_space() {
        let queue = Arc::new(FrameQueue::new(1, BackpressurePolicy::Block));
        queue.push(frame(0)).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(frame(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop().await.unwrap().index(), 0);
        producer.await.unwrap().unwrap();
        assert_eq!(queue.pop().await.unwrap().index(), 1);
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = FrameQueue::new(4, BackpressurePolicy::DropOldest);
        queue.push(frame(0)).await.unwrap();
        queue.close();

        assert!(queue.push(frame(1)).await.is_err());
        assert_eq!(queue.pop().await.unwrap().index(), 0);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(FrameQueue::new(1, BackpressurePolicy::Block));
        queue.push(frame(0)).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(frame(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert!(producer.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_next_batch_fills_up_to_max() {
        let queue = FrameQueue::new(8, BackpressurePolicy::Block);
        for i in 0..5 {
            queue.push(frame(i)).await.unwrap();
        }
        let batch = queue.next_batch(3, Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.iter().map(Frame::index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_next_batch_times_out_partial() {
        let queue = FrameQueue::new(8, BackpressurePolicy::Block);
        queue.push(frame(7)).await.unwrap();
        let batch = queue.next_batch(4, Duration::from_millis(20)).await.unwrap();
        assert_eq!(batch.len(), 1);

        queue.close();
        assert!(queue.next_batch(4, Duration::from_millis(20)).await.is_none());
    }
}
