//! Bounded drop-oldest hand-off between ingestion and preprocessing
//!
//! The producer never blocks: when the queue is full the oldest sample is
//! evicted and handed back so the caller can account for it.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use warden_core::types::SensorSample;

#[derive(Debug)]
struct Inner {
    samples: VecDeque<SensorSample>,
    closed: bool,
}

/// Single-producer, single-consumer sample queue
#[derive(Debug)]
pub struct SampleQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue, returning the evicted sample if the queue was full
    ///
    /// Pushing to a closed queue hands the sample straight back.
    pub fn push(&self, sample: SensorSample) -> Option<SensorSample> {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Some(sample);
            }
            let evicted = if inner.samples.len() >= self.capacity {
                inner.samples.pop_front()
            } else {
                None
            };
            inner.samples.push_back(sample);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Dequeue the oldest sample, waiting if empty
    ///
    /// Returns `None` once the queue is closed and drained. Cancel safe.
    pub async fn pop(&self) -> Option<SensorSample> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(sample) = inner.samples.pop_front() {
                    return Some(sample);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// No more pushes; pending samples can still be popped
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameBuilder;
    use std::sync::Arc;
    use warden_core::types::now;

    fn sample(sequence: u64) -> SensorSample {
        SensorSample {
            sequence,
            received_at: now(),
            frame: FrameBuilder::nominal().build(),
        }
    }

    #[tokio::test]
    async fn test_evicts_oldest_when_full() {
        let queue = SampleQueue::new(2);
        assert!(queue.push(sample(0)).is_none());
        assert!(queue.push(sample(1)).is_none());

        let evicted = queue.push(sample(2)).unwrap();
        assert_eq!(evicted.sequence, 0);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().await.unwrap().sequence, 1);
        assert_eq!(queue.pop().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = SampleQueue::new(4);
        queue.push(sample(7));
        queue.close();

        assert_eq!(queue.push(sample(8)).unwrap().sequence, 8);
        assert_eq!(queue.pop().await.unwrap().sequence, 7);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(SampleQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.map(|s| s.sequence) })
        };

        tokio::task::yield_now().await;
        queue.push(sample(3));
        assert_eq!(consumer.await.unwrap(), Some(3));
    }
}
