//! Single-producer single-consumer frame hand-off.
//!
//! The acquisition thread pushes, the active writer task drains. Pushing never
//! blocks and never drops: every frame must be timestamped and accounted for,
//! so the queue is unbounded and instead warns once when its depth first
//! crosses a high-water mark. The consumer blocks on a condition variable
//! rather than busy-polling.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::types::FrameSample;

/// Queue depth above which a single warning is logged per trial.
pub const HIGH_WATER_MARK: usize = 256;

struct QueueInner {
    items: VecDeque<FrameSample>,
    high_water_warned: bool,
    closed: bool,
}

pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                high_water_warned: false,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Enqueue a sample. O(1), never blocks the producer.
    pub fn push(&self, sample: FrameSample) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.closed {
            return;
        }
        g.items.push_back(sample);
        if g.items.len() > HIGH_WATER_MARK && !g.high_water_warned {
            g.high_water_warned = true;
            log::warn!(
                "frame queue depth exceeded {} samples; writer is falling behind",
                HIGH_WATER_MARK
            );
        }
        self.cv.notify_one();
    }

    /// Dequeue the oldest sample without waiting.
    pub fn try_pop(&self) -> Option<FrameSample> {
        self.inner.lock().expect("lock poisoned").items.pop_front()
    }

    /// Dequeue the oldest sample, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when the queue has been closed and fully
    /// drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<FrameSample> {
        let mut g = self.inner.lock().expect("lock poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = g.items.pop_front() {
                return Some(item);
            }
            if g.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .expect("lock poisoned");
            g = ng;
        }
    }

    /// Discard any stale residue from a previous trial and re-arm the
    /// high-water warning. The queue's only destructive operation.
    pub fn clear(&self) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if !g.items.is_empty() {
            log::debug!("clearing {} stale samples from frame queue", g.items.len());
        }
        g.items.clear();
        g.high_water_warned = false;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Permanently wake consumers; pushes become no-ops. Shutdown path only.
    pub fn close(&self) {
        let mut g = self.inner.lock().expect("lock poisoned");
        g.closed = true;
        self.cv.notify_all();
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(ts: u64) -> FrameSample {
        FrameSample {
            data: vec![0u8; 4],
            width: 2,
            height: 2,
            timestamp_us: ts,
            reconstructed: false,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = FrameQueue::new();
        for ts in 0..10 {
            q.push(sample(ts));
        }
        for ts in 0..10 {
            assert_eq!(q.try_pop().unwrap().timestamp_us, ts);
        }
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn clear_empties_queue() {
        let q = FrameQueue::new();
        q.push(sample(1));
        q.push(sample(2));
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let q = FrameQueue::new();
        let start = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let q = Arc::new(FrameQueue::new());
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                q.push(sample(7));
            })
        };
        let got = q.pop_timeout(Duration::from_secs(2));
        producer.join().unwrap();
        assert_eq!(got.unwrap().timestamp_us, 7);
    }

    #[test]
    fn close_wakes_and_rejects_pushes() {
        let q = FrameQueue::new();
        q.close();
        q.push(sample(1));
        assert!(q.is_empty());
        assert!(q.pop_timeout(Duration::from_secs(1)).is_none());
    }
}
