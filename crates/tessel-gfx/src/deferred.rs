//! Frame-deferred release of GPU resources.
//!
//! With several frames in flight a resource freed by the CPU may still be
//! read by a frame the GPU hasn't finished. Items queued here are held until
//! `frames_in_flight` newer frames have started.

use std::collections::VecDeque;

struct Pending<T> {
    item: T,
    frame_queued: u64,
}

/// FIFO of items waiting for in-flight frames to retire.
pub struct DeferredQueue<T> {
    pending: VecDeque<Pending<T>>,
    frames_in_flight: u64,
}

impl<T> DeferredQueue<T> {
    /// Create a queue that holds items for `frames_in_flight` frames.
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight: u64::from(frames_in_flight),
        }
    }

    /// Queue an item released during `frame`.
    pub fn push(&mut self, item: T, frame: u64) {
        self.pending.push_back(Pending {
            item,
            frame_queued: frame,
        });
    }

    /// Remove and return every item no in-flight frame can still reference.
    pub fn drain_ready(&mut self, current_frame: u64) -> Vec<T> {
        let cutoff = current_frame.saturating_sub(self.frames_in_flight);
        let mut ready = Vec::new();

        // Frame numbers are non-decreasing, so only the front can mature.
        while self
            .pending
            .front()
            .is_some_and(|pending| pending.frame_queued < cutoff)
        {
            if let Some(pending) = self.pending.pop_front() {
                ready.push(pending.item);
            }
        }

        ready
    }

    /// Remove every pending item regardless of age.
    ///
    /// Only sound after a device-wide idle wait.
    pub fn flush(&mut self) -> Vec<T> {
        self.pending.drain(..).map(|pending| pending.item).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight as u32
    }

    /// Change the hold time. Pending items are judged by the new value.
    pub fn set_frames_in_flight(&mut self, frames_in_flight: u32) {
        self.frames_in_flight = u64::from(frames_in_flight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_wait_for_frames_in_flight() {
        let mut queue = DeferredQueue::new(2);
        queue.push("a", 10);

        assert!(queue.drain_ready(10).is_empty());
        assert!(queue.drain_ready(11).is_empty());
        assert!(queue.drain_ready(12).is_empty());
        assert_eq!(queue.drain_ready(13), vec!["a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_stops_at_first_young_item() {
        let mut queue = DeferredQueue::new(1);
        queue.push(1, 0);
        queue.push(2, 1);
        queue.push(3, 5);

        assert_eq!(queue.drain_ready(3), vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn zero_frames_in_flight_releases_on_next_frame() {
        let mut queue = DeferredQueue::new(0);
        queue.push('x', 4);

        assert!(queue.drain_ready(4).is_empty());
        assert_eq!(queue.drain_ready(5), vec!['x']);
    }

    #[test]
    fn flush_returns_everything_in_order() {
        let mut queue = DeferredQueue::new(8);
        queue.push(1, 0);
        queue.push(2, 0);

        assert_eq!(queue.flush(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn hold_time_can_change() {
        let mut queue = DeferredQueue::new(4);
        queue.push((), 0);
        assert!(queue.drain_ready(2).is_empty());

        queue.set_frames_in_flight(1);
        assert_eq!(queue.frames_in_flight(), 1);
        assert_eq!(queue.drain_ready(2).len(), 1);
    }

    #[test]
    fn longer_hold_time_keeps_pending_items() {
        let mut queue = DeferredQueue::new(1);
        queue.push("a", 5);

        queue.set_frames_in_flight(3);
        assert!(queue.drain_ready(7).is_empty());
        assert!(queue.drain_ready(8).is_empty());
        assert_eq!(queue.drain_ready(9), vec!["a"]);
    }
}
