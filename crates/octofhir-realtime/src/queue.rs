//! Outbound queue for frames published while the socket is down.

use std::collections::VecDeque;

/// FIFO of serialized frames awaiting an open connection.
///
/// Unbounded. Frames are flushed in enqueue order once the connection opens,
/// and each frame is sent at most once per successful flush.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: String) {
        self.frames.push_back(frame);
    }

    /// Take every queued frame, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<String> {
        self.frames.drain(..).collect()
    }

    /// Put frames that could not be sent back at the head, preserving order.
    pub fn requeue_front(&mut self, frames: Vec<String>) {
        for frame in frames.into_iter().rev() {
            self.frames.push_front(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_is_fifo() {
        let mut q = OutboundQueue::new();
        q.push("a".into());
        q.push("b".into());
        q.push("c".into());
        assert_eq!(q.len(), 3);
        assert_eq!(q.drain(), vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_requeue_front_keeps_order_ahead_of_new_frames() {
        let mut q = OutboundQueue::new();
        q.push("d".into());
        q.requeue_front(vec!["b".into(), "c".into()]);
        assert_eq!(q.drain(), vec!["b", "c", "d"]);
    }
}
