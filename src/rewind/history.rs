//! Per-entity history of hitbox snapshots

use std::collections::VecDeque;

use super::snapshot::HitboxSnapshot;
use super::RewindError;

/// Time-ordered frames for one entity. Front is the oldest frame (tail),
/// back is the newest (head).
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    frames: VecDeque<HitboxSnapshot>,
    /// Seconds of history kept between head and tail
    max_record_time: f32,
}

impl HistoryBuffer {
    pub fn new(max_record_time: f32) -> Self {
        Self {
            frames: VecDeque::new(),
            max_record_time,
        }
    }

    /// Append a frame at the head, then evict from the tail.
    ///
    /// A frame older than the current head is rejected and the buffer is left untouched.
    pub fn record(&mut self, snapshot: HitboxSnapshot) -> Result<(), RewindError> {
        if let Some(head) = self.frames.back() {
            if snapshot.timestamp < head.timestamp {
                return Err(RewindError::OutOfOrder {
                    timestamp: snapshot.timestamp,
                    newest: head.timestamp,
                });
            }
        }

        self.frames.push_back(snapshot);
        self.prune();
        Ok(())
    }

    /// Drop tail frames until the buffer spans at most `max_record_time`
    pub fn prune(&mut self) {
        while let Some((oldest, newest)) = self.range() {
            if newest - oldest <= self.max_record_time {
                break;
            }
            self.frames.pop_front();
        }
    }

    /// `(tail.timestamp, head.timestamp)`, or `None` when empty
    pub fn range(&self) -> Option<(f32, f32)> {
        match (self.frames.front(), self.frames.back()) {
            (Some(tail), Some(head)) => Some((tail.timestamp, head.timestamp)),
            _ => None,
        }
    }

    pub fn head(&self) -> Option<&HitboxSnapshot> {
        self.frames.back()
    }

    pub fn tail(&self) -> Option<&HitboxSnapshot> {
        self.frames.front()
    }

    /// Frames from head toward tail
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &HitboxSnapshot> {
        self.frames.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t: f32) -> HitboxSnapshot {
        HitboxSnapshot::new(t)
    }

    #[test]
    fn empty_buffer_has_no_range() {
        let buffer = HistoryBuffer::new(2.0);
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.range(), None);
        assert!(buffer.head().is_none());
    }

    #[test]
    fn window_holds_after_every_record() {
        let mut buffer = HistoryBuffer::new(0.5);
        let tick = 0.125;

        for i in 0..50 {
            buffer.record(frame(i as f32 * tick)).unwrap();

            let (oldest, newest) = buffer.range().unwrap();
            assert!(newest - oldest <= 0.5);

            let times: Vec<f32> = buffer.iter_newest_first().map(|f| f.timestamp).collect();
            assert!(times.windows(2).all(|w| w[0] >= w[1]));
        }

        // 0.5s of 0.125s intervals
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn evicts_only_from_tail() {
        let mut buffer = HistoryBuffer::new(2.0);
        buffer.record(frame(0.0)).unwrap();
        buffer.record(frame(1.0)).unwrap();
        buffer.record(frame(2.5)).unwrap();

        assert_eq!(buffer.range(), Some((1.0, 2.5)));
        assert_eq!(buffer.tail().map(|f| f.timestamp), Some(1.0));
        assert_eq!(buffer.head().map(|f| f.timestamp), Some(2.5));
    }

    #[test]
    fn large_gap_keeps_newest_frame() {
        let mut buffer = HistoryBuffer::new(2.0);
        buffer.record(frame(0.0)).unwrap();
        buffer.record(frame(10.0)).unwrap();

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.range(), Some((10.0, 10.0)));
    }

    #[test]
    fn rejects_out_of_order_frame() {
        let mut buffer = HistoryBuffer::new(2.0);
        buffer.record(frame(1.0)).unwrap();

        let err = buffer.record(frame(0.9)).unwrap_err();
        assert_eq!(
            err,
            RewindError::OutOfOrder {
                timestamp: 0.9,
                newest: 1.0
            }
        );
        assert_eq!(buffer.len(), 1);

        // Equal timestamps keep the order non-decreasing
        buffer.record(frame(1.0)).unwrap();
        assert_eq!(buffer.len(), 2);
    }
}
