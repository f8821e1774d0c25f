// src/buffer_queue.rs
//! The Available Buffer Queue (spec component 4.2): exclusive buffers
//! assigned once at setup, plus floating buffers borrowed from the shared
//! pool, handed out in floating-first order so exclusive buffers are kept
//! in reserve as long as possible.
//!
//! Not internally synchronized — every caller is expected to already hold
//! the owning channel's buffer-queue monitor (`B`).

use std::collections::VecDeque;

use crate::gate::{Buffer, MemorySegment};

#[derive(Default)]
pub struct AvailableBufferQueue {
    exclusive: VecDeque<Buffer>,
    floating: VecDeque<Buffer>,
}

impl AvailableBufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available_size(&self) -> usize {
        self.exclusive.len() + self.floating.len()
    }

    pub fn exclusive_size(&self) -> usize {
        self.exclusive.len()
    }

    pub fn floating_size(&self) -> usize {
        self.floating.len()
    }

    /// Adds a buffer that belongs to this channel exclusively. If the queue
    /// is already at or above `required` after the append, the oldest
    /// floating buffer is spilled back to the pool instead of growing
    /// unbounded, and the call reports that no net buffer was added (the
    /// spill cancelled it out). Otherwise reports one buffer added.
    pub fn add_exclusive_buffer(&mut self, buffer: Buffer, required: usize) -> usize {
        self.exclusive.push_back(buffer);
        if self.available_size() > required {
            if let Some(spill) = self.floating.pop_front() {
                spill.recycle_buffer();
            }
            0
        } else {
            1
        }
    }

    /// Adds a floating buffer borrowed from the shared pool.
    pub fn add_floating_buffer(&mut self, buffer: Buffer) {
        self.floating.push_back(buffer);
    }

    /// Hands out a buffer for an incoming frame, floating buffers first so
    /// exclusive buffers are the last resort kept in reserve.
    pub fn take_buffer(&mut self) -> Option<Buffer> {
        self.floating.pop_front().or_else(|| self.exclusive.pop_front())
    }

    /// Drains both queues for teardown. Floating buffers are recycled
    /// through their own recycler (back to the shared pool); exclusive
    /// segments are extracted raw into `exclusive_segments` so the caller
    /// can return them to the gate in a single batch call.
    pub fn release_all(&mut self, exclusive_segments: &mut Vec<MemorySegment>) {
        for b in self.floating.drain(..) {
            b.recycle_buffer();
        }
        for b in self.exclusive.drain(..) {
            if let Some(seg) = b.into_memory_segment() {
                exclusive_segments.push(seg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{BufferOrigin, Recycler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRecycler(Arc<AtomicUsize>);
    impl Recycler for CountingRecycler {
        fn recycle(&self, _segment: MemorySegment) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn buffer(recycled: &Arc<AtomicUsize>) -> Buffer {
        Buffer::new(MemorySegment::new(16), Arc::new(CountingRecycler(recycled.clone())), BufferOrigin::Exclusive)
    }

    #[test]
    fn floating_buffers_are_drained_before_exclusive() {
        let recycled = Arc::new(AtomicUsize::new(0));
        let mut q = AvailableBufferQueue::new();
        q.add_exclusive_buffer(buffer(&recycled), 4);
        q.add_floating_buffer(buffer(&recycled));

        // floating must come out first
        assert_eq!(q.floating_size(), 1);
        q.take_buffer();
        assert_eq!(q.floating_size(), 0);
        assert_eq!(q.exclusive_size(), 1);
    }

    #[test]
    fn available_size_never_exceeds_required_via_spill() {
        let recycled = Arc::new(AtomicUsize::new(0));
        let mut q = AvailableBufferQueue::new();
        let required = 1;
        q.add_floating_buffer(buffer(&recycled));
        assert_eq!(q.available_size(), 1);

        // adding an exclusive buffer pushes availability over `required`,
        // so the oldest floating buffer spills back to the pool.
        q.add_exclusive_buffer(buffer(&recycled), required);
        assert_eq!(q.available_size(), required);
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_all_recycles_floating_and_batches_exclusive() {
        let recycled = Arc::new(AtomicUsize::new(0));
        let mut q = AvailableBufferQueue::new();
        q.add_floating_buffer(buffer(&recycled));
        q.add_exclusive_buffer(buffer(&recycled), 10);

        let mut segments = Vec::new();
        q.release_all(&mut segments);

        assert_eq!(recycled.load(Ordering::SeqCst), 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(q.available_size(), 0);
    }
}
