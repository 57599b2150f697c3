//! Bounded ring buffer shared by one writer and one reader
//!
//! Indices grow monotonically; a slot is addressed as `index % capacity`.
//! `write_index - read_index` is always within `0..=capacity`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slots<T> {
    slots: Vec<Option<T>>,
    write_index: u64,
    read_index: u64,
}

impl<T> Slots<T> {
    fn len(&self) -> usize {
        (self.write_index - self.read_index) as usize
    }
}

/// Fixed-capacity circular buffer
///
/// Writes never overwrite unread items and reads never block: a full buffer
/// rejects the write and an empty buffer yields `None`.
pub struct RingBuffer<T> {
    inner: Mutex<Slots<T>>,
    capacity: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            inner: Mutex::new(Slots {
                slots,
                write_index: 0,
                read_index: 0,
            }),
            capacity,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Store `item` in the next free slot
    ///
    /// Returns the item back if the buffer is full; nothing is modified then.
    pub fn write(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.len() >= self.capacity {
            drop(inner);
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return Err(item);
        }

        let slot = (inner.write_index % self.capacity as u64) as usize;
        inner.slots[slot] = Some(item);
        inner.write_index += 1;
        Ok(())
    }

    /// Take the oldest unread item, or `None` if there is nothing to read
    pub fn read(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.read_index == inner.write_index {
            drop(inner);
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let slot = (inner.read_index % self.capacity as u64) as usize;
        let item = inner.slots[slot].take();
        inner.read_index += 1;
        item
    }

    /// True if at least one item is waiting to be read
    pub fn can_read(&self) -> bool {
        self.inner.lock().len() > 0
    }

    /// True if a write would currently succeed
    pub fn can_write(&self) -> bool {
        self.inner.lock().len() < self.capacity
    }

    /// Reset both indices and drop every stored item
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.write_index = 0;
        inner.read_index = 0;
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Get current number of unread items
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of writes since creation or the last `clear`
    pub fn write_index(&self) -> u64 {
        self.inner.lock().write_index
    }

    /// Total number of reads since creation or the last `clear`
    pub fn read_index(&self) -> u64 {
        self.inner.lock().read_index
    }

    /// Writes rejected because the buffer was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Reads that found the buffer empty
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(2);

        assert!(!buffer.can_read());
        assert!(buffer.can_write());
        assert_eq!(buffer.write(1), Ok(()));
        assert_eq!(buffer.write(2), Ok(()));
        assert_eq!(buffer.write(3), Err(3));
        assert!(buffer.is_full());
        assert_eq!(buffer.overflow_count(), 1);

        assert_eq!(buffer.read(), Some(1));
        assert_eq!(buffer.write(3), Ok(()));
        assert_eq!(buffer.read(), Some(2));
        assert_eq!(buffer.read(), Some(3));
        assert_eq!(buffer.read(), None);
        assert_eq!(buffer.underrun_count(), 1);
        assert_eq!(buffer.write_index(), 3);
        assert_eq!(buffer.read_index(), 3);
    }

    #[test]
    fn test_zero_capacity_holds_one_item() {
        let buffer = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);

        assert_eq!(buffer.write(1), Ok(()));
        assert_eq!(buffer.write(2), Err(2));
        assert_eq!(buffer.read(), Some(1));
    }

    #[test]
    fn test_clear_releases_items() {
        let item = Arc::new(vec![0u8; 64]);
        let buffer = RingBuffer::new(4);
        buffer.write(item.clone()).unwrap();
        buffer.write(item.clone()).unwrap();
        assert_eq!(Arc::strong_count(&item), 3);

        buffer.clear();

        assert_eq!(Arc::strong_count(&item), 1);
        assert_eq!(buffer.write_index(), 0);
        assert_eq!(buffer.read_index(), 0);
        assert!(buffer.read().is_none());
    }

    #[test]
    fn test_wraps_around_many_times() {
        let buffer = RingBuffer::new(3);
        for i in 0..100u32 {
            buffer.write(i).unwrap();
            assert_eq!(buffer.read(), Some(i));
        }
        assert_eq!(buffer.write_index(), 100);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_one_writer_one_reader_threads() {
        let buffer = Arc::new(RingBuffer::new(8));
        let writer_buffer = buffer.clone();

        let writer = std::thread::spawn(move || {
            for i in 0..1000u32 {
                let mut item = i;
                loop {
                    match writer_buffer.write(item) {
                        Ok(()) => break,
                        Err(back) => {
                            item = back;
                            std::thread::yield_now();
                        }
                    }
                }
            }
        });

        let mut expected = 0u32;
        while expected < 1000 {
            match buffer.read() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => std::thread::yield_now(),
            }
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_tracks_occupancy(capacity in 1usize..16, ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let buffer = RingBuffer::new(capacity);
            let mut model = VecDeque::new();
            let mut next = 0u32;

            for is_write in ops {
                if is_write {
                    let accepted = buffer.write(next).is_ok();
                    prop_assert_eq!(accepted, model.len() < capacity);
                    if accepted {
                        model.push_back(next);
                    }
                    next += 1;
                } else {
                    prop_assert_eq!(buffer.read(), model.pop_front());
                }

                let occupancy = (buffer.write_index() - buffer.read_index()) as usize;
                prop_assert_eq!(occupancy, model.len());
                prop_assert!(occupancy <= capacity);
                prop_assert_eq!(buffer.can_read(), !model.is_empty());
                prop_assert_eq!(buffer.can_write(), model.len() < capacity);
            }
        }
    }
}
