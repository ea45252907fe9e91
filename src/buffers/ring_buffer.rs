//! Fixed-capacity buffer addressed by keyframe.
//!
//! [`KeyedRingBuffer`] stores one element per keyframe in a circular array.
//! Writes always land at `head + 1`; once the buffer is full the oldest
//! element is overwritten and any lookup for it returns `None`.

use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::Keyframe;

/// A fixed-capacity sequence of elements indexed by monotonically increasing keyframes.
///
/// Valid keyframes are the contiguous range `[tail_keyframe, head_keyframe]`.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing.
/// It is not part of the stable public API.
#[derive(Debug, Clone)]
pub struct KeyedRingBuffer<T> {
    /// Circular storage. `elements.len()` is the capacity.
    elements: Vec<T>,
    /// The keyframe the next call to [`get_write_next`](Self::get_write_next) writes to.
    next_keyframe: Keyframe,
    /// Number of valid (retained) elements, at most the capacity.
    len: usize,
    /// Bumped on every write; lets the replication layer detect new content.
    dirty_count: u32,
}

impl<T: Default> KeyedRingBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` elements.
    ///
    /// A capacity of zero is bumped to one; callers validate sizes up front
    /// through [`BufferSizes::validate`](crate::BufferSizes::validate).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut elements = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            elements.push(T::default());
        }
        Self {
            elements,
            next_keyframe: Keyframe::new(0),
            len: 0,
            dirty_count: 0,
        }
    }

    /// Discards all contents and resizes the buffer. The next write lands at keyframe 0.
    pub fn set_capacity(&mut self, capacity: usize) {
        *self = Self::with_capacity(capacity);
    }

    /// Appends a default-constructed element at `head + 1` and returns it.
    ///
    /// Never fails. When the buffer is full, the oldest element is evicted.
    pub fn get_write_next(&mut self) -> &mut T {
        let keyframe = self.next_keyframe;
        self.next_keyframe += 1;
        self.len = (self.len + 1).min(self.capacity());
        self.dirty_count = self.dirty_count.wrapping_add(1);
        let idx = self.index_of(keyframe);
        let slot = &mut self.elements[idx];
        *slot = T::default();
        slot
    }

    /// Appends `value` at `head + 1`.
    pub fn push(&mut self, value: T) {
        *self.get_write_next() = value;
    }
}

impl<T> KeyedRingBuffer<T> {
    /// Maximum number of retained elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.elements.len()
    }

    /// Number of retained elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been written since creation or the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The most recently written keyframe, or [`Keyframe::NULL`] if the buffer is empty.
    #[must_use]
    pub fn head_keyframe(&self) -> Keyframe {
        if self.len == 0 {
            Keyframe::NULL
        } else {
            self.next_keyframe - 1
        }
    }

    /// The oldest retained keyframe, or [`Keyframe::NULL`] if the buffer is empty.
    #[must_use]
    pub fn tail_keyframe(&self) -> Keyframe {
        if self.len == 0 {
            Keyframe::NULL
        } else {
            self.next_keyframe - self.len as i32
        }
    }

    /// Number of writes since creation. Wraps on overflow.
    #[must_use]
    pub fn dirty_count(&self) -> u32 {
        self.dirty_count
    }

    /// The keyframe the next write will land at.
    #[must_use]
    pub fn next_keyframe(&self) -> Keyframe {
        self.next_keyframe
    }

    /// Returns `true` if `keyframe` is still retained.
    #[must_use]
    pub fn contains(&self, keyframe: Keyframe) -> bool {
        self.len > 0 && keyframe >= self.tail_keyframe() && keyframe < self.next_keyframe
    }

    /// Looks up the element written at `keyframe`.
    ///
    /// Returns `None` if the keyframe was never written, has been evicted, or was
    /// discarded by [`reset_next_head_keyframe`](Self::reset_next_head_keyframe).
    #[must_use]
    pub fn find(&self, keyframe: Keyframe) -> Option<&T> {
        if !self.contains(keyframe) {
            return None;
        }
        self.elements.get(self.index_of(keyframe))
    }

    /// Mutable variant of [`find`](Self::find).
    pub fn find_mut(&mut self, keyframe: Keyframe) -> Option<&mut T> {
        if !self.contains(keyframe) {
            return None;
        }
        let idx = self.index_of(keyframe);
        self.elements.get_mut(idx)
    }

    /// The element at [`head_keyframe`](Self::head_keyframe).
    #[must_use]
    pub fn head(&self) -> Option<&T> {
        self.find(self.head_keyframe())
    }

    /// Mutable access to the element at [`head_keyframe`](Self::head_keyframe).
    pub fn head_mut(&mut self) -> Option<&mut T> {
        let head = self.head_keyframe();
        self.find_mut(head)
    }

    /// Forces the next write to land at `keyframe`.
    ///
    /// This is a lossy repair path used only after a detected discontinuity:
    /// - retained entries older than `keyframe` stay valid,
    /// - entries at or after `keyframe` are discarded,
    /// - if `keyframe` leaves a gap after the head (or precedes the tail),
    ///   every entry is discarded.
    ///
    /// Prior contents are not re-validated.
    pub fn reset_next_head_keyframe(&mut self, keyframe: Keyframe) {
        let keyframe = if keyframe.is_valid() {
            keyframe
        } else {
            Keyframe::new(0)
        };

        if self.len > 0 && keyframe > self.tail_keyframe() && keyframe <= self.next_keyframe {
            self.len = (keyframe - self.tail_keyframe()) as usize;
        } else {
            self.len = 0;
        }
        self.next_keyframe = keyframe;
    }

    /// Iterates over retained `(keyframe, element)` pairs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (Keyframe, &T)> + '_ {
        let head = self.next_keyframe.as_i32();
        let tail = head - self.len as i32;
        (tail..head).filter_map(move |k| {
            let keyframe = Keyframe::new(k);
            self.find(keyframe).map(|element| (keyframe, element))
        })
    }

    fn index_of(&self, keyframe: Keyframe) -> usize {
        keyframe.as_i32() as usize % self.elements.len()
    }
}

impl<T: Default + Clone> KeyedRingBuffer<T> {
    /// Appends every keyframe of `source` that is newer than this buffer's head.
    ///
    /// Already-present keyframes are skipped, so merging the same source twice
    /// is a no-op. A gap between this head and the first new source keyframe
    /// rebases this buffer (see [`reset_next_head_keyframe`](Self::reset_next_head_keyframe)).
    pub fn copy_and_merge(&mut self, source: &Self) {
        let head = self.head_keyframe();
        for (keyframe, element) in source.iter() {
            if !head.is_null() && keyframe <= head {
                continue;
            }
            if keyframe != self.next_keyframe {
                self.reset_next_head_keyframe(keyframe);
            }
            self.get_write_next().clone_from(element);
        }
    }
}

impl<T> InvariantChecker for KeyedRingBuffer<T> {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.len > self.capacity() {
            return Err(InvariantViolation::new(
                "KeyedRingBuffer",
                "retained length exceeds capacity",
            )
            .with_details(format!("len={}, capacity={}", self.len, self.capacity())));
        }
        if !self.next_keyframe.is_valid() {
            return Err(InvariantViolation::new(
                "KeyedRingBuffer",
                "next keyframe must be non-negative",
            )
            .with_details(format!("next_keyframe={}", self.next_keyframe)));
        }
        if self.len > 0 && !self.tail_keyframe().is_valid() {
            return Err(InvariantViolation::new(
                "KeyedRingBuffer",
                "tail keyframe must be non-negative",
            )
            .with_details(format!(
                "next_keyframe={}, len={}",
                self.next_keyframe, self.len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: u32) -> KeyedRingBuffer<u32> {
        let mut buffer = KeyedRingBuffer::with_capacity(capacity);
        for i in 0..count {
            buffer.push(i * 10);
        }
        buffer
    }

    #[test]
    fn empty_buffer_reports_null_head() {
        let buffer: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(4);
        assert!(buffer.is_empty());
        assert!(buffer.head_keyframe().is_null());
        assert!(buffer.tail_keyframe().is_null());
        assert!(buffer.find(Keyframe::new(0)).is_none());
        assert!(buffer.head().is_none());
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let mut buffer: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(7);
        assert_eq!(buffer.head(), Some(&7));
    }

    #[test]
    fn write_next_advances_head_by_one() {
        let mut buffer: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(4);
        *buffer.get_write_next() = 5;
        assert_eq!(buffer.head_keyframe(), Keyframe::new(0));
        *buffer.get_write_next() = 6;
        assert_eq!(buffer.head_keyframe(), Keyframe::new(1));
        assert_eq!(buffer.find(Keyframe::new(0)), Some(&5));
        assert_eq!(buffer.find(Keyframe::new(1)), Some(&6));
    }

    #[test]
    fn write_next_returns_default_element() {
        let mut buffer: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(2);
        buffer.push(1);
        buffer.push(2);
        // slot of keyframe 0 is reused and must be reset
        assert_eq!(*buffer.get_write_next(), 0);
    }

    #[test]
    fn oldest_element_is_evicted_at_capacity() {
        let buffer = filled(4, 6);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.tail_keyframe(), Keyframe::new(2));
        assert_eq!(buffer.head_keyframe(), Keyframe::new(5));
        assert!(buffer.find(Keyframe::new(0)).is_none());
        assert!(buffer.find(Keyframe::new(1)).is_none());
        assert_eq!(buffer.find(Keyframe::new(2)), Some(&20));
        assert_eq!(buffer.find(Keyframe::new(5)), Some(&50));
    }

    #[test]
    fn dirty_count_tracks_writes_across_resets() {
        let mut buffer = filled(4, 3);
        assert_eq!(buffer.dirty_count(), 3);
        buffer.reset_next_head_keyframe(Keyframe::new(1));
        assert_eq!(buffer.dirty_count(), 3);
        buffer.push(5);
        assert_eq!(buffer.dirty_count(), 4);
    }

    #[test]
    fn find_rejects_future_and_negative_keyframes() {
        let buffer = filled(4, 2);
        assert!(buffer.find(Keyframe::new(2)).is_none());
        assert!(buffer.find(Keyframe::NULL).is_none());
        assert!(buffer.find(Keyframe::new(-7)).is_none());
    }

    #[test]
    fn reset_inside_range_truncates() {
        let mut buffer = filled(8, 6);
        buffer.reset_next_head_keyframe(Keyframe::new(3));
        assert_eq!(buffer.head_keyframe(), Keyframe::new(2));
        assert_eq!(buffer.find(Keyframe::new(2)), Some(&20));
        assert!(buffer.find(Keyframe::new(3)).is_none());

        buffer.push(99);
        assert_eq!(buffer.head_keyframe(), Keyframe::new(3));
        assert_eq!(buffer.find(Keyframe::new(3)), Some(&99));
        assert_eq!(buffer.find(Keyframe::new(0)), Some(&0));
    }

    #[test]
    fn reset_at_head_overwrites_head_on_next_write() {
        let mut buffer = filled(8, 3);
        buffer.reset_next_head_keyframe(Keyframe::new(2));
        buffer.push(42);
        assert_eq!(buffer.head_keyframe(), Keyframe::new(2));
        assert_eq!(buffer.find(Keyframe::new(2)), Some(&42));
        assert_eq!(buffer.find(Keyframe::new(1)), Some(&10));
    }

    #[test]
    fn reset_with_gap_discards_everything() {
        let mut buffer = filled(8, 3);
        buffer.reset_next_head_keyframe(Keyframe::new(10));
        assert!(buffer.is_empty());
        assert!(buffer.head_keyframe().is_null());
        buffer.push(1);
        assert_eq!(buffer.head_keyframe(), Keyframe::new(10));
        assert_eq!(buffer.tail_keyframe(), Keyframe::new(10));
        assert!(buffer.find(Keyframe::new(2)).is_none());
    }

    #[test]
    fn reset_before_tail_discards_everything() {
        let mut buffer = filled(4, 10);
        buffer.reset_next_head_keyframe(Keyframe::new(2));
        assert!(buffer.is_empty());
        buffer.push(1);
        assert_eq!(buffer.head_keyframe(), Keyframe::new(2));
    }

    #[test]
    fn reset_to_null_lands_at_zero() {
        let mut buffer = filled(4, 2);
        buffer.reset_next_head_keyframe(Keyframe::NULL);
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_keyframe(), Keyframe::new(0));
    }

    #[test]
    fn iter_yields_retained_in_order() {
        let buffer = filled(3, 5);
        let keys: Vec<i32> = buffer.iter().map(|(k, _)| k.as_i32()).collect();
        assert_eq!(keys, vec![2, 3, 4]);
    }

    #[test]
    fn copy_and_merge_appends_new_entries() {
        let source = filled(8, 5);
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(16);
        dest.copy_and_merge(&source);
        assert_eq!(dest.head_keyframe(), Keyframe::new(4));
        assert_eq!(dest.len(), 5);
        assert_eq!(dest.find(Keyframe::new(3)), Some(&30));
    }

    #[test]
    fn copy_and_merge_is_idempotent() {
        let source = filled(8, 5);
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(16);
        dest.copy_and_merge(&source);
        dest.copy_and_merge(&source);
        assert_eq!(dest.len(), 5);
        assert_eq!(dest.head_keyframe(), Keyframe::new(4));
    }

    #[test]
    fn copy_and_merge_keeps_history_beyond_source_capacity() {
        let mut source: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(2);
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(16);
        for i in 0..6 {
            source.push(i);
            dest.copy_and_merge(&source);
        }
        assert_eq!(dest.len(), 6);
        assert_eq!(dest.find(Keyframe::new(0)), Some(&0));
        assert_eq!(dest.find(Keyframe::new(5)), Some(&5));
    }

    #[test]
    fn copy_and_merge_rebases_across_gap() {
        let mut source = filled(2, 6); // retains 4, 5
        let mut dest: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(16);
        dest.push(0); // keyframe 0
        dest.copy_and_merge(&source);
        assert_eq!(dest.tail_keyframe(), Keyframe::new(4));
        assert_eq!(dest.head_keyframe(), Keyframe::new(5));
        source.push(60);
        dest.copy_and_merge(&source);
        assert_eq!(dest.find(Keyframe::new(6)), Some(&60));
    }

    #[test]
    fn invariants_hold_after_mixed_operations() {
        let mut buffer: KeyedRingBuffer<u32> = KeyedRingBuffer::with_capacity(5);
        for i in 0..20 {
            buffer.push(i);
            if i % 7 == 0 {
                buffer.reset_next_head_keyframe(buffer.head_keyframe());
            }
            assert!(buffer.check_invariants().is_ok());
        }
    }
}
