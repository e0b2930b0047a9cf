// Lock-free bounded MPMC queue of message pointers
//
// Sequence-numbered slots coordinate producer/consumer hand-off: an empty
// slot at position p carries sequence p, a published slot p + 1, and a
// consumed slot reopens at p + capacity.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::CacheAligned;
use crate::message::MessagePtr;

const DEFAULT_CAPACITY: usize = 1024;

struct Slot {
    sequence: AtomicUsize,
    message: UnsafeCell<Option<MessagePtr>>,
}

/// Fixed-capacity multi-producer multi-consumer queue.
///
/// Lock-free on both sides and FIFO. Capacity is rounded up to a power of
/// two at construction and never changes.
pub struct RingQueue {
    slots: Box<[Slot]>,
    capacity: usize,
    producer: CacheAligned<AtomicUsize>,
    consumer: CacheAligned<AtomicUsize>,
    peak: CacheAligned<AtomicUsize>,
}

// SAFETY: RingQueue is Sync because a slot's message cell is only written by
// the producer that won the index CAS and only read by the consumer that won
// the opposing CAS; the sequence protocol serializes those accesses.
unsafe impl Sync for RingQueue {}
unsafe impl Send for RingQueue {}

impl RingQueue {
    /// Create a queue with at least `capacity` slots (0 selects the default)
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity.next_power_of_two()
        };

        let slots: Vec<Slot> = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                message: UnsafeCell::new(None),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            capacity,
            producer: CacheAligned(AtomicUsize::new(0)),
            consumer: CacheAligned(AtomicUsize::new(0)),
            peak: CacheAligned(AtomicUsize::new(0)),
        }
    }

    #[inline]
    fn index_mask(&self) -> usize {
        self.capacity - 1
    }

    /// Publish one message; false when the queue is full or the slot was
    /// lost to a concurrent producer (callers may retry)
    pub fn try_enqueue(&self, message: MessagePtr) -> bool {
        let position = self.producer.0.load(Ordering::Relaxed);
        let slot = &self.slots[position & self.index_mask()];

        // An open slot carries its own position as the sequence
        if slot.sequence.load(Ordering::Acquire) != position {
            return false;
        }

        // Strongest ordering on the index hand-off: every thread agrees on
        // who owns the slot before the non-atomic write below
        if self
            .producer
            .0
            .compare_exchange(position, position + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        // SAFETY: winning the CAS grants exclusive write access to this slot
        // until the sequence store republishes it
        unsafe { *slot.message.get() = Some(message) };

        // Release makes the message visible before consumers see the sequence
        slot.sequence.store(position + 1, Ordering::Release);

        let size = self.len();
        let peak = self.peak.0.load(Ordering::Relaxed);
        if size > peak {
            self.peak.0.store(size, Ordering::Relaxed);
        }

        true
    }

    /// Take the oldest message; None when empty or lost to a concurrent
    /// consumer (callers may retry)
    pub fn try_dequeue(&self) -> Option<MessagePtr> {
        let position = self.consumer.0.load(Ordering::Relaxed);
        let slot = &self.slots[position & self.index_mask()];

        // A published slot carries position + 1
        if slot.sequence.load(Ordering::Acquire) != position + 1 {
            return None;
        }

        if self
            .consumer
            .0
            .compare_exchange(position, position + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        // SAFETY: winning the CAS grants exclusive read access to this slot
        // until the sequence store reopens it
        let message = unsafe { (*slot.message.get()).take() };

        // Reopen the slot for the producer that will lap to this position
        slot.sequence
            .store(position + self.capacity, Ordering::Release);

        message
    }

    /// Drain everything currently available into `out`; returns the count
    pub fn dequeue_all(&self, out: &mut Vec<MessagePtr>) -> usize {
        let approximate = self.len();
        if approximate > 0 {
            out.reserve(approximate);
        }

        let mut count = 0;
        while let Some(message) = self.try_dequeue() {
            out.push(message);
            count += 1;
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.producer.0.load(Ordering::Acquire) == self.consumer.0.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let producer = self.producer.0.load(Ordering::Acquire);
        let consumer = self.consumer.0.load(Ordering::Acquire);
        producer.saturating_sub(consumer).min(self.capacity)
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn usage_percentage(&self) -> f32 {
        self.len() as f32 / self.capacity as f32 * 100.0
    }

    pub fn peak_usage(&self) -> usize {
        self.peak.0.load(Ordering::Relaxed)
    }

    pub fn reset_peak_usage(&self) {
        self.peak.0.store(0, Ordering::Relaxed);
    }
}
