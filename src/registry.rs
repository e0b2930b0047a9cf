// Lock-free logger registry: bucketed chained hash map with hazard-pointer
// reclamation

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::core::hazard::{HazardDomain, HazardGuard};
use crate::logger::Logger;

/// Power of two for mask-based bucket selection
const NUM_BUCKETS: usize = 1 << 8;

struct LoggerEntry {
    name: Box<str>,
    logger: Arc<Logger>,
    next: AtomicPtr<LoggerEntry>,
}

/// Name-indexed logger map.
///
/// Lookups walk bucket chains under hazard protection and return refcounted
/// handles, so a found logger stays valid regardless of concurrent removals.
/// Insertion prepends; removal unlinks and retires through the shared hazard
/// domain.
pub struct LoggerRegistry {
    buckets: Box<[AtomicPtr<LoggerEntry>]>,
    domain: Arc<HazardDomain>,
}

impl LoggerRegistry {
    pub fn new(domain: Arc<HazardDomain>) -> Self {
        let buckets: Vec<AtomicPtr<LoggerEntry>> = (0..NUM_BUCKETS)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            buckets: buckets.into_boxed_slice(),
            domain,
        }
    }

    /// FNV-1a 64-bit, folded for avalanche, masked to the bucket range
    fn bucket_index(name: &str) -> usize {
        const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

        let mut hash = FNV_OFFSET_BASIS;
        for byte in name.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash ^= hash >> 32;

        (hash as usize) & (NUM_BUCKETS - 1)
    }

    /// Pin the bucket head; restart until the announcement is validated
    fn protect_head(
        bucket: &AtomicPtr<LoggerEntry>,
        guard: &mut HazardGuard<'_>,
    ) -> *mut LoggerEntry {
        loop {
            let head = bucket.load(Ordering::Acquire);
            if head.is_null() {
                return head;
            }
            guard.protect(head);
            if bucket.load(Ordering::Acquire) == head {
                return head;
            }
        }
    }

    /// Pin `entry.next`; rereads until the announcement is validated
    fn protect_next(entry: &LoggerEntry, guard: &mut HazardGuard<'_>) -> *mut LoggerEntry {
        loop {
            let next = entry.next.load(Ordering::Acquire);
            if next.is_null() {
                guard.reset();
                return next;
            }
            guard.protect(next);
            if entry.next.load(Ordering::Acquire) == next {
                return next;
            }
        }
    }

    /// First entry named `name`, as a refcounted handle
    pub fn find(&self, name: &str) -> Option<Arc<Logger>> {
        if name.is_empty() {
            return None;
        }

        let bucket = &self.buckets[Self::bucket_index(name)];
        let mut guard_current = HazardGuard::new(&self.domain);
        let mut guard_next = HazardGuard::new(&self.domain);

        let mut current = Self::protect_head(bucket, &mut guard_current);
        while !current.is_null() {
            // SAFETY: current is pinned by guard_current
            let entry = unsafe { &*current };
            if &*entry.name == name {
                // Cloning under the pin outlives any reclamation
                return Some(Arc::clone(&entry.logger));
            }

            let next = Self::protect_next(entry, &mut guard_next);
            // Hand over: the next guard becomes the current one
            std::mem::swap(&mut guard_current, &mut guard_next);
            guard_next.reset();
            current = next;
        }

        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Prepend an entry; duplicates shadow older entries until removed
    pub fn insert(&self, name: &str, logger: Arc<Logger>) -> Arc<Logger> {
        let bucket = &self.buckets[Self::bucket_index(name)];

        let entry = Box::into_raw(Box::new(LoggerEntry {
            name: name.into(),
            logger: Arc::clone(&logger),
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        let mut head = bucket.load(Ordering::Acquire);
        loop {
            // SAFETY: entry is unpublished until the CAS succeeds
            unsafe { (*entry).next.store(head, Ordering::Relaxed) };
            match bucket.compare_exchange_weak(head, entry, Ordering::Release, Ordering::Acquire) {
                Ok(_) => break,
                Err(observed) => head = observed,
            }
        }

        logger
    }

    /// Unlink the first entry named `name` and retire it; false if absent
    pub fn remove(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        let bucket = &self.buckets[Self::bucket_index(name)];
        let mut guard_prev = HazardGuard::new(&self.domain);
        let mut guard_current = HazardGuard::new(&self.domain);
        let mut guard_next = HazardGuard::new(&self.domain);

        'restart: loop {
            let mut prev: *mut LoggerEntry = ptr::null_mut();
            let mut current = Self::protect_head(bucket, &mut guard_current);

            while !current.is_null() {
                // SAFETY: current is pinned by guard_current
                let entry = unsafe { &*current };
                let next = Self::protect_next(entry, &mut guard_next);

                if &*entry.name == name {
                    let unlinked = if prev.is_null() {
                        bucket
                            .compare_exchange(current, next, Ordering::Release, Ordering::Acquire)
                            .is_ok()
                    } else {
                        // SAFETY: prev is pinned by guard_prev
                        unsafe {
                            (*prev)
                                .next
                                .compare_exchange(
                                    current,
                                    next,
                                    Ordering::Release,
                                    Ordering::Acquire,
                                )
                                .is_ok()
                        }
                    };

                    if unlinked {
                        guard_current.reset();
                        self.domain.retire(current);
                        return true;
                    }
                    continue 'restart;
                }

                // Advance hand-over-hand, keeping prev pinned for the CAS
                std::mem::swap(&mut guard_prev, &mut guard_current);
                std::mem::swap(&mut guard_current, &mut guard_next);
                guard_next.reset();
                prev = current;
                current = next;
            }

            return false;
        }
    }

    /// Registered entry count (hazard-protected walk; approximate under
    /// concurrent mutation)
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut guard_current = HazardGuard::new(&self.domain);
        let mut guard_next = HazardGuard::new(&self.domain);

        for bucket in self.buckets.iter() {
            let mut current = Self::protect_head(bucket, &mut guard_current);
            while !current.is_null() {
                count += 1;
                // SAFETY: current is pinned by guard_current
                let entry = unsafe { &*current };
                let next = Self::protect_next(entry, &mut guard_next);
                std::mem::swap(&mut guard_current, &mut guard_next);
                guard_next.reset();
                current = next;
            }
        }

        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free every entry directly, bypassing retirement.
    ///
    /// Teardown only: callers guarantee no concurrent readers remain.
    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            let mut current = bucket.swap(ptr::null_mut(), Ordering::Acquire);
            while !current.is_null() {
                // SAFETY: the chain is unreachable and readers have stopped
                unsafe {
                    let next = (*current).next.load(Ordering::Acquire);
                    drop(Box::from_raw(current));
                    current = next;
                }
            }
        }
    }
}

impl Drop for LoggerRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
