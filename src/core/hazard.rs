// Hazard-pointer domain for safe memory reclamation
//
// Readers announce the pointer they are about to dereference in a shared
// slot table; retirers defer freeing any announced pointer until the
// announcement is withdrawn.

use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

/// Upper bound on concurrently announced pointers across all threads.
/// Exhaustion is a configuration error, not a runtime condition.
pub const MAX_HAZARD_POINTERS: usize = 128;

/// Retired-node count that triggers a reclamation scan
const SCAN_THRESHOLD: usize = 1000;

// Crate-assigned thread ids; 0 marks a free slot, so ids start at 1.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

struct HazardSlot {
    owner: AtomicU64,
    pointer: AtomicPtr<u8>,
}

struct RetiredNode {
    pointer: *mut u8,
    deleter: unsafe fn(*mut u8),
    #[allow(dead_code)]
    epoch: usize,
    next: *mut RetiredNode,
}

/// Memory management domain for lock-free data structures.
///
/// A pointer announced through a [`HazardGuard`] is never freed by
/// [`retire`](HazardDomain::retire) until the guard drops or resets. Cleanup
/// is best-effort: nodes observed as protected simply survive into the next
/// scan.
pub struct HazardDomain {
    slots: Box<[HazardSlot]>,
    retired_head: AtomicPtr<RetiredNode>,
    retire_epoch: AtomicUsize,
    retired_count: AtomicUsize,
}

// SAFETY: the raw pointers on the retired list are exclusively owned by the
// domain (they were handed over by retire() and are freed exactly once, by
// cleanup or by drop); all shared state is accessed through atomics.
unsafe impl Send for HazardDomain {}
unsafe impl Sync for HazardDomain {}

impl HazardDomain {
    pub fn new() -> Self {
        let slots: Vec<HazardSlot> = (0..MAX_HAZARD_POINTERS)
            .map(|_| HazardSlot {
                owner: AtomicU64::new(0),
                pointer: AtomicPtr::new(ptr::null_mut()),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            retired_head: AtomicPtr::new(ptr::null_mut()),
            retire_epoch: AtomicUsize::new(0),
            retired_count: AtomicUsize::new(0),
        }
    }

    /// Claim a free slot for the calling thread.
    ///
    /// # Panics
    /// Panics when all slots are held by live guards. This means the system
    /// hosts more concurrent readers than `MAX_HAZARD_POINTERS`; the limit
    /// must be raised.
    fn claim_slot(&self) -> usize {
        let tid = current_thread_id();
        let start = tid as usize % self.slots.len();

        for i in 0..self.slots.len() {
            let index = (start + i) % self.slots.len();
            if self.slots[index]
                .owner
                .compare_exchange(0, tid, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return index;
            }
        }

        panic!(
            "out of hazard pointer slots ({} readers already active); \
             raise MAX_HAZARD_POINTERS",
            MAX_HAZARD_POINTERS
        );
    }

    fn release_slot(&self, index: usize) {
        let slot = &self.slots[index];
        slot.pointer.store(ptr::null_mut(), Ordering::Release);
        slot.owner.store(0, Ordering::Release);
    }

    fn set_hazard(&self, index: usize, pointer: *mut u8) {
        self.slots[index].pointer.store(pointer, Ordering::Release);
    }

    fn clear_hazard(&self, index: usize) {
        self.slots[index]
            .pointer
            .store(ptr::null_mut(), Ordering::Release);
    }

    /// Hand a logically-unlinked `Box<T>` allocation over for deferred freeing
    pub fn retire<T>(&self, pointer: *mut T) {
        unsafe fn drop_box<T>(p: *mut u8) {
            drop(Box::from_raw(p as *mut T));
        }
        self.retire_with(pointer as *mut u8, drop_box::<T>);
    }

    /// As [`retire`](Self::retire) with an explicit deleter
    pub fn retire_with(&self, pointer: *mut u8, deleter: unsafe fn(*mut u8)) {
        let node = Box::into_raw(Box::new(RetiredNode {
            pointer,
            deleter,
            epoch: self.retire_epoch.fetch_add(1, Ordering::Relaxed),
            next: ptr::null_mut(),
        }));

        // Lock-free prepend onto the retired list
        let mut head = self.retired_head.load(Ordering::Relaxed);
        loop {
            // SAFETY: node is exclusively ours until the CAS publishes it
            unsafe { (*node).next = head };
            match self.retired_head.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => head = observed,
            }
        }

        if self.retired_count.fetch_add(1, Ordering::Relaxed) >= SCAN_THRESHOLD {
            self.try_cleanup();
        }
    }

    /// Scan the slot table and free every retired node nobody protects.
    ///
    /// Nodes observed as protected are pushed back for the next scan.
    pub fn try_cleanup(&self) {
        // Reset up front so concurrent retirers do not pile in behind us
        self.retired_count.store(0, Ordering::Relaxed);

        let mut protected: Vec<*mut u8> = Vec::with_capacity(MAX_HAZARD_POINTERS);
        for slot in self.slots.iter() {
            let p = slot.pointer.load(Ordering::Acquire);
            if !p.is_null() {
                protected.push(p);
            }
        }
        protected.sort_unstable();

        let mut nodes = self.retired_head.swap(ptr::null_mut(), Ordering::Acquire);
        if nodes.is_null() {
            return;
        }

        let mut deferred: *mut RetiredNode = ptr::null_mut();
        let mut deferred_count = 0usize;

        while !nodes.is_null() {
            // SAFETY: the detached list is exclusively ours
            let current = nodes;
            nodes = unsafe { (*current).next };

            let pointer = unsafe { (*current).pointer };
            if protected.binary_search(&pointer).is_ok() {
                // Still announced by some reader; keep for the next scan
                unsafe { (*current).next = deferred };
                deferred = current;
                deferred_count += 1;
            } else {
                // SAFETY: no reader announces this pointer; retire() gave us
                // exclusive ownership, so this is the single free.
                unsafe {
                    let node = Box::from_raw(current);
                    (node.deleter)(node.pointer);
                }
            }
        }

        if !deferred.is_null() {
            // Re-prepend the surviving segment in one CAS
            let mut tail = deferred;
            // SAFETY: deferred segment is still exclusively ours
            unsafe {
                while !(*tail).next.is_null() {
                    tail = (*tail).next;
                }
            }

            let mut head = self.retired_head.load(Ordering::Relaxed);
            loop {
                unsafe { (*tail).next = head };
                match self.retired_head.compare_exchange_weak(
                    head,
                    deferred,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => head = observed,
                }
            }
            self.retired_count
                .fetch_add(deferred_count, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    fn active_slot_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.owner.load(Ordering::Acquire) != 0)
            .count()
    }
}

impl Default for HazardDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HazardDomain {
    fn drop(&mut self) {
        // Teardown: no readers remain, free everything outstanding
        let mut nodes = self.retired_head.swap(ptr::null_mut(), Ordering::Acquire);
        while !nodes.is_null() {
            // SAFETY: exclusive access during drop; each node freed once
            unsafe {
                let node = Box::from_raw(nodes);
                nodes = node.next;
                (node.deleter)(node.pointer);
            }
        }
    }
}

/// RAII announcement of a single in-use pointer.
///
/// The slot is claimed on first [`protect`](HazardGuard::protect) and both
/// the announcement and the slot itself are released on drop, so short-lived
/// threads do not strand slot capacity. A thread holding two live guards
/// occupies two distinct slots.
pub struct HazardGuard<'a> {
    domain: &'a HazardDomain,
    index: Option<usize>,
}

impl<'a> HazardGuard<'a> {
    pub fn new(domain: &'a HazardDomain) -> Self {
        Self {
            domain,
            index: None,
        }
    }

    /// Announce `pointer` and return it.
    ///
    /// The caller must re-read its source location afterwards and retry if it
    /// changed; only a validated pointer is actually protected. Protecting
    /// null clears any previous announcement.
    pub fn protect<T>(&mut self, pointer: *mut T) -> *mut T {
        if pointer.is_null() {
            self.reset();
            return pointer;
        }

        let index = match self.index {
            Some(index) => index,
            None => {
                let index = self.domain.claim_slot();
                self.index = Some(index);
                index
            }
        };

        self.domain.set_hazard(index, pointer as *mut u8);
        // The announcement must be globally visible before the caller
        // re-reads the source pointer; release alone does not order the
        // store against that subsequent load.
        fence(Ordering::SeqCst);
        pointer
    }

    /// Withdraw the announcement, keeping the slot for reuse by this guard
    pub fn reset(&mut self) {
        if let Some(index) = self.index {
            self.domain.clear_hazard(index);
        }
    }
}

impl Drop for HazardGuard<'_> {
    fn drop(&mut self) {
        if let Some(index) = self.index.take() {
            self.domain.release_slot(index);
        }
    }
}
