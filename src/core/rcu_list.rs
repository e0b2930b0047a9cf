// Copy-on-write list: immutable snapshots for many readers, CAS for writers

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use super::hazard::{HazardDomain, HazardGuard};

struct Node<T> {
    items: Vec<T>,
}

/// A list whose publication unit is an immutable snapshot.
///
/// Writers build a fresh node containing the whole updated sequence and
/// publish it with a single CAS; the displaced node is retired through the
/// hazard domain. Readers therefore never observe a partially-built list.
pub struct RcuList<T> {
    head: AtomicPtr<Node<T>>,
    domain: Arc<HazardDomain>,
}

// SAFETY: the head pointer is only dereferenced behind hazard protection or
// with exclusive access (drop); nodes are immutable once published.
unsafe impl<T: Send + Sync> Send for RcuList<T> {}
unsafe impl<T: Send + Sync> Sync for RcuList<T> {}

impl<T: Clone> RcuList<T> {
    /// Create a list with its own private hazard domain
    pub fn new() -> Self {
        Self::with_domain(Arc::new(HazardDomain::new()))
    }

    /// Create a list reclaiming through a shared hazard domain
    pub fn with_domain(domain: Arc<HazardDomain>) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            domain,
        }
    }

    /// Acquire a protected snapshot of the current items
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut guard = HazardGuard::new(&self.domain);

        let node = loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                break ptr::null();
            }
            guard.protect(head);
            // Confirm the head did not move between the load and the
            // announcement; a stale announcement protects nothing.
            if self.head.load(Ordering::Acquire) == head {
                break head as *const Node<T>;
            }
        };

        ReadGuard {
            node,
            _hazard: guard,
            _list: PhantomData,
        }
    }

    /// Append one item
    pub fn add(&self, item: T) {
        self.update(|items| items.push(item.clone()));
    }

    /// Append a batch of items
    pub fn add_range(&self, range: &[T]) {
        if range.is_empty() {
            return;
        }
        self.update(|items| items.extend_from_slice(range));
    }

    /// Remove the first item equal to `item`; false if absent
    pub fn remove(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let mut guard = HazardGuard::new(&self.domain);
        loop {
            let old_head = self.head.load(Ordering::Acquire);
            if old_head.is_null() {
                return false;
            }

            // Writers copy from the displaced snapshot, so they need the
            // same pin readers do
            guard.protect(old_head);
            if self.head.load(Ordering::Acquire) != old_head {
                continue;
            }

            // SAFETY: validated announcement pins the node
            let old_items = unsafe { &(*old_head).items };
            let position = match old_items.iter().position(|existing| existing == item) {
                Some(position) => position,
                None => return false,
            };

            let mut items = old_items.clone();
            items.remove(position);
            let new_head = Box::into_raw(Box::new(Node { items }));

            match self.head.compare_exchange(
                old_head,
                new_head,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.domain.retire(old_head);
                    return true;
                }
                Err(_) => {
                    // Lost the race; discard the speculative node and rescan
                    // SAFETY: new_head was never published
                    unsafe { drop(Box::from_raw(new_head)) };
                }
            }
        }
    }

    /// Atomically publish `items` as the entire new contents
    pub fn replace(&self, items: Vec<T>) {
        let new_head = if items.is_empty() {
            ptr::null_mut()
        } else {
            Box::into_raw(Box::new(Node { items }))
        };

        let old_head = self.head.swap(new_head, Ordering::AcqRel);
        if !old_head.is_null() {
            self.domain.retire(old_head);
        }
    }

    /// Remove everything
    pub fn clear(&self) {
        let old_head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if !old_head.is_null() {
            self.domain.retire(old_head);
        }
    }

    /// Item count of the currently published snapshot.
    ///
    /// Racy by nature; suitable for statistics and tests only.
    pub fn estimated_len(&self) -> usize {
        let mut guard = HazardGuard::new(&self.domain);
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return 0;
            }
            guard.protect(head);
            if self.head.load(Ordering::Acquire) == head {
                // SAFETY: validated announcement pins the node
                return unsafe { (*head).items.len() };
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    pub fn domain(&self) -> &Arc<HazardDomain> {
        &self.domain
    }

    fn update(&self, mutate: impl Fn(&mut Vec<T>)) {
        let mut guard = HazardGuard::new(&self.domain);
        loop {
            let old_head = self.head.load(Ordering::Acquire);

            let mut items = if old_head.is_null() {
                Vec::new()
            } else {
                guard.protect(old_head);
                if self.head.load(Ordering::Acquire) != old_head {
                    continue;
                }
                // SAFETY: validated announcement pins the node
                unsafe { (*old_head).items.clone() }
            };
            mutate(&mut items);
            let new_head = Box::into_raw(Box::new(Node { items }));

            match self.head.compare_exchange(
                old_head,
                new_head,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if !old_head.is_null() {
                        self.domain.retire(old_head);
                    }
                    return;
                }
                Err(_) => {
                    // SAFETY: new_head was never published
                    unsafe { drop(Box::from_raw(new_head)) };
                }
            }
        }
    }
}

impl<T: Clone> Default for RcuList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RcuList<T> {
    fn drop(&mut self) {
        let head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if !head.is_null() {
            self.domain.retire(head);
        }
    }
}

/// Borrow of one published snapshot, pinned for the guard's lifetime
pub struct ReadGuard<'a, T> {
    node: *const Node<T>,
    _hazard: HazardGuard<'a>,
    _list: PhantomData<&'a RcuList<T>>,
}

impl<T> ReadGuard<'_, T> {
    pub fn items(&self) -> &[T] {
        if self.node.is_null() {
            return &[];
        }
        // SAFETY: the hazard announcement pins this node until the guard drops
        unsafe { &(*self.node).items }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items().iter()
    }
}
