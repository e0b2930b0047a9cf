// Small-buffer-optimized storage for a record's message bytes

/// Inline capacity in bytes; payloads shorter than this never touch the heap.
const INLINE_CAPACITY: usize = 64;

/// Owning storage for a message payload.
///
/// Payloads shorter than [`INLINE_CAPACITY`] are copied into an inline buffer;
/// longer ones get an exact-size heap allocation. `view()` is valid for the
/// whole lifetime of the storage, across moves.
pub struct StringStorage {
    inline: [u8; INLINE_CAPACITY],
    inline_len: u8,
    heap: Option<Box<str>>,
}

impl StringStorage {
    /// Empty storage; `view()` returns `""`
    pub const fn new() -> Self {
        Self {
            inline: [0; INLINE_CAPACITY],
            inline_len: 0,
            heap: None,
        }
    }

    /// Store a copy of `s`
    pub fn create(s: &str) -> Self {
        let mut storage = Self::new();
        storage.store(s);
        storage
    }

    fn store(&mut self, s: &str) {
        if s.len() < INLINE_CAPACITY {
            self.inline[..s.len()].copy_from_slice(s.as_bytes());
            self.inline_len = s.len() as u8;
            self.heap = None;
        } else {
            self.heap = Some(s.into());
            self.inline_len = 0;
        }
    }

    /// Borrow the stored payload
    pub fn view(&self) -> &str {
        match &self.heap {
            Some(h) => h,
            // The inline bytes were copied from a &str, so they are valid UTF-8
            None => std::str::from_utf8(&self.inline[..self.inline_len as usize]).unwrap_or(""),
        }
    }

    pub fn len(&self) -> usize {
        match &self.heap {
            Some(h) => h.len(),
            None => self.inline_len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the payload lives in the inline buffer
    pub fn is_inline(&self) -> bool {
        self.heap.is_none()
    }
}

impl Default for StringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StringStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringStorage")
            .field("inline", &self.is_inline())
            .field("view", &self.view())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let storage = StringStorage::new();
        assert_eq!(storage.view(), "");
        assert!(storage.is_empty());
        assert!(storage.is_inline());
    }

    #[test]
    fn test_short_stays_inline() {
        let storage = StringStorage::create("short message");
        assert_eq!(storage.view(), "short message");
        assert!(storage.is_inline());
    }

    #[test]
    fn test_boundary_lengths() {
        // 63 bytes fits inline, 64 goes to the heap
        let at_limit = "a".repeat(INLINE_CAPACITY - 1);
        let over_limit = "a".repeat(INLINE_CAPACITY);

        let storage = StringStorage::create(&at_limit);
        assert!(storage.is_inline());
        assert_eq!(storage.view(), at_limit);

        let storage = StringStorage::create(&over_limit);
        assert!(!storage.is_inline());
        assert_eq!(storage.view(), over_limit);
    }

    #[test]
    fn test_long_goes_to_heap() {
        let long = "x".repeat(500);
        let storage = StringStorage::create(&long);
        assert!(!storage.is_inline());
        assert_eq!(storage.view(), long);
        assert_eq!(storage.len(), 500);
    }

    #[test]
    fn test_view_survives_move() {
        let storage = StringStorage::create("payload under test");
        let moved = storage;
        assert_eq!(moved.view(), "payload under test");

        let boxed = Box::new(moved);
        assert_eq!(boxed.view(), "payload under test");
    }

    #[test]
    fn test_utf8_payload() {
        let storage = StringStorage::create("üñïçödé ✓");
        assert_eq!(storage.view(), "üñïçödé ✓");
    }
}
