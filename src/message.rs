// SPDX-License-Identifier: Apache-2.0 OR MIT
// Pooled log record and its lifecycle state machine

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::core::string_storage::StringStorage;
use crate::level::Level;
use crate::logger::Logger;
use crate::structured::StructuredData;

/// Lifecycle states of a pooled record.
///
/// Transitions are `Pooled -> Active -> Releasing -> Pooled` and nowhere
/// else. An `Active` record has refcount >= 1 and valid views; a `Releasing`
/// record is draining references; a `Pooled` record holds no external
/// references and all views are empty.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pooled = 0,
    Active = 1,
    Releasing = 2,
}

impl MessageState {
    pub(crate) const fn from_u8(value: u8) -> MessageState {
        match value {
            1 => MessageState::Active,
            2 => MessageState::Releasing,
            _ => MessageState::Pooled,
        }
    }
}

/// Call-site coordinates captured by the logging macros
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub module: &'static str,
    pub line: u32,
}

impl SourceLocation {
    pub const fn new(file: &'static str, module: &'static str, line: u32) -> Self {
        Self { file, module, line }
    }

    pub const fn unknown() -> Self {
        Self {
            file: "",
            module: "",
            line: 0,
        }
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::unknown()
    }
}

/// The unit traveling through the pipeline.
///
/// Records live in fixed pool slots and are never moved while `Active`; the
/// pool pins the slot until the last reference is finalized. Producers fill
/// a record while they hold the only reference; after enqueue it is shared
/// read-only with the worker side.
pub struct Message {
    pub(crate) timestamp: SystemTime,
    pub(crate) name: Option<Arc<str>>,
    pub(crate) level: Level,
    pub(crate) source: SourceLocation,
    pub(crate) storage: StringStorage,
    pub(crate) logger: Weak<Logger>,
    pub(crate) structured: StructuredData,
    pub(crate) ref_count: AtomicU32,
    pub(crate) state: AtomicU8,
}

impl Message {
    /// A fresh slot in `Pooled` state with empty views
    pub(crate) fn pooled() -> Self {
        Self {
            timestamp: SystemTime::UNIX_EPOCH,
            name: None,
            level: Level::Info,
            source: SourceLocation::unknown(),
            storage: StringStorage::new(),
            logger: Weak::new(),
            structured: StructuredData::new(),
            ref_count: AtomicU32::new(0),
            state: AtomicU8::new(MessageState::Pooled as u8),
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Name of the originating logger ("" while pooled)
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn source(&self) -> SourceLocation {
        self.source
    }

    /// The message text, borrowed from the record's own storage
    pub fn text(&self) -> &str {
        self.storage.view()
    }

    pub fn structured(&self) -> &StructuredData {
        &self.structured
    }

    /// Owning logger, if it is still registered
    pub fn logger(&self) -> Option<Arc<Logger>> {
        self.logger.upgrade()
    }

    pub fn state(&self) -> MessageState {
        MessageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == MessageState::Active
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn add_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::Acquire);
    }

    /// Drop one reference; true iff this was the last one
    pub(crate) fn release_ref(&self) -> bool {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Clear every field that carries a borrow or an allocation.
    ///
    /// The data writes precede the state store, which publishes them with
    /// release so the next acquirer observes a clean slate.
    pub(crate) fn reset(&mut self) {
        self.timestamp = SystemTime::UNIX_EPOCH;
        self.name = None;
        self.level = Level::Info;
        self.source = SourceLocation::unknown();
        self.storage = StringStorage::new();
        self.logger = Weak::new();
        self.structured.clear();

        self.state
            .store(MessageState::Pooled as u8, Ordering::Release);
        self.ref_count.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Message");
        debug
            .field("name", &self.name())
            .field("level", &self.level)
            .field("text", &self.text())
            .field("state", &self.state())
            .field("refs", &self.ref_count());

        if !self.structured.is_empty() {
            debug.field("structured", &self.structured);
        }

        debug.finish()
    }
}

/// Shared pointer to a pool slot, passed between producers and workers.
///
/// Validity is guaranteed by the pool state machine: the slot is pinned from
/// acquisition until the last reference drop finalizes it, and chunk storage
/// is never freed while any slot in it is claimed.
#[derive(Clone, Copy)]
pub struct MessagePtr(NonNull<Message>);

// SAFETY: the pointee is only mutated while exactly one holder exists
// (between acquire and enqueue, and during reset after the last reference
// drop); shared access afterwards is read-only plus atomic fields.
unsafe impl Send for MessagePtr {}
unsafe impl Sync for MessagePtr {}

impl MessagePtr {
    pub(crate) fn new(ptr: NonNull<Message>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut Message {
        self.0.as_ptr()
    }

    /// # Safety
    /// The slot must not have been finalized and reacquired; holders of a
    /// live reference (refcount they own) always satisfy this.
    pub unsafe fn as_ref<'a>(self) -> &'a Message {
        &*self.0.as_ptr()
    }

    /// # Safety
    /// Caller must be the only holder (fresh acquisition or finalization).
    pub(crate) unsafe fn as_mut<'a>(self) -> &'a mut Message {
        &mut *self.0.as_ptr()
    }
}

impl std::fmt::Debug for MessagePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessagePtr({:p})", self.0.as_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pooled_record_is_blank() {
        let msg = Message::pooled();
        assert_eq!(msg.state(), MessageState::Pooled);
        assert_eq!(msg.ref_count(), 0);
        assert_eq!(msg.name(), "");
        assert_eq!(msg.text(), "");
        assert!(msg.structured().is_empty());
        assert!(msg.logger().is_none());
    }

    #[test]
    fn test_ref_counting() {
        let msg = Message::pooled();
        msg.ref_count.store(1, Ordering::Release);

        msg.add_ref();
        assert_eq!(msg.ref_count(), 2);

        assert!(!msg.release_ref());
        assert!(msg.release_ref());
        assert_eq!(msg.ref_count(), 0);
    }

    #[test]
    fn test_reset_clears_views() {
        let mut msg = Message::pooled();
        msg.name = Some(Arc::from("net"));
        msg.level = Level::Error;
        msg.storage = StringStorage::create("boom");
        msg.structured.insert("k", 1_i64);
        msg.state
            .store(MessageState::Releasing as u8, Ordering::Release);
        msg.ref_count.store(1, Ordering::Release);

        msg.reset();

        assert_eq!(msg.state(), MessageState::Pooled);
        assert_eq!(msg.ref_count(), 0);
        assert_eq!(msg.name(), "");
        assert_eq!(msg.text(), "");
        assert_eq!(msg.level(), Level::Info);
        assert!(msg.structured().is_empty());
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(MessageState::from_u8(0), MessageState::Pooled);
        assert_eq!(MessageState::from_u8(1), MessageState::Active);
        assert_eq!(MessageState::from_u8(2), MessageState::Releasing);
        assert_eq!(MessageState::from_u8(99), MessageState::Pooled);
    }
}
