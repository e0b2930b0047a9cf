// Output endpoints consuming formatted records

mod console;
mod file;
mod memory;

pub use console::{ConsoleSink, TerminalCapabilities};
pub use file::{FileOptions, FileSink};
pub use memory::MemorySink;

use crate::format::Format;
use crate::message::Message;

/// An output endpoint.
///
/// `output` is called by worker threads; implementations must be re-entrant
/// across different records (internal locking around I/O is fine) and must
/// not retain the record beyond the call.
pub trait Sink: Send + Sync {
    fn output(&self, message: &Message, format: &Format);

    fn flush(&self) {}
}
