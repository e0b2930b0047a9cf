// Console sink: stdout/stderr split by level, ANSI color when the terminal
// supports it

use std::io::{self, Write};
use std::sync::Mutex;

use super::Sink;
use crate::format::Format;
use crate::level::Level;
use crate::message::Message;

const RESET: &str = "\x1b[0m";

const fn level_color(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[90m",
        Level::Debug => "\x1b[36m",
        Level::Info => "\x1b[32m",
        Level::Warn => "\x1b[33m",
        Level::Error => "\x1b[31m",
        Level::Fatal => "\x1b[1;31m",
        Level::Off => "",
    }
}

/// What the attached terminal can render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalCapabilities {
    pub supports_color: bool,
    /// 1 = 16 colors, 2 = 256 colors, 3 = 24-bit
    pub color_depth: u8,
}

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn stream_is_terminal(fd: i32) -> bool {
    // SAFETY: isatty only inspects the descriptor
    unsafe { libc::isatty(fd) == 1 }
}

/// Detect color support from the environment.
///
/// `FORCE_COLOR` (any value but "0") wins, then `NO_COLOR`; otherwise a
/// non-terminal stream gets no color, and `COLORTERM`/`TERM`/`TERM_PROGRAM`/
/// `WT_SESSION`/`LANG`/`LC_ALL` decide the depth.
fn detect_capabilities(is_terminal: bool) -> TerminalCapabilities {
    let force_color = env("FORCE_COLOR");
    if !force_color.is_empty() && force_color != "0" {
        return TerminalCapabilities {
            supports_color: true,
            color_depth: 1,
        };
    }
    if !env("NO_COLOR").is_empty() {
        return TerminalCapabilities::default();
    }
    if !is_terminal {
        return TerminalCapabilities::default();
    }

    let term = env("TERM");
    if term == "dumb" {
        return TerminalCapabilities::default();
    }

    let colorterm = env("COLORTERM");
    if colorterm.contains("truecolor") || colorterm.contains("24bit") {
        return TerminalCapabilities {
            supports_color: true,
            color_depth: 3,
        };
    }
    if term.contains("256color") {
        return TerminalCapabilities {
            supports_color: true,
            color_depth: 2,
        };
    }
    if term.contains("color")
        || term.contains("xterm")
        || term.contains("screen")
        || term.contains("tmux")
        || env("TERM_PROGRAM") == "vscode"
        || !env("WT_SESSION").is_empty()
    {
        return TerminalCapabilities {
            supports_color: true,
            color_depth: 1,
        };
    }

    // A UTF-8 locale with some TERM set is a color terminal in practice
    let locale = {
        let lc_all = env("LC_ALL");
        if lc_all.is_empty() {
            env("LANG")
        } else {
            lc_all
        }
    };
    if !term.is_empty() && locale.to_uppercase().contains("UTF-8") {
        return TerminalCapabilities {
            supports_color: true,
            color_depth: 1,
        };
    }

    TerminalCapabilities::default()
}

/// Terminal sink.
///
/// `Trace..Warn` go to stdout, `Error` and `Fatal` to stderr. Each stream's
/// color capability is detected once at construction and can be overridden
/// for tests.
pub struct ConsoleSink {
    stdout_caps: TerminalCapabilities,
    stderr_caps: TerminalCapabilities,
    write_lock: Mutex<()>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            stdout_caps: detect_capabilities(stream_is_terminal(libc::STDOUT_FILENO)),
            stderr_caps: detect_capabilities(stream_is_terminal(libc::STDERR_FILENO)),
            write_lock: Mutex::new(()),
        }
    }

    /// Bypass detection (tests, or embedding in a known environment)
    pub fn with_capabilities(capabilities: TerminalCapabilities) -> Self {
        Self {
            stdout_caps: capabilities,
            stderr_caps: capabilities,
            write_lock: Mutex::new(()),
        }
    }

    pub fn stdout_capabilities(&self) -> TerminalCapabilities {
        self.stdout_caps
    }

    pub fn stderr_capabilities(&self) -> TerminalCapabilities {
        self.stderr_caps
    }

    fn write_record(&self, message: &Message, bytes: &[u8]) {
        let use_stderr = message.level() >= Level::Error;
        let caps = if use_stderr {
            self.stderr_caps
        } else {
            self.stdout_caps
        };

        let _lock = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = if use_stderr {
            Self::write_line(&mut io::stderr().lock(), message.level(), bytes, caps)
        } else {
            Self::write_line(&mut io::stdout().lock(), message.level(), bytes, caps)
        };
        // Console write failure has nowhere better to go
        let _ = result;
    }

    fn write_line(
        writer: &mut impl Write,
        level: Level,
        bytes: &[u8],
        caps: TerminalCapabilities,
    ) -> io::Result<()> {
        if caps.supports_color {
            writer.write_all(level_color(level).as_bytes())?;
            writer.write_all(bytes)?;
            writer.write_all(RESET.as_bytes())?;
        } else {
            writer.write_all(bytes)?;
        }
        writer.write_all(b"\n")
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn output(&self, message: &Message, format: &Format) {
        let bytes = format.render(message);
        self.write_record(message, &bytes);
    }

    fn flush(&self) {
        let _lock = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }
}
