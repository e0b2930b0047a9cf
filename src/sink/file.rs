// Buffered file sink with size-based rotation

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::Sink;
use crate::format::Format;
use crate::message::Message;

const DEFAULT_BUFFER_SIZE: usize = 8192;
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: u32 = 5;
const ROTATION_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// File sink configuration (builder style)
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub file_path: PathBuf,
    pub create_dirs: bool,
    pub truncate_on_open: bool,
    pub auto_flush: bool,
    pub buffer_size: usize,
    pub enable_rotation: bool,
    pub max_file_size: u64,
    pub max_files: u32,
}

impl FileOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: path.into(),
            create_dirs: true,
            truncate_on_open: false,
            auto_flush: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            enable_rotation: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn create_dirs(mut self, value: bool) -> Self {
        self.create_dirs = value;
        self
    }

    pub fn truncate_on_open(mut self, value: bool) -> Self {
        self.truncate_on_open = value;
        self
    }

    pub fn auto_flush(mut self, value: bool) -> Self {
        self.auto_flush = value;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn rotation(mut self, max_file_size: u64, max_files: u32) -> Self {
        self.enable_rotation = true;
        self.max_file_size = max_file_size.max(1);
        self.max_files = max_files.max(1);
        self
    }
}

struct FileSinkInner {
    writer: BufWriter<File>,
    current_size: u64,
}

/// Appending file sink.
///
/// With rotation enabled, a file that would exceed `max_file_size` is first
/// renamed to `{basename}.{timestamp}.{ext}` and a fresh file is opened; the
/// oldest rotated files beyond `max_files` are pruned. I/O failures are
/// counted, never propagated to the pipeline.
pub struct FileSink {
    options: FileOptions,
    inner: Mutex<FileSinkInner>,
    error_count: AtomicU64,
}

impl FileSink {
    pub fn new(options: FileOptions) -> io::Result<Self> {
        if options.create_dirs {
            if let Some(parent) = options.file_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let file = Self::open_file(&options)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            inner: Mutex::new(FileSinkInner {
                writer: BufWriter::with_capacity(options.buffer_size, file),
                current_size,
            }),
            options,
            error_count: AtomicU64::new(0),
        })
    }

    fn open_file(options: &FileOptions) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(!options.truncate_on_open)
            .truncate(options.truncate_on_open)
            .write(true)
            .open(&options.file_path)
    }

    /// Writes that failed since construction
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.options.file_path
    }

    fn write_record(&self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if self.options.enable_rotation
            && inner.current_size + bytes.len() as u64 + 1 > self.options.max_file_size
            && inner.current_size > 0
        {
            self.rotate(&mut inner)?;
        }

        inner.writer.write_all(bytes)?;
        inner.writer.write_all(b"\n")?;
        inner.current_size += bytes.len() as u64 + 1;

        if self.options.auto_flush {
            inner.writer.flush()?;
        }
        Ok(())
    }

    fn rotate(&self, inner: &mut FileSinkInner) -> io::Result<()> {
        inner.writer.flush()?;

        let rotated = self.rotated_path();
        fs::rename(&self.options.file_path, &rotated)?;
        self.prune_rotated_files();

        let file = Self::open_file(&self.options)?;
        inner.writer = BufWriter::with_capacity(self.options.buffer_size, file);
        inner.current_size = 0;
        Ok(())
    }

    /// `{basename}.{timestamp}.{ext}`, with a numeric suffix on collision
    fn rotated_path(&self) -> PathBuf {
        let path = &self.options.file_path;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_string());
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_string());
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let timestamp = chrono::Local::now().format(ROTATION_TIMESTAMP_FORMAT);

        let candidate = directory.join(format!("{stem}.{timestamp}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        for counter in 1.. {
            let candidate = directory.join(format!("{stem}.{timestamp}-{counter}.{extension}"));
            if !candidate.exists() {
                return candidate;
            }
        }
        unreachable!()
    }

    fn prune_rotated_files(&self) {
        let path = &self.options.file_path;
        let stem = match path.file_stem() {
            Some(stem) => format!("{}.", stem.to_string_lossy()),
            None => return,
        };
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let current = path.file_name().map(|n| n.to_os_string());
        let mut rotated: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|candidate| {
                let name = match candidate.file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => return false,
                };
                name.starts_with(&stem) && Some(candidate.file_name().unwrap()) != current.as_deref()
            })
            .collect();

        if rotated.len() <= self.options.max_files as usize {
            return;
        }

        // Timestamped names sort chronologically
        rotated.sort();
        let excess = rotated.len() - self.options.max_files as usize;
        for stale in rotated.into_iter().take(excess) {
            let _ = fs::remove_file(stale);
        }
    }
}

impl Sink for FileSink {
    fn output(&self, message: &Message, format: &Format) {
        let bytes = format.render(message);
        if self.write_record(&bytes).is_err() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.writer.flush().is_err() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}
