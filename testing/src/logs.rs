//! Capture of tracing output, for asserting on runtime warnings.
//!
//! Warnings are only logged in debug builds, so tests asserting on them
//! should be gated with `#[cfg(debug_assertions)]`.
//!
//! ```
//! use oneway_core::warning::Warning;
//! use oneway_testing::LogCapture;
//!
//! let logs = LogCapture::start();
//! Warning::ReconcilePassesExhausted { passes: 3 }.report();
//!
//! # #[cfg(debug_assertions)]
//! assert!(logs.has_warning("reconcile_passes_exhausted"));
//! ```

use oneway_core::warning::TARGET;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Log lines written by a tracing subscriber
#[derive(Debug, Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Routes the current thread's tracing output into memory until dropped
pub struct LogCapture {
    buffer: SharedBuffer,
    _guard: DefaultGuard,
}

impl LogCapture {
    /// Start capturing every event at `DEBUG` level and above
    #[must_use]
    pub fn start() -> Self {
        let buffer = SharedBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .with_target(true)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        Self {
            buffer,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    /// Everything captured so far
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.contents()
    }

    /// Captured lines logged by the runtime's warning target
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(TARGET))
            .map(str::to_string)
            .collect()
    }

    /// Whether a warning with `code` was logged
    #[must_use]
    pub fn has_warning(&self, code: &str) -> bool {
        self.warning_count(code) > 0
    }

    /// Number of warnings logged with `code`
    #[must_use]
    pub fn warning_count(&self, code: &str) -> usize {
        let quoted = format!("code=\"{code}\"");
        let bare = format!("code={code}");
        self.warnings()
            .iter()
            .filter(|line| line.contains(&quoted) || line.contains(&bare))
            .count()
    }

    /// Whether any captured line contains `needle`
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

impl std::fmt::Debug for LogCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCapture")
            .field("bytes", &self.contents().len())
            .finish_non_exhaustive()
    }
}
