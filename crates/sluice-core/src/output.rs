//! Console feedback for downloads.
//!
//! Mirrors the reporter pattern: every hook has a no-op default, so an
//! [`Output`] only overrides what it wants to show.

use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::Config;

/// A writer shared between jobs, their outputs and nested jobs.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Wrap `writer` for sharing.
pub fn shared(writer: impl Write + Send + 'static) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}

pub fn stdout_writer() -> SharedWriter {
    shared(std::io::stdout())
}

/// Write one line to a shared writer, ignoring a poisoned lock.
pub fn write_line(writer: &SharedWriter, line: &str) -> std::io::Result<()> {
    let mut guard = writer.lock().unwrap_or_else(|e| e.into_inner());
    writeln!(guard, "{line}")?;
    guard.flush()
}

/// Receives progress notifications for each file.
pub trait Output: Send + Sync {
    /// A transfer to `path` begins.
    fn start(&self, path: &Path) {
        let _ = path;
    }

    /// `path` already exists or is archived.
    fn skip(&self, path: &Path) {
        let _ = path;
    }

    /// `path` was written successfully after `tries` attempts.
    fn success(&self, path: &Path, tries: u32) {
        let _ = (path, tries);
    }
}

/// Prints nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl Output for NullOutput {}

/// One plain line per finished or skipped file, for piping into other tools.
pub struct PipeOutput {
    writer: SharedWriter,
}

impl PipeOutput {
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }
}

impl Output for PipeOutput {
    fn skip(&self, path: &Path) {
        let _ = write_line(&self.writer, &format!("# {}", path.display()));
    }

    fn success(&self, path: &Path, _tries: u32) {
        let _ = write_line(&self.writer, &path.display().to_string());
    }
}

/// Interactive output that rewrites the current line once a file is done.
pub struct TerminalOutput {
    writer: SharedWriter,
    ascii: bool,
}

impl TerminalOutput {
    pub fn new(writer: SharedWriter) -> Self {
        Self {
            writer,
            ascii: false,
        }
    }

    pub fn with_ascii(mut self, ascii: bool) -> Self {
        self.ascii = ascii;
        self
    }

    fn check_mark(&self) -> &'static str {
        if self.ascii { "+" } else { "\u{2714}" }
    }
}

impl Output for TerminalOutput {
    fn start(&self, path: &Path) {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = write!(guard, "  {}", path.display());
        let _ = guard.flush();
    }

    fn skip(&self, path: &Path) {
        let _ = write_line(&self.writer, &format!("\x1b[2m* {}\x1b[0m", path.display()));
    }

    fn success(&self, path: &Path, _tries: u32) {
        let _ = write_line(
            &self.writer,
            &format!("\r\x1b[1;32m{}\x1b[0m {}", self.check_mark(), path.display()),
        );
    }
}

/// Pick an output from `output.mode`.
///
/// `auto` (the default) uses the terminal output when stdout is a TTY and
/// the pipe output otherwise.
pub fn select(config: &Config, writer: SharedWriter) -> Arc<dyn Output> {
    let mode = config
        .get(&["output", "mode"])
        .and_then(|v| v.as_str())
        .unwrap_or("auto");
    let ascii = config
        .get(&["output", "ascii"])
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    match mode {
        "null" => Arc::new(NullOutput),
        "pipe" => Arc::new(PipeOutput::new(writer)),
        "terminal" => Arc::new(TerminalOutput::new(writer).with_ascii(ascii)),
        "auto" if std::io::stdout().is_terminal() => {
            Arc::new(TerminalOutput::new(writer).with_ascii(ascii))
        }
        "auto" => Arc::new(PipeOutput::new(writer)),
        other => {
            tracing::warn!(mode = other, "Unknown output mode, falling back to 'auto'");
            if std::io::stdout().is_terminal() {
                Arc::new(TerminalOutput::new(writer).with_ascii(ascii))
            } else {
                Arc::new(PipeOutput::new(writer))
            }
        }
    }
}
