//! The minimal display sink the core consumes.
//!
//! A terminal UI is an explicit external collaborator; this module ships
//! only a plain stdio-backed implementation, suitable both as the default
//! binary behavior and as a substitutable sink for tests.

use parking_lot::Mutex;
use std::io::{self, Write};

/// Line-oriented sink the relay and client duplex loop write through.
///
/// `write_line` must be atomic with respect to concurrent callers: the
/// display is a leaf, so nothing else may be held while waiting on it.
/// `clear_input` is a no-op for a plain scrolling terminal; it exists so a
/// richer TUI backend can erase an input pane without changing call sites.
pub trait Display: Send + Sync {
    fn write_line(&self, line: &str);
    fn clear_input(&self);
}

/// Stdio-backed `Display`. Holds the lock only around the write itself.
pub struct StdioDisplay {
    out: Mutex<io::Stdout>,
}

impl StdioDisplay {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }
}

impl Default for StdioDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for StdioDisplay {
    fn write_line(&self, line: &str) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    fn clear_input(&self) {
        // A plain scrolling terminal has no separate input pane to erase.
    }
}

/// Show `label` and read one line from stdin, truncated to `max_len` bytes.
///
/// There is exactly one call site for this in the whole system (username
/// entry at client startup), so it is a free function rather than another
/// trait method.
pub fn prompt_line(label: &str, max_len: usize) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(trimmed.chars().take(max_len).collect())
}

/// Shared in-memory sink for tests that need to assert on what was
/// displayed without touching stdio. Not gated behind `#[cfg(test)]` so
/// that integration tests under `tests/` (a separate compilation unit) can
/// use it too.
pub mod test_support {
    use super::Display;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingDisplay {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingDisplay {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().clone()
        }
    }

    impl Display for RecordingDisplay {
        fn write_line(&self, line: &str) {
            self.lines.lock().push(line.to_string());
        }

        fn clear_input(&self) {}
    }
}
