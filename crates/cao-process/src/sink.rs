//! Shared serialised terminal sink.
//!
//! Concurrent children write finished lines through one mutex-guarded
//! writer; a line plus its prefix is emitted as a single write so output
//! never interleaves mid-line.

use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct TermSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl TermSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Sink writing to the parent's stderr, keeping stdout clean for the
    /// final report.
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// In-memory sink for tests; the buffer can be inspected afterwards.
    pub fn memory() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Self::new(Box::new(SharedBuffer(buffer.clone())));
        (sink, buffer)
    }

    /// Write one prefixed line as a single atomic write.
    pub fn write_line(&self, prefix: &str, line: &str) {
        let Ok(mut writer) = self.inner.lock() else {
            return;
        };
        let _ = writeln!(writer, "{prefix}{line}");
        let _ = writer.flush();
    }
}

impl std::fmt::Debug for TermSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermSink").finish_non_exhaustive()
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut inner) = self.0.lock() {
            inner.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_line_appends_prefix_and_newline() {
        let (sink, buffer) = TermSink::memory();
        sink.write_line("[claude] ", "hello");
        sink.write_line("[gemini!] ", "oops");

        let content = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(content, "[claude] hello\n[gemini!] oops\n");
    }

    #[test]
    fn test_sink_is_cloneable_and_shares_buffer() {
        let (sink, buffer) = TermSink::memory();
        let clone = sink.clone();
        sink.write_line("[a] ", "one");
        clone.write_line("[b] ", "two");

        let content = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(content.contains("[a] one\n"));
        assert!(content.contains("[b] two\n"));
    }

    #[test]
    fn test_concurrent_lines_never_interleave() {
        let (sink, buffer) = TermSink::memory();
        let mut handles = Vec::new();
        for i in 0..8 {
            let sink = sink.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..50 {
                    sink.write_line(&format!("[t{i}] "), &format!("line-{j}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let content = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        for line in content.lines() {
            assert!(
                line.starts_with("[t") && line.contains("] line-"),
                "mangled line: {line:?}"
            );
        }
        assert_eq!(content.lines().count(), 8 * 50);
    }
}
