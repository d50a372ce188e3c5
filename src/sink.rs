//! Output sinks for listing lines
//!
//! - [`BatchSink`]: thread-safe in-memory sequence, read back after the call
//! - [`StreamingSink`]: writes and flushes every line to a byte destination;
//!   closes itself on the first write failure
//!
//! Workers call [`OutputSink::add`] concurrently. A sink error halts the
//! listing instead of buffering while the destination is unusable.

use crate::error::{SinkError, SinkResult};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Consumer of canonical listing lines
pub trait OutputSink: Send + Sync {
    /// Append one line
    fn add(&self, line: &str) -> SinkResult<()>;

    /// Append several lines in order
    fn add_all(&self, lines: &[String]) -> SinkResult<()> {
        for line in lines {
            self.add(line)?;
        }
        Ok(())
    }

    /// Check if `line` was already added (streaming sinks keep no history)
    fn contains(&self, line: &str) -> bool;

    /// Number of lines added
    fn size(&self) -> usize;

    /// Finish the output; later `add` calls fail with [`SinkError::Closed`]
    fn close(&self) -> SinkResult<()>;
}

/// In-memory sink used by batch listings
#[derive(Debug, Default)]
pub struct BatchSink {
    lines: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl BatchSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the lines in append order
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Take the collected lines, leaving the sink empty
    pub fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl OutputSink for BatchSink {
    fn add(&self, line: &str) -> SinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        self.lines.lock().push(line.to_string());
        Ok(())
    }

    fn add_all(&self, lines: &[String]) -> SinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        self.lines.lock().extend_from_slice(lines);
        Ok(())
    }

    fn contains(&self, line: &str) -> bool {
        self.lines.lock().iter().any(|l| l == line)
    }

    fn size(&self) -> usize {
        self.lines.lock().len()
    }

    fn close(&self) -> SinkResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that writes each line to `W` and flushes immediately
pub struct StreamingSink<W: Write + Send> {
    writer: Mutex<Option<W>>,
    written: AtomicUsize,
    closed: AtomicBool,
}

impl<W: Write + Send> StreamingSink<W> {
    /// Stream lines into `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            written: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Check if the sink was closed (explicitly or after a failure)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.writer.lock().is_none()
    }

    /// Recover the destination unless a write failure dropped it
    pub fn into_inner(self) -> Option<W> {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> OutputSink for StreamingSink<W> {
    fn add(&self, line: &str) -> SinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;

        match write_line(writer, line) {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                // The destination is unusable; drop it rather than buffer
                guard.take();
                Err(SinkError::Write(e))
            }
        }
    }

    fn contains(&self, _line: &str) -> bool {
        false
    }

    fn size(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    fn close(&self) -> SinkResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.writer.lock().as_mut() {
            Some(writer) => writer.flush().map_err(SinkError::Write),
            None => Ok(()),
        }
    }
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_batch_sink() {
        let sink = BatchSink::new();
        sink.add("a").unwrap();
        sink.add_all(&["b".to_string(), "c".to_string()]).unwrap();

        assert_eq!(sink.size(), 3);
        assert!(sink.contains("b"));
        assert!(!sink.contains("d"));

        sink.close().unwrap();
        assert!(matches!(sink.add("d"), Err(SinkError::Closed)));
        assert_eq!(sink.lines(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_streaming_sink_writes_lines() {
        let sink = StreamingSink::new(Vec::new());
        sink.add("one").unwrap();
        sink.add("two").unwrap();
        sink.close().unwrap();

        assert_eq!(sink.size(), 2);
        assert!(!sink.contains("one"));
        assert!(matches!(sink.add("three"), Err(SinkError::Closed)));
        assert_eq!(sink.into_inner().unwrap(), b"one\ntwo\n");
    }

    /// Accepts `budget` writes, then fails
    struct Failing {
        budget: usize,
    }

    impl Write for Failing {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.budget -= 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_streaming_sink_closes_on_failure() {
        let sink = StreamingSink::new(Failing { budget: 2 });
        sink.add("ok").unwrap();

        assert!(matches!(sink.add("broken"), Err(SinkError::Write(_))));
        assert!(sink.is_closed());
        assert!(matches!(sink.add("later"), Err(SinkError::Closed)));
        assert_eq!(sink.size(), 1);
    }
}
