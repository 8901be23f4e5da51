use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Lines kept while the sink is failing. Oldest lines are dropped beyond this.
pub const MAX_PENDING_LINES: usize = 10_000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Timestamped line buffer with a pluggable sink.
pub struct NetworkLog {
    pending: Mutex<VecDeque<String>>,
    sink: Mutex<Box<dyn Write + Send>>,
    timestamps: bool,
}

impl std::fmt::Debug for NetworkLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkLog")
            .field("pending", &self.pending())
            .field("timestamps", &self.timestamps)
            .finish_non_exhaustive()
    }
}

impl NetworkLog {
    /// Log writing to an arbitrary sink.
    pub fn new(sink: Box<dyn Write + Send>, timestamps: bool) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            sink: Mutex::new(sink),
            timestamps,
        }
    }

    /// Log writing to standard output.
    #[must_use]
    pub fn stdout(timestamps: bool) -> Self {
        Self::new(Box::new(io::stdout()), timestamps)
    }

    /// Log appending to `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn open(path: &Path, timestamps: bool) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(file), timestamps))
    }

    /// Buffer one line.
    pub fn record(&self, line: impl AsRef<str>) {
        let line = if self.timestamps {
            let now = chrono::Local::now().format(TIMESTAMP_FORMAT);
            format!("[{now}] {}", line.as_ref())
        } else {
            line.as_ref().to_string()
        };

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() >= MAX_PENDING_LINES {
            pending.pop_front();
        }
        pending.push_back(line);
    }

    /// Number of buffered lines not yet written.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Write all buffered lines to the sink and return how many were written.
    ///
    /// On failure the lines stay buffered, ahead of anything recorded while
    /// the write was in progress.
    ///
    /// # Errors
    ///
    /// Returns the sink's I/O error.
    pub fn flush(&self) -> io::Result<usize> {
        let batch = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if batch.is_empty() {
            return Ok(0);
        }

        let result = {
            let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
            write_batch(&mut **sink, &batch)
        };

        result.map_err(|e| {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let newer = std::mem::replace(&mut *pending, batch);
            pending.extend(newer);
            while pending.len() > MAX_PENDING_LINES {
                pending.pop_front();
            }
            e
        })
    }
}

fn write_batch(sink: &mut dyn Write, batch: &VecDeque<String>) -> io::Result<usize> {
    for line in batch {
        writeln!(sink, "{line}")?;
    }
    sink.flush()?;
    Ok(batch.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn flush_writes_lines_in_order_and_clears() {
        let buf = SharedBuf::default();
        let log = NetworkLog::new(Box::new(buf.clone()), false);
        log.record("first");
        log.record("second");
        assert_eq!(log.pending(), 2);

        assert_eq!(log.flush().unwrap(), 2);
        assert_eq!(log.pending(), 0);
        assert_eq!(buf.contents(), "first\nsecond\n");
    }

    #[test]
    fn flush_with_nothing_pending_writes_nothing() {
        let buf = SharedBuf::default();
        let log = NetworkLog::new(Box::new(buf.clone()), false);
        assert_eq!(log.flush().unwrap(), 0);
        assert!(buf.contents().is_empty());
    }

    #[test]
    fn timestamps_prefix_each_line() {
        let buf = SharedBuf::default();
        let log = NetworkLog::new(Box::new(buf.clone()), true);
        log.record("opened #0");
        log.flush().unwrap();

        let out = buf.contents();
        assert!(out.starts_with('['));
        assert!(out.trim_end().ends_with("] opened #0"));
    }

    #[test]
    fn failed_flush_keeps_lines() {
        let log = NetworkLog::new(Box::new(FailingSink), false);
        log.record("kept");
        assert!(log.flush().is_err());
        assert_eq!(log.pending(), 1);

        log.record("later");
        assert!(log.flush().is_err());
        assert_eq!(log.pending(), 2);
    }

    #[test]
    fn buffer_is_bounded() {
        let log = NetworkLog::new(Box::new(FailingSink), false);
        for i in 0..MAX_PENDING_LINES + 5 {
            log.record(format!("line {i}"));
        }
        assert_eq!(log.pending(), MAX_PENDING_LINES);
    }

    #[test]
    fn open_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.log");
        std::fs::write(&path, "existing\n").unwrap();

        let log = NetworkLog::open(&path, false).unwrap();
        log.record("appended");
        log.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing\nappended\n");
    }
}
