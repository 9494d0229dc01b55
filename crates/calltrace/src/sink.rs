use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// An append-only destination for encoded bytes.
///
/// Writes cannot fail from the caller's point of view: tracing must never
/// disturb the traced program, so implementations swallow their own errors.
pub trait ByteSink {
    fn write_bytes(&mut self, bytes: &[u8]);

    #[inline]
    fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }
}

impl ByteSink for Vec<u8> {
    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

enum State {
    Live(GzEncoder<Box<dyn Write + Send>>),
    Dead,
}

/// A gzip-compressed output stream.
///
/// The first failure reported by the codec or the underlying target
/// kills the sink for good; every later operation is a no-op.
pub struct Sink {
    state: State,
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("live", &self.is_live())
            .finish()
    }
}

impl Sink {
    /// Wraps an arbitrary writer.
    pub fn new<W: Write + Send + 'static>(w: W, level: u32) -> Self {
        let w: Box<dyn Write + Send> = Box::new(w);
        Self {
            state: State::Live(GzEncoder::new(w, Compression::new(level.min(9)))),
        }
    }

    /// Creates the file at `path`, failing if it already exists.
    pub fn create(path: &Path, level: u32) -> std::io::Result<Self> {
        let file: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self::new(file, level))
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, State::Live(_))
    }

    /// Pushes everything written so far through the codec to the target.
    pub fn flush(&mut self) {
        if let State::Live(enc) = &mut self.state {
            if let Err(err) = enc.flush() {
                self.kill("flush", err);
            }
        }
    }

    /// Writes the gzip trailer and releases the target.
    pub fn finish(&mut self) {
        match std::mem::replace(&mut self.state, State::Dead) {
            State::Live(enc) => match enc.finish() {
                Ok(mut w) => {
                    if let Err(err) = w.flush() {
                        log::error!("calltrace: failed to flush trace output: {err}");
                    }
                }
                Err(err) => log::error!("calltrace: failed to finish trace output: {err}"),
            },
            State::Dead => {}
        }
    }

    fn kill(&mut self, op: &str, err: std::io::Error) {
        log::error!("calltrace: {op} failed, dropping all further trace output: {err}");
        self.state = State::Dead;
    }
}

impl ByteSink for Sink {
    fn write_bytes(&mut self, bytes: &[u8]) {
        if let State::Live(enc) = &mut self.state {
            if let Err(err) = enc.write_all(bytes) {
                self.kill("write", err);
            }
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    /// A cloneable in-memory target; clones share the same buffer.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn decoded(&self) -> String {
            let data = self.0.lock().unwrap().clone();
            let mut decoder = flate2::read::GzDecoder::new(&data[..]);
            let mut out = String::new();
            decoder.read_to_string(&mut out).unwrap();
            out
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Accepts `budget` bytes, then fails every write.
    struct Failing {
        budget: usize,
        seen: Arc<Mutex<usize>>,
    }

    impl Write for Failing {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            *self.seen.lock().unwrap() += 1;
            if buf.len() > self.budget {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn round_trips_through_gzip() {
        let buf = SharedBuf::default();
        let mut sink = Sink::new(buf.clone(), 6);
        sink.write_str("hello ");
        sink.write_bytes(b"world");
        sink.finish();
        assert_eq!(buf.decoded(), "hello world");
    }

    #[test]
    fn writes_after_finish_are_ignored() {
        let buf = SharedBuf::default();
        let mut sink = Sink::new(buf.clone(), 6);
        sink.write_str("a");
        sink.finish();
        let len = buf.0.lock().unwrap().len();

        sink.write_str("b");
        sink.flush();
        sink.finish();
        assert!(!sink.is_live());
        assert_eq!(buf.0.lock().unwrap().len(), len);
    }

    #[test]
    fn failure_kills_the_sink() {
        let seen = Arc::new(Mutex::new(0));
        let mut sink = Sink::new(
            Failing {
                budget: 0,
                seen: seen.clone(),
            },
            0,
        );
        sink.write_str("abc");
        sink.flush();
        assert!(!sink.is_live());

        let calls = *seen.lock().unwrap();
        sink.write_str("more");
        sink.flush();
        sink.finish();
        assert_eq!(*seen.lock().unwrap(), calls);
    }

    #[test]
    fn create_refuses_existing_files() {
        let dir = tempdir::TempDir::new("sink").unwrap();
        let path = dir.path().join("out.gz");
        std::fs::write(&path, b"keep me").unwrap();

        let err = Sink::create(&path, 6).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }
}
