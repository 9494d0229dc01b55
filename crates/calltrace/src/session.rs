use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::call::Call;
use crate::config::{Config, LineEnding};
use crate::error::Error;
use crate::escape;
use crate::sink::{ByteSink, Sink};
use crate::tag;
use crate::tsc::{self, Clock};

/// Name of the element wrapping every call in a document.
const ROOT_TAG: &str = "trace";

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Sessions whose lock is held by a call on this thread.
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a session's lock as held by the current thread until dropped.
#[derive(Debug)]
pub(crate) struct Holding(usize);

impl Holding {
    /// Returns `None` if this thread already holds the session's lock.
    fn acquire(session: usize) -> Option<Self> {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if held.contains(&session) {
                return None;
            }
            held.push(session);
            Some(Holding(session))
        })
    }

    fn is_held(session: usize) -> bool {
        HELD.with(|held| held.borrow().contains(&session))
    }
}

impl Drop for Holding {
    fn drop(&mut self) {
        let id = self.0;
        let _ = HELD.try_with(|held| held.borrow_mut().retain(|&s| s != id));
    }
}

/// Mutable session state, guarded by the session lock.
#[derive(Debug)]
pub(crate) struct State {
    sink: Option<Sink>,
    line_ending: LineEnding,
    flush_each_call: bool,
    path: Option<PathBuf>,
    logical_name: Option<String>,
    counter: u32,
}

impl State {
    /// A state with no document, on which every write is dropped.
    pub(crate) fn closed(line_ending: LineEnding, flush_each_call: bool) -> Self {
        Self {
            sink: None,
            line_ending,
            flush_each_call,
            path: None,
            logical_name: None,
            counter: 0,
        }
    }

    #[inline]
    pub(crate) fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn newline(&mut self) {
        let ending = self.line_ending;
        tag::newline(self, ending);
    }

    /// Flushes the sink if the session asks for per-call flushing.
    pub(crate) fn end_of_call(&mut self) {
        if self.flush_each_call {
            if let Some(sink) = &mut self.sink {
                sink.flush();
            }
        }
    }

    fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        tag::end_tag(self, ROOT_TAG);
        self.newline();
        if let Some(mut sink) = self.sink.take() {
            sink.finish();
        }
        if let Some(path) = self.path.take() {
            log::debug!("calltrace: closed {}", path.display());
        }
    }
}

impl ByteSink for State {
    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) {
        if let Some(sink) = &mut self.sink {
            sink.write_bytes(bytes);
        }
    }
}

/// A trace session: the single output document of a process.
///
/// A session starts out closed. While closed, every call event is a no-op
/// that does not touch the session lock, so instrumentation may run before
/// [`Session::open`] or after [`Session::close`] without any effect on the
/// traced program.
///
/// The session lock is held for the lifetime of each [`Call`], which keeps
/// calls from different threads from interleaving. A call begun on a thread
/// that is already inside a call on the same session is not recorded.
#[derive(Debug)]
pub struct Session {
    config: Config,
    clock: Clock,
    id: usize,
    open: AtomicBool,
    last_file: Mutex<Option<PathBuf>>,
    state: Mutex<State>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, tsc::now)
    }

    /// Creates a session that timestamps calls with `clock` instead of the
    /// CPU cycle counter.
    pub fn with_clock(config: Config, clock: Clock) -> Self {
        let state = State::closed(config.line_ending, config.flush_each_call);
        Self {
            config,
            clock,
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            open: AtomicBool::new(false),
            last_file: Mutex::new(None),
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while a call was being written leaves a malformed document
        // at worst, so keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a new trace document, closing the current one first.
    ///
    /// The file is named `<program>.<logical_name>.<extension>.gz`. If such a
    /// file already exists, a counter is inserted after the logical name and
    /// increased until the name is free, so earlier traces are never
    /// overwritten. Returns the path of the new document.
    pub fn open(&self, logical_name: &str) -> Result<PathBuf, Error> {
        if Holding::is_held(self.id) {
            return Err(Error::Busy);
        }
        let mut state = self.lock();
        state.close();
        self.open.store(false, Ordering::Release);
        state.logical_name = Some(logical_name.to_string());

        if self.config.disabled {
            return Err(Error::Disabled);
        }

        let program = match &self.config.program {
            Some(program) => program.clone(),
            None => program_name()?,
        };
        let dir = self.config.output_dir.as_deref().unwrap_or(Path::new(""));

        let path = loop {
            let file_name = file_name(
                &program,
                logical_name,
                state.counter,
                &self.config.extension,
            );
            let path = dir.join(file_name);
            match Sink::create(&path, self.config.compression) {
                Ok(sink) => {
                    state.sink = Some(sink);
                    break path;
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    state.counter = state.counter.checked_add(1).ok_or(err)?;
                }
                Err(err) => return Err(Error::Io(err)),
            }
        };

        state.path = Some(path.clone());
        *self.last_file.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.clone());
        self.write_prologue(&mut state);
        self.open.store(true, Ordering::Release);
        log::info!("calltrace: tracing to {}", path.display());
        Ok(path)
    }

    fn write_prologue(&self, state: &mut State) {
        state.write_str("<?xml version='1.0' encoding='UTF-8'?>");
        state.newline();
        if let Some(stylesheet) = &self.config.stylesheet {
            state.write_str("<?xml-stylesheet type='text/xsl' href='");
            state.write_str(&escape::attr(stylesheet));
            state.write_str("'?>");
            state.newline();
        }
        tag::begin_tag(state, ROOT_TAG, tag::NO_ATTRS);
        state.newline();
    }

    /// Closes the current document, if any.
    ///
    /// Does nothing when called from inside a call on this session.
    pub fn close(&self) {
        if Holding::is_held(self.id) {
            log::warn!("calltrace: close requested inside a call, ignoring");
            return;
        }
        let mut state = self.lock();
        state.close();
        self.open.store(false, Ordering::Release);
    }

    /// Closes the current document and opens a fresh one under the same
    /// logical name.
    ///
    /// The old file is kept; the new one gets the next free counter.
    pub fn reopen(&self) -> Result<PathBuf, Error> {
        if Holding::is_held(self.id) {
            return Err(Error::Busy);
        }
        let logical_name = self.lock().logical_name.clone();
        match logical_name {
            Some(name) => self.open(&name),
            None => Err(Error::NeverOpened),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Path of the most recently opened document.
    pub fn file_name(&self) -> Option<PathBuf> {
        self.last_file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts logging a call to the function `name`.
    ///
    /// Blocks until no other thread is inside a call. The call ends, and
    /// the lock is released, when the returned [`Call`] is dropped. Returns
    /// a call that records nothing, without blocking, if the session is
    /// closed or this thread is already inside a call on it.
    pub fn begin_call(&self, name: &str) -> Call<'_> {
        if !self.is_open() {
            return Call::inert(&self.config, self.clock);
        }
        let Some(holding) = Holding::acquire(self.id) else {
            return Call::inert(&self.config, self.clock);
        };
        Call::begin(self.lock(), holding, self.clock, name)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn program_name() -> Result<String, Error> {
    let exe = std::env::current_exe()?;
    exe.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or(Error::NoProgramName)
}

fn file_name(program: &str, logical_name: &str, counter: u32, extension: &str) -> String {
    if counter > 0 {
        format!("{program}.{logical_name}.{counter}.{extension}.gz")
    } else {
        format!("{program}.{logical_name}.{extension}.gz")
    }
}
