//! Structured call-trace logger.
//!
//! Records intercepted API calls, with their arguments and return values,
//! into a gzip-compressed XML document. Each call is bracketed by cycle
//! counter readings taken when it begins and ends.
//!
//! # Usage
//!
//! ```no_run
//! use std::fmt::Write;
//!
//! let session = calltrace::Session::new(calltrace::Config::default());
//! session.open("gl").ok();
//!
//! let mut call = session.begin_call("glBindTexture");
//! call.arg("GLenum", "target").raw("GL_TEXTURE_2D");
//! write!(call.arg("GLuint", "texture"), "{}", 1).ok();
//! call.end();
//!
//! session.close();
//! ```
//!
//! Instrumented code that cannot thread a [`Session`] through uses the
//! process-wide session behind [`open`], [`begin_call`] and [`close`],
//! configured from the environment (see [`Config::from_env`]).
//!
//! # Output
//!
//! Documents are written to `<program>.<name>[.<counter>].xml.gz`, where the
//! counter is chosen so that an existing file is never overwritten.
//! Failing to create or write the document never surfaces to the traced
//! program: the session simply stays closed, or stops writing.

use once_cell::sync::OnceCell;

mod call;
mod config;
mod error;
pub mod escape;
mod session;
mod sink;
mod tag;
pub mod tsc;

pub use call::{Call, Scope};
pub use config::{Config, ConfigError, LineEnding};
pub use error::Error;
pub use session::Session;

/// The process-wide session.
static GLOBAL: OnceCell<Session> = OnceCell::new();

/// Returns the process-wide session, configuring it from the environment
/// on first use.
pub fn global() -> &'static Session {
    GLOBAL.get_or_init(|| {
        let config = Config::from_env().unwrap_or_else(|err| {
            log::error!("calltrace: {err}, falling back to the default configuration");
            Config::default()
        });
        Session::new(config)
    })
}

/// Opens the process-wide trace document. Failures are logged, not returned.
pub fn open(name: &str) {
    report(global().open(name));
}

/// Replaces the process-wide trace document with a fresh file.
pub fn reopen() {
    report(global().reopen());
}

/// Closes the process-wide trace document.
pub fn close() {
    global().close();
}

/// Starts logging a call in the process-wide session.
pub fn begin_call(name: &str) -> Call<'static> {
    global().begin_call(name)
}

fn report(result: Result<std::path::PathBuf, Error>) {
    match result {
        Ok(_) => {}
        Err(Error::Disabled) => log::debug!("calltrace: tracing disabled"),
        Err(err) => log::error!("calltrace: unable to open trace: {err}"),
    }
}
