use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Line terminator written after each line of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    CrLf,
    Lf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::CrLf => "\r\n",
            LineEnding::Lf => "\n",
        }
    }
}

/// Configures where and how trace documents are written.
///
/// Fields missing from the JSON form take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory the trace file is created in. Defaults to the working directory.
    pub output_dir: Option<PathBuf>,

    /// Base name of the trace file. Defaults to the executable's file stem.
    pub program: Option<String>,

    /// Document extension, placed before the `.gz` container extension.
    pub extension: String,

    /// Stylesheet referenced from the document prologue, if any.
    pub stylesheet: Option<String>,

    /// gzip compression level, 0-9.
    pub compression: u32,

    pub line_ending: LineEnding,

    /// Sync-flush the compressor after every call, so a crash loses at most
    /// the call in progress.
    pub flush_each_call: bool,

    /// Turns every session operation into a no-op.
    pub disabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: None,
            program: None,
            extension: "xml".to_string(),
            stylesheet: Some("apitrace.xsl".to_string()),
            compression: 6,
            line_ending: LineEnding::CrLf,
            flush_each_call: false,
            disabled: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read environment variable {0}: {1}")]
    EnvVar(&'static str, #[source] env::VarError),

    #[error("invalid CALLTRACE_CONFIG: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CALLTRACE_COMPRESSION {0:?}: expected 0-9")]
    Compression(String),
}

impl Config {
    /// Reads the configuration from the environment.
    ///
    /// `CALLTRACE_CONFIG` may hold the whole configuration as a JSON object.
    /// The following variables then override individual fields:
    /// - `CALLTRACE_DIR`: output directory
    /// - `CALLTRACE_COMPRESSION`: gzip level
    /// - `CALLTRACE_NOLOG`: any non-empty value disables tracing
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = match read_var("CALLTRACE_CONFIG")? {
            Some(json) => serde_json::from_str(&json)?,
            None => Config::default(),
        };

        if let Some(dir) = read_var("CALLTRACE_DIR")? {
            cfg.output_dir = Some(PathBuf::from(dir));
        }

        if let Some(level) = read_var("CALLTRACE_COMPRESSION")? {
            cfg.compression = match level.parse::<u32>() {
                Ok(n) if n <= 9 => n,
                _ => return Err(ConfigError::Compression(level)),
            };
        }

        if read_var("CALLTRACE_NOLOG")?.is_some_and(|v| !v.is_empty()) {
            cfg.disabled = true;
        }

        Ok(cfg)
    }
}

fn read_var(name: &'static str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::EnvVar(name, e)),
    }
}
