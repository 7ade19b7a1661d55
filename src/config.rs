//! Environment-driven configuration of the resolver binary.
use std::ffi::OsString;
use std::path::PathBuf;

use crate::resolver::DEFAULT_STREAM_CAPACITY;

pub const CONTAINERS_FILE_VAR: &str = "GADGET_CONTAINERS_FILE";
pub const EVENT_BUFFER_VAR: &str = "GADGET_EVENT_BUFFER";
pub const TRACER_ID_VAR: &str = "GADGET_TRACER_ID";

const DEFAULT_TRACER_ID: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("environment variable `{name}` is not valid unicode")]
    NotUnicode { name: &'static str },
    #[error("invalid value `{value}` for `{name}`: {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("`{name}` must be greater than zero")]
    Zero { name: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// JSON array of container definitions loaded at startup.
    pub containers_file: Option<PathBuf>,
    /// Capacity of each tracer event stream.
    pub event_buffer: usize,
    /// Tracer whose event stream the binary opens and logs.
    pub tracer_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            containers_file: None,
            event_buffer: DEFAULT_STREAM_CAPACITY,
            tracer_id: DEFAULT_TRACER_ID.to_owned(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = lookup(CONTAINERS_FILE_VAR).filter(|v| !v.is_empty()) {
            config.containers_file = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup(EVENT_BUFFER_VAR) {
            let raw = raw.into_string().map_err(|_| Error::NotUnicode {
                name: EVENT_BUFFER_VAR,
            })?;
            let value = raw
                .trim()
                .parse::<usize>()
                .map_err(|source| Error::InvalidNumber {
                    name: EVENT_BUFFER_VAR,
                    value: raw.clone(),
                    source,
                })?;
            if value == 0 {
                return Err(Error::Zero {
                    name: EVENT_BUFFER_VAR,
                });
            }
            config.event_buffer = value;
        }

        if let Some(raw) = lookup(TRACER_ID_VAR) {
            let tracer_id = raw.into_string().map_err(|_| Error::NotUnicode {
                name: TRACER_ID_VAR,
            })?;
            if !tracer_id.is_empty() {
                config.tracer_id = tracer_id;
            }
        }

        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}
