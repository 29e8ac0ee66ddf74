// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, ErrorKind};

mod listener;
mod log;
mod security;

pub use self::log::{Log, LogLevel};
pub use listener::Listener;
pub use security::{PluginConfig, Security};

/// Broker routing config.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "Listener::default_listeners")]
    listeners: Vec<Listener>,

    #[serde(default = "Security::default")]
    security: Security,

    #[serde(default = "Log::default")]
    log: Log,
}

impl Config {
    /// Parse config from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not parse or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content).map_err(|err| {
            Error::from_string(ErrorKind::ConfigError, format!("Invalid config: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Failed to read config file {:?}, err: {err}", path.as_ref()),
            )
        })?;
        Self::from_toml(&content)
    }

    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    #[must_use]
    pub const fn security(&self) -> &Security {
        &self.security
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if some options in config are invalid.
    pub fn validate(&self) -> Result<(), Error> {
        listener::validate_listeners(&self.listeners)?;
        self.security.validate()?;
        self.log.validate()
    }
}
