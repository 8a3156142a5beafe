// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

use crate::error::Error;

mod general;
mod listener;
mod log;

pub use self::log::{Log, LogLevel};
pub use general::General;
pub use listener::{Listener, Protocol};

/// Broker main config, deserialized from a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "General::default")]
    general: General,

    #[serde(default = "Listener::default_listeners")]
    listeners: Vec<Listener>,

    #[serde(default = "Log::default")]
    log: Log,
}

impl Config {
    #[must_use]
    pub const fn general(&self) -> &General {
        &self.general
    }

    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }

    /// Parse config from a TOML string.
    ///
    /// # Errors
    /// Returns error if `content` is not valid TOML or does not match the config
    /// schema.
    pub fn from_str(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Validate config.
    ///
    /// `bind_address` controls whether listener addresses are actually bound (to
    /// detect a port already in use) or merely parsed.
    ///
    /// # Errors
    ///
    /// Returns error if some option in config is invalid.
    pub fn validate(&self, bind_address: bool) -> Result<(), Error> {
        self.general.validate()?;

        for listener in &self.listeners {
            listener.validate(bind_address)?;
        }

        self.log.validate()
    }
}
