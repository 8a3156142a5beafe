// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// `[general]` section in config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct General {
    /// Time interval to log broker-wide counters, in seconds.
    ///
    /// Set to 0 to disable the periodic housekeeping tick.
    ///
    /// Default is 60s.
    #[serde(default = "General::default_sys_interval")]
    sys_interval: u32,

    /// Disable Nagle's algorithm on client sockets.
    ///
    /// Default is false.
    #[serde(default = "General::default_no_delay")]
    no_delay: bool,

    /// Maximum size, in bytes, of a single incoming frame (fixed header's remaining
    /// length). Frames larger than this are rejected as malformed, not truncated.
    ///
    /// Default value is 64KiB.
    #[serde(default = "General::default_message_size_limit")]
    message_size_limit: u32,

    /// Clients may only connect with a keep-alive value less than or equal to this
    /// bound, in seconds.
    ///
    /// Default value is 65535.
    #[serde(default = "General::default_maximum_keep_alive")]
    maximum_keep_alive: u32,

    /// Maximum QoS level the broker accepts from publishing clients.
    /// Available values are 0, 1 and 2.
    ///
    /// Default is 2.
    #[serde(default = "General::default_maximum_qos")]
    maximum_qos: u8,

    /// Maximum size, in bytes, of a fully assembled MQTT packet (header + payload).
    /// Setting below 20 bytes is rejected because it would interfere with ordinary
    /// client operation.
    ///
    /// Default is 0, which means no additional limit beyond `message_size_limit`.
    #[serde(default = "General::default_maximum_packet_size")]
    maximum_packet_size: u32,
}

impl General {
    #[must_use]
    pub const fn default_sys_interval() -> u32 {
        60
    }

    #[must_use]
    pub const fn default_no_delay() -> bool {
        false
    }

    #[must_use]
    pub const fn default_message_size_limit() -> u32 {
        64 * 1024
    }

    #[must_use]
    pub const fn default_maximum_qos() -> u8 {
        2
    }

    #[must_use]
    pub const fn default_maximum_keep_alive() -> u32 {
        65535
    }

    #[must_use]
    pub const fn default_maximum_packet_size() -> u32 {
        0
    }

    #[must_use]
    pub const fn sys_interval_secs(&self) -> u32 {
        self.sys_interval
    }

    #[must_use]
    pub const fn no_delay(&self) -> bool {
        self.no_delay
    }

    #[must_use]
    pub const fn message_size_limit(&self) -> u32 {
        self.message_size_limit
    }

    #[must_use]
    pub const fn maximum_keep_alive(&self) -> u32 {
        self.maximum_keep_alive
    }

    #[must_use]
    pub const fn maximum_qos(&self) -> u8 {
        self.maximum_qos
    }

    #[must_use]
    pub const fn maximum_packet_size(&self) -> u32 {
        self.maximum_packet_size
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if `maximum_qos` is out of range, or `maximum_packet_size` is
    /// set below the minimum useful size.
    pub fn validate(&self) -> Result<(), Error> {
        if self.maximum_qos > 2 {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("general.maximum_qos must be 0, 1 or 2, got {}", self.maximum_qos),
            ));
        }
        if self.maximum_packet_size != 0 && self.maximum_packet_size < 20 {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                "general.maximum_packet_size must be 0 or >= 20",
            ));
        }
        Ok(())
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            sys_interval: Self::default_sys_interval(),
            no_delay: Self::default_no_delay(),
            message_size_limit: Self::default_message_size_limit(),
            maximum_qos: Self::default_maximum_qos(),
            maximum_keep_alive: Self::default_maximum_keep_alive(),
            maximum_packet_size: Self::default_maximum_packet_size(),
        }
    }
}
