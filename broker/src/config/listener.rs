// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::net::{TcpListener, ToSocketAddrs};

use crate::error::{Error, ErrorKind};

/// Binding protocol. Only `mqtt` (raw TCP) is accepted by the core; any other
/// value is a config validation error since TLS/WebSocket/QUIC are out of scope.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    #[serde(alias = "mqtt")]
    Mqtt,

    #[serde(alias = "mqtts")]
    Mqtts,

    #[serde(alias = "ws")]
    Ws,

    #[serde(alias = "wss")]
    Wss,

    #[serde(alias = "quic")]
    Quic,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Self::Mqtt => "mqtt",
            Self::Mqtts => "mqtts",
            Self::Ws => "ws",
            Self::Wss => "wss",
            Self::Quic => "quic",
        };
        write!(f, "{s}")
    }
}

/// A `[[listeners]]` entry: an address to bind and the connection-engine settings
/// applied to clients accepted on it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Listener {
    /// Binding protocol. Default is mqtt; anything else fails `validate()`.
    #[serde(default = "Listener::default_protocol")]
    protocol: Protocol,

    /// Binding address, including host/IP and port.
    ///
    /// Default is 0.0.0.0:1883.
    #[serde(default = "Listener::default_address")]
    address: String,

    /// The maximum number of client connections to this listener allowed.
    ///
    /// Default is 0, which means unlimited connections.
    #[serde(default = "Listener::default_maximum_connections")]
    maximum_connections: usize,

    /// Set to true to replace the clientID a client connects with by its username.
    ///
    /// Default is false.
    #[serde(default = "Listener::default_username_as_client_id")]
    username_as_client_id: bool,

    /// Connection keep-alive timeout in seconds, used when the client's CONNECT
    /// requests keep_alive=0.
    ///
    /// Default is 60.
    #[serde(default = "Listener::default_keep_alive")]
    keep_alive: u16,

    /// Timeout in seconds before receiving the first CONNECT packet from a client.
    ///
    /// Default is 60.
    #[serde(default = "Listener::default_connect_timeout")]
    connect_timeout: u16,

    /// Whether an empty clientID with cleanSession=1 is assigned a broker-generated
    /// random clientID rather than rejected.
    ///
    /// Default is true.
    #[serde(default = "Listener::default_allow_empty_client_id")]
    allow_empty_client_id: bool,

    /// The maximum number of QoS 1 and 2 messages currently inflight (awaiting ack
    /// or retransmission) per client.
    ///
    /// Default is 20.
    #[serde(default = "Listener::default_maximum_inflight_messages")]
    maximum_inflight_messages: u16,
}

impl Listener {
    #[must_use]
    pub fn default_listeners() -> Vec<Self> {
        vec![Self::default()]
    }

    #[must_use]
    pub const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    #[must_use]
    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    #[must_use]
    pub const fn default_maximum_connections() -> usize {
        0
    }

    #[must_use]
    pub const fn default_username_as_client_id() -> bool {
        false
    }

    #[must_use]
    pub const fn default_keep_alive() -> u16 {
        60
    }

    #[must_use]
    pub const fn default_connect_timeout() -> u16 {
        60
    }

    #[must_use]
    pub const fn default_allow_empty_client_id() -> bool {
        true
    }

    #[must_use]
    pub const fn default_maximum_inflight_messages() -> u16 {
        20
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub const fn maximum_connections(&self) -> usize {
        self.maximum_connections
    }

    #[must_use]
    pub const fn username_as_client_id(&self) -> bool {
        self.username_as_client_id
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> u16 {
        self.connect_timeout
    }

    #[must_use]
    pub const fn allow_empty_client_id(&self) -> bool {
        self.allow_empty_client_id
    }

    #[must_use]
    pub const fn maximum_inflight_messages(&self) -> u16 {
        self.maximum_inflight_messages
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if `protocol` is not `mqtt`, or the socket address is invalid
    /// or (when `bind_address` is set) already in use.
    pub fn validate(&self, bind_address: bool) -> Result<(), Error> {
        if self.protocol != Protocol::Mqtt {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!(
                    "listener protocol '{}' is not supported, only 'mqtt' is",
                    self.protocol
                ),
            ));
        }

        if bind_address {
            let _socket = TcpListener::bind(&self.address).map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!(
                        "Failed to bind to address {} for listener, err: {:?}",
                        &self.address, err
                    ),
                )
            })?;
        } else {
            let _addr = self.address.to_socket_addrs().map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!("Invalid socket address: {}, err: {:?}", &self.address, err),
                )
            })?;
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            protocol: Self::default_protocol(),
            address: Self::default_address(),
            maximum_connections: Self::default_maximum_connections(),
            username_as_client_id: Self::default_username_as_client_id(),
            keep_alive: Self::default_keep_alive(),
            connect_timeout: Self::default_connect_timeout(),
            allow_empty_client_id: Self::default_allow_empty_client_id(),
            maximum_inflight_messages: Self::default_maximum_inflight_messages(),
        }
    }
}
