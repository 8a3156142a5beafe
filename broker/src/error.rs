// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;

/// Closed set of error categories this crate can raise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fixed header or remaining-length is invalid, the first packet on a
    /// connection was not CONNECT, or a frame exceeds `message_size_limit`.
    MalformedFrame,

    /// A client violated a protocol rule the codec itself cannot catch, e.g. a
    /// second CONNECT on an already-connected socket.
    ProtocolViolation,

    /// Socket read/write failure.
    TransientIo,

    /// Decoded a packet type this broker does not expect in the current state.
    UnknownPacketType,

    /// A bounded resource (packet-ID pool, inflight-message slot) was exhausted.
    ResourceExhausted,

    /// Underlying I/O error unrelated to a specific connection (binding, files).
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Config file is malformed or fails validation.
    ConfigError,

    /// Logger backend failed to initialize.
    LoggerError,

    /// Internal mpsc channel send failed (receiver dropped).
    ChannelError,

    /// Lookup by clientID or connection ID found nothing.
    SessionNotFound,
}

/// The single error type used across this crate.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<(ErrorKind, &str)> for Error {
    fn from((kind, message): (ErrorKind, &str)) -> Self {
        Self::new(kind, message)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IO error: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::from_string(ErrorKind::ConfigError, format!("Invalid config file: {err}"))
    }
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(err: mpsc::error::SendError<T>) -> Self {
        Self::from_string(ErrorKind::ChannelError, format!("channel send error: {err}"))
    }
}
