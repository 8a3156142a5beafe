// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArrayError;
use crate::utils::StringError;
use crate::var_int::VarIntError;

/// Errors raised while parsing a packet out of a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Reserved bits in the fixed header do not match what the packet type requires.
    InvalidPacketFlags,

    /// Packet type nibble is not one of the 14 known MQTT v3.1.1 types.
    InvalidPacketType,

    /// Reserved QoS bits are non-zero, or QoS is not 0, 1 or 2.
    InvalidQoS,

    /// Variable-length integer uses more than 4 bytes, or buffer is exhausted while decoding it.
    InvalidVarInt,

    /// A boolean wire byte was neither 0x00 nor 0x01.
    InvalidBoolData,

    /// `CONNECT` flags are malformed, e.g. reserved bit set, or password without username.
    InvalidConnectFlags,

    /// Protocol level byte is not 3, 4 or 5.
    InvalidProtocolLevel,

    /// Protocol name is not "MQTT".
    InvalidProtocolName,

    /// Client identifier is rejected by server-side validation.
    InvalidClientId,

    /// A packet requiring a non-zero packet identifier got a zero one [MQTT-2.3.1-1].
    InvalidPacketId,

    /// `SUBSCRIBE`/`UNSUBSCRIBE` packet carries no topic filters [MQTT-3.8.3-3].
    EmptyTopicFilter,

    /// Remaining length does not match the bytes actually present in the packet body.
    InvalidRemainingLength,

    /// Catch-all for invariants enforced outside of a specific field, e.g. keep alive range.
    OtherErrors,
}

impl From<ByteArrayError> for DecodeError {
    fn from(err: ByteArrayError) -> Self {
        match err {
            ByteArrayError::OutOfRangeError => Self::InvalidRemainingLength,
            ByteArrayError::InvalidString(_) => Self::OtherErrors,
        }
    }
}

impl From<VarIntError> for DecodeError {
    fn from(_err: VarIntError) -> Self {
        Self::InvalidVarInt
    }
}

impl From<StringError> for DecodeError {
    fn from(_err: StringError) -> Self {
        Self::OtherErrors
    }
}

/// Errors raised while serializing a packet into a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Remaining length overflowed the 4-byte variable length integer limit.
    InvalidVarInt,

    /// An invalid combination of packet fields was requested, e.g. `dup=true` with `QoS::AtMostOnce`.
    InvalidPacketType,

    /// Client identifier does not satisfy UTF-8 string requirements.
    InvalidClientId,

    /// Underlying I/O error while writing to the output buffer.
    IoError,
}

impl From<std::io::Error> for EncodeError {
    fn from(_err: std::io::Error) -> Self {
        Self::IoError
    }
}

impl From<StringError> for EncodeError {
    fn from(_err: StringError) -> Self {
        Self::InvalidClientId
    }
}

impl From<VarIntError> for EncodeError {
    fn from(_err: VarIntError) -> Self {
        Self::InvalidVarInt
    }
}
