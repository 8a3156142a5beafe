// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::string::FromUtf8Error;

use crate::DecodeError;

/// Errors raised while validating string-shaped wire data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length of string/binary data exceeds the 2-byte length prefix (65535 bytes).
    TooManyData,

    /// String length does not fall within the required bounds.
    InvalidLength,

    /// String contains characters forbidden by the MQTT UTF-8 string rules.
    InvalidChar,

    /// Bytes are not valid UTF-8.
    SeriousError,

    /// Random client-id generation produced an invalid string (should not happen).
    InvalidRandomString,
}

impl From<FromUtf8Error> for StringError {
    fn from(_err: FromUtf8Error) -> Self {
        Self::SeriousError
    }
}

/// Generate a random alphanumeric client identifier of `len` characters.
///
/// # Errors
/// Returns error if `len` is zero.
pub fn random_string(len: usize) -> Result<String, StringError> {
    if len == 0 {
        return Err(StringError::InvalidLength);
    }
    Ok(thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect())
}

/// Generate a broker-assigned client identifier, used when a client connects with
/// a zero-length `ClientId` and the listener allows it [MQTT-3.1.3-6].
#[must_use]
pub fn random_client_id() -> String {
    random_string(23).unwrap_or_else(|_| "hebo-generated-client".to_string())
}

/// Validate that `len` bytes of binary/string data fit in the 2-byte length prefix
/// used throughout the MQTT wire format.
///
/// # Errors
/// Returns error if `data` is longer than `u16::MAX` bytes.
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > usize::from(u16::MAX) {
        Err(StringError::TooManyData)
    } else {
        Ok(())
    }
}

/// Validate a string against the MQTT UTF-8 string rules [MQTT-1.5.4-1/-2/-3]:
/// it must not contain the null character, nor most control characters.
///
/// # Errors
/// Returns error if `s` contains forbidden characters, or is too long to fit
/// the 2-byte length prefix.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    validate_two_bytes_data(s.as_bytes())?;
    for c in s.chars() {
        match c {
            '\u{0000}' => return Err(StringError::SeriousError),
            '\u{0001}'..='\u{001f}' | '\u{007f}'..='\u{009f}' => {
                return Err(StringError::InvalidChar)
            }
            _ => (),
        }
    }
    Ok(())
}

/// Decode a byte slice into an owned UTF-8 `String`.
///
/// # Errors
/// Returns error if `buf` is not valid UTF-8.
pub fn to_utf8_string(buf: &[u8]) -> Result<String, StringError> {
    String::from_utf8(buf.to_vec()).map_err(StringError::from)
}

/// Validate a client identifier supplied in a `CONNECT` packet.
///
/// The MQTT v3.1.1 spec allows servers to reject identifiers longer than 23 characters,
/// or containing characters outside `[0-9a-zA-Z]` [MQTT-3.1.3-5]. This broker is
/// deliberately more permissive: it accepts any identifier that is a well-formed MQTT
/// UTF-8 string, including ones longer than 23 characters, since rejecting otherwise
/// valid identifiers is a compliance choice rather than a protocol requirement.
///
/// # Errors
/// Returns error if `id` is not a valid MQTT UTF-8 string.
pub fn validate_client_id(id: &str) -> Result<(), DecodeError> {
    validate_utf8_string(id).map_err(|_err| DecodeError::InvalidClientId)
}

/// Check `keep_alive` is in range.
///
/// # Errors
///
/// Returns error if `keep_alive` is non-zero but smaller than the minimum usable interval.
pub const fn validate_keep_alive(keep_alive: u16) -> Result<(), DecodeError> {
    if keep_alive != 0 && keep_alive < 5 {
        Err(DecodeError::OtherErrors)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("hello/world").is_ok());
        assert!(validate_utf8_string("hello\u{0000}world").is_err());
        assert!(validate_utf8_string("hello\u{0001}world").is_err());
    }

    #[test]
    fn test_validate_client_id_accepts_long_ids() {
        let long_id = "a".repeat(40);
        assert!(validate_client_id(&long_id).is_ok());
    }

    #[test]
    fn test_validate_keep_alive() {
        assert!(validate_keep_alive(0).is_ok());
        assert!(validate_keep_alive(60).is_ok());
        assert!(validate_keep_alive(3).is_err());
    }
}
