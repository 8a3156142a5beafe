// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic name and topic filter wire types.
//!
//! MQTT distinguishes two shapes of topic string on the wire: a *topic name*, used in
//! `CONNECT` (will topic) and `PUBLISH`, which may not contain wildcard characters; and
//! a *topic filter*, used in `SUBSCRIBE`/`UNSUBSCRIBE`, which may use `+` and `#` wildcards.
//! `PubTopic` and `SubTopic` model those two shapes as distinct wire types so that an
//! invalid wildcard cannot be encoded where a literal topic name is required.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::string_data::StringData;
use crate::{DecodePacket, EncodePacket};

/// Validate a topic name: non-empty, and free of `+`/`#` wildcard characters
/// [MQTT-4.7.1-1].
///
/// # Errors
/// Returns error if `topic` is empty or contains a wildcard character.
pub fn validate_pub_topic(topic: &str) -> Result<(), EncodeError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        Err(EncodeError::InvalidClientId)
    } else {
        Ok(())
    }
}

/// Validate a topic filter: non-empty, and any `+`/`#` wildcard must occupy a whole
/// level of the filter (`sport/+/player1`, `sport/#`, never `sport/tennis+`)
/// [MQTT-4.7.1-2/-3].
///
/// # Errors
/// Returns error if `filter` is empty or uses a wildcard incorrectly.
pub fn validate_sub_topic(filter: &str) -> Result<(), DecodeError> {
    if filter.is_empty() {
        return Err(DecodeError::EmptyTopicFilter);
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.len() > 1 && (level.contains('+') || level.contains('#')) {
            return Err(DecodeError::OtherErrors);
        }
        if *level == "#" && index != levels.len() - 1 {
            // '#' is only valid as the last level of a filter [MQTT-4.7.1-2].
            return Err(DecodeError::OtherErrors);
        }
    }
    Ok(())
}

/// A topic name, as carried in `CONNECT` (will topic) and `PUBLISH` packets. Never
/// contains wildcard characters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubTopic(StringData);

impl PubTopic {
    /// # Errors
    /// Returns error if `topic` is empty, contains a wildcard, or is not a valid MQTT
    /// UTF-8 string.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_pub_topic(topic)?;
        let data = StringData::from(topic)?;
        Ok(Self(data))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.0.bytes()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let data = StringData::decode(ba)?;
        validate_pub_topic(data.as_ref()).map_err(|_err| DecodeError::EmptyTopicFilter)?;
        Ok(Self(data))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.0.encode(buf)
    }
}

/// A topic filter, as carried in `SUBSCRIBE`/`UNSUBSCRIBE` packets. May use `+`/`#`
/// wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubTopic(StringData);

impl SubTopic {
    /// # Errors
    /// Returns error if `filter` is not a valid MQTT UTF-8 string. Wildcard-placement
    /// validation happens at decode time, matching the reference decoder.
    pub fn new(filter: &str) -> Result<Self, EncodeError> {
        let data = StringData::from(filter)?;
        Ok(Self(data))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.0.bytes()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let data = StringData::decode(ba)?;
        validate_sub_topic(data.as_ref())?;
        Ok(Self(data))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.0.encode(buf)
    }
}

/// Check whether `filter` (a topic filter, possibly with wildcards) matches `topic`
/// (a concrete topic name).
///
/// `+` matches exactly one level; `#` matches the remaining levels including
/// "zero levels". A filter whose first level is `$` (e.g. `$SYS/...`) is only matched
/// by an explicit, non-wildcard-leading filter [MQTT-4.7.2-1].
#[must_use]
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    if topic_levels.first().is_some_and(|l| l.starts_with('$'))
        && filter_levels.first().is_some_and(|l| *l != topic_levels[0])
    {
        return false;
    }

    let mut ti = 0;
    let mut fi = 0;
    while fi < filter_levels.len() {
        match filter_levels[fi] {
            "#" => return true,
            "+" => {
                if ti >= topic_levels.len() {
                    return false;
                }
                ti += 1;
                fi += 1;
            }
            level => {
                if ti >= topic_levels.len() || topic_levels[ti] != level {
                    return false;
                }
                ti += 1;
                fi += 1;
            }
        }
    }
    ti == topic_levels.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_topic_rejects_wildcards() {
        assert!(PubTopic::new("a/+/b").is_err());
        assert!(PubTopic::new("a/#").is_err());
        assert!(PubTopic::new("").is_err());
        assert!(PubTopic::new("a/b/c").is_ok());
    }

    #[test]
    fn test_sub_topic_validation() {
        assert!(validate_sub_topic("").is_err());
        assert!(validate_sub_topic("a/#").is_ok());
        assert!(validate_sub_topic("a/#/b").is_err());
        assert!(validate_sub_topic("a/b+").is_err());
        assert!(validate_sub_topic("+/tennis/#").is_ok());
    }

    #[test]
    fn test_topic_matches_filter() {
        assert!(topic_matches_filter("sport/tennis/player1", "sport/tennis/+"));
        assert!(topic_matches_filter("sport/tennis/player1/ranking", "sport/#"));
        assert!(!topic_matches_filter("sport", "sport/+"));
        assert!(topic_matches_filter("sport", "sport/#"));
        assert!(!topic_matches_filter("$SYS/uptime", "#"));
        assert!(topic_matches_filter("$SYS/uptime", "$SYS/#"));
        assert!(!topic_matches_filter("sport/tennis/player1", "sport/tennis"));
    }
}
