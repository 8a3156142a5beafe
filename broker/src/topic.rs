// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Topic index used to route `PUBLISH` packets to subscribers.
//!
//! Subscriptions are stored in a trie keyed level-by-level (rather than
//! character-by-character): each edge is either a literal level, the single-level
//! wildcard `+`, or terminates in the multi-level wildcard `#`. Routing a concrete
//! publish topic walks the trie once, descending into a literal child, the `+`
//! child, and collecting any `#` subscribers at every level along the way, which is
//! the level-granular equivalent of the reference trie's `apply_func_key`
//! (stop-and-match-one-level, used for `+`) and `apply_func`/skip-to-end recursion
//! (used for `#`).
//!
//! Retained messages are keyed by concrete topic name, not by filter, so they are
//! kept in a flat map instead of in trie nodes; matching a new subscription against
//! them reuses [`codec::topic_matches_filter`].

use std::collections::HashMap;

use codec::{topic_matches_filter, QoS};

use crate::session::SessionId;

/// A message retained against a concrete topic name, resent to future subscribers.
#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub qos: QoS,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    plus: Option<Box<TrieNode>>,
    subscribers: HashMap<SessionId, QoS>,
    multi_wildcard: HashMap<SessionId, QoS>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty()
            && self.plus.is_none()
            && self.subscribers.is_empty()
            && self.multi_wildcard.is_empty()
    }
}

/// Routes publishes to subscribers and stores retained messages.
#[derive(Default)]
pub struct TopicTrie {
    root: TrieNode,
    retained: HashMap<String, RetainedMessage>,
}

impl TopicTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription for `session_id` on topic `filter`, granted at `qos`.
    /// Replaces any existing subscription for the same session on the same filter.
    pub fn insert(&mut self, filter: &str, session_id: SessionId, qos: QoS) {
        let mut node = &mut self.root;
        let levels: Vec<&str> = filter.split('/').collect();
        for (index, level) in levels.iter().enumerate() {
            if *level == "#" {
                node.multi_wildcard.insert(session_id, qos);
                return;
            }
            if *level == "+" {
                node = node.plus.get_or_insert_with(Box::default);
            } else {
                node = node.children.entry((*level).to_owned()).or_default();
            }
            let _ = index;
        }
        node.subscribers.insert(session_id, qos);
    }

    /// Remove `session_id`'s subscription on `filter`, pruning any trie branches
    /// that become empty as a result.
    pub fn remove(&mut self, filter: &str, session_id: SessionId) {
        let levels: Vec<&str> = filter.split('/').collect();
        Self::erase(&mut self.root, &levels, session_id);
    }

    fn erase(node: &mut TrieNode, levels: &[&str], session_id: SessionId) -> bool {
        match levels.split_first() {
            None => {
                node.subscribers.remove(&session_id);
            }
            Some((&"#", _)) => {
                node.multi_wildcard.remove(&session_id);
            }
            Some((&"+", rest)) => {
                if let Some(plus) = node.plus.as_mut() {
                    if Self::erase(plus, rest, session_id) {
                        node.plus = None;
                    }
                }
            }
            Some((level, rest)) => {
                if let Some(child) = node.children.get_mut(*level) {
                    if Self::erase(child, rest, session_id) {
                        node.children.remove(*level);
                    }
                }
            }
        }
        node.is_empty()
    }

    /// Remove every subscription belonging to `session_id`, used when a session is
    /// torn down. `filters` is the set of filters the session previously
    /// subscribed to, tracked by [`crate::session::Session`].
    pub fn remove_all(&mut self, filters: impl IntoIterator<Item = String>, session_id: SessionId) {
        for filter in filters {
            self.remove(&filter, session_id);
        }
    }

    /// Collect `(session_id, granted_qos)` pairs of every subscription whose
    /// filter matches concrete `topic`.
    #[must_use]
    pub fn matching_subscribers(&self, topic: &str) -> Vec<(SessionId, QoS)> {
        let levels: Vec<&str> = topic.split('/').collect();
        let restrict_wildcards = levels.first().is_some_and(|l| l.starts_with('$'));
        let mut out = Vec::new();
        Self::collect(&self.root, &levels, restrict_wildcards, &mut out);
        out
    }

    fn collect(
        node: &TrieNode,
        levels: &[&str],
        restrict_wildcards_here: bool,
        out: &mut Vec<(SessionId, QoS)>,
    ) {
        if !restrict_wildcards_here {
            out.extend(node.multi_wildcard.iter().map(|(id, qos)| (*id, *qos)));
        }
        match levels.split_first() {
            None => out.extend(node.subscribers.iter().map(|(id, qos)| (*id, *qos))),
            Some((level, rest)) => {
                if let Some(child) = node.children.get(*level) {
                    Self::collect(child, rest, false, out);
                }
                if !restrict_wildcards_here {
                    if let Some(plus) = &node.plus {
                        Self::collect(plus, rest, false, out);
                    }
                }
            }
        }
    }

    /// Store or clear the retained message for concrete `topic`. Passing an empty
    /// `payload` clears any previously retained message for the topic.
    pub fn set_retained(&mut self, topic: &str, qos: QoS, payload: Vec<u8>) {
        if payload.is_empty() {
            self.retained.remove(topic);
        } else {
            self.retained
                .insert(topic.to_owned(), RetainedMessage { qos, payload });
        }
    }

    /// Collect every retained message whose topic matches `filter`, for sending to
    /// a client that just subscribed.
    #[must_use]
    pub fn retained_matching(&self, filter: &str) -> Vec<(String, RetainedMessage)> {
        self.retained
            .iter()
            .filter(|(topic, _)| topic_matches_filter(topic, filter))
            .map(|(topic, msg)| (topic.clone(), msg.clone()))
            .collect()
    }

    /// Number of distinct topics currently holding a retained message, reported
    /// by the periodic housekeeping tick.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::TopicTrie;
    use codec::QoS;

    #[test]
    fn exact_match() {
        let mut trie = TopicTrie::new();
        trie.insert("a/b/c", 1, QoS::AtMostOnce);
        assert_eq!(trie.matching_subscribers("a/b/c"), vec![(1, QoS::AtMostOnce)]);
        assert!(trie.matching_subscribers("a/b").is_empty());
    }

    #[test]
    fn plus_matches_one_level() {
        let mut trie = TopicTrie::new();
        trie.insert("sport/+/player1", 1, QoS::AtLeastOnce);
        assert_eq!(
            trie.matching_subscribers("sport/tennis/player1"),
            vec![(1, QoS::AtLeastOnce)]
        );
        assert!(trie.matching_subscribers("sport/tennis/bo/player1").is_empty());
    }

    #[test]
    fn hash_matches_remaining_levels_including_zero() {
        let mut trie = TopicTrie::new();
        trie.insert("sport/#", 1, QoS::ExactOnce);
        assert_eq!(trie.matching_subscribers("sport"), vec![(1, QoS::ExactOnce)]);
        assert_eq!(
            trie.matching_subscribers("sport/tennis/player1"),
            vec![(1, QoS::ExactOnce)]
        );
    }

    #[test]
    fn dollar_topics_excluded_from_wildcards() {
        let mut trie = TopicTrie::new();
        trie.insert("#", 1, QoS::AtMostOnce);
        trie.insert("+/uptime", 2, QoS::AtMostOnce);
        assert!(trie.matching_subscribers("$SYS/uptime").is_empty());
    }

    #[test]
    fn remove_prunes_empty_branches() {
        let mut trie = TopicTrie::new();
        trie.insert("a/b", 1, QoS::AtMostOnce);
        trie.remove("a/b", 1);
        assert!(trie.root.is_empty());
    }

    #[test]
    fn retained_lookup_by_filter() {
        let mut trie = TopicTrie::new();
        trie.set_retained("a/b", QoS::AtLeastOnce, vec![1, 2, 3]);
        let found = trie.retained_matching("a/+");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "a/b");
    }
}
