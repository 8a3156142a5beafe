// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-client state kept by the [`crate::registry::ClientRegistry`]: the live
//! connection handle (when connected) plus the session state that survives a
//! clean_session=false client going offline and reconnecting later.

use std::collections::{HashMap, HashSet, VecDeque};

use codec::QoS;
use tokio::sync::mpsc;

use crate::commands::OutboundMessage;
use crate::packet_id::PacketIdPool;
use crate::types::ConnId;

/// Identifies a session for the lifetime of the broker process. Sessions are keyed
/// by clientID, but the topic trie indexes subscribers by this cheap-to-copy
/// numeric handle rather than by the client's string id.
pub type SessionId = u64;

/// A `PUBLISH` a session could not yet deliver (inflight towards an active
/// subscriber, or queued because the subscriber is currently offline). Once a
/// packet id is assigned it stays fixed for the life of the QoS 1/2 handshake so
/// retransmissions reuse it.
#[derive(Debug, Clone)]
pub struct PendingPublish {
    pub pkt_id: u16,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
    pub dup: bool,
}

/// The will message recorded from a client's `CONNECT` packet, published if the
/// client's connection drops without a prior `DISCONNECT`.
#[derive(Debug, Clone)]
pub struct WillMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

/// A live connection's handle into its writer task, recorded while a session is
/// online. Dropped (replaced by `None` on the session) once the client
/// disconnects.
#[derive(Clone)]
pub struct ConnHandle {
    pub conn_id: ConnId,
    pub outbound: mpsc::Sender<OutboundMessage>,
}

/// State for one MQTT client identity. `handle` is `Some` while the client has a
/// live connection; a session with `clean_session == false` survives with
/// `handle == None` after the client disconnects, until it reconnects or is
/// explicitly deleted.
pub struct Session {
    pub id: SessionId,
    pub client_id: String,
    pub handle: Option<ConnHandle>,
    pub clean_session: bool,
    pub username: Option<String>,
    pub will: Option<WillMessage>,
    pub keep_alive: u16,
    pub maximum_inflight_messages: u16,
    /// filter -> granted QoS.
    pub subscriptions: HashMap<String, QoS>,
    pub packet_ids: PacketIdPool,
    /// Packet ids of inbound QoS 2 publishes for which a `PUBREC` was already sent
    /// and a `PUBREL` is still awaited, mapped to a retransmit count (the reference
    /// broker's `unregPubrel`). A `PUBLISH` whose id is already a key here is a
    /// duplicate; only the `PUBREC` is resent.
    pub awaiting_pubrel: HashMap<u16, u32>,
    /// Outbound QoS 1 publishes awaiting `PUBACK`.
    pub awaiting_puback: HashSet<u16>,
    /// Outbound QoS 2 publishes awaiting `PUBREC` (first half of the handshake).
    pub awaiting_pubrec: HashSet<u16>,
    /// Outbound QoS 2 publishes that received `PUBREC` and now await `PUBCOMP`
    /// (second half of the handshake; a distinct phase from `awaiting_pubrec`).
    pub awaiting_pubcomp: HashSet<u16>,
    /// Body of every outbound publish still awaiting an ack, keyed by its packet
    /// id, so a `PUBREL` retransmit or a reconnect can re-encode it. Survives
    /// disconnects of non-clean sessions.
    pub inflight_out: HashMap<u16, PendingPublish>,
    /// QoS 1/2 publishes queued while this session was offline, in arrival order.
    /// Drained (and each message assigned a packet id) as soon as the client
    /// reconnects.
    pub saved_msgs: VecDeque<PendingPublish>,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, client_id: String) -> Self {
        Self {
            id,
            client_id,
            handle: None,
            clean_session: true,
            username: None,
            will: None,
            keep_alive: 0,
            maximum_inflight_messages: 20,
            subscriptions: HashMap::new(),
            packet_ids: PacketIdPool::new(),
            awaiting_pubrel: HashMap::new(),
            awaiting_puback: HashSet::new(),
            awaiting_pubrec: HashSet::new(),
            awaiting_pubcomp: HashSet::new(),
            inflight_out: HashMap::new(),
            saved_msgs: VecDeque::new(),
        }
    }

    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.handle.is_some()
    }

    /// Discard everything a fresh, clean session must not inherit. Returns the
    /// subscription filters that were cleared, so the caller can prune them
    /// from the topic trie (the trie indexes subscribers by `SessionId`, and a
    /// clean-session reconnect reuses the same id, so the trie would otherwise
    /// go on routing to a session that just disclaimed its subscriptions).
    pub fn reset(&mut self) -> Vec<String> {
        self.will = None;
        self.username = None;
        let cleared_filters: Vec<String> = self.subscriptions.drain().map(|(filter, _)| filter).collect();
        self.packet_ids = PacketIdPool::new();
        self.awaiting_pubrel.clear();
        self.awaiting_puback.clear();
        self.awaiting_pubrec.clear();
        self.awaiting_pubcomp.clear();
        self.inflight_out.clear();
        self.saved_msgs.clear();
        cleared_filters
    }
}
