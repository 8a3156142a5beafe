// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `SUBSCRIBE`/`UNSUBSCRIBE` handling: trie bookkeeping and retained-message
//! delivery on new subscriptions.

use codec::{ByteArray, DecodePacket, SubscribeAck, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket, UnsubscribePacket};

use crate::registry::DeleteMode;
use crate::types::ConnId;

use super::Dispatcher;

impl Dispatcher {
    pub(super) async fn handle_subscribe(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = ByteArray::new(frame);
        let Ok(packet) = SubscribePacket::decode(&mut ba) else {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        };
        let Some(client_id) = self.registry.client_id_for_conn(conn_id) else {
            return;
        };
        let Some(session_id) = self.registry.session(&client_id).map(|session| session.id) else {
            return;
        };

        let mut acks = Vec::with_capacity(packet.topics().len());
        let mut retained_deliveries = Vec::new();
        for sub in packet.topics() {
            self.trie.insert(sub.topic(), session_id, sub.qos());
            if let Some(session) = self.registry.session_mut(&client_id) {
                session.subscriptions.insert(sub.topic().to_owned(), sub.qos());
            }
            for (topic, retained) in self.trie.retained_matching(sub.topic()) {
                let qos = retained.qos.min(sub.qos());
                retained_deliveries.push((topic, qos, retained.payload));
            }
            acks.push(SubscribeAck::QoS(sub.qos()));
        }

        let ack = SubscribeAckPacket::with_vec(packet.packet_id(), acks);
        self.send_to_conn(conn_id, &ack).await;

        // Retained messages are resent with retain=1, since they're the result
        // of a new subscription rather than a fresh publish [MQTT-3.3.1-8].
        for (topic, qos, payload) in retained_deliveries {
            self.deliver_to_session(session_id, &topic, qos, &payload, true).await;
        }
    }

    pub(super) async fn handle_unsubscribe(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = ByteArray::new(frame);
        let Ok(packet) = UnsubscribePacket::decode(&mut ba) else {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        };
        let Some(client_id) = self.registry.client_id_for_conn(conn_id) else {
            return;
        };
        let Some(session_id) = self.registry.session(&client_id).map(|session| session.id) else {
            return;
        };

        for topic in packet.topics() {
            self.trie.remove(topic.as_ref(), session_id);
            if let Some(session) = self.registry.session_mut(&client_id) {
                session.subscriptions.remove(topic.as_ref());
            }
        }

        let ack = UnsubscribeAckPacket::new(packet.packet_id());
        self.send_to_conn(conn_id, &ack).await;
    }
}
