// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `PUBLISH` routing and the QoS 1/2 acknowledgement handshakes, both inbound
//! (from the publishing client) and outbound (towards each subscriber).

use codec::{
    ByteArray, DecodePacket, PacketId, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS,
};

use crate::commands::OutboundMessage;
use crate::registry::DeleteMode;
use crate::session::{PendingPublish, SessionId};
use crate::types::ConnId;

use super::{encode_packet, Dispatcher};

impl Dispatcher {
    pub(super) async fn handle_publish(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = ByteArray::new(frame);
        let packet = match PublishPacket::decode(&mut ba) {
            Ok(packet) => packet,
            Err(_) => {
                self.force_close(conn_id, DeleteMode::Full).await;
                return;
            }
        };

        if packet.qos() as u8 > self.general.maximum_qos() {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        }

        let Some(client_id) = self.registry.client_id_for_conn(conn_id) else {
            return;
        };
        let pkt_id = packet.packet_id().value();

        if packet.qos() == QoS::ExactOnce {
            let is_duplicate = self
                .registry
                .session_mut(&client_id)
                .is_some_and(|session| session.awaiting_pubrel.contains_key(&pkt_id));
            if is_duplicate {
                if let Some(session) = self.registry.session_mut(&client_id) {
                    *session.awaiting_pubrel.entry(pkt_id).or_insert(0) += 1;
                }
                self.send_publish_received(conn_id, pkt_id).await;
                return;
            }
        }

        self.route_publish(packet.topic(), packet.qos(), packet.retain(), packet.message())
            .await;

        match packet.qos() {
            QoS::AtMostOnce => {}
            QoS::AtLeastOnce => self.send_publish_ack(conn_id, pkt_id).await,
            QoS::ExactOnce => {
                if let Some(session) = self.registry.session_mut(&client_id) {
                    session.awaiting_pubrel.insert(pkt_id, 0);
                }
                self.send_publish_received(conn_id, pkt_id).await;
            }
        }
    }

    pub(super) async fn handle_puback(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = ByteArray::new(frame);
        let Ok(packet) = PublishAckPacket::decode(&mut ba) else {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        };
        let pkt_id = packet.packet_id().value();
        if let Some(client_id) = self.registry.client_id_for_conn(conn_id) {
            let session_id = self.registry.session_mut(&client_id).map(|session| {
                session.awaiting_puback.remove(&pkt_id);
                session.inflight_out.remove(&pkt_id);
                session.packet_ids.release(pkt_id);
                session.id
            });
            // Freeing an inflight slot may let a queued `saved_msgs` entry flow.
            if let Some(session_id) = session_id {
                self.drain_saved_messages(session_id).await;
            }
        }
    }

    pub(super) async fn handle_pubrec(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = ByteArray::new(frame);
        let Ok(packet) = PublishReceivedPacket::decode(&mut ba) else {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        };
        let pkt_id = packet.packet_id().value();
        let should_reply = if let Some(client_id) = self.registry.client_id_for_conn(conn_id) {
            self.registry.session_mut(&client_id).is_some_and(|session| {
                if session.awaiting_pubrec.remove(&pkt_id) {
                    session.awaiting_pubcomp.insert(pkt_id);
                    true
                } else {
                    false
                }
            })
        } else {
            false
        };
        if should_reply {
            self.send_publish_release(conn_id, pkt_id).await;
        }
    }

    pub(super) async fn handle_pubrel(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = ByteArray::new(frame);
        let Ok(packet) = PublishReleasePacket::decode(&mut ba) else {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        };
        let pkt_id = packet.packet_id().value();
        let removed = if let Some(client_id) = self.registry.client_id_for_conn(conn_id) {
            self.registry
                .session_mut(&client_id)
                .is_some_and(|session| session.awaiting_pubrel.remove(&pkt_id).is_some())
        } else {
            false
        };
        if removed {
            self.send_publish_complete(conn_id, pkt_id).await;
        }
    }

    pub(super) async fn handle_pubcomp(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = ByteArray::new(frame);
        let Ok(packet) = PublishCompletePacket::decode(&mut ba) else {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        };
        let pkt_id = packet.packet_id().value();
        if let Some(client_id) = self.registry.client_id_for_conn(conn_id) {
            let session_id = self.registry.session_mut(&client_id).map(|session| {
                session.awaiting_pubcomp.remove(&pkt_id);
                session.awaiting_pubrec.remove(&pkt_id);
                session.inflight_out.remove(&pkt_id);
                session.packet_ids.release(pkt_id);
                session.id
            });
            // Freeing an inflight slot may let a queued `saved_msgs` entry flow.
            if let Some(session_id) = session_id {
                self.drain_saved_messages(session_id).await;
            }
        }
    }

    async fn send_publish_ack(&mut self, conn_id: ConnId, pkt_id: u16) {
        let ack = PublishAckPacket::new(PacketId::new(pkt_id));
        self.send_to_conn(conn_id, &ack).await;
    }

    async fn send_publish_received(&mut self, conn_id: ConnId, pkt_id: u16) {
        let ack = PublishReceivedPacket::new(PacketId::new(pkt_id));
        self.send_to_conn(conn_id, &ack).await;
    }

    async fn send_publish_release(&mut self, conn_id: ConnId, pkt_id: u16) {
        let rel = PublishReleasePacket::new(PacketId::new(pkt_id));
        self.send_to_conn(conn_id, &rel).await;
    }

    async fn send_publish_complete(&mut self, conn_id: ConnId, pkt_id: u16) {
        let comp = PublishCompletePacket::new(PacketId::new(pkt_id));
        self.send_to_conn(conn_id, &comp).await;
    }

    /// Store (if retained) and fan a publish out to every matching subscriber.
    pub(super) async fn route_publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) {
        if retain {
            self.trie.set_retained(topic, qos, payload.to_vec());
        }

        let subscribers = self.trie.matching_subscribers(topic);
        for (session_id, max_qos) in subscribers {
            let effective_qos = qos.min(max_qos);
            self.deliver_to_session(session_id, topic, effective_qos, payload, false).await;
        }
    }

    /// Deliver one publish to a single subscriber, handling the inflight-bound
    /// spillover to `saved_msgs` when the subscriber is offline or already at
    /// `maximum_inflight_messages`.
    pub(super) async fn deliver_to_session(
        &mut self,
        session_id: SessionId,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
    ) {
        let send_target = {
            let Some(session) = self.registry.session_by_id_mut(session_id) else {
                return;
            };
            let online = session.is_online();
            let inflight = session.awaiting_puback.len() + session.awaiting_pubrec.len() + session.awaiting_pubcomp.len();
            let within_bound = inflight < usize::from(session.maximum_inflight_messages);

            if qos == QoS::AtMostOnce {
                if online && within_bound {
                    session.handle.clone().map(|handle| (handle, 0_u16))
                } else {
                    None
                }
            } else if online && within_bound {
                match session.packet_ids.allocate() {
                    Some(pkt_id) => {
                        match qos {
                            QoS::AtLeastOnce => {
                                session.awaiting_puback.insert(pkt_id);
                            }
                            QoS::ExactOnce => {
                                session.awaiting_pubrec.insert(pkt_id);
                            }
                            QoS::AtMostOnce => unreachable!(),
                        }
                        session.inflight_out.insert(
                            pkt_id,
                            PendingPublish {
                                pkt_id,
                                topic: topic.to_owned(),
                                qos,
                                retain,
                                payload: payload.to_vec(),
                                dup: false,
                            },
                        );
                        session.handle.clone().map(|handle| (handle, pkt_id))
                    }
                    None => {
                        log::warn!("packet id pool exhausted for session {session_id}");
                        None
                    }
                }
            } else {
                session.saved_msgs.push_back(PendingPublish {
                    pkt_id: 0,
                    topic: topic.to_owned(),
                    qos,
                    retain,
                    payload: payload.to_vec(),
                    dup: false,
                });
                None
            }
        };

        let Some((handle, pkt_id)) = send_target else {
            return;
        };
        let Ok(mut packet) = PublishPacket::new(topic, qos, payload) else {
            return;
        };
        packet.set_retain(retain);
        if qos != QoS::AtMostOnce {
            packet.set_packet_id(PacketId::new(pkt_id));
        }
        if let Ok(bytes) = encode_packet(&packet) {
            self.stats.packets_out += 1;
            let _ = handle.outbound.send(crate::commands::OutboundMessage::Packet(bytes)).await;
        }
    }

    /// Drain `session_id`'s `saved_msgs`, one at a time, for as long as the
    /// session is online and under `maximum_inflight_messages`. Called both
    /// right after a reconnect and whenever `handle_puback`/`handle_pubcomp`
    /// frees an inflight slot, so a client parked at the inflight bound keeps
    /// flowing once it starts acking rather than only on its next reconnect.
    pub(super) async fn drain_saved_messages(&mut self, session_id: SessionId) {
        loop {
            let next = {
                let Some(session) = self.registry.session_by_id_mut(session_id) else {
                    return;
                };
                let Some(handle) = session.handle.clone() else {
                    return;
                };
                let inflight =
                    session.awaiting_puback.len() + session.awaiting_pubrec.len() + session.awaiting_pubcomp.len();
                if inflight >= usize::from(session.maximum_inflight_messages) {
                    return;
                }
                let Some(mut pending) = session.saved_msgs.pop_front() else {
                    return;
                };
                if pending.qos != QoS::AtMostOnce {
                    match session.packet_ids.allocate() {
                        Some(pkt_id) => {
                            pending.pkt_id = pkt_id;
                            match pending.qos {
                                QoS::AtLeastOnce => {
                                    session.awaiting_puback.insert(pkt_id);
                                }
                                QoS::ExactOnce => {
                                    session.awaiting_pubrec.insert(pkt_id);
                                }
                                QoS::AtMostOnce => unreachable!(),
                            }
                            session.inflight_out.insert(pkt_id, pending.clone());
                        }
                        None => {
                            log::warn!("packet id pool exhausted draining saved messages for session {session_id}");
                            session.saved_msgs.push_front(pending);
                            return;
                        }
                    }
                }
                (handle, pending)
            };

            let (handle, pending) = next;
            if let Some(bytes) = encode_pending_publish(&pending) {
                self.stats.packets_out += 1;
                let _ = handle.outbound.send(OutboundMessage::Packet(bytes)).await;
            }
        }
    }

    /// Re-send every publish still recorded in `inflight_out` with `dup` set,
    /// the other half of `inflight_out`'s documented purpose: a non-clean
    /// session that reconnects gets its unacknowledged QoS 1/2 publishes
    /// retransmitted, rather than only its queued `saved_msgs`.
    pub(super) async fn redeliver_inflight(&mut self, session_id: SessionId) {
        let to_send = {
            let Some(session) = self.registry.session_by_id_mut(session_id) else {
                return;
            };
            let Some(handle) = session.handle.clone() else {
                return;
            };
            let mut pkt_ids: Vec<u16> = session.inflight_out.keys().copied().collect();
            pkt_ids.sort_unstable();
            let pending_list: Vec<PendingPublish> = pkt_ids
                .into_iter()
                .filter_map(|pkt_id| {
                    let pending = session.inflight_out.get_mut(&pkt_id)?;
                    pending.dup = true;
                    Some(pending.clone())
                })
                .collect();
            (handle, pending_list)
        };

        let (handle, pending_list) = to_send;
        for pending in pending_list {
            if let Some(bytes) = encode_pending_publish(&pending) {
                self.stats.packets_out += 1;
                let _ = handle.outbound.send(OutboundMessage::Packet(bytes)).await;
            }
        }
    }
}

/// Encode a `PendingPublish` as a wire `PublishPacket`, restoring its `dup`
/// flag (set when this is a reconnect retransmission rather than a first
/// send out of `saved_msgs`).
fn encode_pending_publish(pending: &PendingPublish) -> Option<Vec<u8>> {
    let mut packet = PublishPacket::new(&pending.topic, pending.qos, &pending.payload).ok()?;
    packet.set_retain(pending.retain);
    if pending.qos != QoS::AtMostOnce {
        packet.set_packet_id(PacketId::new(pending.pkt_id));
        if pending.dup {
            packet.set_dup(true).ok()?;
        }
    }
    encode_packet(&packet).ok()
}
