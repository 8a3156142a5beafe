// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The single dispatcher task: the only place that ever mutates the
//! [`crate::registry::ClientRegistry`] or the [`crate::topic::TopicTrie`]. Every
//! connection task only ever talks to this one via the bounded `InboundEvent`
//! queue, so routing never needs a lock.

mod connect;
mod publish;
mod subscribe;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use codec::EncodePacket;
use tokio::sync::mpsc;

use crate::commands::{InboundEvent, OutboundMessage};
use crate::config::General;
use crate::error::Error;
use crate::hooks::Hooks;
use crate::registry::{ClientRegistry, CloseOutcome, DeleteMode};
use crate::topic::TopicTrie;
use crate::types::ConnId;

#[derive(Default)]
struct Stats {
    packets_in: u64,
    packets_out: u64,
    last_in: u64,
    last_out: u64,
}

/// Owns all broker routing state and drains the inbound frame queue.
pub struct Dispatcher {
    registry: ClientRegistry,
    trie: TopicTrie,
    hooks: Arc<Hooks>,
    general: Arc<General>,
    inbound_rx: mpsc::Receiver<InboundEvent>,
    stats: Stats,
}

impl Dispatcher {
    #[must_use]
    pub fn new(general: Arc<General>, hooks: Arc<Hooks>, inbound_rx: mpsc::Receiver<InboundEvent>) -> Self {
        Self {
            registry: ClientRegistry::new(),
            trie: TopicTrie::new(),
            hooks,
            general,
            inbound_rx,
            stats: Stats::default(),
        }
    }

    /// Drain the inbound queue until every connection task's sender is dropped,
    /// running the periodic housekeeping tick alongside it.
    pub async fn run_loop(mut self) {
        let sys_interval_secs = self.general.sys_interval_secs();
        let housekeeping_enabled = sys_interval_secs > 0;
        let mut ticker = tokio::time::interval(Duration::from_secs(u64::from(sys_interval_secs.max(1))));
        ticker.tick().await;

        loop {
            tokio::select! {
                event = self.inbound_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = ticker.tick(), if housekeeping_enabled => {
                    self.log_housekeeping();
                }
            }
        }
    }

    async fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Connected { conn_id, peer_addr, listener, outbound } => {
                self.registry.register_connection(conn_id, peer_addr, listener, outbound);
            }
            InboundEvent::Frame { conn_id, frame } => {
                self.stats.packets_in += 1;
                self.handle_frame(conn_id, &frame).await;
            }
            InboundEvent::Closed { conn_id } => {
                let peer_addr = self.registry.peer_addr(conn_id);
                let outcome = self.registry.close_connection(conn_id, DeleteMode::Auto);
                self.finish_close(outcome, peer_addr).await;
            }
        }
    }

    async fn handle_frame(&mut self, conn_id: ConnId, frame: &[u8]) {
        let mut ba = codec::ByteArray::new(frame);
        let packet_type = match codec::FixedHeader::decode(&mut ba) {
            Ok(header) => header.packet_type(),
            Err(_) => {
                self.force_close(conn_id, DeleteMode::Full).await;
                return;
            }
        };

        match packet_type {
            codec::PacketType::Connect => self.handle_connect(conn_id, frame).await,
            codec::PacketType::Publish { .. } => self.handle_publish(conn_id, frame).await,
            codec::PacketType::PublishAck => self.handle_puback(conn_id, frame).await,
            codec::PacketType::PublishReceived => self.handle_pubrec(conn_id, frame).await,
            codec::PacketType::PublishRelease => self.handle_pubrel(conn_id, frame).await,
            codec::PacketType::PublishComplete => self.handle_pubcomp(conn_id, frame).await,
            codec::PacketType::Subscribe => self.handle_subscribe(conn_id, frame).await,
            codec::PacketType::Unsubscribe => self.handle_unsubscribe(conn_id, frame).await,
            codec::PacketType::PingRequest => self.handle_ping(conn_id).await,
            codec::PacketType::Disconnect => self.handle_disconnect(conn_id).await,
            codec::PacketType::ConnectAck
            | codec::PacketType::SubscribeAck
            | codec::PacketType::UnsubscribeAck
            | codec::PacketType::PingResponse
            | codec::PacketType::Auth => {
                log::warn!("ignoring client-to-server-only packet type on conn {conn_id}");
            }
        }
    }

    async fn handle_disconnect(&mut self, conn_id: ConnId) {
        if let Some(client_id) = self.registry.client_id_for_conn(conn_id) {
            self.registry.discard_will(&client_id);
        }
        self.force_close(conn_id, DeleteMode::Auto).await;
    }

    async fn handle_ping(&mut self, conn_id: ConnId) {
        let response = codec::PingResponsePacket::new();
        self.send_to_conn(conn_id, &response).await;
    }

    async fn send_to_conn<P: EncodePacket>(&mut self, conn_id: ConnId, packet: &P) {
        let Some(outbound) = self.registry.outbound_for_conn(conn_id) else {
            return;
        };
        if let Ok(bytes) = encode_packet(packet) {
            self.stats.packets_out += 1;
            let _ = outbound.send(OutboundMessage::Packet(bytes)).await;
        }
    }

    /// Close `conn_id`'s socket and tear down whatever session still owns it.
    async fn force_close(&mut self, conn_id: ConnId, mode: DeleteMode) {
        if let Some(outbound) = self.registry.outbound_for_conn(conn_id) {
            let _ = outbound.send(OutboundMessage::Close).await;
        }
        let peer_addr = self.registry.peer_addr(conn_id);
        let outcome = self.registry.close_connection(conn_id, mode);
        self.finish_close(outcome, peer_addr).await;
    }

    /// Shared tail of every close path: prune the trie, publish a will if one
    /// survived, and notify the disconnect hook. Safe to call for an `outcome`
    /// whose connection was already torn down elsewhere (a stale takeover
    /// target); those carry no will and an empty `purged_filters`.
    async fn finish_close(&mut self, outcome: CloseOutcome, peer_addr: Option<SocketAddr>) {
        if let Some(session_id) = outcome.session_id {
            self.trie.remove_all(outcome.purged_filters, session_id);
        }
        if let Some(will) = outcome.will {
            self.route_publish(&will.topic, will.qos, will.retain, &will.payload).await;
        }
        if let Some(addr) = peer_addr {
            self.hooks.on_disconnect.on_client_disconnect(addr);
        }
    }

    fn log_housekeeping(&mut self) {
        let packets_in = self.stats.packets_in.saturating_sub(self.stats.last_in);
        let packets_out = self.stats.packets_out.saturating_sub(self.stats.last_out);
        self.stats.last_in = self.stats.packets_in;
        self.stats.last_out = self.stats.packets_out;
        log::info!(
            "housekeeping: {} connected, {} stored sessions, {} retained topics, \
             {packets_in} packets in, {packets_out} packets out since last tick",
            self.registry.connected_count(),
            self.registry.session_count(),
            self.trie.retained_count(),
        );
    }
}

fn encode_packet<P: EncodePacket>(packet: &P) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    packet.encode(&mut buf)?;
    Ok(buf)
}
