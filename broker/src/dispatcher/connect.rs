// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `CONNECT` handling: clientID assignment, the clientID-collision rules, and the
//! will message a session carries until it disconnects.

use codec::{
    ByteArray, ConnectAckPacket, ConnectFlags, ConnectPacket, ConnectReturnCode, DecodePacket,
    FixedHeader, StringData, U16Data,
};

use crate::constants;
use crate::registry::DeleteMode;
use crate::session::WillMessage;
use crate::types::ConnId;

use super::Dispatcher;

impl Dispatcher {
    pub(super) async fn handle_connect(&mut self, conn_id: ConnId, frame: &[u8]) {
        // A second CONNECT on an already-connected socket is a protocol
        // violation [MQTT-3.1.0-2]: the will (if any) is published, the client
        // is deleted, and no reply is sent.
        if self.registry.client_id_for_conn(conn_id).is_some() {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        }

        let mut ba = ByteArray::new(frame);
        let fixed_header = match FixedHeader::decode(&mut ba) {
            Ok(header) => header,
            Err(_) => {
                self.force_close(conn_id, DeleteMode::Full).await;
                return;
            }
        };
        if fixed_header.remaining_length() < constants::MIN_CONNECT_REMAINING_LENGTH {
            self.force_close(conn_id, DeleteMode::Full).await;
            return;
        }

        ba.reset_offset();
        match ConnectPacket::decode(&mut ba) {
            Ok(connect) => self.accept_connect(conn_id, &connect).await,
            Err(codec::DecodeError::InvalidClientId) if is_identifier_rejected(frame) => {
                self.reply_connack_and_close(conn_id, ConnectReturnCode::IdentifierRejected).await;
            }
            Err(_) => self.force_close(conn_id, DeleteMode::Full).await,
        }
    }

    async fn accept_connect(&mut self, conn_id: ConnId, connect: &ConnectPacket) {
        let Some(listener) = self.registry.listener_for_conn(conn_id) else {
            return;
        };

        let client_id = if connect.client_id().is_empty() {
            if listener.allow_empty_client_id() {
                codec::utils::random_client_id()
            } else {
                self.reply_connack_and_close(conn_id, ConnectReturnCode::IdentifierRejected).await;
                return;
            }
        } else if listener.username_as_client_id() && connect.connect_flags().has_username() {
            connect.username().to_owned()
        } else {
            connect.client_id().to_owned()
        };

        let username = connect
            .connect_flags()
            .has_username()
            .then(|| connect.username().to_owned());
        let clean_session = connect.connect_flags().clean_session();

        let outcome = self.registry.connect(
            conn_id,
            &client_id,
            clean_session,
            username,
            connect.keep_alive(),
            listener.maximum_inflight_messages(),
        );

        if let Some(kicked) = outcome.kicked_conn {
            if let Some(outbound) = self.registry.outbound_for_conn(kicked) {
                let _ = outbound.send(crate::commands::OutboundMessage::Close).await;
            }
        }

        // A clean_session=1 reconnect reuses the same SessionId (the clientID's
        // session record is reset in place, not replaced), so the old filters
        // must be pruned from the trie here: the registry has no handle on it.
        if !outcome.cleared_filters.is_empty() {
            self.trie.remove_all(outcome.cleared_filters, outcome.session_id);
        }

        if connect.connect_flags().will() {
            if let Some(topic) = connect.will_topic() {
                let will = WillMessage {
                    topic: topic.to_owned(),
                    qos: connect.connect_flags().will_qos(),
                    retain: connect.connect_flags().will_retain(),
                    payload: connect.will_message().to_vec(),
                };
                if let Some(session) = self.registry.session_mut(&client_id) {
                    session.will = Some(will);
                }
            }
        }

        let ack = ConnectAckPacket::new(outcome.session_present, ConnectReturnCode::Accepted);
        self.send_to_conn(conn_id, &ack).await;

        if outcome.session_present {
            // Resend whatever was still unacknowledged towards the previous
            // connection before draining newly queued messages, so delivery
            // order matches the order these publishes were originally routed.
            self.redeliver_inflight(outcome.session_id).await;
            self.drain_saved_messages(outcome.session_id).await;
        }
    }

    async fn reply_connack_and_close(&mut self, conn_id: ConnId, rc: ConnectReturnCode) {
        let ack = ConnectAckPacket::new(false, rc);
        self.send_to_conn(conn_id, &ack).await;
        self.force_close(conn_id, DeleteMode::Full).await;
    }
}

/// After `ConnectPacket::decode` fails with `InvalidClientId`, figure out
/// whether the cause was specifically an empty clientID with `clean_session=0`
/// [MQTT-3.1.3-8] (which must be answered with `CONNACK(rc=2, sp=0)` before
/// closing) rather than a malformed client_id string (which must not be
/// answered at all). Both collapse to the same decode error, so this redoes the
/// same field-by-field walk `ConnectPacket::decode` already did up to that point.
fn is_identifier_rejected(frame: &[u8]) -> bool {
    let mut ba = ByteArray::new(frame);
    if FixedHeader::decode(&mut ba).is_err() {
        return false;
    }
    if StringData::decode(&mut ba).is_err() {
        return false;
    }
    if ba.read_byte().is_err() {
        return false;
    }
    let Ok(connect_flags) = ConnectFlags::decode(&mut ba) else {
        return false;
    };
    if U16Data::decode(&mut ba).is_err() {
        return false;
    }
    match StringData::decode(&mut ba) {
        Ok(client_id) => client_id.is_empty() && !connect_flags.clean_session(),
        Err(_) => false,
    }
}
