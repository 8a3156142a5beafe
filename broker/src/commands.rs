// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Messages passed between per-connection tasks and the single dispatcher task,
//! and from the dispatcher back out to a connection's writer task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Listener;
use crate::types::ConnId;

/// Sent by a connection task into the dispatcher's inbound queue.
pub enum InboundEvent {
    /// A socket was accepted and its reader/writer tasks are running.
    Connected {
        conn_id: ConnId,
        peer_addr: SocketAddr,
        listener: Arc<Listener>,
        outbound: mpsc::Sender<OutboundMessage>,
    },
    /// One complete MQTT frame (fixed header + body) was read off the socket.
    Frame { conn_id: ConnId, frame: Vec<u8> },
    /// The connection's read loop ended, for any reason (clean DISCONNECT, EOF,
    /// keep-alive timeout, malformed frame). The dispatcher looks up whatever
    /// session is still bound to `conn_id`; this is a no-op if none is.
    Closed { conn_id: ConnId },
}

/// Sent by the dispatcher to a connection's writer task.
pub enum OutboundMessage {
    /// Already-encoded bytes of one packet, to be written verbatim.
    Packet(Vec<u8>),
    /// Flush anything queued, then close the socket.
    Close,
}
