// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection async engine: one task reads frames and forwards them to the
//! dispatcher, a second writes whatever the dispatcher queues back. Framing only
//! (turning a byte stream into discrete `fixed header + body` frames) happens
//! here; decoding a frame into a concrete packet type is the dispatcher's job, the
//! one exception being the first `CONNECT` frame, whose keep-alive field this
//! task needs locally to drive its own read deadline.

use std::sync::Arc;
use std::time::Duration;

use codec::{ByteArray, ConnectPacket, DecodePacket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::commands::{InboundEvent, OutboundMessage};
use crate::config::{General, Listener};
use crate::constants;
use crate::error::{Error, ErrorKind};
use crate::types::ConnId;

/// Read one complete MQTT frame (fixed header + body) off `reader`, rejecting
/// frames whose remaining length exceeds `message_size_limit`.
async fn read_frame<R>(reader: &mut R, message_size_limit: u32) -> Result<Vec<u8>, Error>
where
    R: AsyncReadExt + Unpin,
{
    let first_byte = reader.read_u8().await?;

    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    let mut length_bytes = Vec::with_capacity(1);
    loop {
        let byte = reader.read_u8().await?;
        length_bytes.push(byte);
        remaining_length += usize::from(byte & 0x7f) * multiplier;
        multiplier *= 128;
        if multiplier > 128 * 128 * 128 * 128 {
            return Err(Error::new(
                ErrorKind::MalformedFrame,
                "remaining length uses more than 4 bytes",
            ));
        }
        if byte & 0x80 == 0 {
            break;
        }
    }

    if remaining_length > message_size_limit as usize {
        return Err(Error::new(
            ErrorKind::MalformedFrame,
            "frame exceeds message_size_limit",
        ));
    }

    let mut body = vec![0_u8; remaining_length];
    reader.read_exact(&mut body).await?;

    let mut frame = Vec::with_capacity(1 + length_bytes.len() + body.len());
    frame.push(first_byte);
    frame.extend_from_slice(&length_bytes);
    frame.extend_from_slice(&body);
    Ok(frame)
}

async fn writer_task(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<OutboundMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            OutboundMessage::Packet(bytes) => {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            OutboundMessage::Close => break,
        }
    }
    let _ = write_half.shutdown().await;
}

/// Drive one accepted TCP connection: enforce the first-packet-must-be-CONNECT
/// and connect_timeout rules, then forward every subsequent frame to the
/// dispatcher until the read loop ends, honouring the client's (or listener's
/// default) keep-alive as a 1.5x read deadline per frame.
pub async fn handle_connection(
    conn_id: ConnId,
    socket: TcpStream,
    general: Arc<General>,
    listener: Arc<Listener>,
    inbound_tx: mpsc::Sender<InboundEvent>,
) {
    let peer_addr = match socket.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    let _ = socket.set_nodelay(general.no_delay());

    let (mut read_half, write_half) = socket.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(constants::CHANNEL_CAPACITY);
    let writer_handle = tokio::spawn(writer_task(write_half, outbound_rx));

    if inbound_tx
        .send(InboundEvent::Connected {
            conn_id,
            peer_addr,
            listener: Arc::clone(&listener),
            outbound: outbound_tx.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    let message_size_limit = general.message_size_limit();

    let first_frame = tokio::time::timeout(
        Duration::from_secs(u64::from(listener.connect_timeout())),
        read_frame(&mut read_half, message_size_limit),
    )
    .await;

    let first_frame = match first_frame {
        Ok(Ok(frame)) => frame,
        _ => {
            let _ = outbound_tx.send(OutboundMessage::Close).await;
            let _ = inbound_tx.send(InboundEvent::Closed { conn_id }).await;
            let _ = writer_handle.await;
            return;
        }
    };

    // The first Control Packet from the Client to the Server MUST be a CONNECT
    // Packet [MQTT-3.1.0-1].
    const CONNECT_TYPE_NIBBLE: u8 = 1;
    if first_frame.first().map(|byte| byte >> 4) != Some(CONNECT_TYPE_NIBBLE) {
        let _ = outbound_tx.send(OutboundMessage::Close).await;
        let _ = inbound_tx.send(InboundEvent::Closed { conn_id }).await;
        let _ = writer_handle.await;
        return;
    }

    // Peek the keep-alive field to drive this task's own read deadline; the
    // dispatcher independently decodes and validates the full CONNECT packet.
    let effective_keep_alive = {
        let mut ba = ByteArray::new(&first_frame);
        match ConnectPacket::decode(&mut ba) {
            Ok(connect) if connect.keep_alive() != 0 => connect.keep_alive(),
            Ok(_) => listener.keep_alive(),
            Err(_) => listener.keep_alive(),
        }
    };

    if inbound_tx
        .send(InboundEvent::Frame {
            conn_id,
            frame: first_frame,
        })
        .await
        .is_err()
    {
        return;
    }

    loop {
        let frame_result = if effective_keep_alive == 0 {
            read_frame(&mut read_half, message_size_limit).await
        } else {
            // "one and a half times the Keep Alive time period" [MQTT-3.1.2-24].
            let deadline = Duration::from_millis(u64::from(effective_keep_alive) * 1500);
            match tokio::time::timeout(deadline, read_frame(&mut read_half, message_size_limit)).await {
                Ok(result) => result,
                Err(_) => break,
            }
        };

        match frame_result {
            Ok(frame) => {
                if inbound_tx.send(InboundEvent::Frame { conn_id, frame }).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    let _ = inbound_tx.send(InboundEvent::Closed { conn_id }).await;
    let _ = outbound_tx.send(OutboundMessage::Close).await;
    let _ = writer_handle.await;
}
