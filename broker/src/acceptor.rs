// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-listener accept loop: bind a socket, enforce `maximum_connections`, run
//! the `onClientConnect` hook, then hand each accepted socket off to
//! [`crate::connection::handle_connection`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::commands::InboundEvent;
use crate::config::{General, Listener};
use crate::connection;
use crate::error::Error;
use crate::hooks::Hooks;
use crate::socket;

/// Bind `listener` and run its accept loop until the socket errors out.
///
/// # Errors
/// Returns error if the listener address cannot be bound.
pub async fn run(
    listener: Arc<Listener>,
    general: Arc<General>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    hooks: Arc<Hooks>,
    next_conn_id: Arc<AtomicU64>,
) -> Result<(), Error> {
    let tcp_listener = socket::new_tcp_listener(listener.address()).await?;
    info!("listening on {}", listener.address());

    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        let (socket, peer_addr) = match tcp_listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("accept() failed on {}: {}", listener.address(), err);
                continue;
            }
        };

        let max_connections = listener.maximum_connections();
        if max_connections > 0 && active_connections.load(Ordering::Relaxed) >= max_connections {
            warn!("{} reached maximum_connections, rejecting {}", listener.address(), peer_addr);
            continue;
        }

        if !hooks.on_connect.on_client_connect(peer_addr) {
            continue;
        }

        let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
        active_connections.fetch_add(1, Ordering::Relaxed);

        let general = Arc::clone(&general);
        let listener = Arc::clone(&listener);
        let inbound_tx = inbound_tx.clone();
        let active_connections = Arc::clone(&active_connections);
        tokio::spawn(async move {
            connection::handle_connection(conn_id, socket, general, listener, inbound_tx).await;
            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
