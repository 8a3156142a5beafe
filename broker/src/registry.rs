// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Dual-indexed client/session table: by connection (for routing frames off the
//! wire to the session that owns them) and by clientID (the MQTT session key).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::commands::OutboundMessage;
use crate::config::Listener;
use crate::session::{ConnHandle, Session, SessionId, WillMessage};
use crate::types::ConnId;

struct ConnEntry {
    peer_addr: SocketAddr,
    listener: Arc<Listener>,
    outbound: mpsc::Sender<OutboundMessage>,
    client_id: Option<String>,
}

/// Outcome of a successful `CONNECT`, telling the dispatcher what to put in the
/// `CONNACK` and whether an old connection using the same clientID must be kicked.
pub struct ConnectOutcome {
    pub session_id: SessionId,
    pub session_present: bool,
    /// A different, still-live connection using this clientID, if any. The
    /// dispatcher must close it (without publishing its will: taking over a
    /// clientID is not an abnormal disconnect of the old connection).
    pub kicked_conn: Option<ConnId>,
    /// Filters cleared by a `clean_session=1` reconnect's `Session::reset`.
    /// `session_id` is reused across the reset (the clientID's session record
    /// is refreshed in place, not replaced), so the dispatcher must prune
    /// these out of the topic trie itself; `connect()` cannot do it, since the
    /// trie lives on the dispatcher, not the registry.
    pub cleared_filters: Vec<String>,
}

/// How a session is torn down when its connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Purge the session if `clean_session` was set, otherwise keep it for later
    /// resumption. This is the only mode the dispatcher's normal close path uses.
    Auto,
    /// Always purge the session, regardless of `clean_session`.
    Full,
    /// Always keep the session for later resumption, regardless of
    /// `clean_session`.
    KeepSession,
}

/// What the dispatcher must do in reaction to a session going away.
pub struct CloseOutcome {
    pub client_id: Option<String>,
    pub session_id: Option<SessionId>,
    pub will: Option<WillMessage>,
    /// Filters to remove from the topic trie. Populated whenever the session
    /// itself was purged (not just marked offline), since an offline
    /// non-clean-session client still "owns" its subscriptions.
    pub purged_filters: Vec<String>,
}

/// Dual-indexed table of connections and the sessions they're bound to.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: HashMap<String, Session>,
    conns: HashMap<ConnId, ConnEntry>,
    /// `SessionId` -> clientID, the reverse of `sessions`'s key. The topic trie
    /// only knows subscribers by `SessionId`; routing a `PUBLISH` needs to get
    /// back to the owning session's outbound channel.
    id_to_client: HashMap<SessionId, String>,
    next_session_id: SessionId,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connection(
        &mut self,
        conn_id: ConnId,
        peer_addr: SocketAddr,
        listener: Arc<Listener>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) {
        self.conns.insert(
            conn_id,
            ConnEntry {
                peer_addr,
                listener,
                outbound,
                client_id: None,
            },
        );
    }

    #[must_use]
    pub fn listener_for_conn(&self, conn_id: ConnId) -> Option<Arc<Listener>> {
        self.conns.get(&conn_id).map(|entry| Arc::clone(&entry.listener))
    }

    #[must_use]
    pub fn peer_addr(&self, conn_id: ConnId) -> Option<SocketAddr> {
        self.conns.get(&conn_id).map(|entry| entry.peer_addr)
    }

    #[must_use]
    pub fn outbound_for_conn(&self, conn_id: ConnId) -> Option<mpsc::Sender<OutboundMessage>> {
        self.conns.get(&conn_id).map(|entry| entry.outbound.clone())
    }

    #[must_use]
    pub fn client_id_for_conn(&self, conn_id: ConnId) -> Option<String> {
        self.conns.get(&conn_id).and_then(|entry| entry.client_id.clone())
    }

    #[must_use]
    pub fn session(&self, client_id: &str) -> Option<&Session> {
        self.sessions.get(client_id)
    }

    pub fn session_mut(&mut self, client_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(client_id)
    }

    #[must_use]
    pub fn client_id_by_session(&self, session_id: SessionId) -> Option<&str> {
        self.id_to_client.get(&session_id).map(String::as_str)
    }

    pub fn session_by_id_mut(&mut self, session_id: SessionId) -> Option<&mut Session> {
        let client_id = self.id_to_client.get(&session_id)?.clone();
        self.sessions.get_mut(&client_id)
    }

    /// Outbound channel of the connection currently bound to `client_id`, if any.
    #[must_use]
    pub fn outbound_for_client(&self, client_id: &str) -> Option<mpsc::Sender<OutboundMessage>> {
        self.sessions
            .get(client_id)
            .and_then(|session| session.handle.as_ref())
            .map(|handle| handle.outbound.clone())
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_online()).count()
    }

    /// Bind `client_id` to `conn_id`, creating a fresh session or resuming a
    /// persisted one per the clientID-reconnection rules: a still-connected
    /// session using the same clientID is kicked off (its will is discarded, not
    /// published, since a takeover is not an abnormal disconnect); an offline
    /// persisted session is resumed unless `clean_session` discards it.
    pub fn connect(
        &mut self,
        conn_id: ConnId,
        client_id: &str,
        clean_session: bool,
        username: Option<String>,
        keep_alive: u16,
        maximum_inflight_messages: u16,
    ) -> ConnectOutcome {
        let outbound = self
            .conns
            .get(&conn_id)
            .map(|entry| entry.outbound.clone())
            .expect("connect() called for an unregistered connection");

        let mut kicked_conn = None;
        let mut cleared_filters = Vec::new();
        let session_present = match self.sessions.get_mut(client_id) {
            Some(session) => {
                if let Some(old_handle) = session.handle.take() {
                    kicked_conn = Some(old_handle.conn_id);
                    session.will = None;
                }
                if clean_session {
                    cleared_filters = session.reset();
                    false
                } else {
                    true
                }
            }
            None => {
                let id = self.next_session_id;
                self.next_session_id += 1;
                self.sessions
                    .insert(client_id.to_owned(), Session::new(id, client_id.to_owned()));
                self.id_to_client.insert(id, client_id.to_owned());
                false
            }
        };

        let session = self
            .sessions
            .get_mut(client_id)
            .expect("session was just inserted or found above");
        session.handle = Some(ConnHandle { conn_id, outbound });
        session.clean_session = clean_session;
        session.username = username;
        session.keep_alive = keep_alive;
        session.maximum_inflight_messages = maximum_inflight_messages;

        if let Some(entry) = self.conns.get_mut(&conn_id) {
            entry.client_id = Some(client_id.to_owned());
        }

        ConnectOutcome {
            session_id: session.id,
            session_present,
            kicked_conn,
            cleared_filters,
        }
    }

    /// Discard the will message recorded for `client_id`'s session, e.g. on
    /// receipt of a `DISCONNECT` packet.
    pub fn discard_will(&mut self, client_id: &str) {
        if let Some(session) = self.sessions.get_mut(client_id) {
            session.will = None;
        }
    }

    /// React to `conn_id` going away: look up whatever session is (or was) bound
    /// to it and apply `mode`.
    pub fn close_connection(&mut self, conn_id: ConnId, mode: DeleteMode) -> CloseOutcome {
        let Some(entry) = self.conns.remove(&conn_id) else {
            return CloseOutcome {
                client_id: None,
                session_id: None,
                will: None,
                purged_filters: Vec::new(),
            };
        };
        let Some(client_id) = entry.client_id else {
            return CloseOutcome {
                client_id: None,
                session_id: None,
                will: None,
                purged_filters: Vec::new(),
            };
        };

        let Some(session) = self.sessions.get_mut(&client_id) else {
            return CloseOutcome {
                client_id: Some(client_id),
                session_id: None,
                will: None,
                purged_filters: Vec::new(),
            };
        };

        // A newer connection may already have taken over this clientID and
        // cleared `handle`'s conn_id to its own; only clear if we still own it.
        let still_owns = session.handle.as_ref().is_some_and(|h| h.conn_id == conn_id);
        if !still_owns {
            return CloseOutcome {
                client_id: Some(client_id),
                session_id: Some(session.id),
                will: None,
                purged_filters: Vec::new(),
            };
        }

        let will = session.will.take();
        session.handle = None;

        let purge = match mode {
            DeleteMode::Auto => session.clean_session,
            DeleteMode::Full => true,
            DeleteMode::KeepSession => false,
        };

        if purge {
            let session_id = session.id;
            let filters: Vec<String> = session.subscriptions.keys().cloned().collect();
            self.sessions.remove(&client_id);
            self.id_to_client.remove(&session_id);
            CloseOutcome {
                client_id: Some(client_id),
                session_id: Some(session_id),
                will,
                purged_filters: filters,
            }
        } else {
            CloseOutcome {
                client_id: Some(client_id),
                session_id: Some(session.id),
                will,
                purged_filters: Vec::new(),
            }
        }
    }
}
