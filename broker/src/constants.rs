// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by General Public License that can be found
// in the LICENSE file.

/// Default location for the broker's TOML config file.
pub const DEFAULT_CONFIG: &str = "/etc/hebo/hebo.toml";

/// Capacity of the bounded mpsc channels used between connections and the dispatcher.
pub const CHANNEL_CAPACITY: usize = 16;

/// First connection ID handed out by the acceptor; IDs increase monotonically.
pub const FIRST_CONN_ID: u64 = 10_000;

/// Minimum remaining length, in bytes, of a valid CONNECT packet's variable header
/// plus payload (protocol name + level + flags + keep-alive + empty clientID).
pub const MIN_CONNECT_REMAINING_LENGTH: usize = 12;
