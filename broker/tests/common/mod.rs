// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-process test harness: spawns the broker on a loopback port inside the
//! test's own tokio runtime and drives it with a bare `codec`-based client,
//! rather than shelling out to a compiled binary.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use codec::{ByteArray, DecodePacket, EncodePacket, FixedHeader, PacketType};
use mqtt_broker::config::Config;
use mqtt_broker::hooks::Hooks;
use mqtt_broker::server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Bind to port 0 momentarily to obtain a free port number, then release it
/// for the broker to rebind.
#[must_use]
pub fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("failed to find a free port");
    listener.local_addr().expect("local_addr").port()
}

/// A broker instance bound to loopback, running as a background task inside
/// the current tokio runtime for the lifetime of the test.
pub struct TestBroker {
    port: u16,
    handle: JoinHandle<()>,
}

impl TestBroker {
    /// Start a broker from a raw TOML fragment. `{port}` in `config_toml` is
    /// substituted with a freshly-picked free port.
    pub async fn start(config_toml: &str) -> Self {
        let port = free_port();
        let content = config_toml.replace("{port}", &port.to_string());
        let config = Config::from_str(&content).expect("invalid test config");
        config.validate(false).expect("invalid test config");

        let handle = tokio::spawn(async move {
            let _ = server::run_with_config(config, Arc::new(Hooks::default())).await;
        });

        // Give the acceptor task a moment to bind before the first connect.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self { port, handle }
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.port).await
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Default single-listener config used by most tests; callers can append
/// extra keys under `[general]` or `[[listeners]]` as needed.
#[must_use]
pub fn single_listener_config() -> String {
    "[[listeners]]\naddress = \"127.0.0.1:{port}\"\n".to_string()
}

/// A bare MQTT client: encodes/decodes packets directly with the `codec`
/// crate over a loopback TCP connection. Tests drive the protocol by hand,
/// there is no reconnection or keep-alive logic here.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("failed to connect to test broker");
        Self { stream }
    }

    pub async fn send<P: EncodePacket>(&mut self, packet: &P) {
        let mut buf = Vec::new();
        packet.encode(&mut buf).expect("failed to encode packet");
        self.stream
            .write_all(&buf)
            .await
            .expect("failed to write packet");
    }

    /// Read one complete frame (fixed header + variable header + payload) and
    /// return the raw bytes, undecoded, so the caller can pick the concrete
    /// packet type to decode it as.
    pub async fn read_frame(&mut self) -> Vec<u8> {
        let first_byte = self
            .stream
            .read_u8()
            .await
            .expect("connection closed before a frame arrived");

        let mut length_bytes = Vec::new();
        let mut remaining_length: usize = 0;
        let mut multiplier: usize = 1;
        loop {
            let byte = self
                .stream
                .read_u8()
                .await
                .expect("connection closed mid remaining-length");
            length_bytes.push(byte);
            remaining_length += usize::from(byte & 0x7f) * multiplier;
            if byte & 0x80 == 0 {
                break;
            }
            multiplier *= 128;
        }

        let mut body = vec![0_u8; remaining_length];
        self.stream
            .read_exact(&mut body)
            .await
            .expect("connection closed mid frame body");

        let mut frame = Vec::with_capacity(1 + length_bytes.len() + body.len());
        frame.push(first_byte);
        frame.extend_from_slice(&length_bytes);
        frame.extend_from_slice(&body);
        frame
    }

    /// Read one frame and report which packet type it was, alongside the raw
    /// bytes so the caller can fully decode it with the concrete type.
    pub async fn read_packet_type(&mut self) -> (PacketType, Vec<u8>) {
        let frame = self.read_frame().await;
        let mut ba = ByteArray::new(&frame);
        let header = FixedHeader::decode(&mut ba).expect("malformed frame from broker");
        (header.packet_type(), frame)
    }

    /// Returns true if the peer closed the connection (EOF) within `timeout`.
    pub async fn expect_close(&mut self, timeout: Duration) -> bool {
        let mut byte = [0_u8; 1];
        matches!(
            tokio::time::timeout(timeout, self.stream.read(&mut byte)).await,
            Ok(Ok(0))
        )
    }
}
