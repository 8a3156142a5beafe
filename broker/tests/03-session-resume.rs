// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A client that connects with `clean_session=0`, disconnects gracefully, and
//! reconnects with the same clientID and `clean_session=0` gets its session
//! back: the second CONNACK carries `session_present=true`.

use codec::{
    ByteArray, ConnectAckPacket, ConnectFlags, ConnectPacket, ConnectReturnCode, DecodePacket,
    DisconnectPacket, PacketType,
};

mod common;
use common::TestBroker;

fn persistent_connect(client_id: &str) -> ConnectPacket {
    let mut connect = ConnectPacket::new(client_id).unwrap();
    let mut flags = ConnectFlags::default();
    flags.set_clean_session(false);
    connect.set_connect_flags(flags);
    connect
}

#[tokio::test]
async fn test_session_resume_across_reconnect() {
    let broker = TestBroker::start(&common::single_listener_config()).await;

    {
        let mut client = broker.client().await;
        client.send(&persistent_connect("resume-client")).await;

        let (packet_type, frame) = client.read_packet_type().await;
        assert_eq!(packet_type, PacketType::ConnectAck);
        let mut ba = ByteArray::new(&frame);
        let ack = ConnectAckPacket::decode(&mut ba).unwrap();
        assert_eq!(ack.return_code(), ConnectReturnCode::Accepted);
        assert!(!ack.session_present());

        client.send(&DisconnectPacket::new()).await;
    }

    // Give the dispatcher a beat to process the first connection's close
    // before the reconnect races it.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let mut client = broker.client().await;
    client.send(&persistent_connect("resume-client")).await;

    let (packet_type, frame) = client.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);
    let mut ba = ByteArray::new(&frame);
    let ack = ConnectAckPacket::decode(&mut ba).unwrap();
    assert_eq!(ack.return_code(), ConnectReturnCode::Accepted);
    assert!(ack.session_present());
}
