// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! An empty clientID combined with `clean_session=0` is rejected: the broker
//! replies CONNACK(session_present=false, return_code=IdentifierRejected) and
//! then closes the socket [MQTT-3.1.3-8].

use std::time::Duration;

use codec::{ConnectAckPacket, ConnectFlags, ConnectPacket, ConnectReturnCode, DecodePacket, PacketType, QoS};

mod common;
use common::TestBroker;

#[tokio::test]
async fn test_connect_empty_id_not_clean_session_rejected() {
    let broker = TestBroker::start(&common::single_listener_config()).await;
    let mut client = broker.client().await;

    let mut connect = ConnectPacket::new("").unwrap();
    let mut flags = ConnectFlags::default();
    flags.set_clean_session(false);
    flags.set_will(false);
    flags.set_will_qos(QoS::AtMostOnce);
    connect.set_connect_flags(flags);

    client.send(&connect).await;

    let (packet_type, frame) = client.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    let mut ba = codec::ByteArray::new(&frame);
    let ack = ConnectAckPacket::decode(&mut ba).unwrap();
    assert_eq!(ack.return_code(), ConnectReturnCode::IdentifierRejected);
    assert!(!ack.session_present());

    assert!(client.expect_close(Duration::from_secs(2)).await);
}
