// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A QoS 1 PUBLISH is acknowledged back to the publisher with a PUBACK, and
//! forwarded to the subscriber with its own freshly-allocated packet id.

use std::time::Duration;

use codec::{
    ByteArray, ConnectPacket, DecodePacket, PacketId, PacketType, PublishAckPacket, PublishPacket,
    QoS, SubscribePacket,
};

mod common;
use common::TestBroker;

#[tokio::test]
async fn test_qos1_publish_handshake() {
    let broker = TestBroker::start(&common::single_listener_config()).await;

    let mut subscriber = broker.client().await;
    subscriber
        .send(&ConnectPacket::new("subscriber").unwrap())
        .await;
    let (packet_type, _) = subscriber.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    subscriber
        .send(&SubscribePacket::new("test/qos1", QoS::AtLeastOnce, PacketId::new(1)).unwrap())
        .await;
    let (packet_type, _) = subscriber.read_packet_type().await;
    assert_eq!(packet_type, PacketType::SubscribeAck);

    let mut publisher = broker.client().await;
    publisher
        .send(&ConnectPacket::new("publisher").unwrap())
        .await;
    let (packet_type, _) = publisher.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    let mut publish = PublishPacket::new("test/qos1", QoS::AtLeastOnce, b"at-least-once").unwrap();
    publish.set_packet_id(PacketId::new(42));
    publisher.send(&publish).await;

    let (packet_type, frame) = tokio::time::timeout(Duration::from_secs(2), publisher.read_packet_type())
        .await
        .expect("publisher never received its PUBACK");
    assert_eq!(packet_type, PacketType::PublishAck);
    let mut ba = ByteArray::new(&frame);
    let puback = PublishAckPacket::decode(&mut ba).unwrap();
    assert_eq!(puback.packet_id(), PacketId::new(42));

    let (packet_type, frame) = tokio::time::timeout(Duration::from_secs(2), subscriber.read_packet_type())
        .await
        .expect("subscriber never received the publish");
    assert_eq!(
        packet_type,
        PacketType::Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
        }
    );
    let mut ba = ByteArray::new(&frame);
    let delivered = PublishPacket::decode(&mut ba).unwrap();
    assert_eq!(delivered.topic(), "test/qos1");
    assert_eq!(delivered.message(), b"at-least-once");
    assert_ne!(delivered.packet_id(), PacketId::new(0));

    // Acknowledge delivery so the broker can release the packet id.
    subscriber
        .send(&PublishAckPacket::new(delivered.packet_id()))
        .await;
}
