// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A QoS 0 PUBLISH is fanned out to subscribers with no acknowledgement
//! handshake: the subscriber simply receives the PUBLISH frame.

use std::time::Duration;

use codec::{
    ByteArray, ConnectPacket, DecodePacket, PacketId, PacketType, PublishPacket, QoS,
    SubscribeAckPacket, SubscribePacket,
};

mod common;
use common::TestBroker;

#[tokio::test]
async fn test_qos0_publish_delivered_to_subscriber() {
    let broker = TestBroker::start(&common::single_listener_config()).await;

    let mut subscriber = broker.client().await;
    subscriber
        .send(&ConnectPacket::new("subscriber").unwrap())
        .await;
    let (packet_type, _) = subscriber.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    let subscribe =
        SubscribePacket::new("test/topic", QoS::AtMostOnce, PacketId::new(1)).unwrap();
    subscriber.send(&subscribe).await;
    let (packet_type, frame) = subscriber.read_packet_type().await;
    assert_eq!(packet_type, PacketType::SubscribeAck);
    let mut ba = ByteArray::new(&frame);
    let suback = SubscribeAckPacket::decode(&mut ba).unwrap();
    assert_eq!(suback.packet_id(), PacketId::new(1));

    let mut publisher = broker.client().await;
    publisher
        .send(&ConnectPacket::new("publisher").unwrap())
        .await;
    let (packet_type, _) = publisher.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    let publish = PublishPacket::new("test/topic", QoS::AtMostOnce, b"hello").unwrap();
    publisher.send(&publish).await;

    let (packet_type, frame) = tokio::time::timeout(
        Duration::from_secs(2),
        subscriber.read_packet_type(),
    )
    .await
    .expect("subscriber never received the publish");
    assert_eq!(
        packet_type,
        PacketType::Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
        }
    );
    let mut ba = ByteArray::new(&frame);
    let received = PublishPacket::decode(&mut ba).unwrap();
    assert_eq!(received.topic(), "test/topic");
    assert_eq!(received.message(), b"hello");
}
