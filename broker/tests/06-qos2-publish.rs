// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A QoS 2 PUBLISH runs the full four-packet handshake in both directions:
//! publisher <-> broker via PUBREC/PUBREL/PUBCOMP, and broker <-> subscriber
//! the same way, independently, each side keyed by its own packet id.

use std::time::Duration;

use codec::{
    ByteArray, ConnectPacket, DecodePacket, PacketId, PacketType, PublishCompletePacket,
    PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS, SubscribePacket,
};

mod common;
use common::TestBroker;

#[tokio::test]
async fn test_qos2_publish_handshake() {
    let broker = TestBroker::start(&common::single_listener_config()).await;

    let mut subscriber = broker.client().await;
    subscriber
        .send(&ConnectPacket::new("subscriber").unwrap())
        .await;
    let (packet_type, _) = subscriber.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    subscriber
        .send(&SubscribePacket::new("test/qos2", QoS::ExactOnce, PacketId::new(1)).unwrap())
        .await;
    let (packet_type, _) = subscriber.read_packet_type().await;
    assert_eq!(packet_type, PacketType::SubscribeAck);

    let mut publisher = broker.client().await;
    publisher
        .send(&ConnectPacket::new("publisher").unwrap())
        .await;
    let (packet_type, _) = publisher.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    let mut publish = PublishPacket::new("test/qos2", QoS::ExactOnce, b"exactly-once").unwrap();
    publish.set_packet_id(PacketId::new(7));
    publisher.send(&publish).await;

    // Publisher <-> broker handshake.
    let (packet_type, frame) = tokio::time::timeout(Duration::from_secs(2), publisher.read_packet_type())
        .await
        .expect("publisher never received PUBREC");
    assert_eq!(packet_type, PacketType::PublishReceived);
    let mut ba = ByteArray::new(&frame);
    let pubrec = PublishReceivedPacket::decode(&mut ba).unwrap();
    assert_eq!(pubrec.packet_id(), PacketId::new(7));

    publisher.send(&PublishReleasePacket::new(PacketId::new(7))).await;

    let (packet_type, frame) = tokio::time::timeout(Duration::from_secs(2), publisher.read_packet_type())
        .await
        .expect("publisher never received PUBCOMP");
    assert_eq!(packet_type, PacketType::PublishComplete);
    let mut ba = ByteArray::new(&frame);
    let pubcomp = PublishCompletePacket::decode(&mut ba).unwrap();
    assert_eq!(pubcomp.packet_id(), PacketId::new(7));

    // Broker <-> subscriber handshake, independent packet id.
    let (packet_type, frame) = tokio::time::timeout(Duration::from_secs(2), subscriber.read_packet_type())
        .await
        .expect("subscriber never received the publish");
    assert_eq!(
        packet_type,
        PacketType::Publish {
            dup: false,
            qos: QoS::ExactOnce,
            retain: false,
        }
    );
    let mut ba = ByteArray::new(&frame);
    let delivered = PublishPacket::decode(&mut ba).unwrap();
    assert_eq!(delivered.topic(), "test/qos2");
    assert_eq!(delivered.message(), b"exactly-once");
    let sub_pkt_id = delivered.packet_id();

    subscriber.send(&PublishReceivedPacket::new(sub_pkt_id)).await;

    let (packet_type, frame) = tokio::time::timeout(Duration::from_secs(2), subscriber.read_packet_type())
        .await
        .expect("subscriber never received PUBREL");
    assert_eq!(packet_type, PacketType::PublishRelease);
    let mut ba = ByteArray::new(&frame);
    let pubrel = PublishReleasePacket::decode(&mut ba).unwrap();
    assert_eq!(pubrel.packet_id(), sub_pkt_id);

    subscriber.send(&PublishCompletePacket::new(sub_pkt_id)).await;
}
