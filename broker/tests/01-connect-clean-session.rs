// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A fresh CONNECT with an explicit clientID and `clean_session=1` is always
//! accepted: CONNACK carries `session_present=false`, `return_code=Accepted`.

use codec::{ConnectAckPacket, ConnectPacket, ConnectReturnCode, DecodePacket, PacketType};

mod common;
use common::TestBroker;

#[tokio::test]
async fn test_connect_clean_session_accepted() {
    let broker = TestBroker::start(&common::single_listener_config()).await;
    let mut client = broker.client().await;

    let connect = ConnectPacket::new("clean-session-client").unwrap();
    client.send(&connect).await;

    let (packet_type, frame) = client.read_packet_type().await;
    assert_eq!(packet_type, PacketType::ConnectAck);

    let mut ba = codec::ByteArray::new(&frame);
    let ack = ConnectAckPacket::decode(&mut ba).unwrap();
    assert_eq!(ack.return_code(), ConnectReturnCode::Accepted);
    assert!(!ack.session_present());
}
