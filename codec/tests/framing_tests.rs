//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Integration tests for the NETCONF framing codec
//!
//! These tests drive the codec the way a connection does: through `Framed`,
//! with arbitrary read boundaries, and across a framing switch.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use netconfd_codec::{
    CapabilitySet, Framing, HelloMessage, NetconfCodec, NetconfFrame, PeerHeader, TransportKind,
    consts,
};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder, Framed};

// ============================================================================
// Helper Functions
// ============================================================================

fn encode_messages(framing: Framing, messages: &[Vec<u8>], chunk: usize) -> BytesMut {
    let mut codec = NetconfCodec::new().with_max_chunk_size(chunk);
    codec.set_framing(framing);
    let mut buffer = BytesMut::new();
    for message in messages {
        codec.encode(Bytes::from(message.clone()), &mut buffer).unwrap();
    }
    buffer
}

/// Feed `wire` to a fresh decoder in pieces of the given sizes.
fn decode_in_pieces(framing: Framing, wire: &[u8], cuts: &[usize]) -> Vec<Bytes> {
    let mut codec = NetconfCodec::new();
    codec.set_framing(framing);
    let mut buffer = BytesMut::new();
    let mut messages = Vec::new();
    let mut offset = 0;
    let mut cuts = cuts.iter().copied().cycle();
    while offset < wire.len() {
        let step = cuts.next().unwrap_or(1).max(1).min(wire.len() - offset);
        buffer.extend_from_slice(&wire[offset..offset + step]);
        offset += step;
        while let Some(frame) = codec.decode(&mut buffer).unwrap() {
            messages.push(frame.into_message().unwrap());
        }
    }
    messages
}

fn xml_body() -> impl Strategy<Value = Vec<u8>> {
    // Printable content without the end-of-message delimiter.
    proptest::collection::vec(prop::sample::select(b"<>/=\" abcdefxyz\n]".to_vec()), 1..200)
        .prop_filter("contains delimiter", |body| {
            !body.windows(consts::EOM.len()).any(|w| w == consts::EOM)
                && !body.ends_with(b"]]>]]")
                && !body.ends_with(b"]]>]")
                && !body.ends_with(b"]]>")
                && !body.ends_with(b"]]")
                && !body.ends_with(b"]")
        })
}

proptest! {
    #[test]
    fn chunked_decoding_ignores_read_boundaries(
        messages in proptest::collection::vec(xml_body(), 1..5),
        cuts in proptest::collection::vec(1usize..17, 1..8),
        chunk in 1usize..64,
    ) {
        let wire = encode_messages(Framing::Chunked, &messages, chunk);
        let decoded = decode_in_pieces(Framing::Chunked, &wire, &cuts);
        let expected: Vec<Bytes> = messages.into_iter().map(Bytes::from).collect();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn eom_decoding_ignores_read_boundaries(
        messages in proptest::collection::vec(xml_body(), 1..5),
        cuts in proptest::collection::vec(1usize..9, 1..8),
    ) {
        let wire = encode_messages(Framing::EndOfMessage, &messages, 1024);
        let decoded = decode_in_pieces(Framing::EndOfMessage, &wire, &cuts);
        let expected: Vec<Bytes> = messages.into_iter().map(Bytes::from).collect();
        prop_assert_eq!(decoded, expected);
    }
}

// ============================================================================
// Framed Tests
// ============================================================================

#[tokio::test]
async fn test_hello_then_switch_to_chunked() {
    let (client, server) = tokio::io::duplex(4096);
    let mut client = Framed::new(client, NetconfCodec::new());
    let mut server = Framed::new(server, NetconfCodec::new().with_peer_header());

    let header = PeerHeader::new(
        "admin",
        "192.0.2.1:40000".parse().unwrap(),
        TransportKind::Ssh,
        "ssh-1",
    );
    let capabilities = CapabilitySet::new()
        .with(consts::BASE_1_0)
        .with(consts::BASE_1_1);
    client.send(NetconfFrame::Header(header.clone())).await.unwrap();
    client
        .send(HelloMessage::client(capabilities.clone()).to_bytes())
        .await
        .unwrap();
    // The first rpc may arrive in the same read as the hello.
    client.codec_mut().set_framing(Framing::Chunked);
    client
        .send(Bytes::from_static(b"<rpc message-id=\"1\"/>"))
        .await
        .unwrap();

    assert_eq!(
        server.next().await.unwrap().unwrap(),
        NetconfFrame::Header(header)
    );
    let hello = server.next().await.unwrap().unwrap().into_message().unwrap();
    assert_eq!(HelloMessage::parse(&hello).unwrap().capabilities(), &capabilities);

    server.codec_mut().set_framing(Framing::Chunked);
    let rpc = server.next().await.unwrap().unwrap();
    assert_eq!(rpc, NetconfFrame::Message(Bytes::from_static(b"<rpc message-id=\"1\"/>")));
}

#[tokio::test]
async fn test_truncated_stream_is_an_error() {
    let (mut client, server) = tokio::io::duplex(1024);
    let mut server = Framed::new(server, NetconfCodec::new());

    tokio::io::AsyncWriteExt::write_all(&mut client, b"<rpc><get")
        .await
        .unwrap();
    drop(client);

    assert!(server.next().await.unwrap().is_err());
}
