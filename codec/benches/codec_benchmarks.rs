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

//! Benchmarks for NETCONF framing performance

use bytes::{Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use netconfd_codec::{CapabilitySet, Framing, HelloMessage, NetconfCodec};
use tokio_util::codec::{Decoder, Encoder};

fn payload(size: usize) -> Bytes {
    let mut body = String::with_capacity(size + 64);
    body.push_str("<rpc-reply message-id=\"1\"><data>");
    while body.len() < size {
        body.push_str("<interface><name>eth0</name></interface>");
    }
    body.push_str("</data></rpc-reply>");
    Bytes::from(body)
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [256usize, 4096, 65536] {
        let message = payload(size);
        group.throughput(Throughput::Bytes(message.len() as u64));

        for framing in [Framing::EndOfMessage, Framing::Chunked] {
            let mut encoder = NetconfCodec::new().with_max_chunk_size(4096);
            encoder.set_framing(framing);
            let mut wire = BytesMut::new();
            encoder.encode(message.clone(), &mut wire).unwrap();
            let wire = wire.freeze();

            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", framing), size),
                &wire,
                |b, wire| {
                    let mut codec = NetconfCodec::new();
                    codec.set_framing(framing);
                    b.iter(|| {
                        let mut buffer = BytesMut::from(&wire[..]);
                        black_box(codec.decode(&mut buffer).unwrap());
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_hello(c: &mut Criterion) {
    let hello = HelloMessage::server(CapabilitySet::known_base(), 42).to_bytes();

    c.bench_function("hello_parse", |b| {
        b.iter(|| HelloMessage::parse(black_box(&hello)).unwrap());
    });
}

criterion_group!(benches, bench_decode, bench_hello);
criterion_main!(benches);
