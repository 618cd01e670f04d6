use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use psp::checksum::sha256_file;
use psp::{AckKind, Packet, SessionId};

fn bench_data_packet(c: &mut Criterion) {
    let session_id = SessionId::new_v4();
    let packet = Packet::data(session_id, 42, 1000, vec![0xAA; 8192]);
    let encoded = packet.encode().unwrap();

    let mut group = c.benchmark_group("data_packet");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode_8k", |b| b.iter(|| black_box(&packet).encode()));
    group.bench_function("decode_8k", |b| {
        b.iter(|| Packet::decode(black_box(&encoded)))
    });

    group.finish();
}

fn bench_ack_packet(c: &mut Criterion) {
    let ack = Packet::ack(SessionId::new_v4(), AckKind::Chunk, 7, "Chunk received");
    let encoded = ack.encode().unwrap();

    c.bench_function("ack_roundtrip", |b| {
        b.iter(|| Packet::decode(&black_box(&ack).encode().unwrap()))
    });
    c.bench_function("ack_decode", |b| b.iter(|| Packet::decode(black_box(&encoded))));
}

fn bench_checksum(c: &mut Criterion) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&vec![0x5A; 4 * 1024 * 1024]).unwrap();
    file.flush().unwrap();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(4 * 1024 * 1024));
    group.sample_size(20);
    group.bench_function("sha256_4mb", |b| b.iter(|| sha256_file(black_box(file.path()))));
    group.finish();
}

criterion_group!(benches, bench_data_packet, bench_ack_packet, bench_checksum);
criterion_main!(benches);
