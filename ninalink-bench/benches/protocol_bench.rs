//! Frame encoding and reply parsing benchmarks.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ninalink_protocol::{Command, Frame, ResponseParser, Slot, MAX_FRAME_SIZE};
use std::net::Ipv4Addr;

const PAYLOAD_SIZES: [usize; 3] = [16, 128, 243];

fn send_frame(size: usize) -> Frame {
    Frame::command(Command::SendDataTcp)
        .with_u8(0)
        .with_param(vec![0x42u8; size])
}

fn databuf_reply(size: usize) -> BytesMut {
    Frame::reply(Command::GetDatabufTcp)
        .with_param(vec![0x42u8; size])
        .encode()
        .unwrap()
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in PAYLOAD_SIZES {
        let frame = send_frame(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);
            b.iter(|| {
                buf.clear();
                black_box(frame.encode_into(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_control_encode(c: &mut Criterion) {
    let frame = Frame::command(Command::StartClientTcp)
        .with_ipv4(Ipv4Addr::new(10, 0, 0, 5))
        .with_u16(80)
        .with_u8(0)
        .with_u8(0);

    c.bench_function("control_encode", |b| {
        b.iter(|| black_box(frame.encode().unwrap()));
    });
}

fn bench_reply_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_parse");
    let parser = ResponseParser::for_command(Command::GetDatabufTcp);

    for size in [16, 128, 246] {
        let reply = databuf_reply(size);
        let mut slots = [Slot::for_value(MAX_FRAME_SIZE)];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &reply, |b, reply| {
            b.iter(|| black_box(parser.parse(reply.iter().copied(), &mut slots).unwrap()));
        });
    }

    group.finish();
}

fn bench_reply_parse_with_filler(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_parse_filler");
    let parser = ResponseParser::for_command(Command::GetSocket);
    let reply = Frame::reply(Command::GetSocket).with_u8(3).encode().unwrap();

    for filler in [0usize, 64, 512] {
        let mut bytes = vec![0u8; filler];
        bytes.extend_from_slice(&reply);
        let mut slots = [Slot::for_value(1)];

        group.bench_with_input(BenchmarkId::from_parameter(filler), &bytes, |b, bytes| {
            b.iter(|| black_box(parser.parse(bytes.iter().copied(), &mut slots).unwrap()));
        });
    }

    group.finish();
}

fn bench_truncating_parse(c: &mut Criterion) {
    let parser = ResponseParser::for_command(Command::GetDatabufTcp);
    let reply = databuf_reply(246);
    let mut slots = [Slot::new(64)];

    c.bench_function("reply_parse_truncating", |b| {
        b.iter(|| black_box(parser.parse(reply.iter().copied(), &mut slots).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_control_encode,
    bench_reply_parse,
    bench_reply_parse_with_filler,
    bench_truncating_parse,
);
criterion_main!(benches);
