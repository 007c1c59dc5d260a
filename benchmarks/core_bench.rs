use criterion::{black_box, criterion_group, criterion_main, Criterion};
use edb_core::protocol::{read_mem_payload, write_mem_payload, CommandParser, Frame, ReplyBuffer};
use edb_core::{CommandDescriptor, ResponseDescriptor};

fn bench_parser_feed(c: &mut Criterion) {
    let stream: Vec<u8> = [
        Frame::command(CommandDescriptor::GetPc, &[]),
        Frame::command(CommandDescriptor::ReadMem, &read_mem_payload(0x2000, 56)),
        Frame::command(CommandDescriptor::WriteMem, &write_mem_payload(0x1C00, &[1, 2, 3, 4])),
        Frame::command(CommandDescriptor::Breakpoint, &[3, 1]),
    ]
    .iter()
    .flat_map(Frame::encode)
    .collect();

    c.bench_function("parser_byte_at_a_time", |b| {
        let mut parser = CommandParser::new();
        b.iter(|| {
            let mut count = 0;
            for &byte in black_box(&stream) {
                if parser.push(byte).is_some() {
                    count += 1;
                }
            }
            count
        })
    });
}

fn bench_reply_building(c: &mut Criterion) {
    let memory = [0xA5u8; 56];
    c.bench_function("memory_reply", |b| {
        let mut reply = ReplyBuffer::new();
        b.iter(|| {
            reply
                .start(ResponseDescriptor::Memory)
                .extend(&0x2000u32.to_le_bytes())
                .extend(black_box(&memory));
            reply.finish().len()
        })
    });
}

criterion_group!(benches, bench_parser_feed, bench_reply_building);
criterion_main!(benches);
