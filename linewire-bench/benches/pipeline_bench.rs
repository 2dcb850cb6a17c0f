//! Pipelined request/response dispatch over a socket pair.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use linewire_client::{Connection, Connector, Interest, Nut, NutClient, Poller, Target};
use std::cell::Cell;
use std::io::{Read, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

/// Collaborators that ignore every request.
struct Inert;

impl Poller for Inert {
    fn watch(&mut self, _fd: BorrowedFd<'_>, _interest: Interest) {}
    fn unwatch(&mut self) {}
    fn set_timer(&mut self, _after: Duration) {}
    fn cancel_timer(&mut self) {}
}

impl Connector for Inert {
    fn connect(&mut self, _host: &str, _service: &str) {}
    fn cancel(&mut self) {}
}

fn connected_pair() -> (NutClient, UnixStream) {
    let mut client: NutClient = Connection::new(Box::new(Inert), Box::new(Inert));
    client.connect(&Target::tcp("bench", "0")).unwrap();
    let (ours, theirs) = UnixStream::pair().unwrap();
    client.on_connect_result(Ok(ours.into()));
    (client, theirs)
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("nut_pipeline");

    for depth in [1, 16, 128] {
        let reply = b"BEGIN LIST UPS\nUPS ups \"Bench UPS\"\nEND LIST UPS\n".repeat(depth);
        let request_len = b"LIST UPS\n".len() * depth;

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &reply, |b, reply| {
            let (mut client, mut server) = connected_pair();
            let mut sink = vec![0u8; request_len];
            let done = Rc::new(Cell::new(0usize));

            b.iter(|| {
                for _ in 0..depth {
                    let done = done.clone();
                    client
                        .list_ups(move |_: &mut NutClient, r| {
                            black_box(r);
                            done.set(done.get() + 1);
                        })
                        .unwrap();
                }
                client.on_ready();
                server.read_exact(&mut sink).unwrap();
                server.write_all(reply).unwrap();
                while client.pending_tasks() > 0 {
                    client.on_ready();
                }
            });
            black_box(done.get());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
