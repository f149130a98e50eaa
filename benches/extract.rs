use criterion::{criterion_group, criterion_main, Criterion};
use fpga_framegrab::{sim::SimulatedMemory, Access, CaptureConfig, FrameGrabber, MappedRegion};

const FRAME: u64 = 0x1800_0000;

fn simulated_frame(size: usize) -> SimulatedMemory {
    let mem = SimulatedMemory::new();
    mem.write_u32(0x4000_000C, FRAME as u32);
    mem.write_u32(FRAME, size as u32);
    mem.write_bytes(FRAME + 0x80, &vec![0x5A; size]);
    mem
}

pub fn benchmark_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload");
    for size in [1024, 16 * 1024, 64 * 1024, 256 * 1024] {
        let mem = simulated_frame(size);
        let region = MappedRegion::open(&mem, FRAME, size + 0x80, Access::ReadOnly).unwrap();
        group.bench_with_input(format!("{}KB", size / 1024), &region, |b, region| {
            b.iter(|| {
                mem.clear_events();
                region.read_payload(FRAME, size).unwrap()
            })
        });
    }
    group.finish();
}

pub fn benchmark_capture(c: &mut Criterion) {
    let mem = simulated_frame(64 * 1024);
    let grabber = FrameGrabber::new(&mem, CaptureConfig::default()).unwrap();
    c.bench_function("capture/64KB", |b| {
        b.iter(|| {
            mem.clear_events();
            grabber.capture(0).unwrap()
        })
    });
}

criterion_group!(benches, benchmark_payload, benchmark_capture);
criterion_main!(benches);
