//! A read benchmark that tries to measure read speed.

extern crate criterion;

use criterion::{
    criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion, PlotConfiguration,
    Throughput,
};

use fatdrv::block::{BlockDevice, SECTOR_SIZE};
use fatdrv::util::time::EpochClock;
use fatdrv::{Manager, OpenMode};

struct MemDisk {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl MemDisk {
    fn with_bytes(bytes: u64) -> Self {
        Self { sectors: vec![[0u8; SECTOR_SIZE]; (bytes / SECTOR_SIZE as u64) as usize] }
    }
}

impl BlockDevice for MemDisk {
    fn is_ready(&mut self, _lun: u8) -> bool {
        true
    }

    fn get_capacity(&mut self, _lun: u8) -> Option<(u64, u16)> {
        Some((self.sectors.len() as u64, SECTOR_SIZE as u16))
    }

    fn read(&mut self, _lun: u8, buf: &mut [u8], sector: u64, count: u32) -> bool {
        for i in 0..count as u64 {
            let idx = (sector + i) as usize;
            if idx >= self.sectors.len() {
                return false;
            }
            buf[i as usize * SECTOR_SIZE..(i as usize + 1) * SECTOR_SIZE]
                .copy_from_slice(&self.sectors[idx]);
        }
        true
    }

    fn write(&mut self, _lun: u8, buf: &[u8], sector: u64, count: u32) -> bool {
        for i in 0..count as u64 {
            let idx = (sector + i) as usize;
            if idx >= self.sectors.len() {
                return false;
            }
            self.sectors[idx]
                .copy_from_slice(&buf[i as usize * SECTOR_SIZE..(i as usize + 1) * SECTOR_SIZE]);
        }
        true
    }
}

const LUN: u8 = 0;
const FILES: &[(&str, usize)] = &[("/1k", 1024), ("/100k", 100 * 1024), ("/5M", 5 * 1024 * 1024)];

fn bench_read_speed(c: &mut Criterion) {
    let _ = env_logger::builder().is_test(false).try_init();

    let mut group = c.benchmark_group("read speed");

    let plot_config = PlotConfiguration::default().summary_scale(AxisScale::Logarithmic);
    group.plot_config(plot_config);

    let mut dev = MemDisk::with_bytes(32 * 1024 * 1024);
    let mut mgr = Manager::new();
    mgr.format(&mut dev, LUN, 0, &EpochClock).unwrap();

    for &(path, size) in FILES {
        let content = vec![0xAAu8; size];
        let h = mgr.create(&mut dev, path, fatdrv::fat::types::attr::ARCHIVE, &EpochClock).unwrap();
        mgr.write(&mut dev, h, &content).unwrap();
        mgr.close(&mut dev, h).unwrap();
    }

    for &(path, size) in FILES {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("file read speed", size), &size, |b, &size| {
            let mut buf = vec![0u8; size];
            b.iter(|| {
                let h = mgr.open(&mut dev, path, OpenMode::Read).unwrap();
                let mut total = 0usize;
                while total < buf.len() {
                    let n = mgr.read(&mut dev, h, &mut buf[total..]).unwrap() as usize;
                    if n == 0 {
                        break;
                    }
                    total += n;
                }
                mgr.close(&mut dev, h).unwrap();
                total
            })
        });
    }
}

criterion_group!(benches, bench_read_speed);
criterion_main!(benches);
