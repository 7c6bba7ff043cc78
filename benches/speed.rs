//! Sequential cluster-chain read throughput, at a few file sizes.

extern crate criterion;

use criterion::{
    criterion_group, criterion_main, AxisScale, BatchSize, BenchmarkId, Criterion,
    PlotConfiguration, Throughput,
};

use fatlib::volume::unspecified_epoch;
use fatlib::{BlockDevice, FatFileSystem, FatType, MountOptions};

struct MemoryDevice {
    sector_size: u32,
    sectors: Vec<u8>,
}

#[derive(Debug)]
struct MemoryDeviceError;

impl MemoryDevice {
    fn new(sector_size: u32, sector_count: u64) -> Self {
        MemoryDevice {
            sector_size,
            sectors: vec![0u8; sector_size as usize * sector_count as usize],
        }
    }
}

impl BlockDevice for MemoryDevice {
    type Error = MemoryDeviceError;

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sectors.len() as u64 / self.sector_size as u64
    }

    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let start = sector as usize * self.sector_size as usize;
        if start + buf.len() > self.sectors.len() {
            return Err(MemoryDeviceError);
        }
        buf.copy_from_slice(&self.sectors[start..start + buf.len()]);
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buf: &[u8]) -> Result<(), Self::Error> {
        let start = sector as usize * self.sector_size as usize;
        if start + buf.len() > self.sectors.len() {
            return Err(MemoryDeviceError);
        }
        self.sectors[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

const FILE_SIZES: &[(&str, usize)] = &[("1k", 1024), ("100k", 100 * 1024), ("2M", 2 * 1024 * 1024)];

fn bench_read_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster chain read speed");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &(label, size) in FILE_SIZES {
        let total_sectors = (size as u64 / 512).max(1) * 4 + 4096;
        let mut device = MemoryDevice::new(512, total_sectors);
        let mut fs = FatFileSystem::format(&mut device, FatType::Fat32, MountOptions::default()).unwrap();
        let created = unspecified_epoch();
        let payload = vec![0xa5u8; size];
        {
            let (root, fat, bs) = fs.parts().unwrap();
            root.create_file(bs, fat, "BENCH.BIN", created).unwrap();
            let file = root.open_file("BENCH.BIN").unwrap();
            file.write(&mut device, fat, bs, 0, &payload, created).unwrap();
        }
        fs.flush(&mut device).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("read", label), &size, |b, &size| {
            b.iter_batched(
                || vec![0u8; size],
                |mut buf| {
                    let (root, fat, bs) = fs.parts().unwrap();
                    let file = root.open_file("BENCH.BIN").unwrap();
                    let n = file.read(&mut device, fat, bs, 0, &mut buf, created).unwrap();
                    assert_eq!(n, size);
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_read_speed);
criterion_main!(benches);
