//! A cluster chain: the data clusters backing a file or a FAT32/cluster-
//! chain-backed directory, addressed through the FAT and read/written a
//! cluster at a time through the boot sector's geometry.

use alloc::vec;
use alloc::vec::Vec;

use crate::boot_sector::BootSector;
use crate::device::BlockDevice;
use crate::error::{Error, FatError};
use crate::fat::Fat;

/// The cluster chain backing one file or directory. Just the starting
/// cluster — length is always derived by walking the FAT rather than
/// cached redundantly, so there's nothing here that can go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterChain {
    /// 0 means the chain is empty (a brand new, zero-length file).
    start_cluster: u32,
}

impl ClusterChain {
    pub fn new(start_cluster: u32) -> Self {
        ClusterChain { start_cluster }
    }

    pub fn empty() -> Self {
        ClusterChain { start_cluster: 0 }
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    pub fn is_empty(&self) -> bool {
        self.start_cluster == 0
    }

    /// Every cluster index in the chain, in order.
    pub fn clusters(&self, fat: &Fat) -> Result<Vec<u32>, FatError> {
        if self.is_empty() {
            Ok(Vec::new())
        } else {
            fat.get_chain(self.start_cluster)
        }
    }

    pub fn length_in_clusters(&self, fat: &Fat) -> Result<u32, FatError> {
        Ok(self.clusters(fat)?.len() as u32)
    }

    /// Grows or shrinks the chain to exactly `new_len` clusters, allocating
    /// or freeing as needed. On allocation failure partway through a grow,
    /// whatever was allocated before the failure is freed again before
    /// returning — callers never observe a chain left longer than before a
    /// failed grow.
    pub fn set_chain_length(&mut self, fat: &mut Fat, new_len: u32) -> Result<(), FatError> {
        let current = self.clusters(fat)?;
        let current_len = current.len() as u32;

        if new_len == current_len {
            return Ok(());
        }

        if new_len == 0 {
            fat.free_chain(&current)?;
            self.start_cluster = 0;
            return Ok(());
        }

        if new_len < current_len {
            let keep = new_len as usize;
            fat.terminate(current[keep - 1])?;
            fat.free_chain(&current[keep..])?;
            return Ok(());
        }

        // Growing: allocate one cluster at a time, unwinding on failure.
        let to_add = new_len - current_len;
        let mut allocated = Vec::new();
        let result = (|| -> Result<(), FatError> {
            if current_len == 0 {
                let first = fat.alloc_new()?;
                self.start_cluster = first;
                allocated.push(first);
            }
            let mut tail = *allocated.last().unwrap_or_else(|| current.last().unwrap());
            let remaining = if current_len == 0 { to_add - 1 } else { to_add };
            for _ in 0..remaining {
                let next = fat.alloc_append(tail)?;
                allocated.push(next);
                tail = next;
            }
            Ok(())
        })();

        if let Err(e) = result {
            if !allocated.is_empty() {
                let _ = fat.free_chain(&allocated);
                if current_len == 0 {
                    self.start_cluster = 0;
                } else {
                    let _ = fat.terminate(*current.last().unwrap());
                }
            }
            return Err(e);
        }

        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at byte `offset` into the
    /// chain, stopping at the chain's end. Returns the number of bytes
    /// actually read. Reading a non-zero number of bytes from an empty
    /// chain fails with `EndOfData` rather than silently returning `Ok(0)`.
    pub fn read_data<D: BlockDevice>(
        &self,
        device: &mut D,
        fat: &Fat,
        boot_sector: &BootSector,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, Error<D::Error>> {
        if self.is_empty() && !buf.is_empty() {
            return Err(FatError::EndOfData.into());
        }
        let bytes_per_cluster = boot_sector.bytes_per_cluster() as u64;
        let clusters = self.clusters(fat)?;
        let mut total = 0usize;
        let mut remaining = buf.len();
        let mut pos = offset;

        while remaining > 0 {
            let cluster_idx = (pos / bytes_per_cluster) as usize;
            let Some(&cluster) = clusters.get(cluster_idx) else {
                break;
            };
            let within = (pos % bytes_per_cluster) as usize;
            let to_read = remaining.min(bytes_per_cluster as usize - within);

            let sector_size = boot_sector.bytes_per_sector as usize;
            let start_sector = boot_sector.cluster_to_sector(cluster);
            let mut cluster_buf = vec![0u8; bytes_per_cluster as usize];
            for (i, chunk) in cluster_buf.chunks_mut(sector_size).enumerate() {
                device
                    .read_sector(start_sector + i as u64, chunk)
                    .map_err(Error::Device)?;
            }

            buf[total..total + to_read].copy_from_slice(&cluster_buf[within..within + to_read]);

            total += to_read;
            remaining -= to_read;
            pos += to_read as u64;
        }

        Ok(total)
    }

    /// Writes `buf` at byte `offset`, growing the chain as needed. Returns
    /// the number of bytes written (always `buf.len()` unless allocation
    /// runs out mid-write, in which case it's a prefix).
    pub fn write_data<D: BlockDevice>(
        &mut self,
        device: &mut D,
        fat: &mut Fat,
        boot_sector: &BootSector,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize, Error<D::Error>> {
        if buf.is_empty() {
            return Ok(0);
        }
        let bytes_per_cluster = boot_sector.bytes_per_cluster() as u64;
        let end = offset + buf.len() as u64;
        let needed_clusters = ((end + bytes_per_cluster - 1) / bytes_per_cluster) as u32;
        let current_len = self.length_in_clusters(fat)?;
        if needed_clusters > current_len {
            self.set_chain_length(fat, needed_clusters)?;
        }

        let clusters = self.clusters(fat)?;
        let mut total = 0usize;
        let mut remaining = buf.len();
        let mut pos = offset;
        let sector_size = boot_sector.bytes_per_sector as usize;

        while remaining > 0 {
            let cluster_idx = (pos / bytes_per_cluster) as usize;
            let cluster = clusters[cluster_idx];
            let within = (pos % bytes_per_cluster) as usize;
            let to_write = remaining.min(bytes_per_cluster as usize - within);

            let start_sector = boot_sector.cluster_to_sector(cluster);
            let mut cluster_buf = vec![0u8; bytes_per_cluster as usize];
            if within != 0 || to_write != bytes_per_cluster as usize {
                for (i, chunk) in cluster_buf.chunks_mut(sector_size).enumerate() {
                    device
                        .read_sector(start_sector + i as u64, chunk)
                        .map_err(Error::Device)?;
                }
            }
            cluster_buf[within..within + to_write]
                .copy_from_slice(&buf[total..total + to_write]);
            for (i, chunk) in cluster_buf.chunks(sector_size).enumerate() {
                device
                    .write_sector(start_sector + i as u64, chunk)
                    .map_err(Error::Device)?;
            }

            total += to_write;
            remaining -= to_write;
            pos += to_write as u64;
        }

        Ok(total)
    }
}
