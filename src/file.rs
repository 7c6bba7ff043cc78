//! A handle to an open file's data: a cluster chain plus the directory
//! entry (size, attributes, timestamps) that describes it.

use alloc::rc::Rc;
use core::cell::Cell;

use crate::boot_sector::BootSector;
use crate::cluster_chain::ClusterChain;
use crate::datetime::DosTimestamp;
use crate::device::BlockDevice;
use crate::dir_entry::FatDirectoryEntry;
use crate::error::{Error, FatError};
use crate::fat::Fat;

pub struct File {
    entry: FatDirectoryEntry,
    chain: ClusterChain,
    generation: u64,
    counter: Rc<Cell<u64>>,
    read_only: bool,
}

impl File {
    /// `read_only` comes from the mount's `MountOptions`, not the entry's
    /// own read-only attribute bit (`is_read_only`) — either one blocks a
    /// write. `counter` is the filesystem's shared generation counter;
    /// every handle remembers its value at vend time and compares against
    /// it on every operation, so a handle outstanding across the owning
    /// `FatFileSystem::close()` fails with `AlreadyInvalid` instead of
    /// reading or writing through a device that's no longer open.
    pub(crate) fn new(entry: FatDirectoryEntry, read_only: bool, counter: Rc<Cell<u64>>) -> Self {
        let chain = if entry.first_cluster() == 0 {
            ClusterChain::empty()
        } else {
            ClusterChain::new(entry.first_cluster())
        };
        let generation = counter.get();
        File { entry, chain, generation, counter, read_only }
    }

    fn check_valid(&self) -> Result<(), FatError> {
        if self.generation == self.counter.get() {
            Ok(())
        } else {
            Err(FatError::AlreadyInvalid)
        }
    }

    pub fn len(&self) -> u32 {
        self.entry.file_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read_only(&self) -> bool {
        self.entry.is_read_only()
    }

    pub fn entry(&self) -> &FatDirectoryEntry {
        &self.entry
    }

    /// Reads exactly `buf.len()` bytes at `offset`. Requires
    /// `offset + buf.len() <= length`; fails with `EndOfData` otherwise
    /// rather than returning a short read. Updates the entry's
    /// last-accessed date unless the file is read-only.
    pub fn read<D: BlockDevice>(
        &mut self,
        device: &mut D,
        fat: &Fat,
        boot_sector: &BootSector,
        offset: u64,
        buf: &mut [u8],
        now: DosTimestamp,
    ) -> Result<usize, Error<D::Error>> {
        self.check_valid()?;
        let len = self.len() as u64;
        if offset + buf.len() as u64 > len {
            return Err(FatError::EndOfData.into());
        }
        let read = self.chain.read_data(device, fat, boot_sector, offset, buf)?;
        if !self.is_read_only() && !self.read_only {
            self.entry.set_access_timestamp(now);
        }
        Ok(read)
    }

    /// Writes `buf` at `offset`, growing the chain and the recorded file
    /// size as needed. Updates the entry's last-modified and last-accessed
    /// timestamps.
    pub fn write<D: BlockDevice>(
        &mut self,
        device: &mut D,
        fat: &mut Fat,
        boot_sector: &BootSector,
        offset: u64,
        buf: &[u8],
        now: DosTimestamp,
    ) -> Result<usize, Error<D::Error>> {
        self.check_valid()?;
        if self.is_read_only() || self.read_only {
            return Err(FatError::ReadOnly.into());
        }
        let written = self.chain.write_data(device, fat, boot_sector, offset, buf)?;
        let new_len = offset + written as u64;
        if new_len > self.len() as u64 {
            self.entry.file_size = new_len as u32;
        }
        self.entry.set_first_cluster(self.chain.start_cluster());
        self.entry.set_write_timestamp(now);
        self.entry.set_access_timestamp(now);
        Ok(written)
    }

    /// Grows or truncates the file to exactly `new_len` bytes.
    pub fn set_len(&mut self, fat: &mut Fat, boot_sector: &BootSector, new_len: u32) -> Result<(), FatError> {
        self.check_valid()?;
        if self.is_read_only() || self.read_only {
            return Err(FatError::ReadOnly);
        }
        let bytes_per_cluster = boot_sector.bytes_per_cluster();
        let needed_clusters = if new_len == 0 {
            0
        } else {
            (new_len + bytes_per_cluster - 1) / bytes_per_cluster
        };
        self.chain.set_chain_length(fat, needed_clusters)?;
        self.entry.file_size = new_len;
        self.entry.set_first_cluster(self.chain.start_cluster());
        Ok(())
    }

    /// No buffered writes are held beyond what's already on the device —
    /// `write`/`set_len` apply immediately. This exists so callers don't
    /// need to special-case files vs. directories (which do buffer their
    /// index rebuild) when walking a tree to flush it.
    pub fn flush<D: BlockDevice>(
        &mut self,
        _device: &mut D,
        _fat: &Fat,
        _boot_sector: &BootSector,
    ) -> Result<(), Error<D::Error>> {
        self.check_valid()?;
        Ok(())
    }
}
