//! The File Allocation Table itself: a packed array of cluster links kept
//! fully in memory once read off the device, rather than streaming through
//! a cache for every entry access.

use alloc::vec;
use alloc::vec::Vec;

use crate::codec::{read_u12, read_u16, read_u32, write_u12, write_u16, write_u32};
use crate::error::FatError;
use crate::fat::FatType;

/// An in-memory FAT. Entries are stored unpacked (`Vec<u32>`) for O(1)
/// access and only packed back down to the on-disk 12/16/32-bit width when
/// serialized — packing/unpacking 12-bit entries on every access would make
/// chain walks quadratic in the worst case.
pub struct Fat {
    fat_type: FatType,
    entries: Vec<u32>,
    free_count: u32,
    next_free_hint: u32,
}

impl Fat {
    /// Unpacks a FAT from its on-disk bytes (one copy; the caller is
    /// responsible for comparing copies against each other per
    /// `ignore_fat_differences`).
    pub fn from_bytes(fat_type: FatType, bytes: &[u8], cluster_count: u32) -> Self {
        let total_entries = (cluster_count + FatType::FIRST_DATA_CLUSTER) as usize;
        let mut entries = vec![0u32; total_entries];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = match fat_type {
                FatType::Fat12 => read_u12(bytes, i as u32) as u32,
                FatType::Fat16 => read_u16(bytes, i * 2) as u32,
                FatType::Fat32 => read_u32(bytes, i * 4) & 0x0fff_ffff,
            };
        }
        let free_count = entries
            .iter()
            .skip(FatType::FIRST_DATA_CLUSTER as usize)
            .filter(|&&e| e == 0)
            .count() as u32;
        Fat {
            fat_type,
            entries,
            free_count,
            next_free_hint: FatType::FIRST_DATA_CLUSTER,
        }
    }

    /// Serializes this table back to on-disk packed form, sized for
    /// `bytes_per_fat` bytes.
    pub fn to_bytes(&self, bytes_per_fat: usize) -> Vec<u8> {
        let mut buf = vec![0u8; bytes_per_fat];
        for (i, &entry) in self.entries.iter().enumerate() {
            match self.fat_type {
                FatType::Fat12 => write_u12(&mut buf, i as u32, entry as u16),
                FatType::Fat16 => write_u16(&mut buf, i * 2, entry as u16),
                FatType::Fat32 => {
                    // Preserve the top 4 reserved bits already present (none,
                    // since we zero-initialize) and store 28 bits of link.
                    write_u32(&mut buf, i * 4, entry & 0x0fff_ffff);
                }
            }
        }
        buf
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn free_cluster_count(&self) -> u32 {
        self.free_count
    }

    fn check_index(&self, cluster: u32) -> Result<(), FatError> {
        if (cluster as usize) < self.entries.len() && cluster >= FatType::FIRST_DATA_CLUSTER {
            Ok(())
        } else {
            Err(FatError::InvalidArgument)
        }
    }

    pub fn get(&self, cluster: u32) -> Result<u32, FatError> {
        self.check_index(cluster)?;
        Ok(self.entries[cluster as usize])
    }

    fn set(&mut self, cluster: u32, value: u32) -> Result<(), FatError> {
        self.check_index(cluster)?;
        let was_free = self.entries[cluster as usize] == 0;
        let is_free = value == 0;
        if was_free && !is_free {
            self.free_count -= 1;
        } else if !was_free && is_free {
            self.free_count += 1;
        }
        self.entries[cluster as usize] = value;
        Ok(())
    }

    /// Walks the chain starting at `start`, returning every cluster index
    /// visited in order. Errors on a self-reference, a free/reserved/bad
    /// entry found mid-chain, or an out-of-range link — all structural
    /// corruption per spec's corruption categorization.
    pub fn get_chain(&self, start: u32) -> Result<Vec<u32>, FatError> {
        let mut chain = Vec::new();
        let mut current = start;
        loop {
            self.check_index(current)?;
            if chain.contains(&current) {
                return Err(FatError::CorruptVolume(crate::error::CorruptionKind::InvalidChain));
            }
            chain.push(current);
            let next = self.entries[current as usize];
            if self.fat_type.is_eoc(next) {
                break;
            }
            if self.fat_type.is_free(next)
                || self.fat_type.is_bad(next)
                || self.fat_type.is_reserved(next)
            {
                return Err(FatError::CorruptVolume(crate::error::CorruptionKind::InvalidChain));
            }
            current = next;
        }
        Ok(chain)
    }

    /// Finds the next free cluster at or after the hint, wrapping once.
    fn find_free(&self) -> Result<u32, FatError> {
        let total = self.entries.len() as u32;
        for cluster in self.next_free_hint..total {
            if self.entries[cluster as usize] == 0 {
                return Ok(cluster);
            }
        }
        for cluster in FatType::FIRST_DATA_CLUSTER..self.next_free_hint {
            if self.entries[cluster as usize] == 0 {
                return Ok(cluster);
            }
        }
        Err(FatError::FatFull)
    }

    /// Allocates a single new cluster, marking it end-of-chain. Returns the
    /// new cluster's index.
    pub fn alloc_new(&mut self) -> Result<u32, FatError> {
        if self.free_count == 0 {
            log::warn!("FAT allocation requested with zero free clusters recorded");
            return Err(FatError::FatFull);
        }
        let cluster = self.find_free()?;
        self.set(cluster, self.fat_type.eoc_marker())?;
        self.next_free_hint = cluster + 1;
        Ok(cluster)
    }

    /// Allocates a new cluster and appends it to the chain containing
    /// `tail`. `tail` need not already be the chain's end — any cluster
    /// belonging to the chain is walked to its real end-of-chain entry
    /// first.
    pub fn alloc_append(&mut self, tail: u32) -> Result<u32, FatError> {
        let chain = self.get_chain(tail)?;
        let real_tail = *chain.last().expect("get_chain always returns at least one cluster");
        let new_cluster = self.alloc_new()?;
        self.set(real_tail, new_cluster)?;
        Ok(new_cluster)
    }

    /// Frees every cluster in `chain`, in the order given. Used both for
    /// truncation (a suffix of a chain) and for whole-chain deletion.
    pub fn free_chain(&mut self, chain: &[u32]) -> Result<(), FatError> {
        for &cluster in chain {
            self.set(cluster, 0)?;
        }
        if let Some(&first) = chain.first() {
            if first < self.next_free_hint {
                self.next_free_hint = first;
            }
        }
        Ok(())
    }

    /// Marks `cluster` as end-of-chain, detaching whatever followed it
    /// without freeing the rest — used by `set_chain_length` when it
    /// truncates, where the caller frees the detached suffix separately
    /// after confirming how far it extends.
    pub fn terminate(&mut self, cluster: u32) -> Result<(), FatError> {
        self.check_index(cluster)?;
        let marker = self.fat_type.eoc_marker();
        self.entries[cluster as usize] = marker;
        Ok(())
    }

    /// Builds a fresh, all-free FAT for formatting, with the two reserved
    /// entries set to the conventional media-descriptor/EOC values (never
    /// consulted by `get_chain`/`alloc_new`, which both start at cluster 2,
    /// but worth writing correctly for a volume other tools will read).
    pub fn new_formatted(fat_type: FatType, cluster_count: u32) -> Self {
        let total_entries = (cluster_count + FatType::FIRST_DATA_CLUSTER) as usize;
        let mut entries = vec![0u32; total_entries];
        entries[0] = fat_type.eoc_marker() & 0xffff_ff00 | 0xf8;
        entries[1] = fat_type.eoc_marker();
        Fat {
            fat_type,
            entries,
            free_count: cluster_count,
            next_free_hint: FatType::FIRST_DATA_CLUSTER,
        }
    }
}

impl PartialEq for Fat {
    /// Used at mount to detect divergent FAT copies (`ignore_fat_differences`
    /// controls whether a mismatch is fatal). Only entry contents matter;
    /// the free-cluster hint is bookkeeping, not on-disk state.
    fn eq(&self, other: &Self) -> bool {
        self.fat_type == other.fat_type && self.entries == other.entries
    }
}
