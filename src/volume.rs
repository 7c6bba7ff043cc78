//! The filesystem façade: mounts a `BlockDevice`, owns the in-memory FAT
//! and root directory, and is the thing every other module's device-facing
//! method is ultimately reached through.

use alloc::rc::Rc;
use core::cell::Cell;

use crate::boot_sector::BootSector;
use crate::cluster_chain::ClusterChain;
use crate::datetime::DosTimestamp;
use crate::device::BlockDevice;
use crate::directory::{AbstractDirectory, DirectoryBacking};
use crate::error::{CorruptionKind, Error, FatError};
use crate::fat::{Fat, FatType};
use crate::fs_info::FsInfoSector;
use crate::lfn_directory::FatLfnDirectory;
use crate::shortname_gen::XorShiftRng;

/// Caller-supplied mount knobs. A plain two-field struct reads better at
/// call sites than two positional bools.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountOptions {
    pub read_only: bool,
    pub ignore_fat_differences: bool,
}

pub struct FatFileSystem {
    boot_sector: BootSector,
    fat: Fat,
    fs_info: Option<FsInfoSector>,
    root: FatLfnDirectory,
    options: MountOptions,
    open: bool,
    /// Shared with every `File`/`FatLfnDirectory` vended through `root()`/
    /// `parts()`. Bumped once in `close()`; any handle whose recorded
    /// generation no longer matches fails with `FatError::AlreadyInvalid`.
    generation: Rc<Cell<u64>>,
}

fn read_sectors<D: BlockDevice>(
    device: &mut D,
    start: u64,
    count: u64,
    sector_size: usize,
) -> Result<alloc::vec::Vec<u8>, Error<D::Error>> {
    let mut buf = alloc::vec![0u8; (count as usize) * sector_size];
    for (i, chunk) in buf.chunks_mut(sector_size).enumerate() {
        device.read_sector(start + i as u64, chunk).map_err(Error::Device)?;
    }
    Ok(buf)
}

fn write_sectors<D: BlockDevice>(
    device: &mut D,
    start: u64,
    bytes: &[u8],
    sector_size: usize,
) -> Result<(), Error<D::Error>> {
    for (i, chunk) in bytes.chunks(sector_size).enumerate() {
        device.write_sector(start + i as u64, chunk).map_err(Error::Device)?;
    }
    Ok(())
}

/// Volumes have no real-time clock to consult in a `no_std` driver; this
/// is the timestamp every internally-created entry (format's root, a
/// freshly allocated subdirectory's `.`/`..`) gets. Callers that need real
/// wall-clock timestamps pass their own `DosTimestamp` to `create_file`/
/// `create_directory`.
pub fn unspecified_epoch() -> DosTimestamp {
    DosTimestamp::new(DosTimestamp::EPOCH_YEAR, 1, 1, 0, 0, 0)
}

impl FatFileSystem {
    /// Mounts an existing volume: reads the boot sector, both FAT copies
    /// (comparing them unless `ignore_fat_differences`), the FS-info
    /// sector on FAT32, and the root directory.
    pub fn mount<D: BlockDevice>(device: &mut D, options: MountOptions) -> Result<Self, Error<D::Error>> {
        let sector_size = device.sector_size() as usize;
        let mut first_sector = alloc::vec![0u8; sector_size.max(512)];
        device.read_sector(0, &mut first_sector[..sector_size]).map_err(Error::Device)?;
        let boot_sector = BootSector::parse(&first_sector)?;

        let fat_type = boot_sector.fat_type();
        let cluster_count = boot_sector.cluster_count();
        let fat_bytes = read_sectors(
            device,
            boot_sector.first_fat_sector(),
            boot_sector.sectors_per_fat() as u64,
            sector_size,
        )?;
        let fat = Fat::from_bytes(fat_type, &fat_bytes, cluster_count);

        if boot_sector.fat_count > 1 && !options.ignore_fat_differences {
            let second_fat_bytes = read_sectors(
                device,
                boot_sector.first_fat_sector() + boot_sector.sectors_per_fat() as u64,
                boot_sector.sectors_per_fat() as u64,
                sector_size,
            )?;
            let second = Fat::from_bytes(fat_type, &second_fat_bytes, cluster_count);
            if fat != second {
                return Err(FatError::CorruptVolume(CorruptionKind::FatCopiesDiffer).into());
            }
        }

        let fs_info = if fat_type == FatType::Fat32 && boot_sector.fs_info_sector != 0 {
            let bytes = read_sectors(device, boot_sector.fs_info_sector as u64, 1, sector_size)?;
            let info = FsInfoSector::parse(&bytes)?;
            if !options.ignore_fat_differences && !info.agrees_with(fat.free_cluster_count()) {
                return Err(FatError::CorruptVolume(CorruptionKind::FsInfoMismatch).into());
            }
            Some(info)
        } else {
            None
        };

        let seed = boot_sector.bytes_per_sector as u32 ^ boot_sector.total_sectors() as u32;
        let (backing, own_cluster) = if fat_type == FatType::Fat32 {
            (DirectoryBacking::Chain(ClusterChain::new(boot_sector.root_cluster)), boot_sector.root_cluster)
        } else {
            (
                DirectoryBacking::Fixed {
                    start_sector: boot_sector.first_root_dir_sector(),
                    sector_count: boot_sector.root_dir_sectors(),
                },
                0,
            )
        };
        let mut ad = AbstractDirectory::new(backing);
        ad.load(device, &fat, &boot_sector)?;
        let generation = Rc::new(Cell::new(0));
        let root = FatLfnDirectory::from_loaded(
            ad,
            XorShiftRng::new(seed),
            own_cluster,
            options.read_only,
            generation.clone(),
        )?;

        Ok(FatFileSystem {
            boot_sector,
            fat,
            fs_info,
            root,
            options,
            open: true,
            generation,
        })
    }

    /// Formats a blank device with a single FAT volume of the requested
    /// flavor. Geometry (cluster size, FAT count, reserved sectors) is
    /// chosen by convention rather than taken from the caller — this is
    /// meant for bringing up test/benchmark volumes, not for replicating a
    /// full `mkfs` utility.
    pub fn format<D: BlockDevice>(
        device: &mut D,
        fat_type: FatType,
        options: MountOptions,
    ) -> Result<Self, Error<D::Error>> {
        let sector_size = device.sector_size() as u16;
        let total_sectors = device.sector_count() as u32;
        // One sector per cluster regardless of flavor: this is meant for
        // bringing up test/benchmark volumes, not for replicating the
        // cluster-size heuristics a real `mkfs.fat` uses.
        let sectors_per_cluster: u8 = 1;
        let fat_count: u8 = 2;

        let boot_sector = match fat_type {
            FatType::Fat32 => {
                let reserved = 32u16;
                let data_estimate = total_sectors.saturating_sub(reserved as u32);
                let cluster_estimate =
                    (data_estimate / sectors_per_cluster as u32).max(FatType::FAT16_MAX_CLUSTERS + 1);
                let sectors_per_fat =
                    ((cluster_estimate as u64 + 2) * 4 + sector_size as u64 - 1) / sector_size as u64;
                BootSector::new_fat32(
                    sector_size,
                    sectors_per_cluster,
                    reserved,
                    fat_count,
                    total_sectors,
                    sectors_per_fat as u32,
                    2,
                    1,
                    6,
                )
            }
            _ => {
                let reserved = 1u16;
                let root_entry_count = 512u16;
                let root_dir_sectors =
                    (root_entry_count as u32 * 32 + sector_size as u32 - 1) / sector_size as u32;
                let data_estimate =
                    total_sectors.saturating_sub(reserved as u32 + root_dir_sectors);
                let cluster_estimate = (data_estimate / sectors_per_cluster as u32).max(1);
                let bits = fat_type.bits_per_entry();
                let sectors_per_fat = (((cluster_estimate as u64 + 2) * bits as u64 / 8)
                    + sector_size as u64
                    - 1)
                    / sector_size as u64;
                BootSector::new_legacy(
                    sector_size,
                    sectors_per_cluster,
                    reserved,
                    fat_count,
                    root_entry_count,
                    total_sectors,
                    sectors_per_fat as u16,
                )
            }
        };

        let mut fat = Fat::new_formatted(fat_type, boot_sector.cluster_count());
        let generation = Rc::new(Cell::new(0));

        let (root, fs_info) = if fat_type == FatType::Fat32 {
            let root_cluster = fat.alloc_new()?;
            let mut ad = AbstractDirectory::new(DirectoryBacking::Chain(ClusterChain::new(root_cluster)));
            ad.init_empty(&boot_sector, &fat)?;
            let root = FatLfnDirectory::from_loaded(
                ad,
                XorShiftRng::new(0x5eed),
                root_cluster,
                options.read_only,
                generation.clone(),
            )?;
            let info = FsInfoSector {
                free_cluster_count: fat.free_cluster_count(),
                next_free_cluster: root_cluster + 1,
            };
            (root, Some(info))
        } else {
            let mut ad = AbstractDirectory::new(DirectoryBacking::Fixed {
                start_sector: boot_sector.first_root_dir_sector(),
                sector_count: boot_sector.root_dir_sectors(),
            });
            ad.init_empty(&boot_sector, &fat)?;
            let root = FatLfnDirectory::from_loaded(
                ad,
                XorShiftRng::new(0x5eed),
                0,
                options.read_only,
                generation.clone(),
            )?;
            (root, None)
        };

        let mut fs = FatFileSystem {
            boot_sector,
            fat,
            fs_info,
            root,
            options,
            open: true,
            generation,
        };
        fs.flush(device)?;
        Ok(fs)
    }

    fn check_open(&self) -> Result<(), FatError> {
        if self.open {
            Ok(())
        } else {
            Err(FatError::AlreadyClosed)
        }
    }

    pub fn root(&mut self) -> Result<&mut FatLfnDirectory, FatError> {
        self.check_open()?;
        Ok(&mut self.root)
    }

    /// Splits the filesystem into its root directory plus the FAT/boot
    /// sector references most directory and file operations need
    /// alongside it. A plain field-by-field borrow rather than a method
    /// that takes `&mut self` for the whole call — `root()` alone would
    /// hold `self` borrowed for as long as the returned directory is in
    /// use, which is incompatible with also needing `&mut self.fat` in the
    /// same scope to pass to e.g. `open_file`/`create_directory`.
    pub fn parts(&mut self) -> Result<(&mut FatLfnDirectory, &mut Fat, &BootSector), FatError> {
        self.check_open()?;
        Ok((&mut self.root, &mut self.fat, &self.boot_sector))
    }

    pub fn fat_type(&self) -> FatType {
        self.fat.fat_type()
    }

    pub fn free_cluster_count(&self) -> u32 {
        self.fat.free_cluster_count()
    }

    pub fn cluster_size(&self) -> u32 {
        self.boot_sector.bytes_per_cluster()
    }

    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    pub fn fat_mut(&mut self) -> &mut Fat {
        &mut self.fat
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    /// Writes the FAT (all copies), the FS-info sector, the boot sector,
    /// and the full directory tree (root plus every already-opened child)
    /// back to the device.
    pub fn flush<D: BlockDevice>(&mut self, device: &mut D) -> Result<(), Error<D::Error>> {
        self.check_open()?;
        let sector_size = self.boot_sector.bytes_per_sector as usize;
        let sectors_per_fat = self.boot_sector.sectors_per_fat() as u64;
        let fat_bytes = self.fat.to_bytes((sectors_per_fat as usize) * sector_size);

        for copy in 0..self.boot_sector.fat_count as u64 {
            let start = self.boot_sector.first_fat_sector() + copy * sectors_per_fat;
            write_sectors(device, start, &fat_bytes, sector_size)?;
        }

        if let Some(info) = &mut self.fs_info {
            info.free_cluster_count = self.fat.free_cluster_count();
            let bytes = info.to_bytes(sector_size);
            write_sectors(device, self.boot_sector.fs_info_sector as u64, &bytes, sector_size)?;
        }

        write_sectors(device, 0, &self.boot_sector.to_bytes(), sector_size)?;
        if self.boot_sector.backup_boot_sector != 0 {
            write_sectors(
                device,
                self.boot_sector.backup_boot_sector as u64,
                &self.boot_sector.to_bytes(),
                sector_size,
            )?;
        }

        self.root.flush(device, &self.fat, &self.boot_sector)?;
        device.flush().map_err(Error::Device)?;
        Ok(())
    }

    /// Flushes and releases the device. The filesystem is `AlreadyClosed`
    /// to every operation after this, including a second `close`. Also
    /// bumps the shared generation counter, so any `File`/`FatLfnDirectory`
    /// handle still outstanding from before this call now fails with
    /// `AlreadyInvalid` instead of silently operating on a device that's no
    /// longer open.
    pub fn close<D: BlockDevice>(&mut self, device: &mut D) -> Result<(), Error<D::Error>> {
        self.check_open()?;
        if !self.options.read_only {
            self.flush(device)?;
        }
        device.close().map_err(Error::Device)?;
        self.open = false;
        self.generation.set(self.generation.get().wrapping_add(1));
        Ok(())
    }
}
