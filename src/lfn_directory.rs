//! The short-name/LFN entry model built on top of `AbstractDirectory`'s raw
//! slots, and the ownership tree of already-opened children.
//!
//! Where the format this grew out of cached opened files/directories by
//! object identity keyed on a generation counter, this keeps the same
//! invalidity guarantee a different way for most cases: a `FatLfnDirectory`
//! owns its children directly, so removing one (`take_entry`) takes the
//! only copy out of the tree outright rather than invalidating a reference
//! to a shared cache slot. The one case ownership can't cover — a handle
//! outstanding across the owning `FatFileSystem::close()` — is covered by
//! the same shared `Rc<Cell<u64>>` generation counter the filesystem vends
//! to every `File`/`FatLfnDirectory` it opens; `close()` bumps it once, and
//! every handle compares its own recorded generation against the live one
//! before doing anything.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::Cell;

use crate::boot_sector::BootSector;
use crate::cluster_chain::ClusterChain;
use crate::datetime::DosTimestamp;
use crate::device::BlockDevice;
use crate::dir_entry::{FatDirectoryEntry, ATTR_VOLUME_ID, ENTRY_SIZE};
use crate::directory::{AbstractDirectory, DirectoryBacking};
use crate::error::{Error, FatError};
use crate::fat::Fat;
use crate::file::File;
use crate::lfn::{self, LfnSlot};
use crate::short_name::ShortName;
use crate::shortname_gen::{self, XorShiftRng};

fn lfn_slot_count(name: &str) -> usize {
    let units = name.encode_utf16().count();
    ((units + lfn::CHARS_PER_SLOT - 1) / lfn::CHARS_PER_SLOT).max(1)
}

/// One logical directory entry: the short entry that's always present plus
/// the long name it stands in for, if any.
#[derive(Debug, Clone)]
pub struct LfnEntry {
    pub short: FatDirectoryEntry,
    pub long_name: Option<String>,
}

impl LfnEntry {
    pub fn display_name(&self) -> String {
        self.long_name
            .clone()
            .unwrap_or_else(|| self.short.name.display())
    }
}

/// An already-materialized child, kept alive as long as its parent is.
pub enum DirectoryChild {
    File(File),
    Directory(FatLfnDirectory),
}

pub struct FatLfnDirectory {
    dir: AbstractDirectory,
    short_name_index: BTreeMap<[u8; 11], LfnEntry>,
    long_name_index: BTreeMap<String, [u8; 11]>,
    order: Vec<[u8; 11]>,
    children: BTreeMap<[u8; 11], DirectoryChild>,
    rng: XorShiftRng,
    own_cluster: u32,
    generation: u64,
    counter: Rc<Cell<u64>>,
    read_only: bool,
    /// The volume-label entry (`ATTR_VOLUME_ID`), if this directory (always
    /// the root) carries one. Preserved across rebuilds so a flush doesn't
    /// silently drop a label that was already on disk; this crate has no
    /// API to set one itself.
    label: Option<FatDirectoryEntry>,
}

impl FatLfnDirectory {
    /// Builds the index structures from a directory region already read
    /// off the device. `read_only` comes from the mount's `MountOptions`
    /// and is inherited by every file and subdirectory opened through this
    /// one.
    pub fn from_loaded(
        dir: AbstractDirectory,
        rng: XorShiftRng,
        own_cluster: u32,
        read_only: bool,
        counter: Rc<Cell<u64>>,
    ) -> Result<Self, FatError> {
        let generation = counter.get();
        let mut me = FatLfnDirectory {
            dir,
            short_name_index: BTreeMap::new(),
            long_name_index: BTreeMap::new(),
            order: Vec::new(),
            children: BTreeMap::new(),
            rng,
            own_cluster,
            generation,
            counter,
            read_only,
            label: None,
        };
        me.rebuild_indexes()?;
        Ok(me)
    }

    /// Builds a brand new, empty directory (just `.` and `..`) in the
    /// single cluster the caller has already allocated for it.
    pub fn new_empty(
        boot_sector: &BootSector,
        fat: &mut Fat,
        own_cluster: u32,
        parent_cluster: u32,
        created: DosTimestamp,
        rng: XorShiftRng,
        read_only: bool,
        counter: Rc<Cell<u64>>,
    ) -> Result<Self, FatError> {
        let mut dot = FatDirectoryEntry::new_dir(ShortName::DOT, created);
        dot.set_first_cluster(own_cluster);
        let mut dot_dot = FatDirectoryEntry::new_dir(ShortName::DOT_DOT, created);
        dot_dot.set_first_cluster(parent_cluster);

        let mut short_name_index = BTreeMap::new();
        short_name_index.insert(*ShortName::DOT.raw(), LfnEntry { short: dot, long_name: None });
        short_name_index.insert(
            *ShortName::DOT_DOT.raw(),
            LfnEntry { short: dot_dot, long_name: None },
        );

        let generation = counter.get();
        let mut me = FatLfnDirectory {
            dir: AbstractDirectory::new(DirectoryBacking::Chain(ClusterChain::new(own_cluster))),
            short_name_index,
            long_name_index: BTreeMap::new(),
            order: alloc::vec![*ShortName::DOT.raw(), *ShortName::DOT_DOT.raw()],
            children: BTreeMap::new(),
            rng,
            own_cluster,
            generation,
            counter,
            read_only,
            label: None,
        };
        me.reserve_and_replace(boot_sector, fat)?;
        Ok(me)
    }

    pub fn is_valid(&self) -> bool {
        self.generation == self.counter.get()
    }

    fn check_valid(&self) -> Result<(), FatError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(FatError::AlreadyInvalid)
        }
    }

    fn check_writable(&self) -> Result<(), FatError> {
        self.check_valid()?;
        if self.read_only {
            Err(FatError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub fn own_cluster(&self) -> u32 {
        self.own_cluster
    }

    /// Whether this directory holds nothing but `.`/`..` — the precondition
    /// for removing it.
    pub fn is_empty_dir(&self) -> bool {
        self.order
            .iter()
            .all(|k| *k == *ShortName::DOT.raw() || *k == *ShortName::DOT_DOT.raw())
    }

    fn rebuild_indexes(&mut self) -> Result<(), FatError> {
        self.order.clear();
        self.short_name_index.clear();
        self.long_name_index.clear();
        self.label = None;
        let mut pending: Vec<LfnSlot> = Vec::new();

        for i in 0..self.dir.slots() {
            let bytes = self.dir.slot_bytes(i);
            match bytes[0] {
                0x00 => break,
                0xe5 => {
                    pending.clear();
                    continue;
                }
                _ => {}
            }
            let entry = FatDirectoryEntry::from_bytes(bytes);
            if entry.is_lfn_slot() {
                pending.push(LfnSlot::from_bytes(bytes));
                continue;
            }
            if entry.attributes & ATTR_VOLUME_ID != 0 {
                pending.clear();
                self.label = Some(entry);
                continue;
            }

            let long_name = if !pending.is_empty() {
                let checksums_match = pending.iter().all(|s| s.checksum == entry.checksum());
                let decoded = if checksums_match { lfn::decode(&pending) } else { None };
                pending.clear();
                decoded
            } else {
                None
            };

            let key = *entry.name.raw();
            if let Some(name) = &long_name {
                self.long_name_index.insert(name.clone(), key);
            }
            self.order.push(key);
            self.short_name_index.insert(key, LfnEntry { short: entry, long_name });
        }
        Ok(())
    }

    fn build_slots(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity((self.order.len() + 1) * ENTRY_SIZE);
        for key in &self.order {
            let entry = &self.short_name_index[key];
            if let Some(name) = &entry.long_name {
                for slot in lfn::encode(name, entry.short.checksum()) {
                    buf.extend_from_slice(&slot.to_bytes());
                }
            }
            buf.extend_from_slice(&entry.short.to_bytes());
        }
        if let Some(label) = &self.label {
            buf.extend_from_slice(&label.to_bytes());
        }
        buf
    }

    fn needed_slots(&self) -> usize {
        let entries: usize = self
            .order
            .iter()
            .map(|key| {
                let entry = &self.short_name_index[key];
                1 + entry.long_name.as_deref().map_or(0, lfn_slot_count)
            })
            .sum();
        entries + if self.label.is_some() { 1 } else { 0 }
    }

    /// Rebuilds the on-disk byte form from the current indices, growing
    /// the backing storage first if it doesn't already fit. This is the
    /// single place that persists a mutation to `self.dir`'s in-memory
    /// bytes; every mutating method ends by calling it.
    fn reserve_and_replace(&mut self, boot_sector: &BootSector, fat: &mut Fat) -> Result<(), FatError> {
        let needed = self.needed_slots();
        let capacity = self.dir.capacity_slots(boot_sector, fat)?;
        if needed > capacity {
            if !self.dir.can_grow() {
                return Err(FatError::DirectoryFull { capacity, requested: needed });
            }
            self.dir.grow_to(boot_sector, fat, needed)?;
        }
        let capacity = self.dir.capacity_slots(boot_sector, fat)?;
        let mut bytes = self.build_slots();
        bytes.resize(capacity * ENTRY_SIZE, 0);
        self.dir.replace_all(bytes);
        Ok(())
    }

    /// Whether `name` (lowercased, trimmed) already names an entry in this
    /// directory. Trimming happens here so every caller — `add_entry`,
    /// `put_entry`, `get_entry` via `lookup_key` — enforces the same
    /// uniqueness rule regardless of incidental leading/trailing spaces.
    fn name_exists(&self, name: &str) -> bool {
        let name = name.trim();
        if self.long_name_index.keys().any(|k| k.eq_ignore_ascii_case(name)) {
            return true;
        }
        self.short_name_index
            .values()
            .any(|e| e.long_name.is_none() && e.short.name.display().eq_ignore_ascii_case(name))
    }

    fn lookup_key(&self, name: &str) -> Option<[u8; 11]> {
        let name = name.trim();
        if let Some((_, &key)) = self.long_name_index.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            return Some(key);
        }
        self.short_name_index
            .iter()
            .find(|(_, e)| e.long_name.is_none() && e.short.name.display().eq_ignore_ascii_case(name))
            .map(|(&k, _)| k)
    }

    fn choose_short_name(&mut self, name: &str) -> Result<(ShortName, Option<String>), FatError> {
        if ShortName::can_convert(name) {
            Ok((ShortName::parse_exact(name), None))
        } else {
            let existing = &self.short_name_index;
            let sn = shortname_gen::generate(|c| existing.contains_key(c.raw()), &mut self.rng)?;
            Ok((sn, Some(String::from(name))))
        }
    }

    /// Inserts a new entry under `name`. `entry.name` is overwritten with
    /// the chosen short name; everything else in `entry` (attributes,
    /// timestamps, size, first cluster) is the caller's.
    pub fn add_entry(
        &mut self,
        boot_sector: &BootSector,
        fat: &mut Fat,
        name: &str,
        mut entry: FatDirectoryEntry,
    ) -> Result<ShortName, FatError> {
        self.check_writable()?;
        let name = name.trim();
        if self.name_exists(name) {
            return Err(FatError::AlreadyExists);
        }
        let (short, long_name) = self.choose_short_name(name)?;
        entry.name = short;
        let key = *short.raw();

        self.short_name_index.insert(key, LfnEntry { short: entry, long_name: long_name.clone() });
        if let Some(n) = &long_name {
            self.long_name_index.insert(n.clone(), key);
        }
        self.order.push(key);

        if let Err(e) = self.reserve_and_replace(boot_sector, fat) {
            self.order.pop();
            self.short_name_index.remove(&key);
            if let Some(n) = &long_name {
                self.long_name_index.remove(n);
            }
            return Err(e);
        }
        Ok(short)
    }

    /// Inserts an entry transplanted from elsewhere (via `take_entry`),
    /// generating a fresh short name in this directory's own namespace and
    /// fixing up `..` if the transplanted entry is itself a directory.
    pub fn put_entry(
        &mut self,
        boot_sector: &BootSector,
        fat: &mut Fat,
        name: &str,
        mut entry: FatDirectoryEntry,
        mut child: Option<DirectoryChild>,
    ) -> Result<(), FatError> {
        self.check_writable()?;
        let name = name.trim();
        if self.name_exists(name) {
            return Err(FatError::AlreadyExists);
        }
        let (short, long_name) = self.choose_short_name(name)?;
        entry.name = short;
        let key = *short.raw();

        if let Some(DirectoryChild::Directory(ref mut child_dir)) = child {
            child_dir.fix_up_dot_dot(boot_sector, fat, self.own_cluster)?;
        }

        self.short_name_index.insert(key, LfnEntry { short: entry, long_name: long_name.clone() });
        if let Some(n) = &long_name {
            self.long_name_index.insert(n.clone(), key);
        }
        self.order.push(key);
        if let Some(c) = child {
            self.children.insert(key, c);
        }

        if let Err(e) = self.reserve_and_replace(boot_sector, fat) {
            self.order.pop();
            self.short_name_index.remove(&key);
            if let Some(n) = &long_name {
                self.long_name_index.remove(n);
            }
            self.children.remove(&key);
            return Err(e);
        }
        Ok(())
    }

    fn fix_up_dot_dot(&mut self, boot_sector: &BootSector, fat: &mut Fat, parent_cluster: u32) -> Result<(), FatError> {
        if let Some(e) = self.short_name_index.get_mut(ShortName::DOT_DOT.raw()) {
            e.short.set_first_cluster(parent_cluster);
        }
        self.reserve_and_replace(boot_sector, fat)
    }

    pub fn get_entry(&self, name: &str) -> Result<&LfnEntry, FatError> {
        self.check_valid()?;
        let key = self.lookup_key(name).ok_or(FatError::NotFound)?;
        Ok(&self.short_name_index[&key])
    }

    pub fn iter(&self) -> impl Iterator<Item = &LfnEntry> + '_ {
        self.order.iter().filter_map(move |k| self.short_name_index.get(k))
    }

    /// Removes `name` and returns its short entry and any already-opened
    /// child, without freeing its cluster chain — the caller decides
    /// whether this is a deletion (free the chain, invalidate the child)
    /// or a relocation (hand both to `put_entry` elsewhere).
    pub fn take_entry(
        &mut self,
        boot_sector: &BootSector,
        fat: &mut Fat,
        name: &str,
    ) -> Result<(String, FatDirectoryEntry, Option<DirectoryChild>), FatError> {
        self.check_writable()?;
        let key = self.lookup_key(name).ok_or(FatError::NotFound)?;
        if key == *ShortName::DOT.raw() || key == *ShortName::DOT_DOT.raw() {
            return Err(FatError::InvalidArgument);
        }
        let entry = self.short_name_index.remove(&key).ok_or(FatError::NotFound)?;
        if let Some(n) = &entry.long_name {
            self.long_name_index.remove(n);
        }
        self.order.retain(|k| k != &key);
        let child = self.children.remove(&key);
        self.reserve_and_replace(boot_sector, fat)?;
        Ok((entry.display_name(), entry.short, child))
    }

    pub fn rename(
        &mut self,
        boot_sector: &BootSector,
        fat: &mut Fat,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), FatError> {
        let (_, short, child) = self.take_entry(boot_sector, fat, old_name)?;
        self.put_entry(boot_sector, fat, new_name, short, child)
    }

    pub fn move_to(
        &mut self,
        dest: &mut FatLfnDirectory,
        boot_sector: &BootSector,
        fat: &mut Fat,
        name: &str,
        new_name: Option<&str>,
    ) -> Result<(), FatError> {
        let (display_name, short, child) = self.take_entry(boot_sector, fat, name)?;
        let target = new_name.unwrap_or(&display_name);
        dest.put_entry(boot_sector, fat, target, short, child)
    }

    /// Opens (materializing it on first access) the plain file at `name`.
    pub fn open_file(&mut self, name: &str) -> Result<&mut File, FatError> {
        self.check_valid()?;
        let key = self.lookup_key(name).ok_or(FatError::NotFound)?;
        if self.short_name_index[&key].short.is_dir() {
            return Err(FatError::InvalidArgument);
        }
        if !self.children.contains_key(&key) {
            let entry = self.short_name_index[&key].short.clone();
            self.children
                .insert(key, DirectoryChild::File(File::new(entry, self.read_only, self.counter.clone())));
        }
        match self.children.get_mut(&key) {
            Some(DirectoryChild::File(f)) => Ok(f),
            _ => unreachable!("entry type checked above"),
        }
    }

    /// Opens (loading and indexing on first access) the subdirectory at
    /// `name`.
    pub fn open_directory<D: BlockDevice>(
        &mut self,
        device: &mut D,
        boot_sector: &BootSector,
        fat: &Fat,
        name: &str,
    ) -> Result<&mut FatLfnDirectory, Error<D::Error>> {
        self.check_valid()?;
        let key = self.lookup_key(name).ok_or(FatError::NotFound)?;
        if !self.short_name_index[&key].short.is_dir() {
            return Err(Error::Fs(FatError::InvalidArgument));
        }
        if !self.children.contains_key(&key) {
            let cluster = self.short_name_index[&key].short.first_cluster();
            let mut ad = AbstractDirectory::new(DirectoryBacking::Chain(ClusterChain::new(cluster)));
            ad.load(device, fat, boot_sector)?;
            let child_rng = self.rng.fork();
            let child =
                FatLfnDirectory::from_loaded(ad, child_rng, cluster, self.read_only, self.counter.clone())?;
            self.children.insert(key, DirectoryChild::Directory(child));
        }
        match self.children.get_mut(&key) {
            Some(DirectoryChild::Directory(d)) => Ok(d),
            _ => unreachable!("entry type checked above"),
        }
    }

    /// Creates a plain file entry with no data yet (analogous to `open`
    /// with a create flag). Write through `open_file` afterward to give it
    /// content.
    pub fn create_file(
        &mut self,
        boot_sector: &BootSector,
        fat: &mut Fat,
        name: &str,
        created: DosTimestamp,
    ) -> Result<(), FatError> {
        let entry = FatDirectoryEntry::new_file(ShortName::DOT, created);
        self.add_entry(boot_sector, fat, name, entry)?;
        Ok(())
    }

    /// Allocates a cluster, builds an empty subdirectory in it, and links
    /// it into `self` under `name`. Rolls the cluster allocation back if
    /// linking fails (name collision discovered concurrently, or the
    /// parent directory has no room left).
    pub fn create_directory(
        &mut self,
        boot_sector: &BootSector,
        fat: &mut Fat,
        name: &str,
        created: DosTimestamp,
    ) -> Result<(), FatError> {
        self.check_writable()?;
        if self.name_exists(name) {
            return Err(FatError::AlreadyExists);
        }
        let cluster = fat.alloc_new()?;
        let rng = self.rng.fork();
        let child = match FatLfnDirectory::new_empty(
            boot_sector,
            fat,
            cluster,
            self.own_cluster,
            created,
            rng,
            self.read_only,
            self.counter.clone(),
        ) {
            Ok(d) => d,
            Err(e) => {
                let _ = fat.free_chain(&[cluster]);
                return Err(e);
            }
        };
        let mut entry = FatDirectoryEntry::new_dir(ShortName::DOT, created);
        entry.set_first_cluster(cluster);
        if let Err(e) = self.put_entry(boot_sector, fat, name, entry, Some(DirectoryChild::Directory(child))) {
            let _ = fat.free_chain(&[cluster]);
            return Err(e);
        }
        Ok(())
    }

    /// Removes `name` and frees its cluster chain. Any already-open handle
    /// to it (`take_entry`'s returned `child`) is dropped here along with
    /// the tree's own reference, so it simply ceases to exist rather than
    /// needing to be flagged invalid. A non-existent name is a silent
    /// no-op. A non-empty subdirectory can't be removed — its own `.`/`..`
    /// entries don't count toward "empty". Dot-entries themselves can
    /// never be removed (`take_entry` rejects them).
    pub fn remove<D: BlockDevice>(
        &mut self,
        device: &mut D,
        boot_sector: &BootSector,
        fat: &mut Fat,
        name: &str,
    ) -> Result<(), Error<D::Error>> {
        self.check_writable()?;
        if self.lookup_key(name).is_none() {
            return Ok(());
        }
        let is_dir = self.get_entry(name)?.short.is_dir();
        if is_dir {
            let sub = self.open_directory(device, boot_sector, fat, name)?;
            if !sub.is_empty_dir() {
                return Err(FatError::InvalidArgument.into());
            }
        }
        let (_, entry, _child) = self.take_entry(boot_sector, fat, name)?;
        let start = entry.first_cluster();
        if start != 0 {
            let chain = fat.get_chain(start)?;
            fat.free_chain(&chain)?;
        }
        Ok(())
    }

    /// Persists this directory's own bytes and, recursively, every
    /// already-opened child's.
    pub fn flush<D: BlockDevice>(
        &mut self,
        device: &mut D,
        fat: &Fat,
        boot_sector: &BootSector,
    ) -> Result<(), Error<D::Error>> {
        self.dir.flush(device, fat, boot_sector)?;
        for child in self.children.values_mut() {
            match child {
                DirectoryChild::Directory(d) => d.flush(device, fat, boot_sector)?,
                DirectoryChild::File(f) => f.flush(device, fat, boot_sector)?,
            }
        }
        Ok(())
    }
}
