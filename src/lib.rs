//! A read/write FAT12/16/32 filesystem driver built on top of an abstract
//! block device.
//!
//! The driver owns no device handle of its own: every operation that needs
//! to touch storage takes `&mut impl BlockDevice` explicitly rather than
//! stashing a reference on the struct.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod device;
pub mod codec;
pub mod datetime;

pub mod boot_sector;
pub mod fs_info;
pub mod fat;
pub mod cluster_chain;

pub mod dir_entry;
pub mod short_name;
pub mod lfn;
pub mod shortname_gen;
pub mod directory;
pub mod lfn_directory;

pub mod file;
pub mod volume;

pub use device::BlockDevice;
pub use error::{CorruptionKind, Error, FatError, Result};
pub use fat::FatType;
pub use volume::{FatFileSystem, MountOptions};
