//! The crate-wide error surface.
//!
//! Small `#[non_exhaustive]` enums that derive `Debug` and get a
//! `Display`-via-`Debug` plus `std::error::Error` impl behind a feature
//! gate. `FatError` covers everything that can go wrong independent of the
//! device; `Error<E>` adds the device's own associated error type so
//! callers that only deal with pure data-structure code (the FAT table,
//! short names, LFN encoding) never need to name a device error type at all.

use core::fmt::{self, Debug};

/// The specific structural defect behind `FatError::CorruptVolume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CorruptionKind {
    /// The `0x55 0xAA` boot-sector signature (or an FS-info signature) is
    /// missing.
    BadSignature,
    /// Two copies of the FAT disagree and `ignore_fat_differences` was not
    /// set.
    FatCopiesDiffer,
    /// The FS-info free-cluster count disagrees with the FAT's own count.
    FsInfoMismatch,
    /// A cluster chain walk hit a self-reference, a reserved entry, or an
    /// out-of-range index.
    InvalidChain,
    /// The derived cluster count does not correspond to a known flavor.
    UnknownFatFlavor,
}

/// Everything that can go wrong that isn't a device I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FatError {
    NotFound,
    AlreadyExists,
    /// `requested` entries would not fit within `capacity` and the storage
    /// cannot grow any further (fixed FAT12/16 root, or the 65536-entry
    /// cluster-chain-directory ceiling).
    DirectoryFull { capacity: usize, requested: usize },
    FatFull,
    ReadOnly,
    AlreadyClosed,
    /// A handle's backing entry was removed out from under it.
    AlreadyInvalid,
    InvalidArgument,
    EndOfData,
    UnknownFileSystem,
    CorruptVolume(CorruptionKind),
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FatError {}

/// The crate-wide result/error type. `E` is the device's own associated
/// error type (`BlockDevice::Error`); it only ever shows up in the
/// `Device` variant.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error<E> {
    Fs(FatError),
    Device(E),
}

impl<E> From<FatError> for Error<E> {
    fn from(e: FatError) -> Self {
        Error::Fs(e)
    }
}

impl<E: Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(feature = "std")]
impl<E: Debug> std::error::Error for Error<E> {}

pub type Result<T, E> = core::result::Result<T, Error<E>>;
