//! The storage contract this crate is built on top of.
//!
//! A small in-crate trait: sector-addressed read/write over a fixed sector
//! size, plus `flush`/`close`. No struct in this crate stores a
//! `&mut impl BlockDevice` — every method that needs one takes it as an
//! explicit parameter instead.

use core::fmt::Debug;

/// A sector-addressed block device.
///
/// `sector_size` is queried once at mount and assumed constant for the
/// lifetime of the device; implementations that can't guarantee this
/// shouldn't implement the trait directly (wrap instead).
pub trait BlockDevice {
    type Error: Debug;

    /// Size of one sector in bytes. Must be a power of two, one of 512,
    /// 1024, 2048, or 4096 per the boot sector's `bytes_per_sector` field.
    fn sector_size(&self) -> u32;

    /// Total number of addressable sectors.
    fn sector_count(&self) -> u64;

    /// Read exactly one sector into `buf`. `buf.len()` must equal
    /// `sector_size()`.
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write exactly one sector from `buf`. `buf.len()` must equal
    /// `sector_size()`.
    fn write_sector(&mut self, sector: u64, buf: &[u8]) -> Result<(), Self::Error>;

    /// Flush any buffered writes to the underlying medium.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Release the device. Default implementation just flushes; devices
    /// that hold an exclusive lock or handle override this.
    fn close(&mut self) -> Result<(), Self::Error> {
        self.flush()
    }
}
