//! The block-device abstraction consumed by the INT 13 core.
//!
//! Transports (iSCSI, AoE, HTTP, local images, ...) live behind [`SanDisk`];
//! the emulation core only ever sees opaque block I/O.

pub mod ramdisk;

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

pub use self::ramdisk::RamDisk;

/// Shared handle to an open SAN target.
///
/// The core runs single-threaded and cooperative; the drive record and the
/// block layer both keep the device alive through this reference.
pub type SharedDisk = Rc<RefCell<dyn SanDisk>>;

/// An open SAN block target.
///
/// `read`/`write`/`reset`/`reopen` may pump the underlying transport and so
/// may take arbitrarily long; callers must not hold anything but the drive
/// record across them.
pub trait SanDisk {
    /// Read `count` blocks starting at `lba` into `buffer`.
    fn read(&mut self, lba: u64, count: u32, buffer: &mut [u8]) -> io::Result<()>;

    /// Write `count` blocks starting at `lba` from `buffer`.
    fn write(&mut self, lba: u64, count: u32, buffer: &[u8]) -> io::Result<()>;

    /// Reset the device.
    fn reset(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Re-establish the connection behind the device.
    fn reopen(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Whether the device lost its connection and wants a `reopen`.
    fn needs_reopen(&self) -> bool {
        false
    }

    /// Capacity in blocks.
    fn capacity(&self) -> u64;

    /// Block size in bytes (512 for disks, 2048 for CD-ROMs).
    fn block_size(&self) -> usize;

    fn is_cdrom(&self) -> bool {
        false
    }

    /// Describe the device for EDD device-path information.
    fn edd_describe(&self) -> io::Result<EddDescription> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "device path information not available",
        ))
    }
}

/// Location of the host controller on the PCI bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PciLocation {
    pub bus: u8,
    pub slot: u8,
    pub function: u8,
}

/// EDD 3.0 description of a SAN target, as supplied by the block layer.
#[derive(Clone, Copy, Debug)]
pub struct EddDescription {
    pub pci: PciLocation,
    /// Interface type name, space-padded ASCII ("iSCSI", "SCSI", ...).
    pub interface_type: [u8; 8],
    /// Interface-specific device path (target/LUN encoding).
    pub device_path: [u8; 16],
}

/// Resolves SAN URIs into open block targets.
///
/// Multipath targets receive the full URI list and fail over internally.
pub trait BlockOpener {
    fn open(&mut self, uris: &[String], flags: u32) -> io::Result<SharedDisk>;
}
