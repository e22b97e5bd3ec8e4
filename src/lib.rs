//! INT 13 emulation core for SAN-backed boot volumes.
//!
//! Intercepts the BIOS disk service interrupt and services it from remote
//! block devices, so MBR boot code, El Torito images, and legacy operating
//! systems can boot from a network-attached volume.  The network transports
//! themselves live behind the [`block`] abstraction; this crate owns the
//! interrupt-level emulation: command dispatch, geometry inference,
//! BIOS drive-count reconciliation, boot record loading, and boot firmware
//! table installation.

pub mod block;
pub mod int13;
pub mod realmode;

pub use block::{BlockOpener, EddDescription, PciLocation, RamDisk, SanDisk, SharedDisk};
pub use int13::{
    AcpiSource, BootError, Bootstrap, HookError, Int13Emu, Int13Error, SanBootConfig, SanDrive,
    XbftError,
};
pub use realmode::{CpuFlag, Memory, RegisterFrame, SegOff};
