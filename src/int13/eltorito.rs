//! El Torito boot catalog discovery and catalog entry decoding.

use std::io;

use byteorder::{ByteOrder, LittleEndian};

use crate::int13::SanDrive;

/// LBA of the ISO 9660 boot record volume descriptor.
pub const ELTORITO_LBA: u64 = 17;

/// Offset of the boot catalog LBA within the descriptor.
const CATALOG_OFFSET: usize = 0x47;

pub const PLATFORM_X86: u8 = 0x00;
pub const BOOTABLE: u8 = 0x88;
pub const NO_EMULATION: u8 = 0x00;

/// Fixed prefix of a conforming boot record volume descriptor: volume
/// descriptor type 0 (boot), "CD001" identifier, version 1, and the
/// El Torito system identifier zero-padded to 32 bytes.
fn descriptor_prefix() -> [u8; 39] {
    let mut prefix = [0u8; 39];
    prefix[1..6].copy_from_slice(b"CD001");
    prefix[6] = 1;
    prefix[7..7 + 23].copy_from_slice(b"EL TORITO SPECIFICATION");
    prefix
}

/// Read and parse El Torito parameters, if present.
pub(crate) fn parse(drive: &mut SanDrive, scratch: &mut [u8]) -> io::Result<()> {
    if let Err(error) = drive.read(ELTORITO_LBA, 1, scratch) {
        log::debug!(
            "[INT13] drive {:02X} could not read El Torito boot record volume descriptor: {}",
            drive.drive,
            error
        );
        return Err(error);
    }

    if scratch[..39] == descriptor_prefix() {
        let catalog = LittleEndian::read_u32(&scratch[CATALOG_OFFSET..CATALOG_OFFSET + 4]);
        drive.boot_catalog = Some(catalog);
        log::debug!(
            "[INT13] drive {:02X} has an El Torito boot catalog at LBA {:08X}",
            drive.drive,
            catalog
        );
    } else {
        log::debug!(
            "[INT13] drive {:02X} has no El Torito boot catalog",
            drive.drive
        );
    }
    Ok(())
}

/// Validation entry at the head of the boot catalog.
#[derive(Clone, Copy, Debug)]
pub struct ValidationEntry {
    pub platform_id: u8,
}

impl ValidationEntry {
    pub const SIZE: usize = 32;

    pub fn parse(raw: &[u8]) -> Self {
        Self {
            platform_id: raw[1],
        }
    }
}

/// Initial/default boot entry following the validation entry.
#[derive(Clone, Copy, Debug)]
pub struct BootEntry {
    pub indicator: u8,
    pub media_type: u8,
    pub load_segment: u16,
    /// Length of the boot image in virtual (512-byte) sectors.
    pub length: u16,
    /// LBA of the boot image.
    pub start: u32,
}

impl BootEntry {
    pub const SIZE: usize = 32;

    pub fn parse(raw: &[u8]) -> Self {
        Self {
            indicator: raw[0],
            media_type: raw[1],
            load_segment: LittleEndian::read_u16(&raw[2..4]),
            length: LittleEndian::read_u16(&raw[6..8]),
            start: LittleEndian::read_u32(&raw[8..12]),
        }
    }
}
