//! On-the-wire structures exchanged through real-mode memory.
//!
//! Every structure here is read from or written to the caller's buffer at
//! DS:SI (or ES:DI), so layouts are fixed and little-endian throughout.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::block::EddDescription;
use crate::realmode::SegOff;

/// Disk address packet for the extended (AH=42/43/44/47) services.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiskAddress {
    pub bufsize: u8,
    pub count: u8,
    pub buffer: SegOff,
    pub lba: u64,
    pub buffer_phys: u64,
    pub long_count: u32,
}

impl DiskAddress {
    pub const SIZE: usize = 32;
    /// Offset of the count field, rewritten on I/O failure.
    pub const COUNT_OFFSET: u16 = 2;
    /// Smallest packet that can be honoured (everything before `buffer_phys`).
    pub const MIN_BUFSIZE: u8 = 16;

    /// Decode from a zero-padded [`Self::SIZE`]-byte buffer.  Fields beyond
    /// the caller's declared `bufsize` must already be zeroed.
    pub fn parse(raw: &[u8; Self::SIZE]) -> Self {
        let mut cursor = Cursor::new(&raw[..]);
        let bufsize = cursor.read_u8().unwrap();
        let _reserved = cursor.read_u8().unwrap();
        let count = cursor.read_u8().unwrap();
        let _reserved = cursor.read_u8().unwrap();
        let offset = cursor.read_u16::<LittleEndian>().unwrap();
        let segment = cursor.read_u16::<LittleEndian>().unwrap();
        let lba = cursor.read_u64::<LittleEndian>().unwrap();
        let buffer_phys = cursor.read_u64::<LittleEndian>().unwrap();
        let long_count = cursor.read_u32::<LittleEndian>().unwrap();
        Self {
            bufsize,
            count,
            buffer: SegOff::new(segment, offset),
            lba,
            buffer_phys,
            long_count,
        }
    }

    pub fn emit(&self) -> [u8; Self::SIZE] {
        let mut raw = [0u8; Self::SIZE];
        let mut cursor = Cursor::new(&mut raw[..]);
        cursor.write_u8(self.bufsize).unwrap();
        cursor.write_u8(0).unwrap();
        cursor.write_u8(self.count).unwrap();
        cursor.write_u8(0).unwrap();
        cursor.write_u16::<LittleEndian>(self.buffer.offset).unwrap();
        cursor.write_u16::<LittleEndian>(self.buffer.segment).unwrap();
        cursor.write_u64::<LittleEndian>(self.lba).unwrap();
        cursor.write_u64::<LittleEndian>(self.buffer_phys).unwrap();
        cursor.write_u32::<LittleEndian>(self.long_count).unwrap();
        raw
    }
}

/// Extended drive parameters returned by AH=48.
#[derive(Clone, Debug)]
pub struct DiskParameters {
    pub bufsize: u16,
    pub flags: u16,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
    pub sectors: u64,
    pub sector_size: u16,
    pub device_path: Option<[u8; DEVICE_PATH_INFO_LEN]>,
}

impl DiskParameters {
    /// Offset of the (unsupported) DPTE pointer.
    pub const DPTE_OFFSET: usize = 26;
    /// Offset of the EDD device path information block.
    pub const DPI_OFFSET: usize = 30;
    pub const SIZE: usize = Self::DPI_OFFSET + DEVICE_PATH_INFO_LEN;

    /// Serialise; bytes past [`Self::DPI_OFFSET`] are only meaningful when
    /// device path information is present.
    pub fn emit(&self) -> [u8; Self::SIZE] {
        let mut raw = [0u8; Self::SIZE];
        let mut cursor = Cursor::new(&mut raw[..]);
        cursor.write_u16::<LittleEndian>(self.bufsize).unwrap();
        cursor.write_u16::<LittleEndian>(self.flags).unwrap();
        cursor.write_u32::<LittleEndian>(self.cylinders).unwrap();
        cursor.write_u32::<LittleEndian>(self.heads).unwrap();
        cursor
            .write_u32::<LittleEndian>(self.sectors_per_track)
            .unwrap();
        cursor.write_u64::<LittleEndian>(self.sectors).unwrap();
        cursor.write_u16::<LittleEndian>(self.sector_size).unwrap();
        // No translated DPTE; all-ones marks it invalid
        raw[Self::DPTE_OFFSET..Self::DPI_OFFSET].fill(0xFF);
        if let Some(dpi) = &self.device_path {
            raw[Self::DPI_OFFSET..].copy_from_slice(dpi);
        }
        raw
    }
}

/// EDD 3.0 device path information key.
pub const DEVICE_PATH_INFO_KEY: u16 = 0xBEDD;
pub const DEVICE_PATH_INFO_LEN: usize = 44;

/// Build the 44-byte EDD device path information block.
///
/// Checksum is two's-complement: the block sums to zero modulo 256.
pub fn device_path_info(desc: &EddDescription) -> [u8; DEVICE_PATH_INFO_LEN] {
    let mut dpi = [0u8; DEVICE_PATH_INFO_LEN];
    dpi[0..2].copy_from_slice(&DEVICE_PATH_INFO_KEY.to_le_bytes());
    dpi[2] = DEVICE_PATH_INFO_LEN as u8;
    dpi[6..10].copy_from_slice(b"PCI ");
    dpi[10..18].copy_from_slice(&desc.interface_type);
    dpi[18] = desc.pci.bus;
    dpi[19] = desc.pci.slot;
    dpi[20] = desc.pci.function;
    dpi[21] = 0xFF; // channel — unused
    dpi[26..42].copy_from_slice(&desc.device_path);
    let sum = dpi.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte));
    dpi[DEVICE_PATH_INFO_LEN - 1] = 0u8.wrapping_sub(sum);
    dpi
}

/// CD-ROM emulation specification packet returned by AH=4B.
///
/// Only the size and drive fields carry information: a SAN CD-ROM runs in
/// no-emulation mode, so the emulation-state fields stay zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct CdromSpecification {
    pub drive: u8,
}

impl CdromSpecification {
    pub const SIZE: usize = 19;

    pub fn emit(&self) -> [u8; Self::SIZE] {
        let mut raw = [0u8; Self::SIZE];
        raw[0] = Self::SIZE as u8;
        raw[2] = self.drive;
        raw
    }
}

/// Command packet for AH=4D (read CD-ROM boot catalog).
#[derive(Clone, Copy, Debug, Default)]
pub struct BootCatalogCommand {
    pub count: u8,
    pub buffer: u32,
    pub start: u16,
}

impl BootCatalogCommand {
    pub const SIZE: usize = 8;

    pub fn parse(raw: &[u8; Self::SIZE]) -> Self {
        let mut cursor = Cursor::new(&raw[..]);
        let _size = cursor.read_u8().unwrap();
        let count = cursor.read_u8().unwrap();
        let buffer = cursor.read_u32::<LittleEndian>().unwrap();
        let start = cursor.read_u16::<LittleEndian>().unwrap();
        Self {
            count,
            buffer,
            start,
        }
    }

    pub fn emit(&self) -> [u8; Self::SIZE] {
        let mut raw = [0u8; Self::SIZE];
        let mut cursor = Cursor::new(&mut raw[..]);
        cursor.write_u8(Self::SIZE as u8).unwrap();
        cursor.write_u8(self.count).unwrap();
        cursor.write_u32::<LittleEndian>(self.buffer).unwrap();
        cursor.write_u16::<LittleEndian>(self.start).unwrap();
        raw
    }
}

/// Diskette parameter table pointed at by AH=08 for floppy drives.
///
/// 512 bytes per sector (code 0x02) and the highest sectors-per-track the
/// emulation ever reports; the timing fields are irrelevant for a drive
/// with no physical mechanics.
pub const FDD_PARAMETERS: [u8; 11] = [0, 0, 0, 0x02, 48, 0, 0, 0, 0, 0, 0];
