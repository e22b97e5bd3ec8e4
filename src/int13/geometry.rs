//! CHS geometry inference.
//!
//! There is no on-disk record of the geometry a disk was formatted with;
//! legacy callers nonetheless expect a self-consistent (C,H,S) triple that
//! agrees with the partition table.  Hard disks are inferred from the
//! partition entries, floppies from the raw size.

use std::io;

use byteorder::{ByteOrder, LittleEndian};

use crate::int13::SanDrive;

/// Offset of the partition table within the master boot record.
const MBR_PARTITIONS: usize = 446;
const PARTITION_LEN: usize = 16;

/// Recognised floppy disk geometries, 160K through 3840K.
const FDD_GEOMETRIES: [(u16, u8, u8); 20] = [
    (40, 1, 8),
    (40, 1, 9),
    (40, 2, 8),
    (40, 2, 9),
    (80, 2, 8),
    (80, 2, 9),
    (80, 2, 15),
    (80, 2, 18),
    (80, 2, 20),
    (80, 2, 21),
    (82, 2, 21),
    (83, 2, 21),
    (80, 2, 22),
    (80, 2, 23),
    (80, 2, 24),
    (80, 2, 36),
    (80, 2, 39),
    (80, 2, 40),
    (80, 2, 44),
    (80, 2, 48),
];

fn chs_head(chs: &[u8]) -> u16 {
    chs[0] as u16
}

fn chs_sector(chs: &[u8]) -> u16 {
    (chs[1] & 0x3F) as u16
}

fn chs_cylinder(chs: &[u8]) -> u16 {
    (((chs[1] & 0xC0) as u16) << 2) | chs[2] as u16
}

/// Guess hard disk geometry by inspecting the partition table.
fn guess_hdd(drive: &mut SanDrive, scratch: &mut [u8]) -> io::Result<(u16, u16)> {
    if let Err(error) = drive.read(0, 1, scratch) {
        log::debug!(
            "[INT13] drive {:02X} could not read partition table to guess geometry: {}",
            drive.drive,
            error
        );
        return Err(error);
    }

    let mut heads: u16 = 0;
    let mut sectors: u16 = 0;
    for i in 0..4 {
        let entry = &scratch[MBR_PARTITIONS + i * PARTITION_LEN..][..PARTITION_LEN];
        if entry[4] == 0 {
            continue; // empty partition
        }
        let chs_start = &entry[1..4];
        let chs_end = &entry[5..8];
        let start_lba = LittleEndian::read_u32(&entry[8..12]);

        // A partition starting on cylinder 0 pins down sectors-per-track
        // unambiguously.
        if chs_cylinder(chs_start) == 0 && chs_head(chs_start) != 0 {
            let start_sector = chs_sector(chs_start) as u32;
            let start_head = chs_head(chs_start) as u32;
            sectors = (start_lba.wrapping_add(1).wrapping_sub(start_sector) / start_head) as u16;
            log::debug!(
                "[INT13] drive {:02X} guessing C/H/S xx/xx/{} based on partition {}",
                drive.drive,
                sectors,
                i + 1
            );
        }

        // Otherwise grow the guesses to cover the partition's end address.
        if chs_head(chs_end) + 1 > heads {
            heads = chs_head(chs_end) + 1;
            log::debug!(
                "[INT13] drive {:02X} guessing C/H/S xx/{}/xx based on partition {}",
                drive.drive,
                heads,
                i + 1
            );
        }
        if chs_sector(chs_end) > sectors {
            sectors = chs_sector(chs_end);
            log::debug!(
                "[INT13] drive {:02X} guessing C/H/S xx/xx/{} based on partition {}",
                drive.drive,
                sectors,
                i + 1
            );
        }
    }

    if heads == 0 {
        heads = 255;
    }
    if sectors == 0 {
        sectors = 63;
    }
    Ok((heads, sectors))
}

/// Guess floppy geometry from the disk size.
fn guess_fdd(drive: &SanDrive) -> (u16, u16) {
    let blocks = drive.capacity();
    for &(cylinders, heads, sectors) in &FDD_GEOMETRIES {
        if cylinders as u64 * heads as u64 * sectors as u64 == blocks {
            log::debug!(
                "[INT13] drive {:02X} guessing C/H/S {}/{}/{} based on size {}K",
                drive.drive,
                cylinders,
                heads,
                sectors,
                blocks / 2
            );
            return (heads as u16, sectors as u16);
        }
    }

    // Assume a partial image in the most common format (1440K, 80/2/18)
    log::debug!(
        "[INT13] drive {:02X} guessing C/H/S xx/2/18 based on size {}K",
        drive.drive,
        blocks / 2
    );
    (2, 18)
}

/// Fill in the drive's geometry if none was supplied.
pub(crate) fn guess(drive: &mut SanDrive, scratch: &mut [u8]) -> io::Result<()> {
    let (guessed_heads, guessed_sectors) = if drive.is_fdd() {
        guess_fdd(drive)
    } else {
        guess_hdd(drive, scratch)?
    };

    if drive.heads == 0 {
        drive.heads = guessed_heads.min(255) as u8;
    }
    if drive.sectors_per_track == 0 {
        drive.sectors_per_track = guessed_sectors.min(63) as u8;
    }
    if drive.cylinders == 0 {
        let blocks = drive.capacity32();
        let blocks_per_cyl = drive.heads as u32 * drive.sectors_per_track as u32;
        drive.cylinders = (blocks / blocks_per_cyl).clamp(1, 1024) as u16;
    }
    Ok(())
}
