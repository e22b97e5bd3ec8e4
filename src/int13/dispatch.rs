//! INT 13 command decode and per-command handlers.
//!
//! Handlers return `Result<u8, Int13Error>`: the Ok value lands in AH, an
//! Err becomes carry-set plus the status byte.  That conversion happens in
//! exactly one place, at the bottom of [`dispatch`].

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::int13::packet::{
    device_path_info, BootCatalogCommand, CdromSpecification, DiskAddress, DiskParameters,
};
use crate::int13::{SanDrive, FDD_PARAMS_ADDR};
use crate::realmode::{CpuFlag, Memory, RegisterFrame};

/// Block size expected by the non-extended services.
pub const INT13_BLKSIZE: usize = 512;

/// Largest capacity addressable through CHS (1024 cylinders, 255 heads,
/// 63 sectors per track).
const MAX_CHS_SECTORS: u64 = 1024 * 255 * 63;

// Extensions installation check (AH=41)
const EXTENSION_LINEAR: u16 = 0x0001;
const EXTENSION_EDD: u16 = 0x0004;
const EXTENSION_64BIT: u16 = 0x0008;
const EXTENSION_VER_3_0: u8 = 0x30;

// Disk types (AH=15)
const DISK_TYPE_FDD: u8 = 0x01;
const DISK_TYPE_HDD: u8 = 0x03;

/// Floppy media type reported by AH=08 (1.44M)
const FDD_TYPE_1M44: u8 = 0x04;

// Extended parameter flags (AH=48)
const FL_DMA_TRANSPARENT: u16 = 0x0001;
const FL_CHS_VALID: u16 = 0x0002;

/// INT 13 service codes handled by the emulation.
#[derive(Debug, FromPrimitive)]
enum Command {
    Reset = 0x00,
    GetLastStatus = 0x01,
    ReadSectors = 0x02,
    WriteSectors = 0x03,
    GetParameters = 0x08,
    GetDiskType = 0x15,
    ExtensionCheck = 0x41,
    ExtendedRead = 0x42,
    ExtendedWrite = 0x43,
    ExtendedVerify = 0x44,
    ExtendedSeek = 0x47,
    GetExtendedParameters = 0x48,
    CdromStatusTerminate = 0x4B,
    CdromReadBootCatalog = 0x4D,
}

/// Failure kinds a handler can report, with their INT 13 status bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Int13Error {
    /// Malformed request, unsupported function, or out-of-range address
    Invalid,
    /// I/O failed at the block layer
    ReadError,
    /// Device reset failed
    ResetFailed,
    /// Drive not ready / no media
    NotReady,
}

impl Int13Error {
    pub fn status(self) -> u8 {
        match self {
            Int13Error::Invalid => 0x01,
            Int13Error::ReadError => 0x04,
            Int13Error::ResetFailed => 0x05,
            Int13Error::NotReady => 0xAA,
        }
    }
}

pub type HandlerResult = Result<u8, Int13Error>;

/// BIOS drive counts visible to the handlers (AH=08 returns them in DL).
#[derive(Clone, Copy)]
pub(crate) struct DriveCounts {
    pub fdds: u8,
    pub hdds: u8,
}

pub(crate) struct Env<'a> {
    pub mem: &'a mut Memory,
    pub counts: DriveCounts,
}

/// Route an intercepted register frame to the matching drive and handler.
///
/// Returns true when the call was serviced (the caller must not chain),
/// false when it belongs to the firmware.  A frame addressed to a drive's
/// natural number is rewritten to the emulated number and chained.
pub(crate) fn dispatch(
    drives: &mut [SanDrive],
    mem: &mut Memory,
    counts: DriveCounts,
    frame: &mut RegisterFrame,
) -> bool {
    let command = frame.ax.high();
    let bios_drive = frame.dx.low();

    for sandev in drives.iter_mut() {
        if bios_drive != sandev.drive {
            if bios_drive == sandev.natural_drive {
                // Remap accesses to the displaced drive's new number
                log::debug!(
                    "[INT13] {:02X} ({:02X}) remapped to ({:02X})",
                    command,
                    bios_drive,
                    sandev.drive
                );
                frame.dx.set_low(sandev.drive);
                return false;
            } else if (bios_drive & 0x7F) == 0x7F
                && command == Command::CdromStatusTerminate as u8
                && sandev.is_cdrom()
            {
                // Catch non-drive-specific CD-ROM calls
            } else {
                continue;
            }
        }

        log::debug!("[INT13] {:02X} ({:02X})", command, bios_drive);

        let mut env = Env {
            mem: &mut *mem,
            counts,
        };
        let status = match Command::from_u8(command) {
            Some(Command::Reset) => reset(sandev),
            Some(Command::GetLastStatus) => sandev.last_status,
            Some(Command::ReadSectors) => read_sectors(sandev, &mut env, frame),
            Some(Command::WriteSectors) => write_sectors(sandev, &mut env, frame),
            Some(Command::GetParameters) => get_parameters(sandev, &mut env, frame),
            Some(Command::GetDiskType) => get_disk_type(sandev, frame),
            Some(Command::ExtensionCheck) => extension_check(sandev, frame),
            Some(Command::ExtendedRead) => extended_rw(sandev, &mut env, frame, false),
            Some(Command::ExtendedWrite) => extended_rw(sandev, &mut env, frame, true),
            Some(Command::ExtendedVerify) => extended_verify(sandev, &mut env, frame),
            Some(Command::ExtendedSeek) => extended_seek(sandev, &mut env, frame),
            Some(Command::GetExtendedParameters) => {
                get_extended_parameters(sandev, &mut env, frame)
            }
            Some(Command::CdromStatusTerminate) => cdrom_status_terminate(sandev, &mut env, frame),
            Some(Command::CdromReadBootCatalog) => {
                cdrom_read_boot_catalog(sandev, &mut env, frame)
            }
            None => {
                log::debug!("[INT13] {:02X} ({:02X}) unrecognised", command, bios_drive);
                Err(Int13Error::Invalid)
            }
        };

        // Store status for AH=01
        sandev.last_status = status;

        match status {
            Ok(value) => {
                frame.unset_flag(CpuFlag::Carry);
                frame.ax.set_high(value);
            }
            Err(error) => {
                log::warn!(
                    "[INT13] {:02X} ({:02X}) failed with status {:02X}",
                    command,
                    sandev.drive,
                    error.status()
                );
                frame.ax.set_high(error.status());
            }
        }

        // Overflow tells the trampoline not to chain this call
        frame.set_flag(CpuFlag::Overflow);
        return true;
    }

    false
}

/// INT 13,00 — Reset disk system
fn reset(sandev: &mut SanDrive) -> HandlerResult {
    log::debug!("[INT13] drive {:02X} reset", sandev.drive);
    if let Err(error) = sandev.reset() {
        log::warn!("[INT13] drive {:02X} reset failed: {}", sandev.drive, error);
        return Err(Int13Error::ResetFailed);
    }
    Ok(0)
}

/// Decode and validate the CHS address in a non-extended read/write frame.
fn chs_params(sandev: &SanDrive, frame: &RegisterFrame) -> Result<u64, Int13Error> {
    if sandev.block_size() != INT13_BLKSIZE {
        log::debug!(
            "[INT13] drive {:02X} invalid blocksize ({}) for non-extended read/write",
            sandev.drive,
            sandev.block_size()
        );
        return Err(Int13Error::Invalid);
    }

    let cylinder = (((frame.cx.low() as u16) & 0xC0) << 2) | frame.cx.high() as u16;
    let head = frame.dx.high();
    let sector = frame.cx.low() & 0x3F;
    if cylinder >= sandev.cylinders
        || head >= sandev.heads
        || sector < 1
        || sector > sandev.sectors_per_track
    {
        log::debug!(
            "[INT13] drive {:02X} C/H/S {}/{}/{} out of range for geometry {}/{}/{}",
            sandev.drive,
            cylinder,
            head,
            sector,
            sandev.cylinders,
            sandev.heads,
            sandev.sectors_per_track
        );
        return Err(Int13Error::Invalid);
    }

    Ok(((cylinder as u64 * sandev.heads as u64) + head as u64) * sandev.sectors_per_track as u64
        + sector as u64
        - 1)
}

/// INT 13,02 — Read sectors
fn read_sectors(sandev: &mut SanDrive, env: &mut Env, frame: &mut RegisterFrame) -> HandlerResult {
    let lba = chs_params(sandev, frame)?;
    let count = frame.ax.low();
    log::debug!(
        "[INT13] drive {:02X} read {} at LBA {:08X} -> {:04X}:{:04X}",
        sandev.drive,
        count,
        lba,
        frame.es,
        frame.bx.word()
    );
    if count == 0 {
        return Ok(0);
    }

    let mut buffer = vec![0u8; count as usize * INT13_BLKSIZE];
    if let Err(error) = sandev.read(lba, count as u32, &mut buffer) {
        log::warn!("[INT13] drive {:02X} I/O failed: {}", sandev.drive, error);
        return Err(Int13Error::ReadError);
    }
    env.mem.copy_to_real(frame.es, frame.bx.word(), &buffer);
    Ok(0)
}

/// INT 13,03 — Write sectors
fn write_sectors(sandev: &mut SanDrive, env: &mut Env, frame: &mut RegisterFrame) -> HandlerResult {
    let lba = chs_params(sandev, frame)?;
    let count = frame.ax.low();
    log::debug!(
        "[INT13] drive {:02X} write {} at LBA {:08X} <- {:04X}:{:04X}",
        sandev.drive,
        count,
        lba,
        frame.es,
        frame.bx.word()
    );
    if count == 0 {
        return Ok(0);
    }

    let mut buffer = vec![0u8; count as usize * INT13_BLKSIZE];
    env.mem.copy_from_real(frame.es, frame.bx.word(), &mut buffer);
    if let Err(error) = sandev.write(lba, count as u32, &buffer) {
        log::warn!("[INT13] drive {:02X} I/O failed: {}", sandev.drive, error);
        return Err(Int13Error::ReadError);
    }
    Ok(0)
}

/// INT 13,08 — Get drive parameters
fn get_parameters(sandev: &mut SanDrive, env: &mut Env, frame: &mut RegisterFrame) -> HandlerResult {
    if sandev.block_size() != INT13_BLKSIZE {
        log::debug!(
            "[INT13] drive {:02X} invalid blocksize ({}) for non-extended parameters",
            sandev.drive,
            sandev.block_size()
        );
        return Err(Int13Error::Invalid);
    }

    let max_cylinder = sandev.cylinders - 1;
    let max_head = sandev.heads - 1;
    let max_sector = sandev.sectors_per_track; // sic

    frame.cx.set_high((max_cylinder & 0xFF) as u8);
    frame
        .cx
        .set_low((((max_cylinder >> 8) as u8) << 6) | max_sector);
    frame.dx.set_high(max_head);
    frame.dx.set_low(if sandev.is_fdd() {
        env.counts.fdds
    } else {
        env.counts.hdds
    });

    if sandev.is_fdd() {
        frame.bx.set_low(FDD_TYPE_1M44);
        frame.es = FDD_PARAMS_ADDR.segment;
        frame.di.set(FDD_PARAMS_ADDR.offset);
    }

    Ok(0)
}

/// INT 13,15 — Get disk type
fn get_disk_type(sandev: &mut SanDrive, frame: &mut RegisterFrame) -> HandlerResult {
    if sandev.is_fdd() {
        Ok(DISK_TYPE_FDD)
    } else {
        let blocks = sandev.capacity32();
        frame.cx.set((blocks >> 16) as u16);
        frame.dx.set((blocks & 0xFFFF) as u16);
        Ok(DISK_TYPE_HDD)
    }
}

/// INT 13,41 — Extensions installation check
fn extension_check(sandev: &mut SanDrive, frame: &mut RegisterFrame) -> HandlerResult {
    if frame.bx.word() == 0x55AA && !sandev.is_fdd() {
        frame.bx.set(0xAA55);
        frame
            .cx
            .set(EXTENSION_LINEAR | EXTENSION_EDD | EXTENSION_64BIT);
        Ok(EXTENSION_VER_3_0)
    } else {
        Err(Int13Error::Invalid)
    }
}

/// Read the disk address packet at DS:SI.
fn read_disk_address(env: &Env, frame: &RegisterFrame) -> Result<DiskAddress, Int13Error> {
    let bufsize = env.mem.get_real_byte(frame.ds, frame.si.word());
    if bufsize < DiskAddress::MIN_BUFSIZE {
        log::debug!("[INT13] invalid disk address packet size {:#04X}", bufsize);
        return Err(Int13Error::Invalid);
    }
    let mut raw = [0u8; DiskAddress::SIZE];
    let len = (bufsize as usize).min(DiskAddress::SIZE);
    env.mem
        .copy_from_real(frame.ds, frame.si.word(), &mut raw[..len]);
    Ok(DiskAddress::parse(&raw))
}

/// INT 13,42 / INT 13,43 — Extended read / write
fn extended_rw(
    sandev: &mut SanDrive,
    env: &mut Env,
    frame: &mut RegisterFrame,
    is_write: bool,
) -> HandlerResult {
    // Refused on floppies: ELTORITO.SYS takes a floppy with extended reads
    // to really be a CD-ROM
    if sandev.is_fdd() {
        return Err(Int13Error::Invalid);
    }

    let addr = read_disk_address(env, frame)?;

    // A long count, or the FFFF:FFFF sentinel, selects the 64-bit
    // physical buffer address
    let buffer = if addr.count == 0xFF
        || (addr.buffer.segment == 0xFFFF && addr.buffer.offset == 0xFFFF)
    {
        addr.buffer_phys as usize
    } else {
        addr.buffer.to_physical()
    };
    let count = match addr.count {
        count @ 0..=0x7F => count as u32,
        0xFF => addr.long_count,
        count => {
            log::debug!("[INT13] invalid disk address packet count {:#04X}", count);
            return Err(Int13Error::Invalid);
        }
    };
    log::debug!(
        "[INT13] drive {:02X} extended {} {} at LBA {:016X} <-> {:08X}",
        sandev.drive,
        if is_write { "write" } else { "read" },
        count,
        addr.lba,
        buffer
    );
    if count == 0 {
        return Ok(0);
    }

    let mut data = vec![0u8; count as usize * sandev.block_size()];
    let result = if is_write {
        env.mem.copy_from_phys(buffer, &mut data);
        sandev.write(addr.lba, count, &data)
    } else {
        sandev.read(addr.lba, count, &mut data)
    };
    if let Err(error) = result {
        log::warn!(
            "[INT13] drive {:02X} extended I/O failed: {}",
            sandev.drive,
            error
        );
        // Record that no blocks were transferred
        env.mem.put_real_byte(
            frame.ds,
            frame.si.word().wrapping_add(DiskAddress::COUNT_OFFSET),
            0,
        );
        return Err(Int13Error::ReadError);
    }
    if !is_write {
        env.mem.copy_to_phys(buffer, &data);
    }
    Ok(0)
}

/// INT 13,44 — Verify sectors
fn extended_verify(sandev: &mut SanDrive, env: &mut Env, frame: &mut RegisterFrame) -> HandlerResult {
    if let Ok(addr) = read_disk_address(env, frame) {
        log::debug!(
            "[INT13] drive {:02X} verify at LBA {:016X} (count {})",
            sandev.drive,
            addr.lba,
            addr.count
        );
    }

    // There is no mechanism for verifying sectors on a network target
    Err(Int13Error::Invalid)
}

/// INT 13,47 — Extended seek
fn extended_seek(sandev: &mut SanDrive, env: &mut Env, frame: &mut RegisterFrame) -> HandlerResult {
    if let Ok(addr) = read_disk_address(env, frame) {
        log::debug!(
            "[INT13] drive {:02X} seek to LBA {:016X}",
            sandev.drive,
            addr.lba
        );
    }

    // Ignore and return success
    Ok(0)
}

/// INT 13,48 — Get extended parameters
fn get_extended_parameters(
    sandev: &mut SanDrive,
    env: &mut Env,
    frame: &mut RegisterFrame,
) -> HandlerResult {
    let bufsize = env.mem.get_real_word(frame.ds, frame.si.word()) as usize;
    log::debug!(
        "[INT13] drive {:02X} extended parameters to {:04X}:{:04X}+{:02X}",
        sandev.drive,
        frame.ds,
        frame.si.word(),
        bufsize
    );

    let mut flags = FL_DMA_TRANSPARENT;
    if sandev.cylinders < 1024 && sandev.capacity() <= MAX_CHS_SECTORS {
        flags |= FL_CHS_VALID;
    }
    let mut params = DiskParameters {
        bufsize: 0,
        flags,
        cylinders: sandev.cylinders as u32,
        heads: sandev.heads as u32,
        sectors_per_track: sandev.sectors_per_track as u32,
        sectors: sandev.capacity(),
        sector_size: sandev.block_size() as u16,
        device_path: None,
    };

    let mut len = DiskParameters::SIZE;
    match device_path(sandev) {
        Ok(dpi) => params.device_path = Some(dpi),
        Err(error) => {
            log::debug!(
                "[INT13] drive {:02X} could not provide device path information: {}",
                sandev.drive,
                error
            );
            len = DiskParameters::DPI_OFFSET;
        }
    }

    // The returned "buffer size" stops short of the device path block even
    // when one is copied out
    if bufsize < DiskParameters::DPTE_OFFSET {
        return Err(Int13Error::Invalid);
    }
    params.bufsize = if bufsize < DiskParameters::DPI_OFFSET {
        DiskParameters::DPTE_OFFSET as u16
    } else {
        DiskParameters::DPI_OFFSET as u16
    };

    let raw = params.emit();
    let len = len.min(bufsize);
    env.mem.copy_to_real(frame.ds, frame.si.word(), &raw[..len]);
    Ok(0)
}

/// Build EDD device path information, reopening the device first if its
/// connection lapsed.
fn device_path(sandev: &mut SanDrive) -> std::io::Result<[u8; 44]> {
    if sandev.needs_reopen() {
        sandev.reopen()?;
    }
    let description = sandev.edd_describe()?;
    Ok(device_path_info(&description))
}

/// INT 13,4B — Get status or terminate CD-ROM emulation
fn cdrom_status_terminate(
    sandev: &mut SanDrive,
    env: &mut Env,
    frame: &mut RegisterFrame,
) -> HandlerResult {
    log::debug!(
        "[INT13] drive {:02X} CD-ROM emulation status to {:04X}:{:04X}{}",
        sandev.drive,
        frame.ds,
        frame.si.word(),
        if frame.ax.low() != 0 { "" } else { " and terminate" }
    );

    if !sandev.is_cdrom() {
        log::debug!("[INT13] drive {:02X} is not a CD-ROM", sandev.drive);
        return Err(Int13Error::Invalid);
    }

    let specification = CdromSpecification {
        drive: sandev.drive,
    };
    env.mem
        .copy_to_real(frame.ds, frame.si.word(), &specification.emit());
    Ok(0)
}

/// INT 13,4D — Read CD-ROM boot catalog
fn cdrom_read_boot_catalog(
    sandev: &mut SanDrive,
    env: &mut Env,
    frame: &mut RegisterFrame,
) -> HandlerResult {
    let mut raw = [0u8; BootCatalogCommand::SIZE];
    env.mem.copy_from_real(frame.ds, frame.si.word(), &mut raw);
    let command = BootCatalogCommand::parse(&raw);
    log::debug!(
        "[INT13] drive {:02X} read boot catalog to {:08X}",
        sandev.drive,
        command.buffer
    );

    let Some(catalog) = sandev.boot_catalog else {
        log::debug!("[INT13] drive {:02X} has no boot catalog", sandev.drive);
        return Err(Int13Error::Invalid);
    };
    let start = catalog as u64 + command.start as u64;
    if command.count == 0 {
        return Ok(0);
    }

    let mut data = vec![0u8; command.count as usize * sandev.block_size()];
    if let Err(error) = sandev.read(start, command.count as u32, &mut data) {
        log::warn!(
            "[INT13] drive {:02X} could not read boot catalog: {}",
            sandev.drive,
            error
        );
        return Err(Int13Error::ReadError);
    }
    env.mem.copy_to_phys(command.buffer as usize, &data);
    Ok(0)
}
