//! INT 13 emulation core.
//!
//! Exports SAN block devices through the BIOS INT 13 disk interrupt
//! interface, so unmodified boot loaders can read and boot a
//! network-attached volume as though it were a local disk.

pub mod boot;
pub mod dispatch;
pub mod eltorito;
pub mod geometry;
pub mod packet;
pub mod xbft;


use std::io;

use thiserror::Error;

use crate::block::{BlockOpener, EddDescription, SharedDisk};
use crate::realmode::bda;
use crate::realmode::memory::BIOS_ROM;
use crate::realmode::{CpuFlag, Memory, RegisterFrame, SegOff};

use self::dispatch::{dispatch, DriveCounts, HandlerResult, INT13_BLKSIZE};
use self::xbft::XBFTAB_SIZE;

pub use self::boot::{BootError, Bootstrap, SanBootConfig};
pub use self::dispatch::Int13Error;
pub use self::xbft::{AcpiSource, XbftError};

/// The hooked interrupt vector.
pub const INT13_VECTOR: u8 = 0x13;

/// Entry point of the interrupt trampoline, in the ROM area.
///
/// A single IRET stub lives here; the embedding machine traps control
/// transfer to this address, captures the register frame, and calls
/// [`Int13Emu::int13`].
pub const WRAPPER: SegOff = SegOff::new((BIOS_ROM >> 4) as u16, 0x0400);

/// Diskette parameter table, written next to the wrapper at hook time and
/// returned by INT 13,08 for floppy drives.
pub(crate) const FDD_PARAMS_ADDR: SegOff = SegOff::new((BIOS_ROM >> 4) as u16, 0x0410);

/// One registered SAN volume, visible to callers as a BIOS drive.
pub struct SanDrive {
    /// BIOS drive number.  Bit 7 distinguishes hard disks from floppies.
    pub drive: u8,
    /// The number this drive would have received if appended to the live
    /// BIOS drive list.  If the emulated drive displaced a real one, the
    /// displaced drive is reachable at this number.
    pub(crate) natural_drive: u8,
    /// Cylinder count.  Ten bits in an INT 13 call, so at most 1024;
    /// oversized volumes truncate here.
    pub(crate) cylinders: u16,
    /// Head count.  MS-DOS through Win95 chokes on 256 heads, so 255 is
    /// the practical ceiling.
    pub(crate) heads: u8,
    /// Sectors per track.  Six bits, 1-based, so at most 63.
    pub(crate) sectors_per_track: u8,
    /// LBA of the El Torito boot catalog, for CD-ROMs that carry one.
    pub(crate) boot_catalog: Option<u32>,
    /// Status of the last operation, replayed by INT 13,01.
    pub(crate) last_status: HandlerResult,
    disk: SharedDisk,
}

impl SanDrive {
    fn new(drive: u8, natural_drive: u8, disk: SharedDisk) -> Self {
        Self {
            drive,
            natural_drive,
            cylinders: 0,
            heads: 0,
            sectors_per_track: 0,
            boot_catalog: None,
            last_status: Ok(0),
            disk,
        }
    }

    pub fn is_fdd(&self) -> bool {
        self.drive & 0x80 == 0
    }

    pub fn is_cdrom(&self) -> bool {
        self.disk.borrow().is_cdrom()
    }

    pub fn natural_drive(&self) -> u8 {
        self.natural_drive
    }

    pub fn geometry(&self) -> (u16, u8, u8) {
        (self.cylinders, self.heads, self.sectors_per_track)
    }

    pub fn boot_catalog(&self) -> Option<u32> {
        self.boot_catalog
    }

    /// Capacity in blocks.
    pub fn capacity(&self) -> u64 {
        self.disk.borrow().capacity()
    }

    /// Capacity limited to 32 bits, for the legacy services.
    pub(crate) fn capacity32(&self) -> u32 {
        self.capacity().min(0xFFFF_FFFF) as u32
    }

    pub fn block_size(&self) -> usize {
        self.disk.borrow().block_size()
    }

    pub(crate) fn read(&mut self, lba: u64, count: u32, buffer: &mut [u8]) -> io::Result<()> {
        self.disk.borrow_mut().read(lba, count, buffer)
    }

    pub(crate) fn write(&mut self, lba: u64, count: u32, buffer: &[u8]) -> io::Result<()> {
        self.disk.borrow_mut().write(lba, count, buffer)
    }

    pub(crate) fn reset(&mut self) -> io::Result<()> {
        self.disk.borrow_mut().reset()
    }

    pub(crate) fn reopen(&mut self) -> io::Result<()> {
        self.disk.borrow_mut().reopen()
    }

    pub(crate) fn needs_reopen(&self) -> bool {
        self.disk.borrow().needs_reopen()
    }

    pub(crate) fn edd_describe(&self) -> io::Result<EddDescription> {
        self.disk.borrow().edd_describe()
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("drive {0:#04X} is already emulated")]
    DriveInUse(u8),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Process-wide emulator state: the drive list, the cached BIOS drive
/// counts, the saved interrupt vector, and the boot firmware table pool.
pub struct Int13Emu {
    /// The machine's real-mode memory.
    pub memory: Memory,
    drives: Vec<SanDrive>,
    opener: Box<dyn BlockOpener>,
    /// Stand-in for the saved original handler: invoked when a call is
    /// chained rather than serviced.
    chain: Option<Box<dyn FnMut(&mut RegisterFrame, &mut Memory)>>,
    /// Cached BDA equipment word (40:10).
    equipment_word: u16,
    /// Cached BDA hard disk count (40:75).
    num_drives: u8,
    /// Floppy count, derived from the equipment word.
    num_fdds: u8,
    original_vector: Option<SegOff>,
    pub(crate) xbftab: [u8; XBFTAB_SIZE],
    pub(crate) xbftab_used: usize,
}

impl Int13Emu {
    pub fn new(opener: Box<dyn BlockOpener>) -> Self {
        Self {
            memory: Memory::new(),
            drives: Vec::new(),
            opener,
            chain: None,
            equipment_word: 0,
            num_drives: 0,
            num_fdds: 0,
            original_vector: None,
            xbftab: [0u8; XBFTAB_SIZE],
            xbftab_used: 0,
        }
    }

    /// Install the handler standing in for the pre-hook INT 13 vector.
    pub fn set_chain_handler(
        &mut self,
        handler: Box<dyn FnMut(&mut RegisterFrame, &mut Memory)>,
    ) {
        self.chain = Some(handler);
    }

    pub fn hooked(&self) -> bool {
        self.original_vector.is_some()
    }

    pub fn drives(&self) -> &[SanDrive] {
        &self.drives
    }

    pub fn drive(&self, number: u8) -> Option<&SanDrive> {
        self.drives.iter().find(|sandev| sandev.drive == number)
    }

    pub fn num_drives(&self) -> u8 {
        self.num_drives
    }

    pub fn num_fdds(&self) -> u8 {
        self.num_fdds
    }

    /// The boot firmware table pool and its used length.
    pub fn xbftab(&self) -> (&[u8], usize) {
        (&self.xbftab[..], self.xbftab_used)
    }

    /// Update the BIOS drive counts to cover every emulated drive.
    ///
    /// Re-reads the live BDA values first: the firmware owns these too and
    /// may rewrite them behind our back during late POST.
    fn sync_num_drives(&mut self) {
        self.equipment_word = self.memory.get_real_word(bda::BDA_SEG, bda::EQUIPMENT_WORD);
        self.num_drives = self.memory.get_real_byte(bda::BDA_SEG, bda::NUM_DRIVES);
        self.num_fdds = if self.equipment_word & 0x0001 != 0 {
            (((self.equipment_word >> 6) & 0x3) + 1) as u8
        } else {
            0
        };

        for sandev in &self.drives {
            let counter = if sandev.is_fdd() {
                &mut self.num_fdds
            } else {
                &mut self.num_drives
            };
            let max_drive = sandev.drive.max(sandev.natural_drive);
            let required = (max_drive & 0x7F) + 1;
            if *counter < required {
                *counter = required;
                log::debug!(
                    "[INT13] drive {:02X} added to drive count: {} HDDs, {} FDDs",
                    sandev.drive,
                    self.num_drives,
                    self.num_fdds
                );
            }
        }

        self.equipment_word &= !((0x3 << 6) | 0x0001);
        if self.num_fdds != 0 {
            let fdds = (self.num_fdds - 1).min(3) as u16;
            self.equipment_word |= 0x0001 | (fdds << 6);
        }
        self.memory
            .put_real_word(bda::BDA_SEG, bda::EQUIPMENT_WORD, self.equipment_word);
        self.memory
            .put_real_byte(bda::BDA_SEG, bda::NUM_DRIVES, self.num_drives);
    }

    /// Re-sync if the firmware changed the drive counts since we last saw
    /// them.
    fn check_num_drives(&mut self) {
        let equipment_word = self.memory.get_real_word(bda::BDA_SEG, bda::EQUIPMENT_WORD);
        let num_drives = self.memory.get_real_byte(bda::BDA_SEG, bda::NUM_DRIVES);
        if equipment_word != self.equipment_word || num_drives != self.num_drives {
            self.sync_num_drives();
        }
    }

    fn hook_vector(&mut self) {
        // IRET stub at the wrapper entry; the FDD parameter table sits
        // just past it
        self.memory.write_byte(WRAPPER.to_physical(), 0xCF);
        self.memory.copy_to_real(
            FDD_PARAMS_ADDR.segment,
            FDD_PARAMS_ADDR.offset,
            &packet::FDD_PARAMETERS,
        );

        let original = self.memory.read_vector(INT13_VECTOR);
        self.memory.write_vector(INT13_VECTOR, WRAPPER);
        self.original_vector = Some(original);
        log::debug!("[INT13] hooked vector 13 (was {})", original);
    }

    fn unhook_vector(&mut self) {
        if let Some(original) = self.original_vector.take() {
            self.memory.write_vector(INT13_VECTOR, original);
            log::debug!("[INT13] unhooked vector 13");
        }
    }

    /// Register a SAN volume as an emulated BIOS drive.
    ///
    /// Opens the block device behind `uris`, synthesises a geometry,
    /// parses El Torito parameters for CD-ROMs, and hooks the interrupt
    /// vector if this is the first drive.  A `drive` of 0x7F (or 0xFF)
    /// requests the natural drive number.  Returns the drive number
    /// actually assigned.
    pub fn hook(&mut self, drive: u8, uris: &[String], flags: u32) -> Result<u8, HookError> {
        let need_hook = self.drives.is_empty();

        // Calculate the natural drive number
        self.sync_num_drives();
        let natural_drive = if drive & 0x80 != 0 {
            self.num_drives | 0x80
        } else {
            self.num_fdds
        };

        // Use the natural drive number if directed to do so
        let drive = if drive & 0x7F == 0x7F {
            natural_drive
        } else {
            drive
        };

        if self.drives.iter().any(|sandev| sandev.drive == drive) {
            return Err(HookError::DriveInUse(drive));
        }

        let disk = self.opener.open(uris, flags)?;
        let mut sandev = SanDrive::new(drive, natural_drive, disk);

        let mut scratch = vec![0u8; sandev.block_size()];
        if sandev.is_cdrom() {
            eltorito::parse(&mut sandev, &mut scratch)?;
        }
        if sandev.block_size() == INT13_BLKSIZE {
            geometry::guess(&mut sandev, &mut scratch)?;
        }

        log::debug!(
            "[INT13] drive {:02X} (naturally {:02X}) registered with C/H/S geometry {}/{}/{}",
            drive,
            natural_drive,
            sandev.cylinders,
            sandev.heads,
            sandev.sectors_per_track
        );

        self.drives.push(sandev);
        if need_hook {
            self.hook_vector();
        }
        self.sync_num_drives();
        Ok(drive)
    }

    /// Unregister an emulated drive.  Unhooks the interrupt vector when
    /// the last drive goes away.
    pub fn unhook(&mut self, drive: u8) {
        let Some(index) = self.drives.iter().position(|sandev| sandev.drive == drive) else {
            log::debug!("[INT13] drive {:02X} is not a SAN drive", drive);
            return;
        };
        self.drives.remove(index);

        // The BIOS drive count should shrink here, but there is no
        // reliable way to adjust it

        log::debug!("[INT13] drive {:02X} unregistered", drive);

        if self.drives.is_empty() {
            self.unhook_vector();
        }
    }

    /// The trampoline entry: service one intercepted INT 13 call.
    ///
    /// Mirrors the real-mode wrapper exactly: AX/DX are snapshotted at
    /// entry, OF is cleared and CF set before dispatch, OF set on return
    /// means the call was serviced (no chaining), and DL is fixed up from
    /// the snapshots so the caller sees what the firmware would have
    /// returned.
    pub fn int13(&mut self, frame: &mut RegisterFrame) {
        let entry_ax = frame.ax.word();
        let entry_dx = frame.dx.word();

        frame.unset_flag(CpuFlag::Overflow);
        frame.set_flag(CpuFlag::Carry);

        // Check the BIOS hasn't killed off our drives
        self.check_num_drives();

        let counts = DriveCounts {
            fdds: self.num_fdds,
            hdds: self.num_drives,
        };
        let handled = dispatch(&mut self.drives, &mut self.memory, counts, frame);

        // Chain if the dispatcher did not claim the call
        if !handled {
            if let Some(chain) = self.chain.as_mut() {
                chain(frame, &mut self.memory);
            }
        }

        // Fix up DL:
        //   INT 13,15 : do nothing if hard disk
        //   INT 13,08 : load with the drive count
        //   all others: restore the entry value
        let command = (entry_ax >> 8) as u8;
        let drive = entry_dx as u8;
        if command == 0x15 && drive & 0x80 != 0 {
            return;
        }
        frame.dx.set_low(drive);
        if command == 0x08 {
            frame.dx.set_low(if drive & 0x80 != 0 {
                self.num_drives
            } else {
                self.num_fdds
            });
        }
    }
}
