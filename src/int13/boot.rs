//! Boot record loading: MBR first, then El Torito.
//!
//! Both strategies drive the (now hooked) INT 13 services rather than the
//! block layer directly, so a boot attempt exercises exactly the interface
//! the loaded boot code will.

use thiserror::Error;

use crate::int13::eltorito::{self, BootEntry, ValidationEntry};
use crate::int13::packet::{BootCatalogCommand, DiskAddress};
use crate::int13::Int13Emu;
use crate::realmode::memory::BOOT_ADDR;
use crate::realmode::{CpuFlag, Memory, RegisterFrame, SegOff};

/// Scratch area for command packets issued by the loader (free conventional
/// memory between the BDA and the boot sector).
const CATALOG_COMMAND: SegOff = SegOff::new(0x0000, 0x0500);
const ADDRESS_PACKET: SegOff = SegOff::new(0x0000, 0x0510);

const MBR_MAGIC: u16 = 0xAA55;
const MBR_MAGIC_OFFSET: u16 = 510;

/// Default load segment when the boot entry leaves it zero.
const ELTORITO_LOAD_SEGMENT: u16 = 0x07C0;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("boot record read failed with status {0:#04X}")]
    ReadFailed(u8),
    #[error("volume is not bootable: {0}")]
    NotBootable(&'static str),
    #[error("El Torito media type {0:#04X} requires emulation")]
    EmulationRequired(u8),
    #[error("boot hand-off failed: {0}")]
    Handoff(#[from] std::io::Error),
    #[error("boot sector returned control")]
    Returned,
}

/// Boot configuration parameters.
///
/// Carried for SAN boot strategies that locate a file inside the volume;
/// the raw MBR / El Torito strategies here ignore it.
#[derive(Debug, Clone, Default)]
pub struct SanBootConfig {
    pub filename: Option<String>,
    pub label: Option<String>,
}

/// The boot-sector hand-off collaborator.
pub trait Bootstrap {
    /// Transfer control to loaded boot code with DL set to the boot drive.
    /// Returns only if the boot code hands control back.
    fn call_bootsector(
        &mut self,
        mem: &mut Memory,
        address: SegOff,
        drive: u8,
    ) -> std::io::Result<()>;
}

impl Int13Emu {
    /// Issue an INT 13 call the way real-mode code would: carry set on
    /// entry, carry plus AH examined on return.
    fn issue(&mut self, frame: &mut RegisterFrame) -> Result<(), u8> {
        frame.set_flag(CpuFlag::Carry);
        self.int13(frame);
        if frame.check_flag(CpuFlag::Carry) {
            Err(frame.ax.high())
        } else {
            Ok(())
        }
    }

    /// Load and verify the master boot record to 0000:7C00.
    fn load_mbr(&mut self, drive: u8) -> Result<SegOff, BootError> {
        let address = SegOff::new(0x0000, BOOT_ADDR as u16);

        let mut frame = RegisterFrame::new();
        frame.ax.set(0x0201); // read one sector
        frame.cx.set(0x0001); // cylinder 0, sector 1
        frame.dx.set(drive as u16); // head 0
        frame.es = address.segment;
        frame.bx.set(address.offset);
        if let Err(status) = self.issue(&mut frame) {
            log::debug!(
                "[INT13] drive {:02X} could not read MBR (status {:02X})",
                drive,
                status
            );
            return Err(BootError::ReadFailed(status));
        }

        let magic = self
            .memory
            .get_real_word(address.segment, address.offset + MBR_MAGIC_OFFSET);
        if magic != MBR_MAGIC {
            log::debug!("[INT13] drive {:02X} does not contain a valid MBR", drive);
            return Err(BootError::NotBootable("missing boot signature"));
        }

        Ok(address)
    }

    /// Load and verify an El Torito boot image.
    fn load_eltorito(&mut self, drive: u8) -> Result<SegOff, BootError> {
        // Read the boot catalog to 0000:7C00
        let command = BootCatalogCommand {
            count: 1,
            buffer: BOOT_ADDR as u32,
            start: 0,
        };
        self.memory
            .copy_to_real(CATALOG_COMMAND.segment, CATALOG_COMMAND.offset, &command.emit());

        let mut frame = RegisterFrame::new();
        frame.ax.set(0x4D00);
        frame.dx.set_low(drive);
        frame.ds = CATALOG_COMMAND.segment;
        frame.si.set(CATALOG_COMMAND.offset);
        if let Err(status) = self.issue(&mut frame) {
            log::debug!(
                "[INT13] drive {:02X} could not read El Torito boot catalog (status {:02X})",
                drive,
                status
            );
            return Err(BootError::ReadFailed(status));
        }

        let mut catalog = [0u8; ValidationEntry::SIZE + BootEntry::SIZE];
        self.memory.copy_from_phys(BOOT_ADDR, &mut catalog);
        let validation = ValidationEntry::parse(&catalog[..ValidationEntry::SIZE]);
        let boot = BootEntry::parse(&catalog[ValidationEntry::SIZE..]);

        if validation.platform_id != eltorito::PLATFORM_X86 {
            log::debug!(
                "[INT13] drive {:02X} El Torito specifies unknown platform {:02X}",
                drive,
                validation.platform_id
            );
            return Err(BootError::NotBootable("unknown platform"));
        }
        if boot.indicator != eltorito::BOOTABLE {
            log::debug!("[INT13] drive {:02X} El Torito is not bootable", drive);
            return Err(BootError::NotBootable("boot entry not marked bootable"));
        }
        if boot.media_type != eltorito::NO_EMULATION {
            log::debug!(
                "[INT13] drive {:02X} El Torito requires emulation type {:02X}",
                drive,
                boot.media_type
            );
            return Err(BootError::EmulationRequired(boot.media_type));
        }

        let address = SegOff::new(
            if boot.load_segment != 0 {
                boot.load_segment
            } else {
                ELTORITO_LOAD_SEGMENT
            },
            0,
        );
        log::debug!(
            "[INT13] drive {:02X} El Torito boot image at LBA {:08X} (count {}) loads at {}",
            drive,
            boot.start,
            boot.length,
            address
        );

        // Read the boot image through the extended interface
        let packet = DiskAddress {
            bufsize: DiskAddress::MIN_BUFSIZE,
            count: boot.length as u8,
            buffer: address,
            lba: boot.start as u64,
            ..Default::default()
        };
        self.memory
            .copy_to_real(ADDRESS_PACKET.segment, ADDRESS_PACKET.offset, &packet.emit());

        let mut frame = RegisterFrame::new();
        frame.ax.set(0x4200);
        frame.dx.set_low(drive);
        frame.ds = ADDRESS_PACKET.segment;
        frame.si.set(ADDRESS_PACKET.offset);
        if let Err(status) = self.issue(&mut frame) {
            log::debug!(
                "[INT13] drive {:02X} could not read El Torito boot image (status {:02X})",
                drive,
                status
            );
            return Err(BootError::ReadFailed(status));
        }

        Ok(address)
    }

    /// Attempt to boot from an emulated drive.
    ///
    /// Never returns success: either the hand-off fails, or loaded boot
    /// code hands control back, which is itself a boot failure.
    pub fn boot(
        &mut self,
        drive: u8,
        config: &SanBootConfig,
        bootstrap: &mut dyn Bootstrap,
    ) -> Result<(), BootError> {
        let _ = config; // raw-volume strategies take no parameters

        let address = match self.load_mbr(drive) {
            Ok(address) => address,
            Err(_) => self.load_eltorito(drive)?,
        };

        log::debug!("[INT13] drive {:02X} booting at {}", drive, address);
        bootstrap.call_bootsector(&mut self.memory, address, drive)?;

        log::debug!("[INT13] drive {:02X} boot returned", drive);
        Err(BootError::Returned)
    }
}
