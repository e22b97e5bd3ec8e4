//! Boot firmware table installation.
//!
//! SAN-booted operating systems find their boot volume through ACPI tables
//! (iBFT, aBFT, sBFT, ...) describing the transport.  The block layer
//! produces those tables; this module packs them into the low-memory pool
//! the OS will scan after hand-off.

use thiserror::Error;

use crate::int13::Int13Emu;

/// Maximum combined size of the boot firmware tables.
pub const XBFTAB_SIZE: usize = 768;

/// Alignment of boot firmware table entries.
pub const XBFTAB_ALIGN: usize = 16;

/// Size of an ACPI description header.
pub const ACPI_HEADER_LEN: usize = 36;

const CHECKSUM_OFFSET: usize = 9;
const OEM_ID_OFFSET: usize = 10;
const OEM_TABLE_ID_OFFSET: usize = 16;

#[derive(Debug, Error)]
pub enum XbftError {
    #[error("no space in boot firmware table pool for {0} table")]
    NoSpace(String),
    #[error("short ACPI table ({0} bytes)")]
    Malformed(usize),
}

/// A producer of ACPI description tables for registered SAN devices.
///
/// `install` is expected to present each table in turn to the supplied
/// callback and stop on the first failure.
pub trait AcpiSource {
    fn install(
        &mut self,
        install: &mut dyn FnMut(&[u8]) -> Result<(), XbftError>,
    ) -> Result<(), XbftError>;
}

impl Int13Emu {
    /// Describe SAN devices for a SAN-booted operating system.
    ///
    /// Clears the table pool and repopulates it from `source`.
    pub fn describe(&mut self, source: &mut dyn AcpiSource) -> Result<(), XbftError> {
        self.xbftab.fill(0);
        self.xbftab_used = 0;

        let pool = &mut self.xbftab;
        let used = &mut self.xbftab_used;
        let result = source.install(&mut |table| install_table(pool, used, table));
        if let Err(error) = &result {
            log::debug!("[INT13] could not install ACPI tables: {}", error);
        }
        result
    }
}

fn table_name(table: &[u8]) -> String {
    String::from_utf8_lossy(&table[..4]).into_owned()
}

/// Copy one table into the pool at the next aligned offset, stamp the OEM
/// identifiers, and fix the checksum so the table sums to zero.
fn install_table(
    pool: &mut [u8; XBFTAB_SIZE],
    used: &mut usize,
    table: &[u8],
) -> Result<(), XbftError> {
    let len = table.len();
    if len < ACPI_HEADER_LEN {
        return Err(XbftError::Malformed(len));
    }
    if len > XBFTAB_SIZE - *used {
        log::debug!(
            "[INT13] out of space for {} table",
            table_name(table)
        );
        return Err(XbftError::NoSpace(table_name(table)));
    }

    let installed = &mut pool[*used..*used + len];
    installed.copy_from_slice(table);
    copy_padded(&mut installed[OEM_ID_OFFSET..OEM_ID_OFFSET + 6], b"FENSYS");
    copy_padded(
        &mut installed[OEM_TABLE_ID_OFFSET..OEM_TABLE_ID_OFFSET + 8],
        b"iPXE",
    );

    let sum = installed
        .iter()
        .fold(0u8, |acc, &byte| acc.wrapping_add(byte));
    installed[CHECKSUM_OFFSET] = installed[CHECKSUM_OFFSET].wrapping_sub(sum);

    log::debug!(
        "[INT13] installed {} table at offset {:#05X}+{:#05X}",
        table_name(table),
        *used,
        len
    );
    *used = (*used + len + XBFTAB_ALIGN - 1) & !(XBFTAB_ALIGN - 1);
    Ok(())
}

/// strncpy: copy and zero-fill the remainder.
fn copy_padded(field: &mut [u8], value: &[u8]) {
    field.fill(0);
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
}
