//! Decoding of the on-die ECC engine's report in the status register

use thiserror::Error;

/// Bits 5:4 of the status register, as understood by every SPI NAND
pub const STATUS_ECC_MASK: u8 = 0x30;
pub const STATUS_ECC_NO_BITFLIPS: u8 = 0 << 4;
pub const STATUS_ECC_HAS_BITFLIPS: u8 = 1 << 4;
pub const STATUS_ECC_UNCOR_ERROR: u8 = 2 << 4;

/// Why a read's data can't be trusted
#[derive(Error, Debug, Eq, PartialEq, Copy, Clone)]
pub enum EccError {
    /// The ECC engine found more bitflips than it could correct
    #[error("uncorrectable ECC error")]
    Uncorrectable,

    /// The status register holds an ECC status outside the documented set
    #[error("unknown ECC status {0:#04x}")]
    UnknownStatus(u8),
}

/// A chip-specific decoder: status register in, number of corrected bitflips out
pub type EccStatusFn = fn(status: u8) -> Result<u32, EccError>;

/// Decode the ECC status with only the bits every chip agrees on.
///
/// Chips using this don't report how many bitflips were corrected, so any correction is reported
/// as the worst case, `strength`.
pub fn generic_ecc_status(status: u8, strength: u32) -> Result<u32, EccError> {
    match status & STATUS_ECC_MASK {
        STATUS_ECC_NO_BITFLIPS => Ok(0),
        STATUS_ECC_HAS_BITFLIPS => Ok(strength),
        STATUS_ECC_UNCOR_ERROR => Err(EccError::Uncorrectable),
        masked => Err(EccError::UnknownStatus(masked)),
    }
}

#[test]
fn test_generic_ecc_status() {
    assert_eq!(generic_ecc_status(0x00, 8), Ok(0));
    assert_eq!(generic_ecc_status(0x13, 8), Ok(8));
    assert_eq!(generic_ecc_status(0x10, 1), Ok(1));
    assert_eq!(generic_ecc_status(0x20, 8), Err(EccError::Uncorrectable));
    assert_eq!(generic_ecc_status(0x30, 8), Err(EccError::UnknownStatus(0x30)));

    // Bits outside 5:4 don't matter
    assert_eq!(generic_ecc_status(0xC3, 8), Ok(0));
}
