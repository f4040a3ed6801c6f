//! Static descriptions of SPI NAND chips, and looking them up by ID.
//!
//! Everything here is immutable, `'static` data; a probe reads the manufacturer and device ID
//! bytes from the chip and calls [lookup_chip] to find out everything else.

pub mod ecc;
pub mod op;

use thiserror::Error;

use crate::esmt;
use crate::nand::ooblayout::OobLayout;
use crate::nand::NandLayout;
use ecc::{EccError, EccStatusFn};
use op::InfoOpVariants;

/// Every manufacturer this crate knows about
pub static MANUFACTURERS: &[&Manufacturer] = &[
    &esmt::ESMT_C8_MANUFACTURER,
    &esmt::ESMT_2C_MANUFACTURER,
    &esmt::ESMT_8C_MANUFACTURER,
];

/// How the chip must be asked for its ID bytes
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ReadIdMethod {
    /// READ ID opcode and a zero address byte, then the ID
    OpcodeAddr,
}

/// Device ID bytes, following the manufacturer ID
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct DeviceId {
    pub method: ReadIdMethod,
    pub id: &'static [u8],
}

/// Memory organization of a chip
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct MemOrg {
    pub bits_per_cell: u32,
    pub pagesize: u32,
    pub oobsize: u32,
    pub pages_per_eraseblock: u32,
    pub eraseblocks_per_lun: u32,
    pub max_bad_eraseblocks_per_lun: u32,
    pub planes_per_lun: u32,
    pub luns_per_target: u32,
    pub ntargets: u32,
}

impl MemOrg {
    /// Bytes of main area in one eraseblock
    pub fn eraseblock_size(&self) -> u64 {
        u64::from(self.pagesize) * u64::from(self.pages_per_eraseblock)
    }

    /// Bytes of main area in one LUN
    pub fn lun_size(&self) -> u64 {
        self.eraseblock_size() * u64::from(self.eraseblocks_per_lun)
    }

    pub fn total_eraseblocks(&self) -> u32 {
        self.eraseblocks_per_lun * self.luns_per_target * self.ntargets
    }

    /// Bytes of main area in the whole device
    pub fn total_size(&self) -> u64 {
        self.eraseblock_size() * u64::from(self.total_eraseblocks())
    }
}

impl From<&MemOrg> for NandLayout {
    fn from(value: &MemOrg) -> Self {
        NandLayout {
            blocks: value.total_eraseblocks(),
            pages_per_block: value.pages_per_eraseblock,
            bytes_per_page: value.pagesize as usize,
            oob_bytes_per_page: value.oobsize as usize,
        }
    }
}

/// Minimum ECC the chip needs: correct `strength` bits per `step_size` bytes
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct EccReq {
    pub strength: u32,
    pub step_size: u32,
}

/// How the on-die ECC engine lays out the spare area and reports its results
#[derive(Copy, Clone)]
pub struct EccInfo {
    pub ooblayout: &'static dyn OobLayout,
    pub get_status: Option<EccStatusFn>,
}

impl std::fmt::Debug for EccInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EccInfo")
            .field("get_status", &self.get_status.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything there is to know about one chip model
#[derive(Debug, Copy, Clone)]
pub struct ChipDescriptor {
    pub model: &'static str,
    pub devid: DeviceId,
    pub memorg: MemOrg,
    pub eccreq: EccReq,
    pub op_variants: InfoOpVariants,
    pub eccinfo: EccInfo,
}

impl ChipDescriptor {
    pub fn ooblayout(&self) -> &'static dyn OobLayout {
        self.eccinfo.ooblayout
    }

    /// Spare bytes per page, as the layout functions want it
    pub fn oobsize(&self) -> usize {
        self.memorg.oobsize as usize
    }

    /// Does this chip report how many bitflips its ECC engine corrected?
    pub fn reports_bitflips(&self) -> bool {
        self.eccinfo.get_status.is_some()
    }

    /// Turn a status register value read after a page read into a count of corrected bitflips
    ///
    /// Chips without a decoder of their own get the generic one, which can only tell "none",
    /// "some" (reported as the full ECC strength) and "too many".
    pub fn decode_ecc_status(&self, status: u8) -> Result<u32, EccError> {
        match self.eccinfo.get_status {
            Some(get_status) => get_status(status),
            None => ecc::generic_ecc_status(status, self.eccreq.strength),
        }
    }

    /// Does `id` (the bytes following the manufacturer ID) identify this chip?
    pub fn matches(&self, id: &[u8]) -> bool {
        id.starts_with(self.devid.id)
    }
}

/// A vendor (or one of a vendor's ID codes) and its chips
#[derive(Debug)]
pub struct Manufacturer {
    pub id: u8,
    pub name: &'static str,
    pub chips: &'static [ChipDescriptor],
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum LookupError {
    #[error("unknown SPI NAND manufacturer {0:#04x}")]
    UnknownManufacturer(u8),

    #[error("unknown {name} SPI NAND device {device:02x?} (manufacturer {mfr:#04x})")]
    UnknownDevice {
        name: &'static str,
        mfr: u8,
        device: Vec<u8>,
    },
}

/// Iterate every known chip along with its manufacturer
pub fn all_chips() -> impl Iterator<Item = (&'static Manufacturer, &'static ChipDescriptor)> {
    MANUFACTURERS
        .iter()
        .copied()
        .flat_map(|mfr| mfr.chips.iter().map(move |chip| (mfr, chip)))
}

/// Find the chip answering READ ID with `manufacturer_id` followed by `device_id`
pub fn lookup_chip(
    manufacturer_id: u8,
    device_id: &[u8],
) -> Result<&'static ChipDescriptor, LookupError> {
    let mfr = MANUFACTURERS
        .iter()
        .find(|mfr| mfr.id == manufacturer_id)
        .ok_or(LookupError::UnknownManufacturer(manufacturer_id))?;

    mfr.chips
        .iter()
        .find(|chip| chip.matches(device_id))
        .ok_or_else(|| LookupError::UnknownDevice {
            name: mfr.name,
            mfr: manufacturer_id,
            device: device_id.to_vec(),
        })
}

#[test]
fn test_lookup_chip() {
    assert_eq!(lookup_chip(0xC8, &[0x01]).unwrap().model, "F50L1G41LB");
    assert_eq!(lookup_chip(0xC8, &[0x41, 0xFF]).unwrap().model, "F50L2G41KA");
    assert_eq!(lookup_chip(0x2C, &[0x24]).unwrap().model, "F50L2G41XA");
    assert_eq!(lookup_chip(0x8C, &[0x2C]).unwrap().model, "F50L1G41LC");

    assert_eq!(
        lookup_chip(0xEF, &[0x01]).unwrap_err(),
        LookupError::UnknownManufacturer(0xEF)
    );
    assert!(matches!(
        lookup_chip(0x2C, &[0x01]),
        Err(LookupError::UnknownDevice { mfr: 0x2C, .. })
    ));
    assert!(lookup_chip(0xC8, &[]).is_err());
}

#[test]
fn test_memorg_sizes() {
    let chip = lookup_chip(0xC8, &[0x41]).unwrap();
    assert_eq!(chip.memorg.eraseblock_size(), 128 * 1024);
    assert_eq!(chip.memorg.total_size(), 256 * 1024 * 1024);

    let layout = NandLayout::from(&chip.memorg);
    assert_eq!(layout.blocks, 2048);
    assert_eq!(layout.raw_page_size(), 2048 + 128);
}

#[test]
fn test_all_chips_unique() {
    let chips: Vec<_> = all_chips().collect();
    assert_eq!(chips.len(), 5);

    for (i, (mfr_a, a)) in chips.iter().enumerate() {
        for (mfr_b, b) in &chips[i + 1..] {
            assert!(
                mfr_a.id != mfr_b.id || a.devid.id != b.devid.id,
                "{} and {} share an ID",
                a.model,
                b.model
            );
        }
    }
}
