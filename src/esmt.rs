//! ESMT F50-series SPI NAND: spare area layouts, ECC status decoding and the chip tables.
//!
//! ESMT ships these parts under three manufacturer ID codes (0xC8, 0x2C and 0x8C), so there are
//! three [Manufacturer] tables that all carry the "ESMT" name.
//!
//! The spare area is always split into 4 sections, but how each section divides into ECC and
//! free bytes depends on the part:
//!
//! ```text
//! F50L1G41LB / F50D1G41LB / F50L1G41LC, 64 spare bytes (EsmtOobLayout::Narrow)
//!
//!   | 0:1 | 2:3  | 4:7  | 8:15 | 16:17 | 18:19 | 20:23 | 24:31 | ... | 56:63 |
//!   | BBM | free | rsvd | ECC  | rsvd  | free  | rsvd  |  ECC  | ... |  ECC  |
//!
//! F50L2G41KA, 128 spare bytes (EsmtOobLayout::WideEcc)
//!
//!   | 0:3 | 4:15 | 16:19 | 20:31 | ... | 52:63 | 64:79 | 80:95 | 96:111 | 112:127 |
//!   | BBM | free | rsvd  | free  | ... | free  | ECC 0 | ECC 1 | ECC 2  |  ECC 3  |
//!
//! F50L2G41XA, 128 spare bytes (EsmtOobLayout::WideFree)
//!
//!   | 0:3 | 4:31 | 32:39  | 40:47  | 48:55  | 56:63  | 64:127                         |
//!   | BBM | rsvd | free 0 | free 1 | free 2 | free 3 | ECC, section N at 64 + 8N (16) |
//! ```
//!
//! The F50L1G41 parts only hand out 2 free bytes per section. Bytes 4:7 of each section are
//! ECC-protected, and filesystems that partially program the spare area (JFFS2 cleanmarkers, for
//! example) can't use ECC-protected bytes.

use crate::nand::ooblayout::{OobError, OobLayout, OobRegion};
use crate::spinand::ecc::{EccError, STATUS_ECC_NO_BITFLIPS, STATUS_ECC_UNCOR_ERROR};
use crate::spinand::op::{InfoOpVariants, OpVariants, SpiMemOp};
use crate::spinand::{
    ChipDescriptor, DeviceId, EccInfo, EccReq, Manufacturer, MemOrg, ReadIdMethod,
};

pub const SPINAND_MFR_ESMT_C8: u8 = 0xC8;
pub const SPINAND_MFR_ESMT_2C: u8 = 0x2C;
pub const SPINAND_MFR_ESMT_8C: u8 = 0x8C;

/// ECC status lives in bits 7:4 on the 8-bit-ECC parts
const ESMT_STATUS_ECC_MASK: u8 = 0xF0;
const ESMT_STATUS_ECC_1TO3_BITFLIPS: u8 = 1 << 4;
const ESMT_STATUS_ECC_4TO6_BITFLIPS: u8 = 3 << 4;
const ESMT_STATUS_ECC_7TO8_BITFLIPS: u8 = 5 << 4;

const ESMT_OOB_SECTION_COUNT: usize = 4;
const ESMT_OOB_BBM_SIZE: usize = 2;
const ESMT_OOB_BBM_SIZE_128: usize = 4;

/// Where the hardware-filled ECC bytes begin on the 128-byte spare parts
const ESMT_OOB_ECC_BASE_128: usize = 64;

const fn section_size(oobsize: usize) -> usize {
    oobsize / ESMT_OOB_SECTION_COUNT
}

const fn free_half(oobsize: usize) -> usize {
    section_size(oobsize) / 2
}

const fn ecc_half(oobsize: usize) -> usize {
    section_size(oobsize) - free_half(oobsize)
}

/// The three ESMT spare area layouts
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum EsmtOobLayout {
    /// 64-byte spare, each section split in half: 2 free bytes after a 2-byte head, then ECC
    Narrow,

    /// 128-byte spare, 12 free bytes per 16-byte block up front, ECC in the second half
    WideEcc,

    /// 128-byte spare, 8 free bytes per section from offset 32, ECC at stride 8 from offset 64
    WideFree,
}

impl EsmtOobLayout {
    fn check_section(section: usize) -> Result<(), OobError> {
        if section >= ESMT_OOB_SECTION_COUNT {
            return Err(OobError::Range(section));
        }
        Ok(())
    }
}

impl OobLayout for EsmtOobLayout {
    fn ecc(&self, oobsize: usize, section: usize) -> Result<OobRegion, OobError> {
        Self::check_section(section)?;

        Ok(match self {
            Self::Narrow => OobRegion::new(
                section * section_size(oobsize) + free_half(oobsize),
                ecc_half(oobsize),
            ),
            Self::WideEcc => OobRegion::new(ESMT_OOB_ECC_BASE_128 + section * 16, 16),
            // Neighbouring sections report overlapping ranges; the ECC zone is shared.
            Self::WideFree => OobRegion::new(ESMT_OOB_ECC_BASE_128 + section * 8, 16),
        })
    }

    fn free(&self, oobsize: usize, section: usize) -> Result<OobRegion, OobError> {
        Self::check_section(section)?;

        Ok(match self {
            // Skip the bad block marker in section 0 and the same reserved bytes elsewhere, and
            // only hand out the 2 bytes not covered by ECC
            Self::Narrow => {
                OobRegion::new(section * section_size(oobsize) + ESMT_OOB_BBM_SIZE, 2)
            }
            Self::WideEcc => OobRegion::new(section * 16 + ESMT_OOB_BBM_SIZE_128, 12),
            Self::WideFree => OobRegion::new(32 + section * 8, 8),
        })
    }

    fn bbm_len(&self) -> usize {
        match self {
            Self::Narrow => ESMT_OOB_BBM_SIZE,
            Self::WideEcc | Self::WideFree => ESMT_OOB_BBM_SIZE_128,
        }
    }

    fn section_local(&self) -> bool {
        *self == Self::Narrow
    }

    fn shared_ecc(&self) -> bool {
        *self == Self::WideFree
    }
}

/// Decode the ECC status of the 8-bit-ECC parts, which report a bitflip range in bits 7:4.
///
/// Each range is reported as its upper bound.
pub fn esmt_8_ecc_get_status(status: u8) -> Result<u32, EccError> {
    match status & ESMT_STATUS_ECC_MASK {
        STATUS_ECC_NO_BITFLIPS => Ok(0),
        STATUS_ECC_UNCOR_ERROR => Err(EccError::Uncorrectable),
        ESMT_STATUS_ECC_1TO3_BITFLIPS => Ok(3),
        ESMT_STATUS_ECC_4TO6_BITFLIPS => Ok(6),
        ESMT_STATUS_ECC_7TO8_BITFLIPS => Ok(8),
        masked => Err(EccError::UnknownStatus(masked)),
    }
}

const QUADIO_READ_CACHE_VARIANTS: OpVariants = OpVariants {
    ops: &[
        SpiMemOp::page_read_from_cache_quadio(2),
        SpiMemOp::page_read_from_cache_x4(1),
        SpiMemOp::page_read_from_cache_dualio(1),
        SpiMemOp::page_read_from_cache_x2(1),
        SpiMemOp::page_read_from_cache(true, 1),
        SpiMemOp::page_read_from_cache(false, 1),
    ],
};

const X4_READ_CACHE_VARIANTS: OpVariants = OpVariants {
    ops: &[
        SpiMemOp::page_read_from_cache_x4(1),
        SpiMemOp::page_read_from_cache_x2(1),
        SpiMemOp::page_read_from_cache(true, 1),
        SpiMemOp::page_read_from_cache(false, 1),
    ],
};

const X4_WRITE_CACHE_VARIANTS: OpVariants = OpVariants {
    ops: &[SpiMemOp::prog_load_x4(true), SpiMemOp::prog_load(true)],
};

const X4_UPDATE_CACHE_VARIANTS: OpVariants = OpVariants {
    ops: &[SpiMemOp::prog_load_x4(false), SpiMemOp::prog_load(false)],
};

const X4_OP_VARIANTS: InfoOpVariants = InfoOpVariants {
    read_cache: &X4_READ_CACHE_VARIANTS,
    write_cache: &X4_WRITE_CACHE_VARIANTS,
    update_cache: &X4_UPDATE_CACHE_VARIANTS,
};

const QUADIO_OP_VARIANTS: InfoOpVariants = InfoOpVariants {
    read_cache: &QUADIO_READ_CACHE_VARIANTS,
    ..X4_OP_VARIANTS
};

/// 1 Gbit: 2048+64 byte pages, 64 pages per block, 1024 blocks
const MEMORG_1G: MemOrg = MemOrg {
    bits_per_cell: 1,
    pagesize: 2048,
    oobsize: 64,
    pages_per_eraseblock: 64,
    eraseblocks_per_lun: 1024,
    max_bad_eraseblocks_per_lun: 20,
    planes_per_lun: 1,
    luns_per_target: 1,
    ntargets: 1,
};

/// 2 Gbit: 2048+128 byte pages, 64 pages per block, 2048 blocks
const MEMORG_2G: MemOrg = MemOrg {
    oobsize: 128,
    eraseblocks_per_lun: 2048,
    max_bad_eraseblocks_per_lun: 40,
    ..MEMORG_1G
};

const ECCREQ_1BIT: EccReq = EccReq {
    strength: 1,
    step_size: 512,
};

const ECCREQ_8BIT: EccReq = EccReq {
    strength: 8,
    step_size: 512,
};

const NARROW_ECCINFO: EccInfo = EccInfo {
    ooblayout: &EsmtOobLayout::Narrow,
    get_status: None,
};

const fn devid(id: &'static [u8]) -> DeviceId {
    DeviceId {
        method: ReadIdMethod::OpcodeAddr,
        id,
    }
}

static ESMT_C8_SPINAND_TABLE: [ChipDescriptor; 3] = [
    // 1Gb, 3.3V
    ChipDescriptor {
        model: "F50L1G41LB",
        devid: devid(&[0x01]),
        memorg: MEMORG_1G,
        eccreq: ECCREQ_1BIT,
        op_variants: X4_OP_VARIANTS,
        eccinfo: NARROW_ECCINFO,
    },
    // 1Gb, 1.8V
    ChipDescriptor {
        model: "F50D1G41LB",
        devid: devid(&[0x11]),
        memorg: MEMORG_1G,
        eccreq: ECCREQ_1BIT,
        op_variants: X4_OP_VARIANTS,
        eccinfo: NARROW_ECCINFO,
    },
    // 2Gb, 3.3V
    ChipDescriptor {
        model: "F50L2G41KA",
        devid: devid(&[0x41]),
        memorg: MEMORG_2G,
        eccreq: ECCREQ_8BIT,
        op_variants: X4_OP_VARIANTS,
        eccinfo: EccInfo {
            ooblayout: &EsmtOobLayout::WideEcc,
            get_status: Some(esmt_8_ecc_get_status),
        },
    },
];

static ESMT_2C_SPINAND_TABLE: [ChipDescriptor; 1] = [
    // 2Gb, 3.3V, two planes
    ChipDescriptor {
        model: "F50L2G41XA",
        devid: devid(&[0x24]),
        memorg: MemOrg {
            planes_per_lun: 2,
            ..MEMORG_2G
        },
        eccreq: ECCREQ_8BIT,
        op_variants: X4_OP_VARIANTS,
        eccinfo: EccInfo {
            ooblayout: &EsmtOobLayout::WideFree,
            get_status: Some(esmt_8_ecc_get_status),
        },
    },
];

static ESMT_8C_SPINAND_TABLE: [ChipDescriptor; 1] = [
    // 1Gb, 3.3V
    ChipDescriptor {
        model: "F50L1G41LC",
        devid: devid(&[0x2C]),
        memorg: MEMORG_1G,
        eccreq: ECCREQ_1BIT,
        op_variants: QUADIO_OP_VARIANTS,
        eccinfo: NARROW_ECCINFO,
    },
];

pub static ESMT_C8_MANUFACTURER: Manufacturer = Manufacturer {
    id: SPINAND_MFR_ESMT_C8,
    name: "ESMT",
    chips: &ESMT_C8_SPINAND_TABLE,
};

pub static ESMT_2C_MANUFACTURER: Manufacturer = Manufacturer {
    id: SPINAND_MFR_ESMT_2C,
    name: "ESMT",
    chips: &ESMT_2C_SPINAND_TABLE,
};

pub static ESMT_8C_MANUFACTURER: Manufacturer = Manufacturer {
    id: SPINAND_MFR_ESMT_8C,
    name: "ESMT",
    chips: &ESMT_8C_SPINAND_TABLE,
};

#[cfg(test)]
const ALL_LAYOUTS: [(EsmtOobLayout, usize); 3] = [
    (EsmtOobLayout::Narrow, 64),
    (EsmtOobLayout::WideEcc, 128),
    (EsmtOobLayout::WideFree, 128),
];

#[test]
fn test_narrow_layout() {
    let layout = EsmtOobLayout::Narrow;
    assert_eq!(layout.free(64, 0), Ok(OobRegion::new(2, 2)));
    assert_eq!(layout.ecc(64, 0), Ok(OobRegion::new(8, 8)));
    assert_eq!(layout.free(64, 3), Ok(OobRegion::new(50, 2)));
    assert_eq!(layout.ecc(64, 3), Ok(OobRegion::new(56, 8)));
}

#[test]
fn test_wide_ecc_layout() {
    let layout = EsmtOobLayout::WideEcc;
    assert_eq!(layout.ecc(128, 2), Ok(OobRegion::new(96, 16)));
    assert_eq!(layout.free(128, 2), Ok(OobRegion::new(36, 12)));
    assert_eq!(layout.free(128, 0), Ok(OobRegion::new(4, 12)));
    assert_eq!(layout.ecc(128, 3), Ok(OobRegion::new(112, 16)));
}

#[test]
fn test_wide_free_layout() {
    let layout = EsmtOobLayout::WideFree;
    assert_eq!(layout.ecc(128, 3), Ok(OobRegion::new(88, 16)));
    assert_eq!(layout.free(128, 3), Ok(OobRegion::new(56, 8)));
    assert_eq!(layout.ecc(128, 0), Ok(OobRegion::new(64, 16)));
    assert_eq!(layout.free(128, 0), Ok(OobRegion::new(32, 8)));

    // The ECC ranges of neighbouring sections overlap, and that is preserved
    let ecc0 = layout.ecc(128, 0).unwrap();
    let ecc1 = layout.ecc(128, 1).unwrap();
    assert!(ecc0.overlaps(&ecc1));
}

#[test]
fn test_section_out_of_range() {
    for (layout, oobsize) in ALL_LAYOUTS {
        for section in [4, 5, 64, usize::MAX] {
            assert_eq!(layout.ecc(oobsize, section), Err(OobError::Range(section)));
            assert_eq!(layout.free(oobsize, section), Err(OobError::Range(section)));
        }
    }
}

#[test]
fn test_regions_in_bounds() {
    for (layout, oobsize) in ALL_LAYOUTS {
        let section_size = oobsize / ESMT_OOB_SECTION_COUNT;
        for section in 0..ESMT_OOB_SECTION_COUNT {
            let ecc = layout.ecc(oobsize, section).unwrap();
            let free = layout.free(oobsize, section).unwrap();

            assert!(ecc.within(0, oobsize), "{layout:?} ECC {section}");
            assert!(!ecc.overlaps(&OobRegion::new(0, layout.bbm_len())));
            assert!(!free.overlaps(&OobRegion::new(0, layout.bbm_len())));
            assert!(free.within(0, oobsize), "{layout:?} free {section}");

            if layout == EsmtOobLayout::Narrow {
                let start = section * section_size;
                assert!(ecc.within(start, start + section_size), "{layout:?} ECC {section}");
                assert!(free.within(start, start + section_size), "{layout:?} free {section}");
            }

            if layout != EsmtOobLayout::WideFree {
                assert!(!ecc.overlaps(&free), "{layout:?} section {section}");
            }
        }
    }
}

#[test]
fn test_layouts_pass_check() -> anyhow::Result<()> {
    use crate::nand::ooblayout::check_layout;

    for (layout, oobsize) in ALL_LAYOUTS {
        check_layout(&layout, oobsize)?;
    }
    Ok(())
}

#[test]
fn test_layouts_deterministic() {
    for (layout, oobsize) in ALL_LAYOUTS {
        for section in 0..=ESMT_OOB_SECTION_COUNT {
            assert_eq!(layout.ecc(oobsize, section), layout.ecc(oobsize, section));
            assert_eq!(layout.free(oobsize, section), layout.free(oobsize, section));
        }
    }
}

#[test]
fn test_byte_counts() {
    use crate::nand::ooblayout::{count_bytes, OobKind};

    assert_eq!(count_bytes(&EsmtOobLayout::Narrow, OobKind::Free, 64), 8);
    assert_eq!(count_bytes(&EsmtOobLayout::Narrow, OobKind::Ecc, 64), 32);
    assert_eq!(count_bytes(&EsmtOobLayout::WideEcc, OobKind::Free, 128), 48);
    assert_eq!(count_bytes(&EsmtOobLayout::WideEcc, OobKind::Ecc, 128), 64);
    assert_eq!(count_bytes(&EsmtOobLayout::WideFree, OobKind::Free, 128), 32);
    assert_eq!(count_bytes(&EsmtOobLayout::WideFree, OobKind::Ecc, 128), 64);
}

#[test]
fn test_narrow_byte_map() {
    use crate::nand::ooblayout::byte_map;

    let drawn: String = byte_map(&EsmtOobLayout::Narrow, 64)
        .iter()
        .map(|x| x.symbol())
        .collect();
    assert_eq!(&drawn[..16], "BBFF....EEEEEEEE");
    assert_eq!(&drawn[16..32], "..FF....EEEEEEEE");
}

#[test]
fn test_esmt_ecc_status() {
    assert_eq!(esmt_8_ecc_get_status(0x00), Ok(0));
    assert_eq!(esmt_8_ecc_get_status(0x10), Ok(3));
    assert_eq!(esmt_8_ecc_get_status(0x30), Ok(6));
    assert_eq!(esmt_8_ecc_get_status(0x50), Ok(8));
    assert_eq!(esmt_8_ecc_get_status(0x20), Err(EccError::Uncorrectable));

    // Low nibble is ignored
    assert_eq!(esmt_8_ecc_get_status(0x3F), Ok(6));
    assert_eq!(esmt_8_ecc_get_status(0x01), Ok(0));

    for status in [0x40, 0x60, 0x70, 0x80, 0xF0] {
        assert_eq!(
            esmt_8_ecc_get_status(status),
            Err(EccError::UnknownStatus(status))
        );
    }
}

#[test]
fn test_chip_status_decoders() {
    use crate::spinand::lookup_chip;

    // Parts with the ESMT decoder report the bitflip range
    let ka = lookup_chip(SPINAND_MFR_ESMT_C8, &[0x41]).unwrap();
    assert!(ka.reports_bitflips());
    assert_eq!(ka.decode_ecc_status(0x30), Ok(6));
    assert_eq!(ka.decode_ecc_status(0x40), Err(EccError::UnknownStatus(0x40)));

    // The 1-bit parts fall back to the generic decoder
    let lb = lookup_chip(SPINAND_MFR_ESMT_C8, &[0x01]).unwrap();
    assert!(!lb.reports_bitflips());
    assert_eq!(lb.decode_ecc_status(0x00), Ok(0));
    assert_eq!(lb.decode_ecc_status(0x10), Ok(1));
    assert_eq!(lb.decode_ecc_status(0x20), Err(EccError::Uncorrectable));
}

#[test]
fn test_chip_tables() {
    use crate::spinand::lookup_chip;
    use crate::spinand::op::{BusCaps, READ_FROM_CACHE_QUADIO, READ_FROM_CACHE_X4};

    let lc = lookup_chip(SPINAND_MFR_ESMT_8C, &[0x2C]).unwrap();
    let lb = lookup_chip(SPINAND_MFR_ESMT_C8, &[0x01]).unwrap();
    let xa = lookup_chip(SPINAND_MFR_ESMT_2C, &[0x24]).unwrap();

    let lc_ops = lc.op_variants.select(BusCaps::all()).unwrap();
    let lb_ops = lb.op_variants.select(BusCaps::all()).unwrap();
    assert_eq!(lc_ops.read_cache.opcode, READ_FROM_CACHE_QUADIO);
    assert_eq!(lb_ops.read_cache.opcode, READ_FROM_CACHE_X4);
    assert_eq!(lb_ops.write_cache, &SpiMemOp::prog_load_x4(true));
    assert_eq!(lb_ops.update_cache, &SpiMemOp::prog_load_x4(false));

    let single = lb.op_variants.select(BusCaps::empty()).unwrap();
    assert_eq!(single.write_cache, &SpiMemOp::prog_load(true));

    assert_eq!(xa.memorg.planes_per_lun, 2);
    assert_eq!(xa.oobsize(), 128);
    assert_eq!(lc.oobsize(), 64);

    for (_, chip) in crate::spinand::all_chips() {
        check_chip(chip);
    }
}

#[cfg(test)]
fn check_chip(chip: &ChipDescriptor) {
    use crate::nand::ooblayout::{check_layout, section_count};

    assert_eq!(chip.eccreq.step_size, 512);
    assert_eq!(section_count(chip.ooblayout(), chip.oobsize()), ESMT_OOB_SECTION_COUNT);
    assert!(check_layout(chip.ooblayout(), chip.oobsize()).is_ok(), "{}", chip.model);
}
