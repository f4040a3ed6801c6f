//! Spare-area layouts, ECC status decoding and chip tables for ESMT SPI NAND flash.
//!
//! The [nand] module holds the vendor-neutral pieces (OOB layout capability, a simulated NAND
//! with spare area), [spinand] holds the SPI NAND chip descriptor framework, and [esmt] fills
//! it in for the ESMT F50 parts.

pub mod esmt;
pub mod nand;
pub mod spinand;
pub mod util;
