//! SPI memory operations used to move data between a SPI NAND's cache and the host, and the
//! preference-ordered variant sets chips advertise for them.

use std::fmt;

use bitflags::bitflags;

/// Read From Cache, single line (0x03)
pub const READ_FROM_CACHE: u8 = 0x03;
/// Fast Read From Cache, single line (0x0B)
pub const FAST_READ_FROM_CACHE: u8 = 0x0B;
/// Read From Cache x2, data on two lines (0x3B)
pub const READ_FROM_CACHE_X2: u8 = 0x3B;
/// Read From Cache Dual I/O, address and data on two lines (0xBB)
pub const READ_FROM_CACHE_DUALIO: u8 = 0xBB;
/// Read From Cache x4, data on four lines (0x6B)
pub const READ_FROM_CACHE_X4: u8 = 0x6B;
/// Read From Cache Quad I/O, address and data on four lines (0xEB)
pub const READ_FROM_CACHE_QUADIO: u8 = 0xEB;
/// Program Load, resets the rest of the cache to 0xFF (0x02)
pub const PROG_LOAD: u8 = 0x02;
/// Program Load Random Data, keeps the rest of the cache (0x84)
pub const PROG_LOAD_RANDOM: u8 = 0x84;
/// Program Load x4 (0x32)
pub const PROG_LOAD_X4: u8 = 0x32;
/// Program Load Random Data x4 (0x34)
pub const PROG_LOAD_RANDOM_X4: u8 = 0x34;

/// Column addresses in the cache are always two bytes
const CACHE_ADDR_BYTES: u8 = 2;

bitflags! {
    /// Multi-line transfer capabilities of a SPI controller and its wiring
    ///
    /// Single-line transfers are always supported.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BusCaps: u8 {
        /// Can send on two lines
        const TX_DUAL = 1 << 0;
        /// Can send on four lines
        const TX_QUAD = 1 << 1;
        /// Can receive on two lines
        const RX_DUAL = 1 << 2;
        /// Can receive on four lines
        const RX_QUAD = 1 << 3;
    }
}

/// Which way the data phase moves
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum DataDir {
    In,
    Out,
}

/// The shape of one SPI memory operation: opcode and the bus width of each phase
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct SpiMemOp {
    pub opcode: u8,
    pub cmd_buswidth: u8,
    pub addr_bytes: u8,
    pub addr_buswidth: u8,
    pub dummy_bytes: u8,
    pub dummy_buswidth: u8,
    pub data_dir: DataDir,
    pub data_buswidth: u8,
}

impl SpiMemOp {
    const fn read_cache(opcode: u8, addr_buswidth: u8, ndummy: u8, data_buswidth: u8) -> Self {
        Self {
            opcode,
            cmd_buswidth: 1,
            addr_bytes: CACHE_ADDR_BYTES,
            addr_buswidth,
            dummy_bytes: ndummy,
            dummy_buswidth: addr_buswidth,
            data_dir: DataDir::In,
            data_buswidth,
        }
    }

    const fn load_cache(opcode: u8, data_buswidth: u8) -> Self {
        Self {
            opcode,
            cmd_buswidth: 1,
            addr_bytes: CACHE_ADDR_BYTES,
            addr_buswidth: 1,
            dummy_bytes: 0,
            dummy_buswidth: 0,
            data_dir: DataDir::Out,
            data_buswidth,
        }
    }

    /// Single-line page read from cache; `fast` selects 0x0B over 0x03
    pub const fn page_read_from_cache(fast: bool, ndummy: u8) -> Self {
        let opcode = if fast {
            FAST_READ_FROM_CACHE
        } else {
            READ_FROM_CACHE
        };
        Self::read_cache(opcode, 1, ndummy, 1)
    }

    pub const fn page_read_from_cache_x2(ndummy: u8) -> Self {
        Self::read_cache(READ_FROM_CACHE_X2, 1, ndummy, 2)
    }

    pub const fn page_read_from_cache_dualio(ndummy: u8) -> Self {
        Self::read_cache(READ_FROM_CACHE_DUALIO, 2, ndummy, 2)
    }

    pub const fn page_read_from_cache_x4(ndummy: u8) -> Self {
        Self::read_cache(READ_FROM_CACHE_X4, 1, ndummy, 4)
    }

    pub const fn page_read_from_cache_quadio(ndummy: u8) -> Self {
        Self::read_cache(READ_FROM_CACHE_QUADIO, 4, ndummy, 4)
    }

    /// Single-line program load; `reset` clears the rest of the cache (write) or keeps it (update)
    pub const fn prog_load(reset: bool) -> Self {
        Self::load_cache(if reset { PROG_LOAD } else { PROG_LOAD_RANDOM }, 1)
    }

    pub const fn prog_load_x4(reset: bool) -> Self {
        Self::load_cache(if reset { PROG_LOAD_X4 } else { PROG_LOAD_RANDOM_X4 }, 4)
    }

    /// Can a bus with capabilities `caps` carry this operation?
    pub fn supported_by(&self, caps: BusCaps) -> bool {
        let tx_ok = |width: u8| match width {
            0 | 1 => true,
            2 => caps.intersects(BusCaps::TX_DUAL | BusCaps::TX_QUAD),
            4 => caps.contains(BusCaps::TX_QUAD),
            _ => false,
        };
        let rx_ok = |width: u8| match width {
            0 | 1 => true,
            2 => caps.intersects(BusCaps::RX_DUAL | BusCaps::RX_QUAD),
            4 => caps.contains(BusCaps::RX_QUAD),
            _ => false,
        };

        let data_ok = match self.data_dir {
            DataDir::In => rx_ok(self.data_buswidth),
            DataDir::Out => tx_ok(self.data_buswidth),
        };

        tx_ok(self.cmd_buswidth)
            && tx_ok(self.addr_buswidth)
            && tx_ok(self.dummy_buswidth)
            && data_ok
    }
}

/// Formats like "0xeb 1-4-4", the conventional cmd-addr-data line notation
impl fmt::Display for SpiMemOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#04x} {}-{}-{}",
            self.opcode, self.cmd_buswidth, self.addr_buswidth, self.data_buswidth
        )
    }
}

/// A set of equivalent operations, most preferred first
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct OpVariants {
    pub ops: &'static [SpiMemOp],
}

impl OpVariants {
    /// Pick the first variant that the bus can carry
    pub fn select(&self, caps: BusCaps) -> Option<&'static SpiMemOp> {
        self.ops.iter().find(|op| op.supported_by(caps))
    }
}

/// The read, write and update operation sets a chip supports
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct InfoOpVariants {
    pub read_cache: &'static OpVariants,
    pub write_cache: &'static OpVariants,
    pub update_cache: &'static OpVariants,
}

/// The operations a chip will actually be driven with, on one particular bus
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct SelectedOps {
    pub read_cache: &'static SpiMemOp,
    pub write_cache: &'static SpiMemOp,
    pub update_cache: &'static SpiMemOp,
}

impl InfoOpVariants {
    /// Select one operation from each set, or `None` if the bus can't carry any of some set
    pub fn select(&self, caps: BusCaps) -> Option<SelectedOps> {
        Some(SelectedOps {
            read_cache: self.read_cache.select(caps)?,
            write_cache: self.write_cache.select(caps)?,
            update_cache: self.update_cache.select(caps)?,
        })
    }
}

#[cfg(test)]
static TEST_READ: OpVariants = OpVariants {
    ops: &[
        SpiMemOp::page_read_from_cache_quadio(2),
        SpiMemOp::page_read_from_cache_x4(1),
        SpiMemOp::page_read_from_cache_dualio(1),
        SpiMemOp::page_read_from_cache_x2(1),
        SpiMemOp::page_read_from_cache(true, 1),
        SpiMemOp::page_read_from_cache(false, 1),
    ],
};

#[test]
fn test_select_read() {
    let pick = |caps| TEST_READ.select(caps).map(|op| op.opcode);

    assert_eq!(pick(BusCaps::all()), Some(READ_FROM_CACHE_QUADIO));
    assert_eq!(pick(BusCaps::RX_QUAD), Some(READ_FROM_CACHE_X4));
    assert_eq!(pick(BusCaps::RX_QUAD | BusCaps::TX_DUAL), Some(READ_FROM_CACHE_X4));
    assert_eq!(
        pick(BusCaps::RX_DUAL | BusCaps::TX_DUAL),
        Some(READ_FROM_CACHE_DUALIO)
    );
    assert_eq!(pick(BusCaps::RX_DUAL), Some(READ_FROM_CACHE_X2));
    assert_eq!(pick(BusCaps::empty()), Some(FAST_READ_FROM_CACHE));
}

#[test]
fn test_select_none() {
    static QUAD_ONLY: OpVariants = OpVariants {
        ops: &[SpiMemOp::prog_load_x4(true)],
    };
    assert_eq!(QUAD_ONLY.select(BusCaps::RX_QUAD | BusCaps::TX_DUAL), None);
    assert!(QUAD_ONLY.select(BusCaps::TX_QUAD).is_some());
}

#[test]
fn test_op_display() {
    assert_eq!(SpiMemOp::page_read_from_cache_quadio(2).to_string(), "0xeb 1-4-4");
    assert_eq!(SpiMemOp::prog_load(false).to_string(), "0x84 1-1-1");
}
