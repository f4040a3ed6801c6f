//! Abstractions and code to access NAND flash, including the spare (OOB) area of each page

use std::str::FromStr;

use anyhow::ensure;

pub mod ooblayout;

use ooblayout::{OobKind, OobLayout};

/// Value written to the first spare byte of a block's first page to mark it bad
const BBM_BAD: u8 = 0x00;

/// Convenience methods for operating on `[u8]`s that represent page contents
pub trait PageUtil {
    /// Does this page contain the all-1s bit pattern?
    fn is_erased(&self) -> bool;
}

impl PageUtil for [u8] {
    fn is_erased(&self) -> bool {
        self.iter().all(|&x| x == 0xFF)
    }
}

/// A pub-fields struct describing the data layout of a NAND flash device
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct NandLayout {
    pub blocks: u32,
    pub pages_per_block: u32,
    pub bytes_per_page: usize,
    pub oob_bytes_per_page: usize,
}

impl NandLayout {
    /// Bytes of main plus spare area in one page
    pub fn raw_page_size(&self) -> usize {
        self.bytes_per_page + self.oob_bytes_per_page
    }
}

/// Parse strings like "BLOCKSxPAGESxBYTES+SPARE"; the "+SPARE" part is optional
impl FromStr for NandLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (main, spare) = s.split_once('+').unwrap_or((s, "0"));
        let [blocks, pages_per_block, bytes_per_page]: [&str; 3] = main
            .split('x')
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected #x#x#[+#]"))?;
        let blocks = blocks.parse()?;
        let pages_per_block = pages_per_block.parse()?;
        let bytes_per_page = bytes_per_page.parse()?;
        let oob_bytes_per_page = spare.parse()?;

        Ok(NandLayout {
            blocks,
            pages_per_block,
            bytes_per_page,
            oob_bytes_per_page,
        })
    }
}

/// Represents a NAND flash device
pub trait Nand {
    type Block<'a>: NandBlock + 'a
    where
        Self: 'a;

    /// Get a block
    ///
    /// Returns None if `index` refers to a block marked bad
    fn block(&mut self, index: u32) -> anyhow::Result<Option<Self::Block<'_>>>;

    /// Get the layout of the NAND
    fn get_layout(&self) -> NandLayout;
}

/// Represents a block of a NAND flash device
pub trait NandBlock {
    /// How many pages in this block?
    fn page_count(&self) -> u32;

    /// How many bytes per page, not counting the spare area?
    fn page_size(&self) -> usize;

    /// How many spare bytes per page?
    fn oob_size(&self) -> usize;

    /// Read one page: main area into `data` and spare area into `oob`
    fn read(&self, page: u32, data: &mut [u8], oob: &mut [u8]) -> anyhow::Result<()>;

    /// Program one page with main and spare content
    ///
    /// Note that `page` must be greater than any previously-written page, or in other words,
    /// writing a page makes it and all skipped pages nonwritable. This is to comply with the
    /// sequential-write requirements of certain NANDs.
    fn program(&mut self, page: u32, data: &[u8], oob: &[u8]) -> anyhow::Result<()>;

    /// Erase a block, making all pages writable again
    fn erase(&mut self) -> anyhow::Result<()>;

    /// Marks the block as bad, consuming the block object (it cannot be retrieved again).
    fn mark_bad(self) -> anyhow::Result<()>;
}

/// Read the free OOB bytes of a page, as exposed by `layout`, into `buf`
///
/// Main-area content is discarded.
pub fn read_free_bytes<B, L>(
    block: &B,
    layout: &L,
    page: u32,
    buf: &mut [u8],
) -> anyhow::Result<()>
where
    B: NandBlock,
    L: OobLayout + ?Sized,
{
    ensure!(page < block.page_count(), "page {page} beyond end of block");

    let mut data = vec![0; block.page_size()];
    let mut oob = vec![0; block.oob_size()];
    block.read(page, &mut data, &mut oob)?;

    ooblayout::get_bytes(layout, OobKind::Free, &oob, buf, 0)?;
    Ok(())
}

/// Program a page with `data` in the main area and `free` placed in the free OOB bytes exposed by
/// `layout`; every other spare byte is left erased.
pub fn program_with_free_bytes<B, L>(
    block: &mut B,
    layout: &L,
    page: u32,
    data: &[u8],
    free: &[u8],
) -> anyhow::Result<()>
where
    B: NandBlock,
    L: OobLayout + ?Sized,
{
    ensure!(page < block.page_count(), "page {page} beyond end of block");

    let mut oob = vec![0xFF; block.oob_size()];
    ooblayout::set_bytes(layout, OobKind::Free, &mut oob, free, 0)?;
    block.program(page, data, &oob)
}

/// A simulated in-memory NAND flash with a spare area per page, for testing purposes
#[derive(Debug, Clone)]
pub struct SimNand {
    blocks: Box<[SimBlock]>,
    layout: NandLayout,
}

/// A block of SimNand
#[derive(Debug, Clone)]
pub struct SimBlock {
    /// Main and spare bytes of all written pages, page after page (legally, can only append)
    data: Vec<u8>,

    /// How many pages in this block
    page_count: u32,

    /// How many main bytes per page
    page_size: usize,

    /// How many spare bytes per page
    oob_size: usize,
}

impl SimNand {
    /// Create an empty SimNand with the specified layout
    pub fn new(layout: NandLayout) -> Self {
        let blocks = vec![SimBlock::new(layout); layout.blocks as usize];
        let blocks = blocks.into_boxed_slice();

        Self { blocks, layout }
    }
}

impl SimBlock {
    /// Construct an empty block within the given layout
    fn new(layout: NandLayout) -> Self {
        Self {
            data: Default::default(),
            page_count: layout.pages_per_block,
            page_size: layout.bytes_per_page,
            oob_size: layout.oob_bytes_per_page,
        }
    }

    fn raw_page_size(&self) -> usize {
        self.page_size + self.oob_size
    }

    /// Has the first page's bad block marker been written to anything but 0xFF?
    fn is_bad(&self) -> bool {
        self.oob_size > 0 && self.data.get(self.page_size).is_some_and(|&b| b != 0xFF)
    }

    fn write_page(&mut self, index: u32, data: &[u8], oob: &[u8]) -> anyhow::Result<()> {
        ensure!(data.len() == self.page_size, "content not page-sized");
        ensure!(oob.len() == self.oob_size, "spare content not spare-sized");
        ensure!(index < self.page_count, "page index out of bounds");

        let begin = index as usize * self.raw_page_size();

        ensure!(begin >= self.data.len(), "write in already-written area");

        // Writing fully-erased content is a no-op.
        if !data.is_erased() || !oob.is_erased() {
            self.data.resize(begin, 0xFF);
            self.data.extend_from_slice(data);
            self.data.extend_from_slice(oob);
        }

        Ok(())
    }

    fn read_page(&self, index: u32, data: &mut [u8], oob: &mut [u8]) -> anyhow::Result<()> {
        ensure!(data.len() == self.page_size, "content not page-sized");
        ensure!(oob.len() == self.oob_size, "spare content not spare-sized");
        ensure!(index < self.page_count, "page index out of bounds");

        let begin = index as usize * self.raw_page_size();
        let end = begin + self.raw_page_size();

        if let Some(page) = self.data.get(begin..end) {
            let (main, spare) = page.split_at(self.page_size);
            data.copy_from_slice(main);
            oob.copy_from_slice(spare);
        } else {
            data.fill(0xFF);
            oob.fill(0xFF);
        }

        Ok(())
    }
}

impl Nand for SimNand {
    type Block<'a> = &'a mut SimBlock;

    fn block(&mut self, index: u32) -> anyhow::Result<Option<Self::Block<'_>>> {
        self.blocks
            .get_mut(index as usize)
            .ok_or(anyhow::anyhow!("block {index} out of range"))
            .map(|x| Some(x).filter(|y| !y.is_bad()))
    }

    fn get_layout(&self) -> NandLayout {
        self.layout
    }
}

impl NandBlock for &mut SimBlock {
    fn page_count(&self) -> u32 {
        self.page_count
    }
    fn page_size(&self) -> usize {
        self.page_size
    }
    fn oob_size(&self) -> usize {
        self.oob_size
    }

    fn read(&self, page: u32, data: &mut [u8], oob: &mut [u8]) -> anyhow::Result<()> {
        self.read_page(page, data, oob)
    }

    fn program(&mut self, page: u32, data: &[u8], oob: &[u8]) -> anyhow::Result<()> {
        self.write_page(page, data, oob)
    }

    fn erase(&mut self) -> anyhow::Result<()> {
        self.data.clear();

        Ok(())
    }

    fn mark_bad(mut self) -> anyhow::Result<()> {
        ensure!(self.oob_size > 0, "no spare area to hold a bad block marker");
        self.erase()?;

        let data = vec![0xFF; self.page_size];
        let mut oob = vec![0xFF; self.oob_size];
        oob[0] = BBM_BAD;
        self.write_page(0, &data, &oob)
    }
}

#[cfg(test)]
const TEST_LAYOUT: NandLayout = NandLayout {
    blocks: 8,
    pages_per_block: 16,
    bytes_per_page: 256,
    oob_bytes_per_page: 16,
};

#[test]
fn test_layout_parse() -> anyhow::Result<()> {
    assert_eq!("8x16x256+16".parse::<NandLayout>()?, TEST_LAYOUT);
    assert_eq!("1024x64x2048".parse::<NandLayout>()?.oob_bytes_per_page, 0);
    assert!("8x16".parse::<NandLayout>().is_err());
    assert!("8x16x256+x".parse::<NandLayout>().is_err());
    Ok(())
}

#[test]
fn test_sim_block() {
    let mut nand = SimNand::new(TEST_LAYOUT);
    assert!(nand.block(0).unwrap().is_some());
    assert!(nand.block(TEST_LAYOUT.blocks - 1).unwrap().is_some());
    assert!(nand.block(TEST_LAYOUT.blocks).is_err());
}

#[test]
fn test_sim_mark_bad() {
    let mut nand = SimNand::new(TEST_LAYOUT);
    assert!(nand.block(0).unwrap().is_some());
    nand.block(0).unwrap().unwrap().mark_bad().unwrap();
    assert!(nand.block(0).unwrap().is_none());
    assert!(nand.block(1).unwrap().is_some());
}

#[test]
fn test_sim_foreign_bad_marker() -> anyhow::Result<()> {
    let mut nand = SimNand::new(TEST_LAYOUT);
    let data = vec![0xFFu8; TEST_LAYOUT.bytes_per_page];
    let mut oob = vec![0xFFu8; TEST_LAYOUT.oob_bytes_per_page];
    oob[0] = 0x12;

    nand.block(5)?.unwrap().program(0, &data, &oob)?;
    assert!(nand.block(5)?.is_none());

    // A marker on a later page doesn't count
    nand.block(6)?.unwrap().program(1, &data, &oob)?;
    assert!(nand.block(6)?.is_some());

    Ok(())
}

#[test]
fn test_sim_read_write() {
    let mut nand = SimNand::new(TEST_LAYOUT);

    let data_in = vec![0xA5u8; TEST_LAYOUT.bytes_per_page];
    let oob_in = vec![0x5Au8; TEST_LAYOUT.oob_bytes_per_page];
    let mut data_out = data_in.clone();
    let mut oob_out = oob_in.clone();

    let mut block = nand.block(0).unwrap().unwrap();
    block.program(2, &data_in, &oob_in).unwrap();
    assert!(block.program(1, &data_in, &oob_in).is_err());

    block.read(1, &mut data_out, &mut oob_out).unwrap();
    assert!(data_out.is_erased());
    assert!(oob_out.is_erased());

    block.read(2, &mut data_out, &mut oob_out).unwrap();
    assert_eq!(data_out, data_in);
    assert_eq!(oob_out, oob_in);

    block.read(3, &mut data_out, &mut oob_out).unwrap();
    assert!(data_out.is_erased());
}

#[test]
fn test_sim_free_bytes() -> anyhow::Result<()> {
    use ooblayout::{OobError, OobRegion};

    /// One free byte at the tail of each 4-byte section
    struct Tail;
    impl OobLayout for Tail {
        fn ecc(&self, _oobsize: usize, section: usize) -> Result<OobRegion, OobError> {
            if section >= 4 {
                return Err(OobError::Range(section));
            }
            Ok(OobRegion::new(section * 4 + 2, 1))
        }
        fn free(&self, _oobsize: usize, section: usize) -> Result<OobRegion, OobError> {
            if section >= 4 {
                return Err(OobError::Range(section));
            }
            Ok(OobRegion::new(section * 4 + 3, 1))
        }
    }

    let mut nand = SimNand::new(TEST_LAYOUT);
    let data = vec![0u8; TEST_LAYOUT.bytes_per_page];

    let mut block = nand.block(3)?.unwrap();
    program_with_free_bytes(&mut block, &Tail, 0, &data, b"JFFS")?;

    let mut free = [0u8; 4];
    read_free_bytes(&block, &Tail, 0, &mut free)?;
    assert_eq!(&free, b"JFFS");

    // The bad block marker must still read erased
    assert!(nand.block(3)?.is_some());

    let last = nand.get_layout().pages_per_block;
    let mut block = nand.block(3)?.unwrap();
    assert_eq!(block.page_count(), last);
    assert!(program_with_free_bytes(&mut block, &Tail, last, &data, b"JFFS").is_err());
    assert!(read_free_bytes(&block, &Tail, last, &mut free).is_err());

    Ok(())
}
