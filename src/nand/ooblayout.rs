//! The OOB layout capability: how a chip's spare area splits into ECC bytes and free bytes.
//!
//! A layout is asked for one section at a time. Sections are numbered from 0, and a layout
//! answers [OobError::Range] for the first section it doesn't have; everything in this module
//! walks a layout by asking for sections until that happens.

use anyhow::ensure;
use thiserror::Error;

/// Upper bound on how many sections any layout may report, so a broken layout can't make us
/// loop forever
const MAX_SECTIONS: usize = 64;

/// A contiguous byte range within the spare area of a page
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone)]
pub struct OobRegion {
    pub offset: usize,
    pub length: usize,
}

impl OobRegion {
    pub const fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// One past the last byte of this region
    pub const fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Does this region lie entirely within `[start, end)`?
    pub const fn within(&self, start: usize, end: usize) -> bool {
        self.offset >= start && self.end() <= end
    }

    /// Do these two regions share any byte?
    pub const fn overlaps(&self, other: &OobRegion) -> bool {
        self.length != 0
            && other.length != 0
            && self.offset < other.end()
            && other.offset < self.end()
    }
}

/// The two kinds of spare-area bytes a layout hands out
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum OobKind {
    /// Bytes filled in by the ECC engine
    Ecc,

    /// Bytes available to the user (filesystem markers, etc.)
    Free,
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum OobError {
    /// The layout has no section with this index
    #[error("OOB section {0} out of range")]
    Range(usize),

    /// A gather/scatter asked for more bytes than the layout exposes
    #[error("OOB byte range {start}..{end} exceeds the {available} available bytes")]
    OutOfBounds {
        start: usize,
        end: usize,
        available: usize,
    },

    /// A region reported by the layout does not fit in the supplied spare buffer
    #[error("OOB region {region:?} does not fit in a {oobsize}-byte spare area")]
    RegionOutsideSpare { region: OobRegion, oobsize: usize },
}

/// Describes the spare area partitioning of one family of chips
///
/// Implementations must be pure: the same `(oobsize, section)` always produces the same answer,
/// and the range check on `section` happens before anything else.
pub trait OobLayout: Sync {
    /// The ECC sub-region of `section`
    fn ecc(&self, oobsize: usize, section: usize) -> Result<OobRegion, OobError>;

    /// The free sub-region of `section`
    fn free(&self, oobsize: usize, section: usize) -> Result<OobRegion, OobError>;

    /// How many leading spare bytes hold the bad block marker
    fn bbm_len(&self) -> usize {
        2
    }

    /// Whether each section's regions stay within that section's equal share of the spare area
    fn section_local(&self) -> bool {
        true
    }

    /// Whether ECC regions of different sections may cover the same bytes
    fn shared_ecc(&self) -> bool {
        false
    }

    /// Select `ecc` or `free` by kind
    fn region(&self, kind: OobKind, oobsize: usize, section: usize) -> Result<OobRegion, OobError> {
        match kind {
            OobKind::Ecc => self.ecc(oobsize, section),
            OobKind::Free => self.free(oobsize, section),
        }
    }
}

/// Iterate every `(section, region)` of one kind, in section order
pub fn regions<L: OobLayout + ?Sized>(
    layout: &L,
    kind: OobKind,
    oobsize: usize,
) -> impl Iterator<Item = (usize, OobRegion)> + '_ {
    (0..MAX_SECTIONS)
        .map(move |section| (section, layout.region(kind, oobsize, section)))
        .take_while(|(_, region)| region.is_ok())
        .filter_map(|(section, region)| region.ok().map(|r| (section, r)))
}

/// How many sections does this layout have?
pub fn section_count<L: OobLayout + ?Sized>(layout: &L, oobsize: usize) -> usize {
    regions(layout, OobKind::Ecc, oobsize).count()
}

/// Total number of bytes of one kind, summed over every section as reported
pub fn count_bytes<L: OobLayout + ?Sized>(layout: &L, kind: OobKind, oobsize: usize) -> usize {
    regions(layout, kind, oobsize).map(|(_, r)| r.length).sum()
}

/// Find which section holds logical byte `byte` of a kind.
///
/// Returns the section index, the region, and the position of the byte within that region.
pub fn find_region<L: OobLayout + ?Sized>(
    layout: &L,
    kind: OobKind,
    oobsize: usize,
    byte: usize,
) -> Result<(usize, OobRegion, usize), OobError> {
    let mut seen = 0;
    for (section, region) in regions(layout, kind, oobsize) {
        if byte < seen + region.length {
            return Ok((section, region, byte - seen));
        }
        seen += region.length;
    }

    Err(OobError::OutOfBounds {
        start: byte,
        end: byte.saturating_add(1),
        available: seen,
    })
}

/// Walk the regions of one kind that hold logical bytes `start..start + len`, calling `f` with
/// the range inside the spare buffer and the matching range inside the caller's buffer.
fn walk_bytes<L, F>(
    layout: &L,
    kind: OobKind,
    oobsize: usize,
    start: usize,
    len: usize,
    mut f: F,
) -> Result<(), OobError>
where
    L: OobLayout + ?Sized,
    F: FnMut(std::ops::Range<usize>, std::ops::Range<usize>),
{
    let available = count_bytes(layout, kind, oobsize);
    if start.checked_add(len).map_or(true, |end| end > available) {
        return Err(OobError::OutOfBounds {
            start,
            end: start.saturating_add(len),
            available,
        });
    }

    let mut logical = 0;
    let mut done = 0;
    for (_, region) in regions(layout, kind, oobsize) {
        if done == len {
            break;
        }
        if region.end() > oobsize {
            return Err(OobError::RegionOutsideSpare { region, oobsize });
        }

        let region_start = logical;
        logical += region.length;
        if logical <= start {
            continue;
        }

        let skip = (start + done).saturating_sub(region_start);
        let n = std::cmp::min(region.length - skip, len - done);
        let oob_begin = region.offset + skip;
        f(oob_begin..oob_begin + n, done..done + n);
        done += n;
    }

    Ok(())
}

/// Copy `buf.len()` bytes of one kind out of a raw spare buffer, starting at logical byte
/// `start`
pub fn get_bytes<L: OobLayout + ?Sized>(
    layout: &L,
    kind: OobKind,
    oob: &[u8],
    buf: &mut [u8],
    start: usize,
) -> Result<(), OobError> {
    walk_bytes(layout, kind, oob.len(), start, buf.len(), |src, dst| {
        buf[dst].copy_from_slice(&oob[src]);
    })
}

/// Copy `buf` into the bytes of one kind in a raw spare buffer, starting at logical byte `start`
///
/// Bytes of the spare area not covered by the requested range are left untouched.
pub fn set_bytes<L: OobLayout + ?Sized>(
    layout: &L,
    kind: OobKind,
    oob: &mut [u8],
    buf: &[u8],
    start: usize,
) -> Result<(), OobError> {
    let oobsize = oob.len();
    walk_bytes(layout, kind, oobsize, start, buf.len(), |dst, src| {
        oob[dst].copy_from_slice(&buf[src]);
    })
}

/// What one spare-area byte is used for, per some layout
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ByteUse {
    /// Bad block marker
    Bbm,
    Ecc,
    Free,
    /// Claimed as both ECC and free; always a layout bug
    Conflict,
    /// Not handed out by the layout
    Reserved,
}

impl ByteUse {
    /// A one-character symbol, for drawing maps
    pub fn symbol(self) -> char {
        match self {
            ByteUse::Bbm => 'B',
            ByteUse::Ecc => 'E',
            ByteUse::Free => 'F',
            ByteUse::Conflict => 'X',
            ByteUse::Reserved => '.',
        }
    }
}

/// Classify every byte of a spare area of size `oobsize`
pub fn byte_map<L: OobLayout + ?Sized>(layout: &L, oobsize: usize) -> Vec<ByteUse> {
    let mut map = vec![ByteUse::Reserved; oobsize];
    for slot in map.iter_mut().take(layout.bbm_len()) {
        *slot = ByteUse::Bbm;
    }

    for kind in [OobKind::Ecc, OobKind::Free] {
        for (_, region) in regions(layout, kind, oobsize) {
            let end = std::cmp::min(region.end(), oobsize);
            for slot in map.iter_mut().take(end).skip(region.offset) {
                *slot = match (*slot, kind) {
                    (ByteUse::Reserved | ByteUse::Ecc, OobKind::Ecc) => ByteUse::Ecc,
                    (ByteUse::Reserved, OobKind::Free) => ByteUse::Free,
                    _ => ByteUse::Conflict,
                };
            }
        }
    }

    map
}

/// Check that a layout upholds the structural rules for a spare area of size `oobsize`:
///
/// - every region lies within the spare area
/// - nothing is handed out over the bad block marker
/// - for section-local layouts, each section's regions stay within that section
/// - free regions never overlap each other, nor ECC bytes of any section
/// - ECC regions never overlap each other, unless the layout shares ECC bytes
pub fn check_layout<L: OobLayout + ?Sized>(layout: &L, oobsize: usize) -> anyhow::Result<()> {
    let sections = section_count(layout, oobsize);
    ensure!(sections > 0, "layout has no sections");
    ensure!(
        sections == regions(layout, OobKind::Free, oobsize).count(),
        "layout has differing ECC and free section counts"
    );

    let bbm = OobRegion::new(0, layout.bbm_len());
    let section_size = oobsize / sections;

    for section in 0..sections {
        let ecc = layout.ecc(oobsize, section)?;
        let free = layout.free(oobsize, section)?;

        for (name, region) in [("ECC", ecc), ("free", free)] {
            ensure!(
                region.within(0, oobsize),
                "section {section} {name} region {region:?} outside {oobsize}-byte spare area"
            );
            ensure!(
                !region.overlaps(&bbm),
                "section {section} {name} region {region:?} covers the bad block marker"
            );

            if layout.section_local() {
                let start = section * section_size;
                ensure!(
                    region.within(start, start + section_size),
                    "section {section} {name} region {region:?} escapes its section"
                );
            }
        }
    }

    for kind in [OobKind::Ecc, OobKind::Free] {
        if kind == OobKind::Ecc && layout.shared_ecc() {
            continue;
        }

        let all: Vec<_> = regions(layout, kind, oobsize).collect();
        for (i, (a, region_a)) in all.iter().enumerate() {
            for (b, region_b) in &all[i + 1..] {
                ensure!(
                    !region_a.overlaps(region_b),
                    "{kind:?} regions of sections {a} and {b} overlap"
                );
            }
        }
    }

    ensure!(
        !byte_map(layout, oobsize).contains(&ByteUse::Conflict),
        "free bytes overlap ECC bytes"
    );

    Ok(())
}

#[cfg(test)]
/// A layout where each 16-byte section is 4 reserved bytes, 4 free bytes and 8 ECC bytes
struct TestLayout;

#[cfg(test)]
impl OobLayout for TestLayout {
    fn ecc(&self, oobsize: usize, section: usize) -> Result<OobRegion, OobError> {
        if section >= 4 {
            return Err(OobError::Range(section));
        }
        Ok(OobRegion::new(section * oobsize / 4 + 8, 8))
    }

    fn free(&self, oobsize: usize, section: usize) -> Result<OobRegion, OobError> {
        if section >= 4 {
            return Err(OobError::Range(section));
        }
        Ok(OobRegion::new(section * oobsize / 4 + 4, 4))
    }
}

#[test]
fn test_region_overlap() {
    let a = OobRegion::new(4, 4);
    assert!(a.overlaps(&OobRegion::new(7, 1)));
    assert!(!a.overlaps(&OobRegion::new(8, 4)));
    assert!(!a.overlaps(&OobRegion::new(0, 4)));
    assert!(!a.overlaps(&OobRegion::new(5, 0)));
    assert!(a.within(4, 8));
    assert!(!a.within(5, 8));
}

#[test]
fn test_counts() {
    assert_eq!(section_count(&TestLayout, 64), 4);
    assert_eq!(count_bytes(&TestLayout, OobKind::Free, 64), 16);
    assert_eq!(count_bytes(&TestLayout, OobKind::Ecc, 64), 32);
}

#[test]
fn test_find_region() {
    assert_eq!(
        find_region(&TestLayout, OobKind::Free, 64, 0),
        Ok((0, OobRegion::new(4, 4), 0))
    );
    assert_eq!(
        find_region(&TestLayout, OobKind::Free, 64, 9),
        Ok((2, OobRegion::new(36, 4), 1))
    );
    assert_eq!(
        find_region(&TestLayout, OobKind::Free, 64, 16),
        Err(OobError::OutOfBounds {
            start: 16,
            end: 17,
            available: 16
        })
    );
    assert_eq!(
        find_region(&TestLayout, OobKind::Free, 64, usize::MAX),
        Err(OobError::OutOfBounds {
            start: usize::MAX,
            end: usize::MAX,
            available: 16
        })
    );
}

#[test]
fn test_gather_scatter() -> anyhow::Result<()> {
    let mut oob = [0xFFu8; 64];
    set_bytes(&TestLayout, OobKind::Free, &mut oob, &[1, 2, 3, 4, 5, 6], 2)?;

    assert_eq!(oob[4..8], [0xFF, 0xFF, 1, 2]);
    assert_eq!(oob[20..24], [3, 4, 5, 6]);
    assert!(oob[24..].iter().all(|&x| x == 0xFF));
    assert!(oob[..4].iter().all(|&x| x == 0xFF));

    let mut buf = [0u8; 8];
    get_bytes(&TestLayout, OobKind::Free, &oob, &mut buf, 0)?;
    assert_eq!(buf, [0xFF, 0xFF, 1, 2, 3, 4, 5, 6]);

    let mut buf = [0u8; 4];
    assert!(get_bytes(&TestLayout, OobKind::Free, &oob, &mut buf, 13).is_err());

    let mut buf = [0u8; 1];
    assert_eq!(
        get_bytes(&TestLayout, OobKind::Free, &oob, &mut buf, usize::MAX),
        Err(OobError::OutOfBounds {
            start: usize::MAX,
            end: usize::MAX,
            available: 16
        })
    );
    assert!(set_bytes(&TestLayout, OobKind::Free, &mut oob, &buf, usize::MAX).is_err());

    Ok(())
}

#[test]
fn test_short_spare_buffer() {
    let oob = [0xFFu8; 16];
    let mut buf = [0u8; 2];
    assert_eq!(
        get_bytes(&TestLayout, OobKind::Ecc, &oob, &mut buf, 8),
        Err(OobError::RegionOutsideSpare {
            region: OobRegion::new(12, 8),
            oobsize: 16,
        })
    );
}

#[test]
fn test_byte_map() {
    let map = byte_map(&TestLayout, 64);
    assert_eq!(map[0], ByteUse::Bbm);
    assert_eq!(map[2], ByteUse::Reserved);
    assert_eq!(map[4], ByteUse::Free);
    assert_eq!(map[8], ByteUse::Ecc);
    assert_eq!(map[63], ByteUse::Ecc);
    let drawn: String = map[..16].iter().map(|x| x.symbol()).collect();
    assert_eq!(drawn, "BB..FFFFEEEEEEEE");
}

#[test]
fn test_check_layout() {
    assert!(check_layout(&TestLayout, 64).is_ok());

    // Too small a spare area for the fixed region sizes: sections run into each other
    assert!(check_layout(&TestLayout, 32).is_err());
}
