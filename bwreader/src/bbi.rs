pub(crate) mod bbiread;
pub(crate) mod bigwigread;
pub(crate) mod cirtree;
pub(crate) mod stats;

use byteordered::Endianness;

pub(crate) const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub(crate) const BIGBED_MAGIC: u32 = 0x8789_F2EB;

pub(crate) const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub(crate) const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

/// Info on a specific zoom level in a bbi file
#[derive(Copy, Clone, Debug)]
pub struct ZoomHeader {
    pub reduction_level: u32,
    pub(crate) index_offset: u64,
    pub(crate) index_tree: Option<CirTreeHeader>,
}

/// A single zoom item
#[derive(Copy, Clone, Debug)]
pub struct ZoomRecord {
    pub(crate) chrom: u32,
    pub start: u32,
    pub end: u32,
    pub summary: Summary,
}

/// A summary of a section of data (may be an entire file)
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Summary {
    pub total_items: u64,
    pub bases_covered: u64,
    pub min_val: f64,
    pub max_val: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

/// Represents a single value in a bigWig file
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Value {
    pub start: u32,
    pub end: u32,
    pub value: f32,
}

/// A single base of signal, as returned by [`BigWigRead::intervals`].
///
/// `end` is always `start + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct Interval {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub value: f32,
}

#[inline]
pub(crate) fn u16_at(endianness: Endianness, bytes: &[u8], at: usize) -> u16 {
    let b = [bytes[at], bytes[at + 1]];
    match endianness {
        Endianness::Big => u16::from_be_bytes(b),
        Endianness::Little => u16::from_le_bytes(b),
    }
}

#[inline]
pub(crate) fn u32_at(endianness: Endianness, bytes: &[u8], at: usize) -> u32 {
    let b = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
    match endianness {
        Endianness::Big => u32::from_be_bytes(b),
        Endianness::Little => u32::from_le_bytes(b),
    }
}

#[inline]
pub(crate) fn f32_at(endianness: Endianness, bytes: &[u8], at: usize) -> f32 {
    f32::from_bits(u32_at(endianness, bytes, at))
}

#[inline]
pub(crate) fn u64_at(endianness: Endianness, bytes: &[u8], at: usize) -> u64 {
    let b = [
        bytes[at],
        bytes[at + 1],
        bytes[at + 2],
        bytes[at + 3],
        bytes[at + 4],
        bytes[at + 5],
        bytes[at + 6],
        bytes[at + 7],
    ];
    match endianness {
        Endianness::Big => u64::from_be_bytes(b),
        Endianness::Little => u64::from_le_bytes(b),
    }
}

pub use bbiread::*;
pub use bigwigread::*;
pub use cirtree::*;
pub use stats::*;
