use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Seek, SeekFrom};

use byteordered::{ByteOrdered, Endianness};
use bytes::BytesMut;
use itertools::Either;
use smallvec::{smallvec, SmallVec};
use thiserror::Error;

use crate::bbi::{u16_at, u32_at, u64_at, CIR_TREE_MAGIC};
use crate::bbiread::{BBIFileRead, Block};

pub(crate) const CIR_TREE_HEADER_SIZE: u64 = 48;
const NODE_HEADER_SIZE: usize = 4;
const LEAF_ITEM_SIZE: usize = 32;
const NON_LEAF_ITEM_SIZE: usize = 24;

/// The header of a cir tree (the R-tree indexing the data blocks of either
/// the full data or a single zoom level).
#[derive(Copy, Clone, Debug)]
pub struct CirTreeHeader {
    pub block_size: u32,
    pub item_count: u64,
    pub start_chrom_ix: u32,
    pub start_base: u32,
    pub end_chrom_ix: u32,
    pub end_base: u32,
    pub end_file_offset: u64,
    pub items_per_slot: u32,
    pub(crate) root_offset: u64,
}

#[derive(Error, Debug)]
pub enum CirTreeSearchError {
    #[error("The passed chromosome ({}) was incorrect.", .0)]
    InvalidChromosome(String),
    #[error("Invalid cir tree magic.")]
    UnknownMagic,
    #[error("Invalid cir tree: {}", .0)]
    InvalidFile(String),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

fn eof_as_invalid(what: &'static str) -> impl Fn(io::Error) -> CirTreeSearchError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CirTreeSearchError::InvalidFile(format!("{} is truncated", what))
        } else {
            CirTreeSearchError::IoError(e)
        }
    }
}

/// Reads the 48-byte cir tree header at `index_offset`.
pub(crate) fn read_cir_tree_header<R: Read + Seek>(
    endianness: Endianness,
    file: &mut R,
    index_offset: u64,
) -> Result<CirTreeHeader, CirTreeSearchError> {
    file.seek(SeekFrom::Start(index_offset))?;
    let mut header_data = BytesMut::zeroed(CIR_TREE_HEADER_SIZE as usize);
    file.read_exact(&mut header_data)
        .map_err(eof_as_invalid("cir tree header"))?;

    let mut header = ByteOrdered::runtime(&header_data[..], endianness);
    let magic = header.read_u32()?;
    if magic != CIR_TREE_MAGIC {
        return Err(CirTreeSearchError::UnknownMagic);
    }

    let block_size = header.read_u32()?;
    let item_count = header.read_u64()?;
    let start_chrom_ix = header.read_u32()?;
    let start_base = header.read_u32()?;
    let end_chrom_ix = header.read_u32()?;
    let end_base = header.read_u32()?;
    let end_file_offset = header.read_u64()?;
    let items_per_slot = header.read_u32()?;
    let _reserved = header.read_u32()?;

    Ok(CirTreeHeader {
        block_size,
        item_count,
        start_chrom_ix,
        start_base,
        end_chrom_ix,
        end_base,
        end_file_offset,
        items_per_slot,
        root_offset: index_offset + CIR_TREE_HEADER_SIZE,
    })
}

/// Half-open overlap of `[(chromq, chromq_start), (chromq, chromq_end))`
/// with `[(chromb1, chromb1_start), (chromb2, chromb2_end))`, comparing
/// (chrom, base) tuples.
#[inline]
pub(crate) fn overlaps(
    chromq: u32,
    chromq_start: u32,
    chromq_end: u32,
    chromb1: u32,
    chromb1_start: u32,
    chromb2: u32,
    chromb2_end: u32,
) -> bool {
    (chromq, chromq_start) < (chromb2, chromb2_end) && (chromq, chromq_end) > (chromb1, chromb1_start)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct CirTreeNodeLeaf {
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    data_offset: u64,
    data_size: u64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct CirTreeNodeNonLeaf {
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    node_offset: u64,
}

/// A decoded node: leaf items on the left, child pointers on the right.
pub(crate) type CirTreeNode = Either<Vec<CirTreeNodeLeaf>, Vec<CirTreeNodeNonLeaf>>;

fn decode_leaf_items(endianness: Endianness, bytes: &[u8], count: usize) -> Vec<CirTreeNodeLeaf> {
    (0..count)
        .map(|i| {
            let at = i * LEAF_ITEM_SIZE;
            CirTreeNodeLeaf {
                start_chrom_ix: u32_at(endianness, bytes, at),
                start_base: u32_at(endianness, bytes, at + 4),
                end_chrom_ix: u32_at(endianness, bytes, at + 8),
                end_base: u32_at(endianness, bytes, at + 12),
                data_offset: u64_at(endianness, bytes, at + 16),
                data_size: u64_at(endianness, bytes, at + 24),
            }
        })
        .collect()
}

fn decode_non_leaf_items(
    endianness: Endianness,
    bytes: &[u8],
    count: usize,
) -> Vec<CirTreeNodeNonLeaf> {
    (0..count)
        .map(|i| {
            let at = i * NON_LEAF_ITEM_SIZE;
            CirTreeNodeNonLeaf {
                start_chrom_ix: u32_at(endianness, bytes, at),
                start_base: u32_at(endianness, bytes, at + 4),
                end_chrom_ix: u32_at(endianness, bytes, at + 8),
                end_base: u32_at(endianness, bytes, at + 12),
                node_offset: u64_at(endianness, bytes, at + 16),
            }
        })
        .collect()
}

/// Reads and decodes the node at `node_offset`. A node may not hold more
/// items than the tree's `block_size`.
pub(crate) fn read_node<R: Read + Seek>(
    file: &mut R,
    node_offset: u64,
    endianness: Endianness,
    block_size: u32,
) -> Result<CirTreeNode, CirTreeSearchError> {
    file.seek(SeekFrom::Start(node_offset))?;

    let mut header_data = [0u8; NODE_HEADER_SIZE];
    file.read_exact(&mut header_data)
        .map_err(eof_as_invalid("cir tree node"))?;

    let isleaf = header_data[0];
    let count = u16_at(endianness, &header_data, 2);
    if u32::from(count) > block_size {
        return Err(CirTreeSearchError::InvalidFile(format!(
            "Node at {} has {} items, but the block size is {}",
            node_offset, count, block_size
        )));
    }

    let count = count as usize;
    match isleaf {
        1 => {
            let mut bytes = vec![0u8; count * LEAF_ITEM_SIZE];
            file.read_exact(&mut bytes)
                .map_err(eof_as_invalid("cir tree leaf"))?;
            Ok(Either::Left(decode_leaf_items(endianness, &bytes, count)))
        }
        0 => {
            let mut bytes = vec![0u8; count * NON_LEAF_ITEM_SIZE];
            file.read_exact(&mut bytes)
                .map_err(eof_as_invalid("cir tree node"))?;
            Ok(Either::Right(decode_non_leaf_items(
                endianness, &bytes, count,
            )))
        }
        _ => Err(CirTreeSearchError::InvalidFile(format!(
            "Unexpected isleaf: {}",
            isleaf
        ))),
    }
}

/// Splits a node into the children to descend into and the data blocks to
/// collect, keeping on-disk order.
pub(crate) fn nodes_overlapping(
    node: &CirTreeNode,
    chrom_ix: u32,
    start: u32,
    end: u32,
) -> (SmallVec<[u64; 4]>, SmallVec<[Block; 4]>) {
    match node {
        Either::Left(items) => {
            let blocks = items
                .iter()
                .filter(|child| {
                    overlaps(
                        chrom_ix,
                        start,
                        end,
                        child.start_chrom_ix,
                        child.start_base,
                        child.end_chrom_ix,
                        child.end_base,
                    )
                })
                .map(|child| Block {
                    offset: child.data_offset,
                    size: child.data_size,
                })
                .collect();
            (smallvec![], blocks)
        }
        Either::Right(items) => {
            let children = items
                .iter()
                .filter(|child| {
                    overlaps(
                        chrom_ix,
                        start,
                        end,
                        child.start_chrom_ix,
                        child.start_base,
                        child.end_chrom_ix,
                        child.end_base,
                    )
                })
                .map(|child| child.node_offset)
                .collect();
            (children, smallvec![])
        }
    }
}

pub(crate) struct CirTreeBlockSearchIter<'a, R: BBIFileRead> {
    remaining_childblocks: VecDeque<u64>,
    // Every node of a well-formed tree has exactly one parent
    visited: HashSet<u64>,

    file: &'a mut R,
    endianness: Endianness,
    block_size: u32,
    chrom_ix: u32,
    start: u32,
    end: u32,
}

impl<'a, R: BBIFileRead> Iterator for CirTreeBlockSearchIter<'a, R> {
    type Item = Result<SmallVec<[Block; 4]>, CirTreeSearchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let node_offset = self.remaining_childblocks.pop_front()?;
        if !self.visited.insert(node_offset) {
            return Some(Err(CirTreeSearchError::InvalidFile(format!(
                "Cir tree node at {} is reachable more than once",
                node_offset
            ))));
        }

        let (new_childblocks, blocks) = match self.file.blocks_for_cir_tree_node(
            self.endianness,
            node_offset,
            self.block_size,
            self.chrom_ix,
            self.start,
            self.end,
        ) {
            Ok(d) => d,
            Err(e) => return Some(Err(e)),
        };

        // Depth-first, so children go in front of any remaining siblings
        for child in new_childblocks.into_iter().rev() {
            self.remaining_childblocks.push_front(child);
        }

        Some(Ok(blocks))
    }
}

/// Collects every data block in the tree whose bounds overlap the query, in
/// depth-first on-disk order. No hits is an empty `Vec`, not an error.
pub(crate) fn search_cir_tree_inner<R: BBIFileRead>(
    endianness: Endianness,
    file: &mut R,
    tree: &CirTreeHeader,
    chrom_ix: u32,
    start: u32,
    end: u32,
) -> Result<Vec<Block>, CirTreeSearchError> {
    if tree.item_count == 0
        || !overlaps(
            chrom_ix,
            start,
            end,
            tree.start_chrom_ix,
            tree.start_base,
            tree.end_chrom_ix,
            tree.end_base,
        )
    {
        return Ok(vec![]);
    }

    let mut remaining_childblocks = VecDeque::with_capacity(64);
    remaining_childblocks.push_front(tree.root_offset);
    let iter = CirTreeBlockSearchIter {
        remaining_childblocks,
        visited: HashSet::new(),
        file,
        endianness,
        block_size: tree.block_size,
        chrom_ix,
        start,
        end,
    };

    let mut blocks = vec![];
    for i in iter {
        blocks.extend(i?);
    }

    Ok(blocks)
}
