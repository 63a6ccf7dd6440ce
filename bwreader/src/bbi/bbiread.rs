use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Seek, SeekFrom};
use std::vec::Vec;

use byteordered::{ByteOrdered, Endianness};
use bytes::BytesMut;
use libdeflater::{DecompressionError, Decompressor};
use log::debug;
use smallvec::SmallVec;
use thiserror::Error;

use crate::bbi::{
    f32_at, u16_at, u32_at, u64_at, Summary, ZoomHeader, ZoomRecord, BIGBED_MAGIC, BIGWIG_MAGIC,
    CHROM_TREE_MAGIC,
};
use crate::cirtree::{
    nodes_overlapping, read_cir_tree_header, read_node, search_cir_tree_inner, CirTreeHeader,
    CirTreeNode, CirTreeSearchError,
};
use crate::stats::UnsupportedStatisticError;
use crate::utils::reopen::{Reopen, SeekableRead};

use self::internal::BBIReadInternal;

const HEADER_SIZE: usize = 64;
const ZOOM_HEADER_SIZE: usize = 24;
const CHROM_TREE_HEADER_SIZE: usize = 32;
const ZOOM_RECORD_SIZE: usize = 32;

/// Guards against corrupt sizes turning into huge allocations.
const MAX_CHROM_KEY_SIZE: u32 = 1 << 16;
const MAX_CHROM_TREE_DEPTH: usize = 32;
const MAX_BLOCK_SIZE: u64 = 1 << 30;
const INITIAL_READ_CAPACITY: u64 = 1 << 16;

const MAX_CACHED_BLOCKS: usize = 5000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// Header info for a bbi file
///
/// Note that info on internal properties like file offsets are not public.
/// Reading data is available through higher-level functions.
#[derive(Copy, Clone, Debug)]
pub struct BBIHeader {
    pub endianness: Endianness,
    pub version: u16,
    pub field_count: u16,
    pub defined_field_count: u16,

    pub(crate) zoom_levels: u16,
    pub(crate) chromosome_tree_offset: u64,
    pub(crate) full_data_offset: u64,
    pub(crate) full_index_offset: u64,
    pub(crate) full_index_tree: Option<CirTreeHeader>,
    pub(crate) total_summary_offset: u64,
    pub(crate) uncompress_buf_size: u32,
}

impl BBIHeader {
    /// Whether data blocks are zlib compressed
    pub fn is_compressed(&self) -> bool {
        self.uncompress_buf_size > 0
    }
}

/// Information on a chromosome in a bbi file
#[derive(Clone, Debug)]
pub struct ChromInfo {
    pub name: String,
    pub length: u32,
    pub(crate) id: u32,
}

impl PartialEq for ChromInfo {
    fn eq(&self, other: &ChromInfo) -> bool {
        self.name == other.name
    }
}

/// Info on a bbi file
#[derive(Clone, Debug)]
pub struct BBIFileInfo {
    /// Header info
    pub header: BBIHeader,
    /// Info on zooms in the bbi file, in file order (finest first)
    pub zoom_headers: Vec<ZoomHeader>,
    /// The chromosome info the bbi file is based on, indexed by id
    pub chrom_info: Vec<ChromInfo>,
}

pub(crate) struct ChromIdNotFound(pub(crate) String);

impl From<ChromIdNotFound> for BBIReadError {
    fn from(e: ChromIdNotFound) -> Self {
        BBIReadError::InvalidChromosome(e.0)
    }
}

impl BBIFileInfo {
    pub(crate) fn chrom_id(&self, chrom_name: &str) -> Result<u32, ChromIdNotFound> {
        self.chrom(chrom_name)
            .map(|c| c.id)
            .ok_or_else(|| ChromIdNotFound(chrom_name.to_owned()))
    }

    /// Looks up a chromosome by its exact name
    pub fn chrom(&self, chrom_name: &str) -> Option<&ChromInfo> {
        self.chrom_info.iter().find(|&x| x.name == chrom_name)
    }
}

/// Options that change how queries are answered
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BBIReadOptions {
    /// If true, a query end past the chromosome length is clamped to the
    /// length. If false, it is an `InvalidRange` error.
    pub clamp_ranges: bool,
    /// If true, statistics are always computed from the full data, never
    /// from a zoom level.
    pub exact: bool,
}

impl Default for BBIReadOptions {
    fn default() -> Self {
        BBIReadOptions {
            clamp_ranges: true,
            exact: false,
        }
    }
}

#[derive(Error, Debug)]
pub(crate) enum BBIFileReadInfoError {
    #[error("Invalid magic (likely not a BigWig file)")]
    UnknownMagic,
    #[error("File is a bigBed, not a bigWig")]
    BigBed,
    #[error("Invalid chromosomes section: {}", .0)]
    InvalidChroms(String),
    #[error("The file was invalid: {}", .0)]
    InvalidFile(String),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

/// Possible errors encountered when reading a bbi file
#[derive(Error, Debug)]
pub enum BBIReadError {
    #[error("The passed chromosome ({}) was incorrect.", .0)]
    InvalidChromosome(String),
    #[error("Invalid range: {}", .0)]
    InvalidRange(String),
    #[error("Invalid magic (likely a bug).")]
    UnknownMagic,
    #[error("The file was invalid: {}", .0)]
    InvalidFile(String),
    #[error("Could not decompress block: {}", .0)]
    DecompressionError(String),
    #[error("{}", .0)]
    UnsupportedStatistic(#[from] UnsupportedStatisticError),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

impl From<CirTreeSearchError> for BBIReadError {
    fn from(value: CirTreeSearchError) -> Self {
        match value {
            CirTreeSearchError::InvalidChromosome(chrom) => BBIReadError::InvalidChromosome(chrom),
            CirTreeSearchError::UnknownMagic => BBIReadError::UnknownMagic,
            CirTreeSearchError::InvalidFile(e) => BBIReadError::InvalidFile(e),
            CirTreeSearchError::IoError(e) => BBIReadError::IoError(e),
        }
    }
}

/// Potential errors found when trying to read data from a zoom level
#[derive(Error, Debug)]
pub enum ZoomIntervalError {
    #[error("The passed reduction level was not found")]
    ReductionLevelNotFound,
    #[error("{}", .0)]
    BBIReadError(BBIReadError),
}

impl From<ChromIdNotFound> for ZoomIntervalError {
    fn from(e: ChromIdNotFound) -> Self {
        ZoomIntervalError::BBIReadError(BBIReadError::InvalidChromosome(e.0))
    }
}

impl From<CirTreeSearchError> for ZoomIntervalError {
    fn from(e: CirTreeSearchError) -> Self {
        ZoomIntervalError::BBIReadError(e.into())
    }
}

impl From<BBIReadError> for ZoomIntervalError {
    fn from(e: BBIReadError) -> Self {
        ZoomIntervalError::BBIReadError(e)
    }
}

pub(crate) mod internal {
    use super::*;

    pub trait BBIReadInternal {
        type Read: BBIFileRead;

        /// Gets a reader to the underlying file
        fn reader(&mut self) -> &mut Self::Read;

        fn reader_and_info(&mut self) -> (&mut Self::Read, &mut BBIFileInfo);

        fn full_data_cir_tree(&mut self) -> Result<CirTreeHeader, CirTreeSearchError> {
            let (reader, info) = self.reader_and_info();
            let tree = match info.header.full_index_tree {
                Some(tree) => tree,
                None => {
                    let tree = read_cir_tree_header(
                        info.header.endianness,
                        reader.raw_reader(),
                        info.header.full_index_offset,
                    )?;
                    info.header.full_index_tree = Some(tree);
                    tree
                }
            };
            Ok(tree)
        }

        fn zoom_cir_tree(&mut self, reduction_level: u32) -> Result<CirTreeHeader, ZoomIntervalError> {
            let (reader, info) = self.reader_and_info();
            let endianness = info.header.endianness;
            let zoom_header = match info
                .zoom_headers
                .iter_mut()
                .find(|h| h.reduction_level == reduction_level)
            {
                Some(h) => h,
                None => {
                    return Err(ZoomIntervalError::ReductionLevelNotFound);
                }
            };

            let tree = match zoom_header.index_tree {
                Some(tree) => tree,
                None => {
                    let tree = read_cir_tree_header(
                        endianness,
                        reader.raw_reader(),
                        zoom_header.index_offset,
                    )?;
                    zoom_header.index_tree = Some(tree);
                    tree
                }
            };

            Ok(tree)
        }
    }
}

/// Generic methods for reading a bbi file
pub trait BBIRead: BBIReadInternal {
    /// Get basic info about the bbi file
    fn info(&self) -> &BBIFileInfo;

    fn chroms(&self) -> &[ChromInfo];
}

pub(crate) fn search_cir_tree<R: BBIFileRead>(
    info: &BBIFileInfo,
    file: &mut R,
    tree: &CirTreeHeader,
    chrom_name: &str,
    start: u32,
    end: u32,
) -> Result<Vec<Block>, CirTreeSearchError> {
    let chrom_ix = match info.chrom(chrom_name) {
        Some(c) => c.id,
        None => {
            return Err(CirTreeSearchError::InvalidChromosome(
                chrom_name.to_string(),
            ));
        }
    };

    search_cir_tree_inner(info.header.endianness, file, tree, chrom_ix, start, end)
}

/// The byte source used by a bbi reader. Implemented for every
/// `SeekableRead`, and by `CachedBBIFileRead`, which keeps decoded index nodes
/// and block data around between queries.
pub trait BBIFileRead {
    type Reader: Read + Seek;

    /// Reads (and decompresses, if needed) the data of a block
    fn get_block_data(&mut self, info: &BBIFileInfo, block: &Block)
        -> Result<Vec<u8>, BBIReadError>;

    fn blocks_for_cir_tree_node(
        &mut self,
        endianness: Endianness,
        node_offset: u64,
        block_size: u32,
        chrom_ix: u32,
        start: u32,
        end: u32,
    ) -> Result<(SmallVec<[u64; 4]>, SmallVec<[Block; 4]>), CirTreeSearchError>;

    fn raw_reader(&mut self) -> &mut Self::Reader;
}

impl<S: SeekableRead> BBIFileRead for S {
    type Reader = Self;

    fn get_block_data(
        &mut self,
        info: &BBIFileInfo,
        block: &Block,
    ) -> Result<Vec<u8>, BBIReadError> {
        read_block_data(info, self, block)
    }

    fn blocks_for_cir_tree_node(
        &mut self,
        endianness: Endianness,
        node_offset: u64,
        block_size: u32,
        chrom_ix: u32,
        start: u32,
        end: u32,
    ) -> Result<(SmallVec<[u64; 4]>, SmallVec<[Block; 4]>), CirTreeSearchError> {
        let node = read_node(self, node_offset, endianness, block_size)?;
        Ok(nodes_overlapping(&node, chrom_ix, start, end))
    }

    fn raw_reader(&mut self) -> &mut Self::Reader {
        self
    }
}

pub struct CachedBBIFileRead<S: SeekableRead> {
    read: S,
    cir_tree_node_map: HashMap<u64, CirTreeNode>,
    block_data: HashMap<Block, Vec<u8>>,
}

impl<S: SeekableRead> CachedBBIFileRead<S> {
    pub fn new(read: S) -> Self {
        CachedBBIFileRead {
            read,
            cir_tree_node_map: HashMap::new(),
            block_data: HashMap::new(),
        }
    }

    /// Returns the uncached source, dropping anything cached
    pub fn into_inner(self) -> S {
        self.read
    }
}

impl<S: SeekableRead> BBIFileRead for CachedBBIFileRead<S> {
    type Reader = S;

    fn get_block_data(
        &mut self,
        info: &BBIFileInfo,
        block: &Block,
    ) -> Result<Vec<u8>, BBIReadError> {
        if let Some(data) = self.block_data.get(block) {
            return Ok(data.clone());
        }
        if self.block_data.len() >= MAX_CACHED_BLOCKS {
            debug!("Clearing {} cached blocks", self.block_data.len());
            self.block_data.clear();
        }
        let data = read_block_data(info, &mut self.read, block)?;
        self.block_data.insert(*block, data.clone());
        Ok(data)
    }

    fn blocks_for_cir_tree_node(
        &mut self,
        endianness: Endianness,
        node_offset: u64,
        block_size: u32,
        chrom_ix: u32,
        start: u32,
        end: u32,
    ) -> Result<(SmallVec<[u64; 4]>, SmallVec<[Block; 4]>), CirTreeSearchError> {
        let node = match self.cir_tree_node_map.entry(node_offset) {
            Entry::Occupied(node) => node.into_mut(),
            Entry::Vacant(e) => {
                let node = read_node(&mut self.read, node_offset, endianness, block_size)?;
                e.insert(node)
            }
        };
        Ok(nodes_overlapping(node, chrom_ix, start, end))
    }

    fn raw_reader(&mut self) -> &mut Self::Reader {
        &mut self.read
    }
}

impl<R: Reopen + SeekableRead> Reopen for CachedBBIFileRead<R> {
    fn reopen(&self) -> io::Result<Self> {
        Ok(Self {
            read: self.read.reopen()?,
            cir_tree_node_map: self.cir_tree_node_map.clone(),
            block_data: self.block_data.clone(),
        })
    }
}

fn eof_as_invalid(what: &'static str) -> impl Fn(io::Error) -> BBIFileReadInfoError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BBIFileReadInfoError::InvalidFile(format!("The {} is truncated", what))
        } else {
            BBIFileReadInfoError::IoError(e)
        }
    }
}

/// Reads the header, zoom headers and the chromosome tree.
pub(crate) fn read_info<R: BBIFileRead>(file: &mut R) -> Result<BBIFileInfo, BBIFileReadInfoError> {
    let file = file.raw_reader();
    file.seek(SeekFrom::Start(0))?;

    let mut header_data = BytesMut::zeroed(HEADER_SIZE);
    file.read_exact(&mut header_data)
        .map_err(eof_as_invalid("header"))?;

    let magic = [header_data[0], header_data[1], header_data[2], header_data[3]];
    let endianness = match (u32::from_le_bytes(magic), u32::from_be_bytes(magic)) {
        (BIGWIG_MAGIC, _) => Endianness::Little,
        (_, BIGWIG_MAGIC) => Endianness::Big,
        (BIGBED_MAGIC, _) | (_, BIGBED_MAGIC) => return Err(BBIFileReadInfoError::BigBed),
        _ => return Err(BBIFileReadInfoError::UnknownMagic),
    };

    let mut fields = ByteOrdered::runtime(&header_data[4..], endianness);
    let version = fields.read_u16()?;
    let zoom_levels = fields.read_u16()?;
    let chromosome_tree_offset = fields.read_u64()?;
    let full_data_offset = fields.read_u64()?;
    let full_index_offset = fields.read_u64()?;
    let field_count = fields.read_u16()?;
    let defined_field_count = fields.read_u16()?;
    let _auto_sql_offset = fields.read_u64()?;
    let total_summary_offset = fields.read_u64()?;
    let uncompress_buf_size = fields.read_u32()?;
    let _reserved = fields.read_u64()?;

    let header = BBIHeader {
        endianness,
        version,
        zoom_levels,
        chromosome_tree_offset,
        full_data_offset,
        full_index_offset,
        full_index_tree: None,
        field_count,
        defined_field_count,
        total_summary_offset,
        uncompress_buf_size,
    };

    let zoom_headers = read_zoom_headers(file, &header)?;
    let chrom_info = read_chrom_tree(file, &header)?;

    Ok(BBIFileInfo {
        header,
        zoom_headers,
        chrom_info,
    })
}

fn read_zoom_headers<R: Read>(
    file: &mut R,
    header: &BBIHeader,
) -> Result<Vec<ZoomHeader>, BBIFileReadInfoError> {
    let mut header_data = BytesMut::zeroed((header.zoom_levels as usize) * ZOOM_HEADER_SIZE);
    file.read_exact(&mut header_data)
        .map_err(eof_as_invalid("zoom header list"))?;

    let mut fields = ByteOrdered::runtime(&header_data[..], header.endianness);
    let mut zoom_headers = Vec::with_capacity(header.zoom_levels as usize);
    for _ in 0..header.zoom_levels {
        let reduction_level = fields.read_u32()?;
        let _reserved = fields.read_u32()?;
        let _data_offset = fields.read_u64()?;
        let index_offset = fields.read_u64()?;

        zoom_headers.push(ZoomHeader {
            reduction_level,
            index_offset,
            index_tree: None,
        });
    }

    Ok(zoom_headers)
}

fn read_chrom_tree<R: Read + Seek>(
    file: &mut R,
    header: &BBIHeader,
) -> Result<Vec<ChromInfo>, BBIFileReadInfoError> {
    let endianness = header.endianness;
    file.seek(SeekFrom::Start(header.chromosome_tree_offset))?;

    let mut header_data = BytesMut::zeroed(CHROM_TREE_HEADER_SIZE);
    file.read_exact(&mut header_data).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BBIFileReadInfoError::InvalidChroms("Chromosome tree header is truncated".to_owned())
        } else {
            BBIFileReadInfoError::IoError(e)
        }
    })?;

    let mut fields = ByteOrdered::runtime(&header_data[..], endianness);
    let magic = fields.read_u32()?;
    if magic != CHROM_TREE_MAGIC {
        return Err(BBIFileReadInfoError::InvalidChroms(
            "Invalid chromosome tree magic".to_owned(),
        ));
    }
    let block_size = fields.read_u32()?;
    let key_size = fields.read_u32()?;
    let val_size = fields.read_u32()?;
    let item_count = fields.read_u64()?;
    let _reserved = fields.read_u64()?;

    if val_size != 8 {
        return Err(BBIFileReadInfoError::InvalidChroms(format!(
            "Unexpected value size {}",
            val_size
        )));
    }
    if key_size > MAX_CHROM_KEY_SIZE {
        return Err(BBIFileReadInfoError::InvalidChroms(format!(
            "Unexpected key size {}",
            key_size
        )));
    }

    let mut chrom_info = Vec::with_capacity(item_count.min(u16::MAX as u64) as usize);
    let mut visited = HashSet::new();
    read_chrom_tree_block(
        file,
        endianness,
        &mut chrom_info,
        &mut visited,
        block_size,
        key_size,
        0,
    )
    .map_err(
        |e| match e {
            ChromTreeBlockReadError::IoError(e) if e.kind() != io::ErrorKind::UnexpectedEof => {
                BBIFileReadInfoError::IoError(e)
            }
            ChromTreeBlockReadError::IoError(_) => {
                BBIFileReadInfoError::InvalidChroms("Chromosome tree is truncated".to_owned())
            }
            ChromTreeBlockReadError::InvalidFile(e) => BBIFileReadInfoError::InvalidChroms(e),
        },
    )?;

    if chrom_info.is_empty() {
        return Err(BBIFileReadInfoError::InvalidChroms(
            "No chromosomes".to_owned(),
        ));
    }
    // Ids index directly into the table
    chrom_info.sort_by_key(|c| c.id);
    if let Some((idx, chrom)) = chrom_info
        .iter()
        .enumerate()
        .find(|(idx, c)| c.id as usize != *idx)
    {
        return Err(BBIFileReadInfoError::InvalidChroms(format!(
            "Chromosome ids are not dense: {} has id {}, expected {}",
            chrom.name, chrom.id, idx
        )));
    }

    Ok(chrom_info)
}

#[derive(Error, Debug)]
enum ChromTreeBlockReadError {
    #[error("{}", .0)]
    InvalidFile(String),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

fn read_chrom_tree_block<R: Read + Seek>(
    f: &mut R,
    endianness: Endianness,
    chroms: &mut Vec<ChromInfo>,
    visited: &mut HashSet<u64>,
    block_size: u32,
    key_size: u32,
    depth: usize,
) -> Result<(), ChromTreeBlockReadError> {
    if depth > MAX_CHROM_TREE_DEPTH {
        return Err(ChromTreeBlockReadError::InvalidFile(
            "Chromosome tree is too deep".to_owned(),
        ));
    }
    let node_offset = f.stream_position()?;
    if !visited.insert(node_offset) {
        return Err(ChromTreeBlockReadError::InvalidFile(format!(
            "Chromosome tree node at {} is reachable more than once",
            node_offset
        )));
    }

    let mut header_data = [0u8; 4];
    f.read_exact(&mut header_data)?;

    let isleaf = header_data[0];
    let count = u16_at(endianness, &header_data, 2);
    if u32::from(count) > block_size {
        return Err(ChromTreeBlockReadError::InvalidFile(format!(
            "Chromosome tree node has {} items, but the block size is {}",
            count, block_size
        )));
    }
    let count = count as usize;
    let key_size = key_size as usize;
    let item_size = key_size + 8;

    let bytes = read_exact_bounded(f, (item_size * count) as u64)?;

    match isleaf {
        1 => {
            for item in bytes.chunks_exact(item_size) {
                let key_string = match std::str::from_utf8(&item[0..key_size]) {
                    Ok(s) => s.trim_end_matches(char::from(0)).to_owned(),
                    Err(_) => {
                        return Err(ChromTreeBlockReadError::InvalidFile(
                            "Invalid utf-8 string.".to_owned(),
                        ))
                    }
                };
                chroms.push(ChromInfo {
                    name: key_string,
                    id: u32_at(endianness, item, key_size),
                    length: u32_at(endianness, item, key_size + 4),
                });
            }
        }
        0 => {
            // First, go through and get child blocks
            let children: Vec<u64> = bytes
                .chunks_exact(item_size)
                .map(|item| u64_at(endianness, item, key_size))
                .collect();
            // Then go through each child block
            for child in children {
                f.seek(SeekFrom::Start(child))?;
                read_chrom_tree_block(
                    f,
                    endianness,
                    chroms,
                    visited,
                    block_size,
                    key_size as u32,
                    depth + 1,
                )?;
            }
        }
        _ => {
            return Err(ChromTreeBlockReadError::InvalidFile(format!(
                "Unexpected isleaf: {}",
                isleaf
            )))
        }
    }
    Ok(())
}

/// Reads exactly `len` bytes. The buffer grows as data arrives, so a corrupt
/// length runs into the end of the file instead of a huge allocation.
fn read_exact_bounded<R: Read>(f: &mut R, len: u64) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(len.min(INITIAL_READ_CAPACITY) as usize);
    f.by_ref().take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(bytes)
}

/// Inflates a block. A `uncompress_buf_size` of 0 means the file is not
/// compressed, and `raw` is returned as is.
///
/// `uncompress_buf_size` only sizes the first attempt; if the data inflates to
/// more than that, the output buffer grows until it fits.
pub fn decompress_block(raw: Vec<u8>, uncompress_buf_size: u32) -> Result<Vec<u8>, BBIReadError> {
    if uncompress_buf_size == 0 {
        return Ok(raw);
    }

    let mut decompressor = Decompressor::new();
    let hint = u64::from(uncompress_buf_size).min(MAX_BLOCK_SIZE) as usize;
    let mut outbuf = vec![0u8; hint.max(raw.len())];
    loop {
        match decompressor.zlib_decompress(&raw, &mut outbuf) {
            Ok(len) => {
                outbuf.truncate(len);
                return Ok(outbuf);
            }
            Err(DecompressionError::InsufficientSpace) => {
                let len = outbuf.len() * 2;
                if len as u64 > MAX_BLOCK_SIZE {
                    return Err(BBIReadError::DecompressionError(format!(
                        "Block inflates to more than {} bytes",
                        MAX_BLOCK_SIZE
                    )));
                }
                outbuf.resize(len, 0);
            }
            Err(_) => {
                return Err(BBIReadError::DecompressionError(
                    "Invalid zlib data".to_owned(),
                ));
            }
        }
    }
}

/// Gets the data (uncompressed, if applicable) from a given block
fn read_block_data<R: SeekableRead>(
    info: &BBIFileInfo,
    read: &mut R,
    block: &Block,
) -> Result<Vec<u8>, BBIReadError> {
    if block.size > MAX_BLOCK_SIZE {
        return Err(BBIReadError::InvalidFile(format!(
            "Block at {} has an unexpected size: {}",
            block.offset, block.size
        )));
    }

    read.seek(SeekFrom::Start(block.offset))?;

    let raw_data = read_exact_bounded(read, block.size).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BBIReadError::InvalidFile(format!(
                "Block at {} extends past the end of the file",
                block.offset
            ))
        } else {
            BBIReadError::IoError(e)
        }
    })?;

    decompress_block(raw_data, info.header.uncompress_buf_size)
}

pub(crate) fn get_zoom_block_values<B: BBIRead>(
    bbifile: &mut B,
    block: Block,
    chrom: u32,
    start: u32,
    end: u32,
) -> Result<std::vec::IntoIter<ZoomRecord>, BBIReadError> {
    let (read, info) = bbifile.reader_and_info();
    let data = read.get_block_data(info, &block)?;
    let endianness = info.header.endianness;

    if data.len() % ZOOM_RECORD_SIZE != 0 {
        return Err(BBIReadError::InvalidFile(format!(
            "Zoom block at {} has a length ({}) that is not a multiple of {}",
            block.offset,
            data.len(),
            ZOOM_RECORD_SIZE
        )));
    }

    let records = data
        .chunks_exact(ZOOM_RECORD_SIZE)
        .map(|bytes| ZoomRecord {
            chrom: u32_at(endianness, bytes, 0),
            start: u32_at(endianness, bytes, 4),
            end: u32_at(endianness, bytes, 8),
            summary: Summary {
                total_items: 0,
                bases_covered: u64::from(u32_at(endianness, bytes, 12)),
                min_val: f64::from(f32_at(endianness, bytes, 16)),
                max_val: f64::from(f32_at(endianness, bytes, 20)),
                sum: f64::from(f32_at(endianness, bytes, 24)),
                sum_squares: f64::from(f32_at(endianness, bytes, 28)),
            },
        })
        .filter(|r| r.chrom == chrom && r.end > start && r.start < end)
        .collect::<Vec<_>>();

    Ok(records.into_iter())
}

pub(crate) struct ZoomIntervalIter<'a, I, B>
where
    I: Iterator<Item = Block> + Send,
    B: BBIRead,
{
    bbifile: &'a mut B,
    blocks: I,
    vals: Option<std::vec::IntoIter<ZoomRecord>>,
    chrom: u32,
    start: u32,
    end: u32,
}

impl<'a, I, B> ZoomIntervalIter<'a, I, B>
where
    I: Iterator<Item = Block> + Send,
    B: BBIRead,
{
    pub fn new(bbifile: &'a mut B, blocks: I, chrom: u32, start: u32, end: u32) -> Self {
        ZoomIntervalIter {
            bbifile,
            blocks,
            vals: None,
            chrom,
            start,
            end,
        }
    }
}

impl<'a, I, B> Iterator for ZoomIntervalIter<'a, I, B>
where
    I: Iterator<Item = Block> + Send,
    B: BBIRead,
{
    type Item = Result<ZoomRecord, BBIReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.vals {
                Some(vals) => match vals.next() {
                    Some(v) => {
                        return Some(Ok(v));
                    }
                    None => {
                        self.vals = None;
                    }
                },
                None => {
                    let current_block = self.blocks.next()?;
                    match get_zoom_block_values(
                        self.bbifile,
                        current_block,
                        self.chrom,
                        self.start,
                        self.end,
                    ) {
                        Ok(vals) => {
                            self.vals = Some(vals);
                        }
                        Err(e) => {
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}
