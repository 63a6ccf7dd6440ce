#![allow(dead_code)]

//! A small bigWig writer used to build fixtures for the read tests.

use std::io::{Cursor, Write};
use std::ops::Range;

use byteordered::Endianness;
use bytes::Bytes;
use libdeflater::{CompressionLvl, Compressor};

use bwreader::{BigWigRead, Value};

pub const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub const BIGBED_MAGIC: u32 = 0x8789_F2EB;
const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

/// One data section, written as one data block.
#[derive(Clone, Debug)]
pub enum Section {
    BedGraph(Vec<(u32, u32, f32)>),
    VarStep {
        span: u32,
        items: Vec<(u32, f32)>,
    },
    FixedStep {
        start: u32,
        step: u32,
        span: u32,
        values: Vec<f32>,
    },
}

impl Section {
    pub fn values(&self) -> Vec<Value> {
        match self {
            Section::BedGraph(items) => items
                .iter()
                .map(|&(start, end, value)| Value { start, end, value })
                .collect(),
            Section::VarStep { span, items } => items
                .iter()
                .map(|&(start, value)| Value {
                    start,
                    end: start + span,
                    value,
                })
                .collect(),
            Section::FixedStep {
                start,
                step,
                span,
                values,
            } => values
                .iter()
                .enumerate()
                .map(|(i, &value)| {
                    let start = start + i as u32 * step;
                    Value {
                        start,
                        end: start + span,
                        value,
                    }
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Chrom {
    pub name: String,
    pub length: u32,
    pub sections: Vec<Section>,
}

impl Chrom {
    pub fn new(name: &str, length: u32, sections: Vec<Section>) -> Self {
        Chrom {
            name: name.to_owned(),
            length,
            sections,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.sections.iter().flat_map(|s| s.values()).collect()
    }
}

/// Splits sorted, non-overlapping values into bedGraph sections of at most
/// `per_section` values.
pub fn bedgraph_sections(values: &[Value], per_section: usize) -> Vec<Section> {
    values
        .chunks(per_section)
        .map(|chunk| Section::BedGraph(chunk.iter().map(|v| (v.start, v.end, v.value)).collect()))
        .collect()
}

#[derive(Clone, Debug)]
pub struct FixtureOptions {
    pub endianness: Endianness,
    pub compress: bool,
    pub zoom_levels: Vec<u32>,
    /// Max items per chromosome B+tree node
    pub chrom_block_size: u32,
    /// Max items per cir tree node
    pub index_block_size: u32,
    pub zoom_items_per_block: usize,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        FixtureOptions {
            endianness: Endianness::Little,
            compress: true,
            zoom_levels: vec![64, 256],
            chrom_block_size: 256,
            index_block_size: 256,
            zoom_items_per_block: 64,
        }
    }
}

/// The bytes of a written bigWig, plus where a few things ended up.
pub struct Fixture {
    pub bytes: Vec<u8>,
    pub chrom_tree_offset: u64,
    pub full_data_offset: u64,
    pub full_index_offset: u64,
    /// (offset, size) of each full data block, in write order
    pub data_blocks: Vec<(u64, u64)>,
}

impl Fixture {
    pub fn open(&self) -> BigWigRead<Cursor<Bytes>> {
        BigWigRead::open(Cursor::new(Bytes::from(self.bytes.clone()))).unwrap()
    }

    pub fn tempfile(&self) -> tempfile::NamedTempFile {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile.write_all(&self.bytes).unwrap();
        tempfile.flush().unwrap();
        tempfile
    }
}

struct Out {
    buf: Vec<u8>,
    endianness: Endianness,
}

impl Out {
    fn pos(&self) -> u64 {
        self.buf.len() as u64
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        match self.endianness {
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn u32(&mut self, v: u32) {
        match self.endianness {
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn u64(&mut self, v: u64) {
        match self.endianness {
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn f32(&mut self, v: f32) {
        self.u32(v.to_bits());
    }

    fn f64(&mut self, v: f64) {
        self.u64(v.to_bits());
    }
}

type Bounds = ((u32, u32), (u32, u32));

struct TreeNode {
    children: Range<usize>,
    first_item: usize,
    bounds: Bounds,
}

/// Groups `bounds.len()` items into a tree with at most `block_size` items
/// per node. Returns the levels root first.
fn tree_levels(bounds: &[Bounds], block_size: usize) -> Vec<Vec<TreeNode>> {
    let leaves: Vec<TreeNode> = (0..bounds.len())
        .step_by(block_size)
        .map(|start| {
            let end = (start + block_size).min(bounds.len());
            TreeNode {
                children: start..end,
                first_item: start,
                bounds: union(&bounds[start..end]),
            }
        })
        .collect();
    let leaves = if leaves.is_empty() {
        vec![TreeNode {
            children: 0..0,
            first_item: 0,
            bounds: ((0, 0), (0, 0)),
        }]
    } else {
        leaves
    };

    let mut levels = vec![leaves];
    while levels[levels.len() - 1].len() > 1 {
        let below = &levels[levels.len() - 1];
        let level = (0..below.len())
            .step_by(block_size)
            .map(|start| {
                let end = (start + block_size).min(below.len());
                let child_bounds: Vec<Bounds> = below[start..end].iter().map(|n| n.bounds).collect();
                TreeNode {
                    children: start..end,
                    first_item: below[start].first_item,
                    bounds: union(&child_bounds),
                }
            })
            .collect();
        levels.push(level);
    }
    levels.reverse();
    levels
}

fn union(bounds: &[Bounds]) -> Bounds {
    let start = bounds.iter().map(|b| b.0).min().unwrap_or((0, 0));
    let end = bounds.iter().map(|b| b.1).max().unwrap_or((0, 0));
    (start, end)
}

/// Offsets of every node, laid out level by level starting at `at`.
fn node_offsets(levels: &[Vec<TreeNode>], at: u64, leaf_item: u64, non_leaf_item: u64) -> Vec<Vec<u64>> {
    let mut offset = at;
    let last = levels.len() - 1;
    levels
        .iter()
        .enumerate()
        .map(|(depth, level)| {
            let item_size = if depth == last { leaf_item } else { non_leaf_item };
            level
                .iter()
                .map(|node| {
                    let this = offset;
                    offset += 4 + item_size * node.children.len() as u64;
                    this
                })
                .collect()
        })
        .collect()
}

fn write_chrom_tree(out: &mut Out, chroms: &[Chrom], block_size: u32) {
    let key_size = chroms.iter().map(|c| c.name.len()).max().unwrap_or(1).max(1);
    let item_size = key_size as u64 + 8;

    out.u32(CHROM_TREE_MAGIC);
    out.u32(block_size);
    out.u32(key_size as u32);
    out.u32(8);
    out.u64(chroms.len() as u64);
    out.u64(0);

    let bounds = vec![((0, 0), (0, 0)); chroms.len()];
    let levels = tree_levels(&bounds, block_size as usize);
    let offsets = node_offsets(&levels, out.pos(), item_size, item_size);
    let last = levels.len() - 1;

    let key = |out: &mut Out, name: &str| {
        let mut bytes = name.as_bytes().to_vec();
        bytes.resize(key_size, 0);
        out.buf.extend_from_slice(&bytes);
    };

    for (depth, level) in levels.iter().enumerate() {
        for node in level {
            let is_leaf = depth == last;
            out.u8(is_leaf as u8);
            out.u8(0);
            out.u16(node.children.len() as u16);
            for child in node.children.clone() {
                if is_leaf {
                    key(out, &chroms[child].name);
                    out.u32(child as u32);
                    out.u32(chroms[child].length);
                } else {
                    let child_node = &levels[depth + 1][child];
                    key(out, &chroms[child_node.first_item].name);
                    out.u64(offsets[depth + 1][child]);
                }
            }
        }
    }
}

/// A data block: its index bounds and where it was written
struct IndexedBlock {
    bounds: Bounds,
    offset: u64,
    size: u64,
}

fn write_cir_tree(out: &mut Out, blocks: &[IndexedBlock], block_size: u32, end_file_offset: u64) {
    let bounds: Vec<Bounds> = blocks.iter().map(|b| b.bounds).collect();
    let overall = union(&bounds);

    out.u32(CIR_TREE_MAGIC);
    out.u32(block_size);
    out.u64(blocks.len() as u64);
    out.u32(overall.0 .0);
    out.u32(overall.0 .1);
    out.u32(overall.1 .0);
    out.u32(overall.1 .1);
    out.u64(end_file_offset);
    out.u32(1);
    out.u32(0);

    let levels = tree_levels(&bounds, block_size as usize);
    let offsets = node_offsets(&levels, out.pos(), 32, 24);
    let last = levels.len() - 1;

    for (depth, level) in levels.iter().enumerate() {
        for node in level {
            let is_leaf = depth == last;
            out.u8(is_leaf as u8);
            out.u8(0);
            out.u16(node.children.len() as u16);
            for child in node.children.clone() {
                let child_bounds = if is_leaf {
                    blocks[child].bounds
                } else {
                    levels[depth + 1][child].bounds
                };
                out.u32(child_bounds.0 .0);
                out.u32(child_bounds.0 .1);
                out.u32(child_bounds.1 .0);
                out.u32(child_bounds.1 .1);
                if is_leaf {
                    out.u64(blocks[child].offset);
                    out.u64(blocks[child].size);
                } else {
                    out.u64(offsets[depth + 1][child]);
                }
            }
        }
    }
}

fn compress(data: &[u8]) -> Vec<u8> {
    let mut compressor = Compressor::new(CompressionLvl::default());
    let mut out = vec![0u8; compressor.zlib_compress_bound(data.len())];
    let len = compressor.zlib_compress(data, &mut out).unwrap();
    out.truncate(len);
    out
}

fn encode_section(endianness: Endianness, chrom_id: u32, section: &Section) -> Vec<u8> {
    let values = section.values();
    let start = values.iter().map(|v| v.start).min().unwrap_or(0);
    let end = values.iter().map(|v| v.end).max().unwrap_or(0);
    let mut out = Out {
        buf: vec![],
        endianness,
    };
    let (step, span, section_type) = match section {
        Section::BedGraph(_) => (0, 0, 1),
        Section::VarStep { span, .. } => (0, *span, 2),
        Section::FixedStep { step, span, .. } => (*step, *span, 3),
    };
    out.u32(chrom_id);
    out.u32(start);
    out.u32(end);
    out.u32(step);
    out.u32(span);
    out.u8(section_type);
    out.u8(0);
    out.u16(values.len() as u16);
    match section {
        Section::BedGraph(items) => {
            for &(start, end, value) in items {
                out.u32(start);
                out.u32(end);
                out.f32(value);
            }
        }
        Section::VarStep { items, .. } => {
            for &(start, value) in items {
                out.u32(start);
                out.f32(value);
            }
        }
        Section::FixedStep { values, .. } => {
            for &value in values {
                out.f32(value);
            }
        }
    }
    out.buf
}

/// A zoom record, as computed by the writer
#[derive(Copy, Clone, Debug)]
pub struct ZoomItem {
    pub chrom: u32,
    pub start: u32,
    pub end: u32,
    pub valid: u32,
    pub min: f32,
    pub max: f32,
    pub sum: f32,
    pub sum_squares: f32,
}

/// Zoom records of `reduction_level` for one chromosome: one per
/// `reduction_level`-aligned bin that has data, spanning the covered part of
/// the bin.
pub fn zoom_items(chrom_id: u32, values: &[Value], reduction_level: u32) -> Vec<ZoomItem> {
    let mut items: Vec<ZoomItem> = vec![];
    for value in values {
        let mut pos = value.start;
        while pos < value.end {
            let bin = pos / reduction_level;
            let bin_end = (bin + 1) * reduction_level;
            let piece_end = value.end.min(bin_end);
            let bases = piece_end - pos;
            let v = value.value;
            match items.last_mut() {
                Some(item) if item.start / reduction_level == bin => {
                    item.end = item.end.max(piece_end);
                    item.valid += bases;
                    item.min = item.min.min(v);
                    item.max = item.max.max(v);
                    item.sum += v * bases as f32;
                    item.sum_squares += v * v * bases as f32;
                }
                _ => items.push(ZoomItem {
                    chrom: chrom_id,
                    start: pos,
                    end: piece_end,
                    valid: bases,
                    min: v,
                    max: v,
                    sum: v * bases as f32,
                    sum_squares: v * v * bases as f32,
                }),
            }
            pos = piece_end;
        }
    }
    items
}

/// Writes a bigWig holding `chroms`, which must be sorted by name. Chromosome
/// ids follow that order.
pub fn write_bigwig(chroms: &[Chrom], options: &FixtureOptions) -> Fixture {
    let endianness = options.endianness;
    let mut out = Out {
        buf: vec![],
        endianness,
    };

    // Header and zoom headers are patched in at the end
    let header_size = 64 + 24 * options.zoom_levels.len();
    out.buf.resize(header_size, 0);

    let total_summary_offset = out.pos();
    let all_values: Vec<Value> = chroms.iter().flat_map(|c| c.values()).collect();
    out.u64(
        all_values
            .iter()
            .map(|v| (v.end - v.start) as u64)
            .sum(),
    );
    out.f64(
        all_values
            .iter()
            .map(|v| v.value as f64)
            .fold(f64::INFINITY, f64::min),
    );
    out.f64(
        all_values
            .iter()
            .map(|v| v.value as f64)
            .fold(f64::NEG_INFINITY, f64::max),
    );
    out.f64(
        all_values
            .iter()
            .map(|v| v.value as f64 * (v.end - v.start) as f64)
            .sum(),
    );
    out.f64(
        all_values
            .iter()
            .map(|v| (v.value as f64).powi(2) * (v.end - v.start) as f64)
            .sum(),
    );

    let chrom_tree_offset = out.pos();
    write_chrom_tree(&mut out, chroms, options.chrom_block_size);

    let full_data_offset = out.pos();
    let section_count: usize = chroms.iter().map(|c| c.sections.len()).sum();
    out.u64(section_count as u64);

    let mut max_raw_size = 0;
    let mut blocks = vec![];
    for (chrom_id, chrom) in chroms.iter().enumerate() {
        for section in &chrom.sections {
            let raw = encode_section(endianness, chrom_id as u32, section);
            max_raw_size = max_raw_size.max(raw.len());
            let data = if options.compress { compress(&raw) } else { raw };
            let values = section.values();
            let start = values.iter().map(|v| v.start).min().unwrap_or(0);
            let end = values.iter().map(|v| v.end).max().unwrap_or(0);
            blocks.push(IndexedBlock {
                bounds: ((chrom_id as u32, start), (chrom_id as u32, end)),
                offset: out.pos(),
                size: data.len() as u64,
            });
            out.buf.extend_from_slice(&data);
        }
    }
    let data_blocks = blocks.iter().map(|b| (b.offset, b.size)).collect();

    let full_index_offset = out.pos();
    let end_of_data = full_index_offset;
    write_cir_tree(&mut out, &blocks, options.index_block_size, end_of_data);

    let mut zoom_headers = vec![];
    for &reduction_level in &options.zoom_levels {
        let zoom_data_offset = out.pos();
        let items: Vec<ZoomItem> = chroms
            .iter()
            .enumerate()
            .flat_map(|(chrom_id, chrom)| zoom_items(chrom_id as u32, &chrom.values(), reduction_level))
            .collect();
        out.u32(items.len() as u32);

        let mut zoom_blocks = vec![];
        let mut start = 0;
        while start < items.len() {
            // Zoom blocks never span chromosomes
            let chrom = items[start].chrom;
            let mut end = start;
            while end < items.len()
                && end - start < options.zoom_items_per_block
                && items[end].chrom == chrom
            {
                end += 1;
            }
            let mut raw = Out {
                buf: vec![],
                endianness,
            };
            for item in &items[start..end] {
                raw.u32(item.chrom);
                raw.u32(item.start);
                raw.u32(item.end);
                raw.u32(item.valid);
                raw.f32(item.min);
                raw.f32(item.max);
                raw.f32(item.sum);
                raw.f32(item.sum_squares);
            }
            max_raw_size = max_raw_size.max(raw.buf.len());
            let data = if options.compress {
                compress(&raw.buf)
            } else {
                raw.buf
            };
            zoom_blocks.push(IndexedBlock {
                bounds: (
                    (chrom, items[start].start),
                    (chrom, items[end - 1].end),
                ),
                offset: out.pos(),
                size: data.len() as u64,
            });
            out.buf.extend_from_slice(&data);
            start = end;
        }

        let zoom_index_offset = out.pos();
        write_cir_tree(&mut out, &zoom_blocks, options.index_block_size, zoom_index_offset);
        zoom_headers.push((reduction_level, zoom_data_offset, zoom_index_offset));
    }

    let uncompress_buf_size = if options.compress {
        (max_raw_size as u32).max(1)
    } else {
        0
    };

    let mut header = Out {
        buf: vec![],
        endianness,
    };
    header.u32(BIGWIG_MAGIC);
    header.u16(4);
    header.u16(options.zoom_levels.len() as u16);
    header.u64(chrom_tree_offset);
    header.u64(full_data_offset);
    header.u64(full_index_offset);
    header.u16(0);
    header.u16(0);
    header.u64(0);
    header.u64(total_summary_offset);
    header.u32(uncompress_buf_size);
    header.u64(0);
    for (reduction_level, data_offset, index_offset) in zoom_headers {
        header.u32(reduction_level);
        header.u32(0);
        header.u64(data_offset);
        header.u64(index_offset);
    }
    out.buf[..header_size].copy_from_slice(&header.buf);

    Fixture {
        bytes: out.buf,
        chrom_tree_offset,
        full_data_offset,
        full_index_offset,
        data_blocks,
    }
}

/// Chromosome "1" with 0.1, 0.2 and 0.3 at bases 0, 1 and 2, and an empty
/// chromosome "10".
pub fn reference_chroms() -> Vec<Chrom> {
    vec![
        Chrom::new(
            "1",
            195471971,
            vec![Section::BedGraph(vec![
                (0, 1, 0.1),
                (1, 2, 0.2),
                (2, 3, 0.3),
            ])],
        ),
        Chrom::new("10", 130694993, vec![]),
    ]
}

pub fn reference_fixture() -> Fixture {
    write_bigwig(&reference_chroms(), &FixtureOptions::default())
}

/// Random, sorted, non-overlapping values in `start..end`, with gaps.
pub fn generate_values(start: u32, end: u32, seed: u64) -> Vec<Value> {
    use rand::prelude::*;

    let mut out = vec![];

    let mut rng: StdRng = SeedableRng::seed_from_u64(seed);

    let mut curr = start;
    while curr < end {
        let value: f32 = rng.gen::<f32>() * 10.0 - 2.0;
        let size = (rng.gen::<f32>() * 20.0).floor() as u32 + 1;
        let skip = (rng.gen::<f32>() * 12.0).floor() as u32;

        let curr_end = end.min(curr + size);
        out.push(Value {
            start: curr,
            end: curr_end,
            value,
        });
        curr = curr_end + skip;
    }
    out
}
