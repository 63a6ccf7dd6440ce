/*!
Provides the interface for reading bigWig files.

## Example
```rust, no_run
# use std::error::Error;
# use bwreader::{BigWigRead, Statistic};
# fn main() -> Result<(), Box<dyn Error>> {
// First, we open a bigWig using a file name (as a `&str`).
let mut bwread = BigWigRead::open_file("signal.bigWig")?;

// Then, we could get the chromosomes and lengths
let chroms = bwread.chroms();
println!("{} has {} bases", chroms[0].name, chroms[0].length);

// We can read the values overlapping a region, sorted by start
for value in bwread.values("chr1", 0, 10_000, false)? {
    println!("{}-{}: {}", value.start, value.end, value.value);
}

// Or summarize a region in bins
let means = bwread.stats("chr1", 0, 10_000, "mean".parse::<Statistic>()?, 10)?;
assert_eq!(means.len(), 10);
# Ok(())
# }
```
*/
use std::io::{self, Seek, SeekFrom};
use std::vec::Vec;

use byteordered::{ByteOrdered, Endianness};
use itertools::Either;
use log::{debug, error, trace};
use thiserror::Error;

use crate::bbi::{f32_at, u16_at, u32_at, Interval, Summary, Value, ZoomRecord};
use crate::bbiread::{
    read_info, search_cir_tree, BBIFileInfo, BBIFileRead, BBIFileReadInfoError, BBIRead,
    BBIReadError, BBIReadOptions, Block, CachedBBIFileRead, ChromInfo, ZoomIntervalError,
    ZoomIntervalIter,
};
use crate::cirtree::search_cir_tree_inner;
use crate::internal::BBIReadInternal;
use crate::stats::{choose_zoom, Bins, Statistic};
use crate::utils::fill::fill_nan;
use crate::utils::merge::merge_values;
use crate::utils::reopen::{Reopen, ReopenableFile, SeekableRead};

const SECTION_HEADER_SIZE: usize = 24;

/// How the records of a data section are encoded
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SectionType {
    /// Explicit start, end and value per record
    BedGraph,
    /// Explicit start and value per record, shared span
    VarStep,
    /// Only values; starts follow from the section start and step
    FixedStep,
}

impl SectionType {
    fn from_u8(section_type: u8) -> Option<Self> {
        match section_type {
            1 => Some(SectionType::BedGraph),
            2 => Some(SectionType::VarStep),
            3 => Some(SectionType::FixedStep),
            _ => None,
        }
    }

    fn record_size(self) -> usize {
        match self {
            SectionType::BedGraph => 12,
            SectionType::VarStep => 8,
            SectionType::FixedStep => 4,
        }
    }
}

/// The header of a single data section (one per data block)
#[derive(Copy, Clone, Debug)]
pub struct SectionHeader {
    pub chrom_id: u32,
    pub start: u32,
    pub end: u32,
    pub step: u32,
    pub span: u32,
    pub section_type: SectionType,
    pub item_count: u16,
}

/// Decodes an (already decompressed) data block. The block is validated up
/// front, so iterating its values cannot fail.
pub struct BlockDecoder<'a> {
    header: SectionHeader,
    endianness: Endianness,
    records: &'a [u8],
}

impl<'a> BlockDecoder<'a> {
    pub fn new(data: &'a [u8], endianness: Endianness) -> Result<Self, BBIReadError> {
        if data.len() < SECTION_HEADER_SIZE {
            return Err(BBIReadError::InvalidFile(format!(
                "Data block is too short for a section header ({} bytes)",
                data.len()
            )));
        }

        let raw_type = data[20];
        let section_type = match SectionType::from_u8(raw_type) {
            Some(t) => t,
            None => {
                return Err(BBIReadError::InvalidFile(format!(
                    "Unknown bigwig section type: {}",
                    raw_type
                )))
            }
        };
        let header = SectionHeader {
            chrom_id: u32_at(endianness, data, 0),
            start: u32_at(endianness, data, 4),
            end: u32_at(endianness, data, 8),
            step: u32_at(endianness, data, 12),
            span: u32_at(endianness, data, 16),
            section_type,
            item_count: u16_at(endianness, data, 22),
        };

        let records = &data[SECTION_HEADER_SIZE..];
        let needed = header.item_count as usize * section_type.record_size();
        if records.len() < needed {
            return Err(BBIReadError::InvalidFile(format!(
                "Data section declares {} items ({} bytes), but only has {} bytes",
                header.item_count,
                needed,
                records.len()
            )));
        }

        Ok(BlockDecoder {
            header,
            endianness,
            records,
        })
    }

    pub fn header(&self) -> &SectionHeader {
        &self.header
    }

    /// Returns the values of this section, in on-disk order. Calling this
    /// again restarts from the first value.
    pub fn values(&self) -> BlockValues<'a> {
        BlockValues {
            header: self.header,
            endianness: self.endianness,
            records: self.records,
            i: 0,
        }
    }
}

/// The values of a single data section. See [`BlockDecoder::values`].
#[derive(Clone)]
pub struct BlockValues<'a> {
    header: SectionHeader,
    endianness: Endianness,
    records: &'a [u8],
    i: usize,
}

impl<'a> Iterator for BlockValues<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.i;
        if i >= self.header.item_count as usize {
            return None;
        }
        self.i += 1;

        let endianness = self.endianness;
        let header = &self.header;
        let at = i * header.section_type.record_size();
        let value = match header.section_type {
            SectionType::BedGraph => Value {
                start: u32_at(endianness, self.records, at),
                end: u32_at(endianness, self.records, at + 4),
                value: f32_at(endianness, self.records, at + 8),
            },
            SectionType::VarStep => {
                let start = u32_at(endianness, self.records, at);
                Value {
                    start,
                    end: start.saturating_add(header.span),
                    value: f32_at(endianness, self.records, at + 4),
                }
            }
            SectionType::FixedStep => {
                let start = header
                    .start
                    .saturating_add((i as u32).saturating_mul(header.step));
                Value {
                    start,
                    end: start.saturating_add(header.span),
                    value: f32_at(endianness, self.records, at),
                }
            }
        };
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.header.item_count as usize - self.i;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for BlockValues<'a> {}

struct IntervalIter<'a, I, R>
where
    I: Iterator<Item = Block> + Send,
    R: BBIFileRead,
{
    bigwig: &'a mut BigWigRead<R>,
    blocks: I,
    vals: Option<std::vec::IntoIter<Value>>,
    chrom: u32,
    start: u32,
    end: u32,
}

impl<'a, I, R> Iterator for IntervalIter<'a, I, R>
where
    I: Iterator<Item = Block> + Send,
    R: BBIFileRead,
{
    type Item = Result<Value, BBIReadError>;

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
                    match get_block_values(
                        self.bigwig,
                        current_block,
                        self.chrom,
                        self.start,
                        self.end,
                    ) {
                        Ok(Some(vals)) => {
                            self.vals = Some(vals);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}

/// Possible errors encountered when opening a bigWig file to read
#[derive(Debug, Error)]
pub enum BigWigReadOpenError {
    #[error("File is not a bigWig.")]
    NotABigWig,
    #[error("The chromosomes are invalid: {}", .0)]
    InvalidChroms(String),
    #[error("The file was invalid: {}", .0)]
    InvalidFile(String),
    #[error("{}", .0)]
    IoError(io::Error),
}

impl From<io::Error> for BigWigReadOpenError {
    fn from(error: io::Error) -> Self {
        BigWigReadOpenError::IoError(error)
    }
}

impl From<BBIFileReadInfoError> for BigWigReadOpenError {
    fn from(error: BBIFileReadInfoError) -> Self {
        match error {
            BBIFileReadInfoError::UnknownMagic => BigWigReadOpenError::NotABigWig,
            BBIFileReadInfoError::BigBed => BigWigReadOpenError::NotABigWig,
            BBIFileReadInfoError::InvalidChroms(e) => BigWigReadOpenError::InvalidChroms(e),
            BBIFileReadInfoError::InvalidFile(e) => BigWigReadOpenError::InvalidFile(e),
            BBIFileReadInfoError::IoError(e) => BigWigReadOpenError::IoError(e),
        }
    }
}

/// The struct used to read a bigWig file
pub struct BigWigRead<R> {
    pub(super) info: BBIFileInfo,
    pub(super) read: R,
    pub(super) options: BBIReadOptions,
}

impl<R: Reopen> Reopen for BigWigRead<R> {
    fn reopen(&self) -> io::Result<Self> {
        Ok(BigWigRead {
            info: self.info.clone(),
            read: self.read.reopen()?,
            options: self.options,
        })
    }
}

impl<R: BBIFileRead> BBIRead for BigWigRead<R> {
    fn info(&self) -> &BBIFileInfo {
        &self.info
    }

    fn chroms(&self) -> &[ChromInfo] {
        &self.info.chrom_info
    }
}

impl<R: BBIFileRead> BBIReadInternal for BigWigRead<R> {
    type Read = R;

    fn reader(&mut self) -> &mut R {
        &mut self.read
    }

    fn reader_and_info(&mut self) -> (&mut Self::Read, &mut BBIFileInfo) {
        (&mut self.read, &mut self.info)
    }
}

impl<R> BigWigRead<R> {
    /// Get basic info about this bigWig
    pub fn info(&self) -> &BBIFileInfo {
        &self.info
    }

    /// Gets the chromosomes present in this bigWig
    pub fn chroms(&self) -> &[ChromInfo] {
        &self.info.chrom_info
    }

    pub fn options(&self) -> &BBIReadOptions {
        &self.options
    }

    /// Replaces the options used for subsequent queries
    pub fn with_options(mut self, options: BBIReadOptions) -> Self {
        self.options = options;
        self
    }

    /// Gets a reference to the inner `R` type, in order to access any info
    pub fn inner_read(&self) -> &R {
        &self.read
    }

    /// Returns the inner `R`, giving up the parsed info
    pub fn into_inner(self) -> R {
        self.read
    }

    /// Closes this bigWig. Equivalent to dropping it.
    pub fn close(self) {}
}

impl BigWigRead<ReopenableFile> {
    /// Opens a new `BigWigRead` from a given path as a file.
    pub fn open_file(path: &str) -> Result<Self, BigWigReadOpenError> {
        let b = ReopenableFile::open(path)
            .map_err(BigWigReadOpenError::from)
            .and_then(BigWigRead::open);
        if let Err(e) = &b {
            error!("Error when opening {}: {}", path, e);
        }
        b
    }
}

impl<R> BigWigRead<R>
where
    R: SeekableRead,
{
    /// Converts this `BigWigRead` to where the `BBIFileRead` caches index
    /// access and block data
    pub fn cached(self) -> BigWigRead<CachedBBIFileRead<R>> {
        let read = CachedBBIFileRead::new(self.read);
        BigWigRead {
            read,
            info: self.info,
            options: self.options,
        }
    }
}

impl<R> BigWigRead<R>
where
    R: BBIFileRead,
{
    /// Opens a new `BigWigRead` with for a given type that implements both `Read` and `Seek`
    pub fn open(mut read: R) -> Result<Self, BigWigReadOpenError> {
        let info = read_info(&mut read)?;
        debug!(
            "Opened bigWig: version {}, {:?} endian, {} zoom levels, {} chromosomes",
            info.header.version,
            info.header.endianness,
            info.zoom_headers.len(),
            info.chrom_info.len()
        );

        Ok(BigWigRead {
            info,
            read,
            options: BBIReadOptions::default(),
        })
    }

    /// Returns the summary data from bigWig
    ///
    /// Note: For version 1 of bigWigs, there is no total summary. In that
    /// case, 0 is returned for all of the summary except total items. If this
    /// matters to you, you can check the version using
    /// `info().header.version > 1`.
    pub fn get_summary(&mut self) -> Result<Summary, BBIReadError> {
        let endianness = self.info.header.endianness;
        let summary_offset = self.info.header.total_summary_offset;
        let data_offset = self.info.header.full_data_offset;
        let reader = self.reader().raw_reader();
        let mut reader = ByteOrdered::runtime(reader, endianness);
        let (bases_covered, min_val, max_val, sum, sum_squares) = if summary_offset != 0 {
            reader.seek(SeekFrom::Start(summary_offset))?;
            (
                reader.read_u64()?,
                reader.read_f64()?,
                reader.read_f64()?,
                reader.read_f64()?,
                reader.read_f64()?,
            )
        } else {
            (0, 0.0, 0.0, 0.0, 0.0)
        };
        reader.seek(SeekFrom::Start(data_offset))?;
        let total_items = reader.read_u64()?;
        Ok(Summary {
            total_items,
            bases_covered,
            min_val,
            max_val,
            sum,
            sum_squares,
        })
    }

    /// Resolves a chromosome and checks a query range against its length,
    /// clamping the end if allowed by the options.
    fn checked_range(
        &self,
        chrom_name: &str,
        start: u32,
        end: u32,
    ) -> Result<(u32, u32, u32), BBIReadError> {
        let chrom = self
            .info
            .chrom(chrom_name)
            .ok_or_else(|| BBIReadError::InvalidChromosome(chrom_name.to_owned()))?;
        let end = if end > chrom.length {
            if !self.options.clamp_ranges {
                return Err(BBIReadError::InvalidRange(format!(
                    "{}:{}-{} extends past the end of the chromosome ({})",
                    chrom_name, start, end, chrom.length
                )));
            }
            chrom.length
        } else {
            end
        };
        if start >= end {
            return Err(BBIReadError::InvalidRange(format!(
                "{}:{}-{} is empty",
                chrom_name, start, end
            )));
        }
        Ok((chrom.id, start, end))
    }

    fn full_data_blocks(
        &mut self,
        chrom: u32,
        start: u32,
        end: u32,
    ) -> Result<Vec<Block>, BBIReadError> {
        let cir_tree = self.full_data_cir_tree()?;
        let blocks = search_cir_tree_inner(
            self.info.header.endianness,
            &mut self.read,
            &cir_tree,
            chrom,
            start,
            end,
        )?;
        trace!(
            "{} data blocks overlap {}:{}-{}",
            blocks.len(),
            chrom,
            start,
            end
        );
        Ok(blocks)
    }

    /// For a given chromosome, start, and end, returns an `Iterator` of the
    /// intersecting `Value`s, block by block. Values are clipped to the
    /// range, but are not sorted across blocks. The resulting iterator takes
    /// a mutable reference of this `BigWigRead`.
    pub fn get_interval<'a>(
        &'a mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
    ) -> Result<impl Iterator<Item = Result<Value, BBIReadError>> + 'a, BBIReadError> {
        let (chrom, start, end) = self.checked_range(chrom_name, start, end)?;
        let blocks = self.full_data_blocks(chrom, start, end)?;
        Ok(IntervalIter {
            bigwig: self,
            blocks: blocks.into_iter(),
            vals: None,
            chrom,
            start,
            end,
        })
    }

    /// For a given chromosome, start, and end, returns an `Iterator` of the
    /// intersecting `ZoomRecord`s.
    pub fn get_zoom_interval<'a>(
        &'a mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        reduction_level: u32,
    ) -> Result<impl Iterator<Item = Result<ZoomRecord, BBIReadError>> + 'a, ZoomIntervalError>
    {
        let cir_tree = self.zoom_cir_tree(reduction_level)?;

        let chrom = self.info.chrom_id(chrom_name)?;

        let blocks = search_cir_tree(&self.info, &mut self.read, &cir_tree, chrom_name, start, end)?;

        Ok(ZoomIntervalIter::new(
            self,
            blocks.into_iter(),
            chrom,
            start,
            end,
        ))
    }

    /// Returns the values overlapping `start..end`, clipped to that range and
    /// sorted by start.
    ///
    /// If `include_na` is true, every base in the range without data is
    /// returned as its own single-base value of `f32::NAN`, so that the
    /// returned values tile the range.
    ///
    /// Every overlapping block is read and decoded before this returns, so
    /// corrupt data is reported here rather than while iterating. Only the
    /// merge and NaN fill are lazy.
    pub fn values(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        include_na: bool,
    ) -> Result<impl Iterator<Item = Value> + Send, BBIReadError> {
        let (chrom, start, end) = self.checked_range(chrom_name, start, end)?;
        let blocks = self.full_data_blocks(chrom, start, end)?;
        let mut sources = Vec::with_capacity(blocks.len());
        for block in blocks {
            if let Some(values) = get_block_values(self, block, chrom, start, end)? {
                sources.push(values);
            }
        }

        let merged = merge_values(sources);
        Ok(if include_na {
            Either::Left(fill_nan(merged, start, end))
        } else {
            Either::Right(merged)
        })
    }

    /// Like [`BigWigRead::values`], but with one `Interval` per base.
    pub fn intervals(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        include_na: bool,
    ) -> Result<impl Iterator<Item = Interval> + Send, BBIReadError> {
        let values = self.values(chrom_name, start, end, include_na)?;
        let chrom = chrom_name.to_owned();
        Ok(values.flat_map(move |v| {
            let chrom = chrom.clone();
            (v.start..v.end).map(move |pos| Interval {
                chrom: chrom.clone(),
                start: pos,
                end: pos + 1,
                value: v.value,
            })
        }))
    }

    /// Returns the values between `start` and `end` as a `Vec<f32>`. Any
    /// positions with no data in the bigWig will be `std::f32::NAN`.
    pub fn values_array(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<f32>, BBIReadError> {
        let (chrom, start, end) = self.checked_range(chrom_name, start, end)?;
        let blocks = self.full_data_blocks(chrom, start, end)?;
        let mut values = vec![std::f32::NAN; (end - start) as usize];
        for block in blocks {
            let block_values = match get_block_values(self, block, chrom, start, end)? {
                Some(v) => v,
                None => continue,
            };
            for block_value in block_values {
                let block_value_start = (block_value.start - start) as usize;
                let block_value_end = (block_value.end - start) as usize;
                for i in &mut values[block_value_start..block_value_end] {
                    *i = block_value.value
                }
            }
        }
        Ok(values)
    }

    /// Computes `statistic` for each of `n_bins` equal bins of `start..end`
    /// (the last bin takes any remainder).
    ///
    /// Unless the options ask for exact results, a zoom level is used when
    /// one is at most half as coarse as a bin. Bins without data are
    /// `f64::NAN`, except for `Statistic::Coverage`, where they are `0.0`.
    pub fn stats(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        statistic: Statistic,
        n_bins: usize,
    ) -> Result<Vec<f64>, BBIReadError> {
        let (chrom, start, end) = self.checked_range(chrom_name, start, end)?;
        let bins = Bins::new(start, end, n_bins)?;
        let zoom = if self.options.exact {
            None
        } else {
            choose_zoom(&self.info.zoom_headers, end - start, n_bins)
        };

        let summaries = match zoom {
            Some(reduction_level) => {
                debug!(
                    "Using zoom level {} for {} bins over {}:{}-{}",
                    reduction_level, n_bins, chrom_name, start, end
                );
                let records = self.zoom_records(chrom, start, end, reduction_level)?;
                bins.aggregate_zoom(records.into_iter())
            }
            None => {
                let values = self.values(chrom_name, start, end, false)?;
                bins.aggregate_values(values)
            }
        };

        Ok(bins.finish(&summaries, statistic))
    }

    /// `stats` over a single bin
    pub fn summarize(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        statistic: Statistic,
    ) -> Result<f64, BBIReadError> {
        let stats = self.stats(chrom_name, start, end, statistic, 1)?;
        Ok(stats[0])
    }

    fn zoom_records(
        &mut self,
        chrom: u32,
        start: u32,
        end: u32,
        reduction_level: u32,
    ) -> Result<Vec<ZoomRecord>, BBIReadError> {
        let cir_tree = match self.zoom_cir_tree(reduction_level) {
            Ok(cir_tree) => cir_tree,
            Err(ZoomIntervalError::BBIReadError(e)) => return Err(e),
            Err(ZoomIntervalError::ReductionLevelNotFound) => {
                return Err(BBIReadError::InvalidFile(format!(
                    "Missing zoom level {}",
                    reduction_level
                )))
            }
        };
        let blocks = search_cir_tree_inner(
            self.info.header.endianness,
            &mut self.read,
            &cir_tree,
            chrom,
            start,
            end,
        )?;
        trace!(
            "{} zoom blocks at level {} overlap {}:{}-{}",
            blocks.len(),
            reduction_level,
            chrom,
            start,
            end
        );
        ZoomIntervalIter::new(self, blocks.into_iter(), chrom, start, end).collect()
    }
}

#[inline]
fn clip(value: Value, start: u32, end: u32) -> Option<Value> {
    if value.start < value.end && value.end > start && value.start < end {
        Some(Value {
            start: value.start.max(start),
            end: value.end.min(end),
            value: value.value,
        })
    } else {
        None
    }
}

/// Decodes a block, keeping only the values on `chrom` that overlap
/// `start..end`. Returns `None` if the block's section is on another
/// chromosome.
fn get_block_values<R: BBIFileRead>(
    bigwig: &mut BigWigRead<R>,
    block: Block,
    chrom: u32,
    start: u32,
    end: u32,
) -> Result<Option<std::vec::IntoIter<Value>>, BBIReadError> {
    let data = bigwig.read.get_block_data(&bigwig.info, &block)?;
    let decoder = BlockDecoder::new(&data, bigwig.info.header.endianness)?;

    if decoder.header().chrom_id != chrom {
        return Ok(None);
    }

    let values: Vec<Value> = decoder
        .values()
        .filter_map(|v| clip(v, start, end))
        .collect();
    Ok(Some(values.into_iter()))
}
