/*!
bwreader provides a read-only, random-access API for bigWig files.

The original file format specification for bigWig files is defined in this paper: <https://doi.org/10.1093/bioinformatics/btq351>

## Reading

The entrypoint to reading bigWigs is [`BigWigRead::open`]. This takes any
type that implements both [`Read`][std::io::Read] and [`Seek`][std::io::Seek].
There is also [`BigWigRead::open_file`], which takes a `&str` and will open a
[`ReopenableFile`][crate::utils::reopen::ReopenableFile].

Once a [`BigWigRead`] has been constructed, the header, zoom levels and
chromosomes are available through [`BigWigRead::info`] and
[`BigWigRead::chroms`]. Range queries come in a few flavors:

- [`BigWigRead::values`] returns the [`Value`] runs overlapping a region,
  sorted by start, optionally with NaN placeholders for uncovered bases.
- [`BigWigRead::intervals`] expands those runs into per-base [`Interval`]s.
- [`BigWigRead::stats`] aggregates a region into bins for a [`Statistic`],
  using a zoom level when one is coarse enough.
- [`BigWigRead::get_interval`] and [`BigWigRead::get_zoom_interval`] are the
  lower-level, block-by-block iterators.

Only the header, the chromosome tree and the index nodes and data blocks that a
query touches are read from the source. Reading is synchronous: queries take
`&mut self`. Independent handles for concurrent use can be made with
[`Reopen`][crate::utils::reopen::Reopen].
*/

mod bbi;
pub mod utils;

pub use bbi::*;
