use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::bbi::{Value, ZoomHeader, ZoomRecord};
use crate::bbiread::BBIReadError;

/// A summary statistic that can be computed over bins of a region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Statistic {
    Mean,
    Stdev,
    Max,
    Min,
    Coverage,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported statistic ({}). Only `mean`, `stdev`, `max`, `min`, and `coverage` are allowed.", .0)]
pub struct UnsupportedStatisticError(pub String);

impl FromStr for Statistic {
    type Err = UnsupportedStatisticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mean" | "average" => Statistic::Mean,
            "stdev" | "std" | "dev" => Statistic::Stdev,
            "max" => Statistic::Max,
            "min" => Statistic::Min,
            "coverage" | "cov" => Statistic::Coverage,
            _ => return Err(UnsupportedStatisticError(s.to_owned())),
        })
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Statistic::Mean => "mean",
            Statistic::Stdev => "stdev",
            Statistic::Max => "max",
            Statistic::Min => "min",
            Statistic::Coverage => "coverage",
        };
        f.write_str(name)
    }
}

/// Picks the coarsest zoom level whose reduction level is at most half the
/// bases per bin. `None` means the full data should be used.
pub(crate) fn choose_zoom(zoom_headers: &[ZoomHeader], span: u32, n_bins: usize) -> Option<u32> {
    let max_zoom_size = (span as usize / n_bins) / 2;
    zoom_headers
        .iter()
        .map(|z| z.reduction_level)
        .filter(|&level| level > 0 && level as usize <= max_zoom_size)
        .max()
}

/// Running totals for a single bin. `bases` is fractional since zoom records
/// only partially overlapping a bin contribute proportionally.
#[derive(Copy, Clone, Debug)]
pub(crate) struct BinSummary {
    bases: f64,
    min: f64,
    max: f64,
    sum: f64,
    sum_squares: f64,
}

impl Default for BinSummary {
    fn default() -> Self {
        BinSummary {
            bases: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_squares: 0.0,
        }
    }
}

impl BinSummary {
    fn add_value(&mut self, value: f64, bases: f64) {
        self.bases += bases;
        self.sum += value * bases;
        self.sum_squares += value * value * bases;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn add_zoom(&mut self, record: &ZoomRecord, fraction: f64) {
        let summary = &record.summary;
        if summary.bases_covered == 0 {
            return;
        }
        self.bases += summary.bases_covered as f64 * fraction;
        self.sum += summary.sum * fraction;
        self.sum_squares += summary.sum_squares * fraction;
        self.min = self.min.min(summary.min_val);
        self.max = self.max.max(summary.max_val);
    }

    fn finish(&self, statistic: Statistic, width: u32) -> f64 {
        if self.bases <= 0.0 {
            return match statistic {
                Statistic::Coverage => 0.0,
                _ => f64::NAN,
            };
        }
        match statistic {
            Statistic::Mean => self.sum / self.bases,
            Statistic::Stdev => {
                let mean = self.sum / self.bases;
                let variance = self.sum_squares / self.bases - mean * mean;
                variance.max(0.0).sqrt()
            }
            Statistic::Max => self.max,
            Statistic::Min => self.min,
            Statistic::Coverage => self.bases / width as f64,
        }
    }
}

/// Splits `[start, end)` into `count` bins of equal width, with the last bin
/// absorbing the remainder.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Bins {
    start: u32,
    end: u32,
    width: u32,
    count: usize,
}

impl Bins {
    pub(crate) fn new(start: u32, end: u32, n_bins: usize) -> Result<Bins, BBIReadError> {
        let span = end - start;
        if n_bins == 0 || n_bins > span as usize {
            return Err(BBIReadError::InvalidRange(format!(
                "Cannot split {}-{} into {} bins",
                start, end, n_bins
            )));
        }
        Ok(Bins {
            start,
            end,
            width: span / n_bins as u32,
            count: n_bins,
        })
    }

    fn bounds(&self, i: usize) -> (u32, u32) {
        let bin_start = self.start + i as u32 * self.width;
        let bin_end = if i + 1 == self.count {
            self.end
        } else {
            bin_start + self.width
        };
        (bin_start, bin_end)
    }

    fn index_of(&self, pos: u32) -> usize {
        (((pos - self.start) / self.width) as usize).min(self.count - 1)
    }

    /// Bins and overlap lengths touched by `[start, end)`, which must lie
    /// within the binned region and be non-empty.
    fn overlapping(&self, start: u32, end: u32) -> impl Iterator<Item = (usize, u32)> + '_ {
        (self.index_of(start)..=self.index_of(end - 1)).map(move |i| {
            let (bin_start, bin_end) = self.bounds(i);
            (i, end.min(bin_end) - start.max(bin_start))
        })
    }

    /// Accumulates full resolution values. Values are clipped to the binned
    /// region.
    pub(crate) fn aggregate_values(&self, values: impl Iterator<Item = Value>) -> Vec<BinSummary> {
        let mut bins = vec![BinSummary::default(); self.count];
        for value in values {
            let start = value.start.max(self.start);
            let end = value.end.min(self.end);
            if start >= end {
                continue;
            }
            for (i, overlap) in self.overlapping(start, end) {
                if overlap > 0 {
                    bins[i].add_value(f64::from(value.value), f64::from(overlap));
                }
            }
        }
        bins
    }

    /// Accumulates zoom records, scaling each by the fraction of the record
    /// that overlaps a bin.
    pub(crate) fn aggregate_zoom(
        &self,
        records: impl Iterator<Item = ZoomRecord>,
    ) -> Vec<BinSummary> {
        let mut bins = vec![BinSummary::default(); self.count];
        for record in records {
            if record.end <= record.start {
                continue;
            }
            let start = record.start.max(self.start);
            let end = record.end.min(self.end);
            if start >= end {
                continue;
            }
            let record_width = f64::from(record.end - record.start);
            for (i, overlap) in self.overlapping(start, end) {
                if overlap > 0 {
                    bins[i].add_zoom(&record, f64::from(overlap) / record_width);
                }
            }
        }
        bins
    }

    pub(crate) fn finish(&self, bins: &[BinSummary], statistic: Statistic) -> Vec<f64> {
        bins.iter()
            .enumerate()
            .map(|(i, bin)| {
                let (bin_start, bin_end) = self.bounds(i);
                bin.finish(statistic, bin_end - bin_start)
            })
            .collect()
    }
}
