use itertools::Itertools;

use crate::bbi::Value;

/// Merges several start-sorted `Value` streams into one start-sorted stream.
/// Values with equal starts come out in the order of the streams they came
/// from.
pub fn merge_values<I>(sources: Vec<I>) -> impl Iterator<Item = Value> + Send
where
    I: Iterator<Item = Value> + Send,
{
    sources
        .into_iter()
        .enumerate()
        .map(|(idx, source)| source.map(move |v| (idx, v)))
        .kmerge_by(|a: &(usize, Value), b: &(usize, Value)| {
            (a.1.start, a.0) < (b.1.start, b.0)
        })
        .map(|(_, v)| v)
}
