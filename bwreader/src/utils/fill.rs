use crate::bbi::Value;

struct FillNaN<I>
where
    I: Iterator<Item = Value>,
{
    iter: I,
    next_val: Option<Value>,
    expected_end: u32,
    last_end: u32,
}

impl<I> FillNaN<I>
where
    I: Iterator<Item = Value>,
{
    fn nan_at(&mut self, pos: u32) -> Value {
        self.last_end = pos + 1;
        Value {
            start: pos,
            end: pos + 1,
            value: f32::NAN,
        }
    }
}

impl<I> Iterator for FillNaN<I>
where
    I: Iterator<Item = Value>,
{
    type Item = Value;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.next_val.take() {
            Some(next) => Some(next),
            None => self.iter.next(),
        };
        match next {
            Some(next) => {
                if next.start > self.last_end {
                    let pos = self.last_end;
                    self.next_val.replace(next);
                    Some(self.nan_at(pos))
                } else {
                    self.last_end = self.last_end.max(next.end);
                    Some(next)
                }
            }
            None => {
                if self.last_end < self.expected_end {
                    let pos = self.last_end;
                    Some(self.nan_at(pos))
                } else {
                    None
                }
            }
        }
    }
}

/// Fills every base in `[start, end)` not covered by a `Value` with its own
/// single-base `NaN` value, so the output tiles the region.
///
/// The input must be sorted by start and lie within `[start, end)`.
pub fn fill_nan<I>(iter: I, start: u32, end: u32) -> impl Iterator<Item = Value> + Send
where
    I: Iterator<Item = Value> + Send,
{
    FillNaN {
        iter,
        next_val: None,
        expected_end: end,
        last_end: start,
    }
}
