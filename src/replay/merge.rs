//! Time-Ordered Merge
//!
//! A k-way merge across tick-file iterators keyed by receive time, and the
//! optional pacer that reproduces original inter-arrival gaps against
//! wall-clock. The subsource count is tiny (at most four files per trading
//! day), so a linear scan over the pending slots beats a heap and makes
//! the index tie-break trivially stable.

use std::time::Duration;

use super::tick_file::{Tick, TickFileError};

/// Merges N tick iterators into one stream, non-decreasing in receive
/// time. Ties are broken by the lowest source index, so the merge is
/// stable with respect to file order.
#[derive(Debug)]
pub struct TickMerge<I> {
    sources: Vec<I>,
    pending: Vec<Option<Tick>>,
    primed: bool,
    deferred_error: Option<TickFileError>,
}

impl<I> TickMerge<I>
where
    I: Iterator<Item = Result<Tick, TickFileError>>,
{
    /// Build a merge over the given sources.
    #[must_use]
    pub fn new(sources: Vec<I>) -> Self {
        let pending = sources.iter().map(|_| None).collect();
        Self {
            sources,
            pending,
            primed: false,
            deferred_error: None,
        }
    }

    /// Pull the next item from source `k` into its pending slot.
    ///
    /// A source error empties the slot (the source is considered
    /// exhausted) and is handed back for the caller to yield.
    fn refill(&mut self, k: usize) -> Option<TickFileError> {
        match self.sources[k].next() {
            Some(Ok(tick)) => {
                self.pending[k] = Some(tick);
                None
            }
            Some(Err(error)) => {
                self.pending[k] = None;
                Some(error)
            }
            None => {
                self.pending[k] = None;
                None
            }
        }
    }

    /// Index of the pending tick with the smallest receive time; strict
    /// comparison keeps the lowest index on ties.
    fn earliest(&self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (k, slot) in self.pending.iter().enumerate() {
            if let Some(tick) = slot {
                let earlier = match best {
                    None => true,
                    Some((_, t)) => tick.receive_time < t,
                };
                if earlier {
                    best = Some((k, tick.receive_time));
                }
            }
        }
        best.map(|(k, _)| k)
    }
}

impl<I> Iterator for TickMerge<I>
where
    I: Iterator<Item = Result<Tick, TickFileError>>,
{
    type Item = Result<Tick, TickFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.deferred_error.take() {
            return Some(Err(error));
        }

        if !self.primed {
            self.primed = true;
            for k in 0..self.sources.len() {
                if let Some(error) = self.refill(k) {
                    self.deferred_error = Some(error);
                }
            }
            if let Some(error) = self.deferred_error.take() {
                return Some(Err(error));
            }
        }

        let k = self.earliest()?;
        let tick = self.pending[k].take()?;

        if let Some(error) = self.refill(k) {
            // Yield the good tick now; the error surfaces on the next pull.
            self.deferred_error = Some(error);
        }

        Some(Ok(tick))
    }
}

/// Reproduces original inter-arrival spacing against wall-clock.
///
/// The first tick anchors an offset between the replay clock and the
/// recorded receive times; every later tick sleeps until its recorded
/// time, shifted by that offset, has passed. Already-late ticks are
/// yielded immediately; no drift compensation is attempted.
#[derive(Debug, Default)]
pub struct AsIfLivePacer {
    anchor: Option<(tokio::time::Instant, u64)>,
}

impl AsIfLivePacer {
    /// Create an unanchored pacer.
    #[must_use]
    pub const fn new() -> Self {
        Self { anchor: None }
    }

    /// Wait until the tick with this receive time is due.
    pub async fn pace(&mut self, receive_time: u64) {
        match self.anchor {
            None => {
                self.anchor = Some((tokio::time::Instant::now(), receive_time));
            }
            Some((start, base)) => {
                let elapsed = Duration::from_nanos(receive_time.saturating_sub(base));
                tokio::time::sleep_until(start + elapsed).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(receive_time: u64, marker: u8) -> Tick {
        Tick {
            receive_time,
            payload: vec![marker],
        }
    }

    fn source(ticks: Vec<Tick>) -> std::vec::IntoIter<Result<Tick, TickFileError>> {
        ticks
            .into_iter()
            .map(Ok)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn merges_two_sources_by_receive_time() {
        // [(10,a),(30,c)] and [(20,b),(25,d)] interleave as a,b,d,c.
        let merge = TickMerge::new(vec![
            source(vec![tick(10, b'a'), tick(30, b'c')]),
            source(vec![tick(20, b'b'), tick(25, b'd')]),
        ]);

        let markers: Vec<u8> = merge.map(|t| t.unwrap().payload[0]).collect();
        assert_eq!(markers, vec![b'a', b'b', b'd', b'c']);
    }

    #[test]
    fn ties_break_by_lowest_source_index() {
        let merge = TickMerge::new(vec![
            source(vec![tick(10, 1)]),
            source(vec![tick(10, 2)]),
            source(vec![tick(10, 3)]),
        ]);

        let markers: Vec<u8> = merge.map(|t| t.unwrap().payload[0]).collect();
        assert_eq!(markers, vec![1, 2, 3]);
    }

    #[test]
    fn output_is_non_decreasing() {
        let merge = TickMerge::new(vec![
            source(vec![tick(1, 0), tick(5, 0), tick(9, 0)]),
            source(vec![tick(2, 0), tick(2, 0), tick(8, 0)]),
            source(vec![tick(3, 0), tick(4, 0), tick(100, 0)]),
        ]);

        let times: Vec<u64> = merge.map(|t| t.unwrap().receive_time).collect();
        assert_eq!(times.len(), 9);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empty_sources_yield_nothing() {
        let mut merge = TickMerge::new(vec![source(vec![]), source(vec![])]);
        assert!(merge.next().is_none());
    }

    #[test]
    fn source_error_surfaces_after_pending_ticks() {
        let failing: Vec<Result<Tick, TickFileError>> = vec![
            Ok(tick(10, 1)),
            Err(TickFileError::Truncated { offset: 12 }),
        ];
        let merge = TickMerge::new(vec![
            failing.into_iter(),
            source(vec![tick(20, 2)]),
        ]);

        let items: Vec<_> = merge.collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().receive_time, 10);
        assert!(items[1].is_err());
        assert_eq!(items[2].as_ref().unwrap().receive_time, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_reproduces_inter_arrival_gaps() {
        let mut pacer = AsIfLivePacer::new();
        let start = tokio::time::Instant::now();

        pacer.pace(1_000_000_000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // 500 ms after the first tick.
        pacer.pace(1_500_000_000).await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));

        // Already in the past: no extra sleep.
        pacer.pace(1_200_000_000).await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}
