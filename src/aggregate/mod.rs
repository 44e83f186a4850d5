//! Broadcast reply aggregation.
//!
//! A broadcast command cannot know how many nodes will answer, so there is
//! no reply count to wait for. Instead the collector keeps accepting
//! replies for as long as they keep coming, and closes once the stream has
//! been silent for a configured span: the silence window. The window's
//! clock is reset only by replies the caller's predicate accepts — noise on
//! the queue neither extends nor shortens collection.
//!
//! The loop is a `select!` between the inbound data channel and a timer at
//! `last_match + silence`; it never busy-polls and shuts down cleanly when
//! the channel closes.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use crate::link::DataMessage;

/// What happened over one collection window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    /// Replies the predicate accepted and tallied.
    pub accepted: u32,
    /// Messages drained but not matched; dropped silently.
    pub discarded: u32,
    /// Total time the window stayed open.
    pub elapsed: Duration,
}

/// Silence-terminated collection loop.
///
/// Created armed: the caller runs it only after the initial publish
/// acknowledgement reported success. `on_message` inspects one inbound
/// message, tallies it if it matches, and reports whether it matched.
#[derive(Debug, Clone, Copy)]
pub struct SilenceWindow {
    silence: Duration,
}

impl SilenceWindow {
    pub fn new(silence: Duration) -> Self {
        Self { silence }
    }

    pub fn silence(&self) -> Duration {
        self.silence
    }

    /// Collect until no accepted reply has arrived for the silence span, or
    /// the channel closes. Returns the window statistics.
    pub async fn collect<F>(
        &self,
        data_rx: &mut mpsc::UnboundedReceiver<DataMessage>,
        mut on_message: F,
    ) -> WindowStats
    where
        F: FnMut(&DataMessage) -> bool,
    {
        let started_at = Instant::now();
        let mut last_match_at = started_at;
        let mut stats = WindowStats::default();

        loop {
            let deadline = last_match_at + self.silence;
            tokio::select! {
                maybe = data_rx.recv() => match maybe {
                    Some(message) => {
                        if on_message(&message) {
                            last_match_at = Instant::now();
                            stats.accepted += 1;
                        } else {
                            stats.discarded += 1;
                        }
                    }
                    // Backend is gone; nothing more can arrive.
                    None => break,
                },
                _ = sleep_until(deadline) => break,
            }
        }

        stats.elapsed = started_at.elapsed();
        log::debug!(
            "window closed after {:?}: {} accepted, {} discarded",
            stats.elapsed,
            stats.accepted,
            stats.discarded
        );
        stats
    }
}

/// Per-node reply counter, keyed and iterated by mesh address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTally {
    counts: BTreeMap<u32, u32>,
}

impl NodeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, address: u32) {
        *self.counts.entry(address).or_insert(0) += 1;
    }

    /// Number of distinct nodes that replied.
    pub fn nodes(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.counts.iter().map(|(a, c)| (*a, *c))
    }
}

/// Hop-count histogram for ping sweeps.
///
/// Buckets `0..base_size` are pre-seeded at zero so the printed histogram
/// keeps a stable width whatever hop counts actually occur; higher buckets
/// appear on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopHistogram {
    buckets: BTreeMap<u32, u32>,
}

impl HopHistogram {
    pub fn with_base_size(base_size: u32) -> Self {
        let buckets = (0..base_size).map(|h| (h, 0)).collect();
        Self { buckets }
    }

    pub fn record(&mut self, hop_count: u32) {
        *self.buckets.entry(hop_count).or_insert(0) += 1;
    }

    pub fn count(&self, hop_count: u32) -> u32 {
        self.buckets.get(&hop_count).copied().unwrap_or(0)
    }

    /// `Σ(hop_count × replies)` over all buckets. A reporting value only; a
    /// smaller sum suggests a shallower, easier network.
    pub fn difficulty(&self) -> u64 {
        self.buckets
            .iter()
            .map(|(hop, count)| u64::from(*hop) * u64::from(*count))
            .sum()
    }

    /// Buckets in ascending hop order, zeros included.
    pub fn buckets(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.buckets.iter().map(|(h, c)| (*h, *c))
    }
}

/// Distribution of scratchpad fingerprints across responding nodes.
#[derive(Debug, Clone, Default)]
pub struct RatioTally {
    counts: BTreeMap<String, u32>,
}

impl RatioTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: String) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// The single fingerprint every node shares, if the network is uniform.
    pub fn sole_key(&self) -> Option<&str> {
        if self.counts.len() == 1 {
            self.counts.keys().next().map(String::as_str)
        } else {
            None
        }
    }

    /// `(fingerprint, count, percent of total)` per entry.
    pub fn ratios(&self) -> impl Iterator<Item = (&str, u32, u32)> + '_ {
        let total = self.total().max(1);
        self.counts
            .iter()
            .map(move |(key, count)| (key.as_str(), *count, count * 100 / total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_preseeds_and_grows() {
        let mut histo = HopHistogram::with_base_size(20);
        for hop in [1, 1, 2, 5] {
            histo.record(hop);
        }
        assert_eq!(histo.count(1), 2);
        assert_eq!(histo.count(2), 1);
        assert_eq!(histo.count(5), 1);
        // pre-seeded zero buckets stay visible
        assert_eq!(histo.buckets().count(), 20);
        assert_eq!(histo.count(0), 0);
        assert_eq!(histo.count(19), 0);
        assert_eq!(histo.difficulty(), 9);

        // beyond the pre-seeded range, buckets appear on demand
        histo.record(25);
        assert_eq!(histo.buckets().count(), 21);
        assert_eq!(histo.difficulty(), 34);
    }

    #[test]
    fn node_tally_counts_distinct_nodes() {
        let mut tally = NodeTally::new();
        tally.record(0x6001);
        tally.record(0x6001);
        tally.record(0x6002);
        assert_eq!(tally.nodes(), 2);
        let pairs: Vec<_> = tally.iter().collect();
        assert_eq!(pairs, [(0x6001, 2), (0x6002, 1)]);
    }

    #[test]
    fn ratio_tally_percentages() {
        let mut tally = RatioTally::new();
        tally.record("fw-a".into());
        tally.record("fw-a".into());
        tally.record("fw-b".into());
        tally.record("fw-b".into());
        assert_eq!(tally.total(), 4);
        assert_eq!(tally.sole_key(), None);
        let rows: Vec<_> = tally.ratios().collect();
        assert_eq!(rows, [("fw-a", 2, 50), ("fw-b", 2, 50)]);

        let mut uniform = RatioTally::new();
        uniform.record("fw-a".into());
        assert_eq!(uniform.sole_key(), Some("fw-a"));
    }
}
