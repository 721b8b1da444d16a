//! Per-sample k-mer abundance histograms.
//!
//! `Histogram` tallies, for one sample, how many distinct (unique) k-mers
//! and how many total occurrences fall at each abundance value in a
//! tracked range `[lower, upper]`, plus four out-of-bounds counters for
//! abundances that fall outside that range. Downstream analysis derives a
//! solidity cutoff and coverage peak from the tallies, used to pick a
//! default `abundance_min` when the user hasn't set one explicitly.

use serde::{Deserialize, Serialize};

/// Default tracked abundance range, matching the common case where most
/// signal lives in the first few hundred counts.
pub const DEFAULT_LOWER: u32 = 1;
pub const DEFAULT_UPPER: u32 = 10_000;

/// Per-sample abundance histogram `H(s)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    lower: u32,
    upper: u32,
    /// `unique[c - lower]` = number of distinct k-mers with abundance `c`.
    unique: Vec<u64>,
    /// `total[c - lower]` = `c * unique[c - lower]`, kept as a separate
    /// array (rather than derived) so serialized histograms are
    /// self-contained and cheap to aggregate.
    total: Vec<u64>,
    unique_below: u64,
    unique_above: u64,
    total_below: u64,
    total_above: u64,
}

impl Histogram {
    #[must_use]
    pub fn new(lower: u32, upper: u32) -> Self {
        let len = (upper - lower + 1) as usize;
        Self {
            lower,
            upper,
            unique: vec![0; len],
            total: vec![0; len],
            unique_below: 0,
            unique_above: 0,
            total_below: 0,
            total_above: 0,
        }
    }

    #[must_use]
    pub const fn lower(&self) -> u32 {
        self.lower
    }

    #[must_use]
    pub const fn upper(&self) -> u32 {
        self.upper
    }

    /// Records one distinct k-mer's final abundance, before any threshold
    /// filtering is applied.
    pub fn record(&mut self, abundance: u32) {
        if abundance < self.lower {
            self.unique_below += 1;
            self.total_below += u64::from(abundance);
        } else if abundance > self.upper {
            self.unique_above += 1;
            self.total_above += u64::from(abundance);
        } else {
            let idx = (abundance - self.lower) as usize;
            self.unique[idx] += 1;
            self.total[idx] += u64::from(abundance);
        }
    }

    #[must_use]
    pub fn unique_at(&self, c: u32) -> u64 {
        if c < self.lower || c > self.upper {
            0
        } else {
            self.unique[(c - self.lower) as usize]
        }
    }

    #[must_use]
    pub fn total_at(&self, c: u32) -> u64 {
        if c < self.lower || c > self.upper {
            0
        } else {
            self.total[(c - self.lower) as usize]
        }
    }

    #[must_use]
    pub const fn unique_below(&self) -> u64 {
        self.unique_below
    }

    #[must_use]
    pub const fn unique_above(&self) -> u64 {
        self.unique_above
    }

    /// Total distinct k-mer count across the whole histogram, in-range and
    /// out-of-bounds.
    #[must_use]
    pub fn total_unique_count(&self) -> u64 {
        self.unique.iter().sum::<u64>() + self.unique_below + self.unique_above
    }

    /// Total occurrence count across the whole histogram: satisfies the
    /// conservation property `sum(c * unique[c]) + oob == total occurrences`.
    #[must_use]
    pub fn total_occurrence_count(&self) -> u64 {
        self.total.iter().sum::<u64>() + self.total_below + self.total_above
    }

    fn merge_from(&mut self, other: &Self) {
        debug_assert_eq!(self.lower, other.lower);
        debug_assert_eq!(self.upper, other.upper);
        for i in 0..self.unique.len() {
            self.unique[i] += other.unique[i];
            self.total[i] += other.total[i];
        }
        self.unique_below += other.unique_below;
        self.unique_above += other.unique_above;
        self.total_below += other.total_below;
        self.total_above += other.total_above;
    }
}

/// Builds a histogram from an iterator of per-k-mer final abundances.
pub fn compute_histogram(abundances: impl IntoIterator<Item = u32>, lower: u32, upper: u32) -> Histogram {
    let mut hist = Histogram::new(lower, upper);
    for a in abundances {
        hist.record(a);
    }
    hist
}

/// Merges a batch of per-task histograms into one per-sample aggregate.
/// Accumulating under one lock at task completion (rather than cloning and
/// back-merging mid-task) keeps each task's histogram uniquely owned while
/// it runs.
#[must_use]
pub fn merge_histograms(lower: u32, upper: u32, parts: &[Histogram]) -> Histogram {
    let mut out = Histogram::new(lower, upper);
    for part in parts {
        out.merge_from(part);
    }
    out
}

/// Derived solidity cutoff and coverage-peak estimate for a histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramStats {
    /// Abundance of the first local minimum in the unique-k-mer curve,
    /// separating sequencing-error k-mers from solid (genuine) ones.
    pub solid_cutoff: u32,
    /// Abundance at or above `solid_cutoff` with the greatest total
    /// occurrence count — the estimated coverage peak. Scored on total
    /// occurrences rather than unique count so a spiky, short-lived burst
    /// of low-abundance unique k-mers can't outrank the true, broad
    /// coverage peak.
    pub first_peak: u32,
    /// Number of distinct k-mers at or above `solid_cutoff`.
    pub nb_solid: u64,
}

/// Analyzes a histogram for its solidity cutoff and coverage peak.
///
/// Heuristic: find the first local minimum in `unique[]` scanning upward
/// from `lower`; that abundance is `solid_cutoff`. Then `first_peak` is the
/// abundance in `[solid_cutoff, upper]` with the largest `total_at`,
/// ties broken toward the smaller abundance. If no local minimum exists,
/// `solid_cutoff` falls back to `lower`.
#[must_use]
pub fn histogram_stats(hist: &Histogram) -> HistogramStats {
    let lower = hist.lower();
    let upper = hist.upper();

    let mut solid_cutoff = lower;
    let mut c = lower + 1;
    while c < upper {
        let prev = hist.unique_at(c - 1);
        let cur = hist.unique_at(c);
        let next = hist.unique_at(c + 1);
        if prev > cur && cur < next {
            solid_cutoff = c;
            break;
        }
        c += 1;
    }

    let mut first_peak = solid_cutoff;
    let mut best_total = hist.total_at(solid_cutoff);
    for candidate in (solid_cutoff + 1)..=upper {
        let t = hist.total_at(candidate);
        if t > best_total {
            best_total = t;
            first_peak = candidate;
        }
    }

    let mut nb_solid = hist.unique_above();
    for candidate in solid_cutoff..=upper {
        nb_solid += hist.unique_at(candidate);
    }

    HistogramStats {
        solid_cutoff,
        first_peak,
        nb_solid,
    }
}
