//! Cross-sample partition merging.
//!
//! Takes one partition's per-sample sorted count files (produced by
//! [`crate::counter`]) and merges them into a single partition row file:
//! a raw count matrix, a presence/absence matrix, or one of the
//! Bloom-oriented bit matrices built from vector-mode output.
//!
//! The merge itself is a classic N-way sorted merge driven by a small
//! per-sample cursor state machine (`Ready(key, count)` / `Done`) rather
//! than loading every sample into memory at once.

use crate::count::CountSlot;
use crate::counter::BitVector;

/// Per-sample filtering applied while merging: a soft abundance floor
/// (indexed by sample id, resolved once before the merge loop rather than
/// looked up per key), a minimum recurrence across samples, and a
/// minimum share of samples.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    pub soft_min: Vec<u32>,
    pub recurrence_min: u32,
    pub share_min: f64,
}

impl MergePolicy {
    #[must_use]
    pub fn new(soft_min: Vec<u32>, recurrence_min: u32, share_min: f64) -> Self {
        Self {
            soft_min,
            recurrence_min,
            share_min,
        }
    }

    fn floor_for(&self, sample: usize) -> u32 {
        self.soft_min.get(sample).copied().unwrap_or(0)
    }
}

/// Cursor over one sample's sorted `(key, count)` entries.
struct Cursor<'a, K> {
    entries: &'a [(K, CountSlot)],
    pos: usize,
}

impl<'a, K: Ord + Clone> Cursor<'a, K> {
    fn new(entries: &'a [(K, CountSlot)]) -> Self {
        Self { entries, pos: 0 }
    }

    fn peek(&self) -> Option<(K, CountSlot)> {
        self.entries.get(self.pos).map(|(k, c)| (k.clone(), *c))
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

/// Applies the per-sample soft threshold to one merged row, zeroing
/// entries below each sample's floor (including samples with no entry at
/// this key, which start at zero already).
fn apply_soft_threshold(raw: &[CountSlot], policy: &MergePolicy) -> Vec<CountSlot> {
    raw.iter()
        .enumerate()
        .map(|(sample, &slot)| {
            if slot.get() < policy.floor_for(sample) {
                CountSlot::zero()
            } else {
                slot
            }
        })
        .collect()
}

/// Whether a thresholded row meets the recurrence and share floors,
/// computed strictly after soft thresholding.
fn passes_recurrence(thresholded: &[CountSlot], policy: &MergePolicy) -> bool {
    let present = thresholded.iter().filter(|slot| !slot.is_zero()).count() as u32;
    if present < policy.recurrence_min {
        return false;
    }
    if thresholded.is_empty() {
        return true;
    }
    let share = f64::from(present) / thresholded.len() as f64;
    share >= policy.share_min
}

/// One surviving merged row: the shared key and one [`CountSlot`] per
/// sample (zero where a sample had no entry or was thresholded away).
pub type MergedRow<K> = (K, Vec<CountSlot>);

/// N-way merges sorted per-sample `(key, count)` slices into partition
/// rows, applying the soft threshold and then the recurrence/share filter
/// in that order, dropping rows that don't survive.
#[must_use]
pub fn merge_partition<K: Ord + Clone>(per_sample: &[Vec<(K, CountSlot)>], policy: &MergePolicy) -> Vec<MergedRow<K>> {
    let mut cursors: Vec<Cursor<K>> = per_sample.iter().map(|v| Cursor::new(v)).collect();
    let mut out = Vec::new();

    loop {
        let min_key = cursors.iter().filter_map(Cursor::peek).map(|(k, _)| k).min();
        let Some(min_key) = min_key else { break };

        let raw: Vec<CountSlot> = cursors
            .iter_mut()
            .map(|cursor| match cursor.peek() {
                Some((k, count)) if k == min_key => {
                    cursor.advance();
                    count
                }
                _ => CountSlot::zero(),
            })
            .collect();

        let thresholded = apply_soft_threshold(&raw, policy);
        if passes_recurrence(&thresholded, policy) {
            out.push((min_key, thresholded));
        }
    }
    out
}

/// Renders a merged row as a raw count record: one count per sample, in
/// sample order, at the configured byte width.
#[must_use]
pub fn format_count_row(row: &[CountSlot], width: crate::count::CountWidth) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() * width.byte_len());
    for &slot in row {
        // width is fixed for the whole matrix, so overflow here would
        // mean an earlier saturation step used a mismatched max_c.
        slot.write_to(width, &mut out).expect("count width consistent with max_c");
    }
    out
}

/// Renders a merged row as a presence/absence bitset, one bit per sample.
#[must_use]
pub fn format_pa_row(row: &[CountSlot]) -> Vec<u8> {
    let mut bytes = vec![0u8; row.len().div_ceil(8)];
    for (i, slot) in row.iter().enumerate() {
        if !slot.is_zero() {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Simple presence Bloom bit matrix (`bf`): a bit set iff any sample's
/// vector has it set.
#[must_use]
pub fn merge_vectors_bf(vectors: &[BitVector]) -> BitVector {
    let window = vectors.first().map_or(0, BitVector::len);
    let mut out = BitVector::zeros(window);
    for bv in vectors {
        for i in 0..window {
            if bv.get(i) {
                out.set(i);
            }
        }
    }
    out
}

/// Counting Bloom bit matrix (`bfc`): the number of samples with each bit
/// set, one saturating byte per position.
#[must_use]
pub fn merge_vectors_bfc(vectors: &[BitVector]) -> Vec<u8> {
    let window = vectors.first().map_or(0, BitVector::len);
    let mut counts = vec![0u8; window as usize];
    for bv in vectors {
        for (i, count) in counts.iter_mut().enumerate() {
            if bv.get(i as u64) {
                *count = count.saturating_add(1);
            }
        }
    }
    counts
}

/// Thresholded Bloom bit matrix (`bft`): [`merge_vectors_bfc`] reduced
/// back to a bitset, keeping only positions reaching `recurrence_min`
/// samples.
#[must_use]
pub fn merge_vectors_bft(vectors: &[BitVector], recurrence_min: u32) -> BitVector {
    let counts = merge_vectors_bfc(vectors);
    let mut out = BitVector::zeros(counts.len() as u64);
    for (i, &count) in counts.iter().enumerate() {
        if u32::from(count) >= recurrence_min {
            out.set(i as u64);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count::CountWidth;

    fn slot(v: u64) -> CountSlot {
        CountSlot::saturating(v, 255)
    }

    #[test]
    fn merge_unions_keys_across_samples() {
        let a = vec![(1u32, slot(5)), (3, slot(2))];
        let b = vec![(2u32, slot(7))];
        let policy = MergePolicy::new(vec![0, 0], 0, 0.0);
        let rows = merge_partition(&[a, b], &policy);
        let keys: Vec<u32> = rows.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn soft_threshold_zeroes_below_floor() {
        let a = vec![(1u32, slot(1))];
        let b = vec![(1u32, slot(10))];
        let policy = MergePolicy::new(vec![5, 5], 0, 0.0);
        let rows = merge_partition(&[a, b], &policy);
        assert_eq!(rows[0].1[0].get(), 0);
        assert_eq!(rows[0].1[1].get(), 10);
    }

    #[test]
    fn recurrence_min_drops_sparse_rows() {
        let a = vec![(1u32, slot(5))];
        let b: Vec<(u32, CountSlot)> = vec![];
        let policy = MergePolicy::new(vec![0, 0], 2, 0.0);
        let rows = merge_partition(&[a, b], &policy);
        assert!(rows.is_empty());
    }

    #[test]
    fn share_min_requires_fraction_of_samples() {
        let a = vec![(1u32, slot(5))];
        let b: Vec<(u32, CountSlot)> = vec![(1u32, slot(0))];
        let c: Vec<(u32, CountSlot)> = vec![];
        let policy = MergePolicy::new(vec![0, 0, 0], 1, 0.5);
        let rows = merge_partition(&[a, b, c], &policy);
        // present = 1/3 samples < share_min 0.5
        assert!(rows.is_empty());
    }

    #[test]
    fn count_row_round_trips_width() {
        let row = vec![slot(10), slot(250)];
        let bytes = format_count_row(&row, CountWidth::U8);
        assert_eq!(bytes, vec![10, 250]);
    }

    #[test]
    fn pa_row_sets_bit_per_present_sample() {
        let row = vec![slot(0), slot(5), slot(0)];
        let bytes = format_pa_row(&row);
        assert_eq!(bytes[0], 0b0000_0010);
    }

    #[test]
    fn bf_union_and_bfc_counts_agree() {
        let mut a = BitVector::zeros(8);
        a.set(2);
        let mut b = BitVector::zeros(8);
        b.set(2);
        b.set(5);
        let union = merge_vectors_bf(&[a.clone(), b.clone()]);
        assert!(union.get(2));
        assert!(union.get(5));
        assert!(!union.get(0));

        let counts = merge_vectors_bfc(&[a, b]);
        assert_eq!(counts[2], 2);
        assert_eq!(counts[5], 1);
    }

    #[test]
    fn bft_thresholds_counting_matrix() {
        let mut a = BitVector::zeros(8);
        a.set(2);
        let mut b = BitVector::zeros(8);
        b.set(2);
        b.set(5);
        let thresholded = merge_vectors_bft(&[a, b], 2);
        assert!(thresholded.get(2));
        assert!(!thresholded.get(5));
    }
}
