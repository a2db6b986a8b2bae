//! Near-duplicate path detection
//!
//! Paths that differ only by a loop iteration or one minor branch produce
//! almost identical node strings. Two paths count as near-duplicates when
//! the similarity ratio of their node strings reaches the threshold
//! (95 by default, on a 0-100 scale).

use crate::paths::PathRecord;

/// Default similarity threshold
pub const DEFAULT_SIMILARITY_THRESHOLD: u8 = 95;

/// Normalized edit similarity on a 0-100 scale
///
/// Uses insertion/deletion edit distance, so the ratio equals
/// `2 * LCS / (len(a) + len(b))`, rounded to the nearest integer with
/// ties to even.
/// Two empty strings are identical (100).
pub fn similarity_ratio(a: &str, b: &str) -> u8 {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }

    let lcs = lcs_length(a, b);
    let ratio = (2 * lcs) as f64 / total as f64;
    (ratio * 100.0).round_ties_even() as u8
}

/// Longest common subsequence length (two-row dynamic programming)
fn lcs_length(a: &[u8], b: &[u8]) -> usize {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];

    for &x in long {
        for (j, &y) in short.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Whether two node strings are near-duplicates under `threshold`
pub fn is_near_duplicate(a: &str, b: &str, threshold: u8) -> bool {
    similarity_ratio(a, b) >= threshold
}

/// What the inline filter did with an offered record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not similar to the previous record; it becomes the new previous
    Kept,
    /// Similar with a strictly longer node string; it replaced the previous record
    Replaced,
    /// Similar and not longer; dropped
    Suppressed,
}

/// Inline near-duplicate suppression against the previous emitted path
///
/// The most recent accepted record is held back until the next one
/// arrives, because a longer near-duplicate may still replace it. The
/// caller writes whatever `offer` hands back and drains the held record
/// with `take_pending` when the search ends.
#[derive(Debug, Clone)]
pub struct InlineDedup {
    threshold: u8,
    pending: Option<(String, PathRecord)>,
}

impl InlineDedup {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            pending: None,
        }
    }

    /// Offer a newly emitted record
    ///
    /// Returns the verdict and, when a previous record became final, that
    /// record so the caller can persist it.
    pub fn offer(&mut self, record: PathRecord) -> (Verdict, Option<PathRecord>) {
        let key = record.node_key();

        let (verdict, finalized) = match self.pending.take() {
            None => (Verdict::Kept, None),
            Some((prev_key, prev)) => {
                if is_near_duplicate(&prev_key, &key, self.threshold) {
                    if key.len() > prev_key.len() {
                        (Verdict::Replaced, None)
                    } else {
                        self.pending = Some((prev_key, prev));
                        return (Verdict::Suppressed, None);
                    }
                } else {
                    (Verdict::Kept, Some(prev))
                }
            }
        };

        self.pending = Some((key, record));
        (verdict, finalized)
    }

    /// Drain the held-back record
    pub fn take_pending(&mut self) -> Option<PathRecord> {
        self.pending.take().map(|(_, record)| record)
    }
}
