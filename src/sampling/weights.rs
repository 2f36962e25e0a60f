//! Interval weights for negative samples.
//!
//! Tuples over constants `1..=n` are ordered lexicographically. The positive
//! rows of a relation cut that order into gaps; every tuple inside a gap is a
//! closed-world negative. A sample stands for its whole gap, shared evenly
//! with the other samples that fall into the same gap, so the weights of all
//! samples sum to the number of negatives in the gaps they hit.
//!
//! The same gaps give the negative-interval samples: the first and the last
//! tuple of every non-empty gap.

use crate::kb::Relation;

#[allow(clippy::cast_precision_loss)]
fn rank(tuple: &[u32], constants: u32) -> f64 {
    let n = f64::from(constants);
    tuple
        .iter()
        .fold(0.0, |acc, &v| acc * n + f64::from(v.saturating_sub(1)))
}

/// Index of the first positive row strictly greater than `tuple`.
fn gap_of(positives: &Relation, tuple: &[u32]) -> usize {
    let (mut lo, mut hi) = (0usize, positives.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if positives.row(mid) <= tuple {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Weights of `samples` (row-major, arity of `positives`) against the
/// positive rows of `positives`, with `constants` symbols in the domain.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub fn interval_weights(positives: &Relation, samples: &[u32], constants: u32) -> Vec<f64> {
    let arity = positives.arity();
    if arity == 0 {
        return Vec::new();
    }
    let domain = f64::from(constants).powi(arity as i32);
    let gaps: Vec<usize> = samples.chunks_exact(arity).map(|s| gap_of(positives, s)).collect();

    let mut per_gap = vec![0usize; positives.len() + 1];
    for &g in &gaps {
        per_gap[g] += 1;
    }

    gaps.iter()
        .map(|&g| {
            let lower = if g == 0 {
                -1.0
            } else {
                rank(positives.row(g - 1), constants)
            };
            let upper = if g == positives.len() {
                domain
            } else {
                rank(positives.row(g), constants)
            };
            let size = (upper - lower - 1.0).max(0.0);
            size / per_gap[g] as f64
        })
        .collect()
}

/// Lexicographic successor over constants `1..=constants`.
fn successor(tuple: &[u32], constants: u32) -> Option<Vec<u32>> {
    let mut next = tuple.to_vec();
    for v in next.iter_mut().rev() {
        if *v < constants {
            *v += 1;
            return Some(next);
        }
        *v = 1;
    }
    None
}

/// Lexicographic predecessor over constants `1..=constants`.
fn predecessor(tuple: &[u32], constants: u32) -> Option<Vec<u32>> {
    let mut prev = tuple.to_vec();
    for v in prev.iter_mut().rev() {
        if *v > 1 {
            *v -= 1;
            return Some(prev);
        }
        *v = constants;
    }
    None
}

/// Both ends of every gap between the positive rows of `positives`, row-major
/// and possibly repeated. At most `2 * (rows + 1)` tuples.
#[must_use]
pub fn interval_bounds(positives: &Relation, constants: u32) -> Vec<u32> {
    let arity = positives.arity();
    if arity == 0 || constants == 0 {
        return Vec::new();
    }
    let mut ends = vec![vec![1; arity], vec![constants; arity]];
    for row in positives.rows() {
        ends.extend(successor(row, constants));
        ends.extend(predecessor(row, constants));
    }
    ends.into_iter().filter(|t| !positives.contains(t)).flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_is_lexicographic() {
        assert!((rank(&[1, 1], 3) - 0.0).abs() < 1e-12);
        assert!((rank(&[1, 3], 3) - 2.0).abs() < 1e-12);
        assert!((rank(&[3, 3], 3) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_weights_cover_gaps() {
        // Domain of 3x3 = 9 tuples, positives (1,2) and (3,1) at ranks 1 and 6.
        let positives = Relation::new(0, "r", 2, vec![vec![1, 2], vec![3, 1]]).unwrap();
        // Gaps: [0] size 1, [2..5] size 4, [7..8] size 2.
        let samples = [1, 1, 2, 1, 2, 2, 3, 3];
        let weights = interval_weights(&positives, &samples, 3);
        assert_eq!(weights.len(), 4);
        assert!((weights[0] - 1.0).abs() < 1e-12);
        assert!((weights[1] - 2.0).abs() < 1e-12);
        assert!((weights[2] - 2.0).abs() < 1e-12);
        assert!((weights[3] - 2.0).abs() < 1e-12);
        let total: f64 = weights.iter().sum();
        assert!((total - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_interval_bounds() {
        // Same layout as above: gaps {(1,1)}, {(1,3)..(2,3)}, {(3,2),(3,3)}.
        let positives = Relation::new(0, "r", 2, vec![vec![1, 2], vec![3, 1]]).unwrap();
        let mut bounds: Vec<&[u32]> = Vec::new();
        let flat = interval_bounds(&positives, 3);
        bounds.extend(flat.chunks_exact(2));
        bounds.sort_unstable();
        bounds.dedup();
        assert_eq!(bounds, vec![&[1, 1][..], &[1, 3], &[2, 3], &[3, 2], &[3, 3]]);
        assert_eq!(successor(&[3, 3], 3), None);
        assert_eq!(predecessor(&[2, 1], 3), Some(vec![1, 3]));
    }
}
