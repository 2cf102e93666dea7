//! Novelty coefficient: how much of a signal's peak territory is new.
//!
//! Point sets are the expanded region points of each signal (x values
//! rounded to 3 decimals, see [`crate::signal::peaks::milli_key`]). For the
//! current signal with point list `F` against the corpus:
//!
//! ```text
//! P  = concatenation of every corpus list not equal to F
//! Nc = |unique(F) \ P| / len(F) + 1 / len(P)
//! ```
//!
//! `len(P)` counts points with multiplicity, so a crowded corpus shrinks the
//! second term even when its unique coverage is small. The equal-list skip
//! means the current signal's own corpus entry never dilutes its score; a
//! signal identical to an earlier one is likewise skipped and scores the
//! maximal coefficient.
//!
//! With an empty corpus the second term vanishes and the first is 1 by
//! definition (every point is new): the first signal measured is maximally
//! novel.

use std::collections::{BTreeSet, HashSet};

use crate::error::{OptimizerError, Result};

/// Coefficient of the signal whose point list is `current`, against
/// `corpus` (which may include `current` itself; equal lists are skipped).
pub fn novelty_coefficient(current: &[i64], corpus: &[Vec<i64>]) -> Result<f64> {
    if current.is_empty() {
        return Err(OptimizerError::degenerate(
            "novelty needs at least one region point in the current signal",
        ));
    }

    let mut prior_len = 0usize;
    let mut prior: HashSet<i64> = HashSet::new();
    for list in corpus {
        if list.as_slice() == current {
            continue;
        }
        prior_len += list.len();
        prior.extend(list.iter().copied());
    }

    let unique: BTreeSet<i64> = current.iter().copied().collect();
    let new_points = unique.iter().filter(|p| !prior.contains(p)).count();
    let fraction = new_points as f64 / current.len() as f64;

    if prior_len == 0 {
        return Ok(fraction);
    }
    Ok(fraction + 1.0 / prior_len as f64)
}

/// Final novelty score: information content scaled by the coefficient.
pub fn novelty_score(information: f64, coefficient: f64) -> f64 {
    information * coefficient
}
