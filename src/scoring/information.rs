//! Information score: how much structure a signal carries.
//!
//! A signal with many wide peak regions of evenly spread areas is "more
//! informative" than one dominated by a single spike. The score:
//!
//! ```text
//! size_r = right_r - left_r                  (index width of region r)
//! a      = harmonic_mean(areas)
//! d_r    = |area_r - a|,  with d_r == 0 replaced by 10
//! Rs_r   = size_r / log10(d_r)
//! Is     = | sum_r(Rs_r) * M |               (M = number of regions)
//! ```
//!
//! The zero-diff replacement pins `log10` at 1, so a region whose area sits
//! exactly on the harmonic mean contributes its full size. Note `d_r` in
//! (0, 1) gives a negative contribution and `d_r == 1` an infinite one; the
//! outer absolute value and the caller's NaN handling absorb both.

use crate::error::{OptimizerError, Result};
use crate::signal::peaks::PeakRegion;

/// Harmonic mean of strictly positive values.
pub fn harmonic_mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(OptimizerError::degenerate("harmonic mean of no areas"));
    }
    if values.iter().any(|&v| v <= 0.0) {
        return Err(OptimizerError::degenerate(
            "harmonic mean undefined for non-positive areas",
        ));
    }
    let recip_sum: f64 = values.iter().map(|v| 1.0 / v).sum();
    Ok(values.len() as f64 / recip_sum)
}

/// Compute the information score for detected regions and their areas.
pub fn information_score(regions: &[PeakRegion], areas: &[f64]) -> Result<f64> {
    if regions.is_empty() {
        return Err(OptimizerError::degenerate("no peak regions detected"));
    }
    if regions.len() != areas.len() {
        return Err(OptimizerError::degenerate(format!(
            "{} regions but {} areas",
            regions.len(),
            areas.len()
        )));
    }

    let mean = harmonic_mean(areas)?;

    let mut sum = 0.0;
    for (region, &area) in regions.iter().zip(areas.iter()) {
        let mut diff = (area - mean).abs();
        if diff == 0.0 {
            diff = 10.0;
        }
        sum += region.size() as f64 / diff.log10();
    }

    Ok((sum * regions.len() as f64).abs())
}
