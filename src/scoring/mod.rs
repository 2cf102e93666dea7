//! Objective scoring and the kind-aware dispatch table.
//!
//! ## Resolution chain
//!
//! For a `(SignalKind, ObjectiveKey)` pair the scorer is looked up as:
//!
//! 1. the exact `(kind, key)` entry,
//! 2. the `(Generic, key)` entry,
//! 3. a fallback that yields `NaN` (the controller warns and excludes the
//!    record from algorithm matrices).
//!
//! Two objectives bypass the table entirely:
//! - `novelty` needs the retained corpus, so the controller scores it
//!   against the [`crate::signal::store::SignalStore`];
//! - `final-parameter` is a scalar reported by the procedure itself, not
//!   computed from a signal.
//!
//! Submodules hold the novelty math:
//! - [`information`]: structure content of a single signal
//! - [`novelty`]: newness against the corpus

pub mod information;
pub mod novelty;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{OptimizerError, Result};
use crate::signal::peaks::{self, RegionDetection};
use crate::signal::Signal;
use crate::types::{Objective, ObjectiveKey, ObjectiveKind, SignalKind, TARGET_THRESHOLD_DISTANCE};

/// Signature shared by every table entry.
pub type ScoreFn = fn(&Signal, &Objective, &RegionDetection) -> Result<f64>;

static SCORERS: Lazy<HashMap<(SignalKind, ObjectiveKey), ScoreFn>> = Lazy::new(|| {
    let mut table: HashMap<(SignalKind, ObjectiveKey), ScoreFn> = HashMap::new();

    // Kind-specific scorers: spectra with resolvable peak shapes get the
    // region-based peak area, chromatograms integrate a retention window.
    table.insert((SignalKind::Nmr, ObjectiveKey::PeakArea), score_region_peak_area as ScoreFn);
    table.insert((SignalKind::Nmr, ObjectiveKey::IntegrationArea), score_integration_area);
    table.insert((SignalKind::Raman, ObjectiveKey::PeakArea), score_region_peak_area);
    table.insert((SignalKind::Raman, ObjectiveKey::IntegrationArea), score_integration_area);
    table.insert((SignalKind::Hplc, ObjectiveKey::PeakArea), score_window_peak_area);

    // Generic fallbacks
    table.insert((SignalKind::Generic, ObjectiveKey::PeakArea), score_window_peak_area);
    table.insert((SignalKind::Generic, ObjectiveKey::IntegrationArea), score_integration_area);

    table
});

/// Resolve a scorer through the chain described in the module doc.
pub fn resolve(kind: SignalKind, key: ObjectiveKey) -> ScoreFn {
    if let Some(f) = SCORERS.get(&(kind, key)) {
        return *f;
    }
    if let Some(f) = SCORERS.get(&(SignalKind::Generic, key)) {
        return *f;
    }
    score_unsupported
}

/// Score one signal against a history-free objective. Applies the
/// minimization negation so callers always maximize.
pub fn score_signal(
    signal: &Signal,
    objective: &Objective,
    detection: &RegionDetection,
) -> Result<f64> {
    if objective.needs_history() {
        return Err(OptimizerError::degenerate(
            "novelty is scored against the corpus, not a single signal",
        ));
    }
    let raw = resolve(signal.kind, objective.key())(signal, objective, detection)?;
    Ok(if objective.minimize { -raw } else { raw })
}

/// Area of the detected region nearest the requested position.
fn score_region_peak_area(
    signal: &Signal,
    objective: &Objective,
    detection: &RegionDetection,
) -> Result<f64> {
    let position = match objective.kind {
        ObjectiveKind::PeakArea { position } => position,
        _ => return Err(OptimizerError::degenerate("scorer expects a peak-area objective")),
    };

    let regions = peaks::find_regions(signal, detection);
    if regions.is_empty() {
        return Err(OptimizerError::degenerate("no peak regions detected"));
    }

    let mut best: Option<(f64, &crate::signal::peaks::PeakRegion)> = None;
    for region in &regions {
        let center = (signal.x[region.left] + signal.x[region.right]) / 2.0;
        let dist = (center - position).abs();
        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, region));
        }
    }

    match best {
        Some((dist, region)) if dist <= TARGET_THRESHOLD_DISTANCE => {
            Ok(signal.area(region.left, region.right))
        }
        _ => Err(OptimizerError::degenerate(format!(
            "no peak region within {} of position {}",
            TARGET_THRESHOLD_DISTANCE, position
        ))),
    }
}

/// Integral of a fixed window around the requested position. Used where
/// region detection is unreliable (chromatograms, unknown signal kinds).
fn score_window_peak_area(
    signal: &Signal,
    objective: &Objective,
    _detection: &RegionDetection,
) -> Result<f64> {
    let position = match objective.kind {
        ObjectiveKind::PeakArea { position } => position,
        _ => return Err(OptimizerError::degenerate("scorer expects a peak-area objective")),
    };
    Ok(signal.area_between(
        position - TARGET_THRESHOLD_DISTANCE,
        position + TARGET_THRESHOLD_DISTANCE,
    ))
}

/// Integral of y over the objective's explicit x window.
fn score_integration_area(
    signal: &Signal,
    objective: &Objective,
    _detection: &RegionDetection,
) -> Result<f64> {
    match objective.kind {
        ObjectiveKind::IntegrationArea { left, right } => Ok(signal.area_between(left, right)),
        _ => Err(OptimizerError::degenerate("scorer expects an integration-area objective")),
    }
}

/// Terminal fallback: no scorer exists for this pairing.
fn score_unsupported(
    _signal: &Signal,
    _objective: &Objective,
    _detection: &RegionDetection,
) -> Result<f64> {
    Ok(f64::NAN)
}
