//! Peak-region detection on measured signals.
//!
//! ## Pipeline
//!
//! ```text
//! y -> [smooth] -> detection vector (|dy/dx| or |y|) -> threshold mask
//!   -> contiguous runs -> merge(d_merge) -> expand(d_expand) -> merge again
//! ```
//!
//! The detection vector is thresholded at `mean + 3 * std`; contiguous
//! above-threshold runs become candidate regions. Regions closer than
//! `d_merge` x-units merge, then every border is pushed outward by
//! `d_expand` x-units (derivative detection fires on peak flanks, so the
//! expansion is what pulls the two flank lobes of one peak back together).
//!
//! Defaults are the 19F settings tuned on a benchtop 80 MHz instrument:
//! derivative detection, no smoothing, `d_merge = 0.001`, `d_expand = 0.125`.

use serde::{Deserialize, Serialize};

use super::Signal;

/// Index pair into a signal's arrays; both ends inclusive when expanded
/// to points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakRegion {
    pub left: usize,
    pub right: usize,
}

impl PeakRegion {
    pub fn new(left: usize, right: usize) -> Self {
        debug_assert!(left <= right);
        Self { left, right }
    }

    /// Number of index steps spanned (right - left).
    pub fn size(&self) -> usize {
        self.right - self.left
    }
}

/// Detection knobs. See the module doc for the pipeline they feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegionDetection {
    /// Detect on |y| instead of the raw vector (ignored when `derivative`).
    pub magnitude: bool,
    /// Detect on |dy/dx| (central differences).
    pub derivative: bool,
    /// Smooth y with a short moving average before detection.
    pub smoothed: bool,
    /// Merge regions closer than this many x-units.
    pub d_merge: f64,
    /// Push every region border outward by this many x-units.
    pub d_expand: f64,
}

impl Default for RegionDetection {
    fn default() -> Self {
        Self {
            magnitude: false,
            derivative: true,
            smoothed: false,
            d_merge: 0.001,
            d_expand: 0.125,
        }
    }
}

/// Detect peak regions in `signal` according to `cfg`.
///
/// Returns regions in ascending x order. An empty result means nothing rose
/// above the noise threshold; callers decide whether that is degenerate.
pub fn find_regions(signal: &Signal, cfg: &RegionDetection) -> Vec<PeakRegion> {
    let y = if cfg.smoothed { moving_average(&signal.y, 5) } else { signal.y.clone() };

    let detect: Vec<f64> = if cfg.derivative {
        gradient(&signal.x, &y).iter().map(|g| g.abs()).collect()
    } else if cfg.magnitude {
        y.iter().map(|v| v.abs()).collect()
    } else {
        y
    };

    let threshold = mean(&detect) + 3.0 * std_dev(&detect);

    // Contiguous above-threshold runs
    let mut regions: Vec<PeakRegion> = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &v) in detect.iter().enumerate() {
        if v > threshold {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take() {
            regions.push(PeakRegion::new(start, i - 1));
        }
    }
    if let Some(start) = run_start {
        regions.push(PeakRegion::new(start, detect.len() - 1));
    }

    let merged = merge_close(signal, regions, cfg.d_merge);
    let expanded = expand(signal, merged, cfg.d_expand);
    // Expansion can make neighbors touch
    merge_close(signal, expanded, 0.0)
}

/// Trapezoid area of each region.
pub fn region_areas(signal: &Signal, regions: &[PeakRegion]) -> Vec<f64> {
    regions.iter().map(|r| signal.area(r.left, r.right)).collect()
}

/// Expand regions to their member points as rounded x keys, right border
/// inclusive. Keys are x values rounded to 3 decimals, stored in milli-units
/// (`6.725 -> 6725`) so they hash and compare exactly.
pub fn expand_region_points(signal: &Signal, regions: &[PeakRegion]) -> Vec<i64> {
    let mut points = Vec::new();
    for region in regions {
        for i in region.left..=region.right {
            points.push(milli_key(signal.x[i]));
        }
    }
    points
}

/// Round an x value to 3 decimals and scale into an integer key.
pub fn milli_key(x: f64) -> i64 {
    (x * 1000.0).round() as i64
}

fn merge_close(signal: &Signal, regions: Vec<PeakRegion>, d_merge: f64) -> Vec<PeakRegion> {
    let mut merged: Vec<PeakRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(prev) if region.left <= prev.right
                || signal.x[region.left] - signal.x[prev.right] < d_merge =>
            {
                prev.right = prev.right.max(region.right);
            }
            _ => merged.push(region),
        }
    }
    merged
}

fn expand(signal: &Signal, regions: Vec<PeakRegion>, d_expand: f64) -> Vec<PeakRegion> {
    let last = signal.len() - 1;
    regions
        .into_iter()
        .map(|r| {
            let left_x = signal.x[r.left] - d_expand;
            let right_x = signal.x[r.right] + d_expand;
            // First index inside the widened window on each side
            let left = signal.x.partition_point(|&xi| xi < left_x);
            let right = signal.x.partition_point(|&xi| xi <= right_x).saturating_sub(1);
            PeakRegion::new(left.min(r.left), right.max(r.right).min(last))
        })
        .collect()
}

/// Central-difference gradient, one-sided at the edges.
fn gradient(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut g = vec![0.0; n];
    g[0] = (y[1] - y[0]) / (x[1] - x[0]);
    g[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        g[i] = (y[i + 1] - y[i - 1]) / (x[i + 1] - x[i - 1]);
    }
    g
}

fn moving_average(y: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(y.len() - 1);
            let slice = &y[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}
