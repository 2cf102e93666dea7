//! Measured signals and the operations scoring needs from them.
//!
//! A [`Signal`] is a pair of equal-length x/y arrays with strictly ascending
//! x, tagged with its [`SignalKind`] and provenance (iteration, batch).
//! Submodules:
//! - [`peaks`]: region detection (derivative threshold, merge, expand)
//! - [`store`]: the ordered retained-signal corpus used by novelty scoring

pub mod peaks;
pub mod store;

pub use store::SignalStore;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};
use crate::types::SignalKind;

/// One measured spectrum or chromatogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Iteration that produced this signal, if it came from the loop.
    pub iteration: Option<usize>,
    pub batch_id: Option<String>,
}

impl Signal {
    /// Validates array shape on construction: equal non-zero lengths and
    /// strictly ascending x.
    pub fn new(kind: SignalKind, x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(OptimizerError::config(format!(
                "signal arrays must be equal non-zero length, got x={} y={}",
                x.len(),
                y.len()
            )));
        }
        if x.windows(2).any(|w| w[0] >= w[1]) {
            return Err(OptimizerError::config("signal x values must be strictly ascending"));
        }
        Ok(Self { kind, x, y, iteration: None, batch_id: None })
    }

    pub fn with_provenance(mut self, iteration: usize, batch_id: impl Into<String>) -> Self {
        self.iteration = Some(iteration);
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Index of the x value closest to `target`.
    pub fn nearest_index(&self, target: f64) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, &xi) in self.x.iter().enumerate() {
            let d = (xi - target).abs();
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }

    /// Trapezoid integral of y over the inclusive index range `[left, right]`.
    pub fn area(&self, left: usize, right: usize) -> f64 {
        if right <= left || right >= self.len() {
            return 0.0;
        }
        let mut total = 0.0;
        for i in left..right {
            let dx = self.x[i + 1] - self.x[i];
            total += (self.y[i] + self.y[i + 1]) / 2.0 * dx;
        }
        total
    }

    /// Trapezoid integral of y over x in `[x_left, x_right]`.
    pub fn area_between(&self, x_left: f64, x_right: f64) -> f64 {
        let l = self.nearest_index(x_left);
        let r = self.nearest_index(x_right);
        self.area(l.min(r), l.max(r))
    }

    /// Linear interpolation of this signal's y onto another x grid.
    /// Points outside the covered range clamp to the edge values.
    pub fn resample_onto(&self, grid: &[f64]) -> Vec<f64> {
        grid.iter()
            .map(|&gx| {
                if gx <= self.x[0] {
                    return self.y[0];
                }
                if gx >= self.x[self.len() - 1] {
                    return self.y[self.len() - 1];
                }
                // partition_point: first index with x > gx, so i-1 / i bracket gx
                let i = self.x.partition_point(|&xi| xi <= gx);
                let (x0, x1) = (self.x[i - 1], self.x[i]);
                let (y0, y1) = (self.y[i - 1], self.y[i]);
                y0 + (y1 - y0) * (gx - x0) / (x1 - x0)
            })
            .collect()
    }

    /// Mean elementwise difference `self - other`, with `other` resampled
    /// onto this signal's grid. This is the control-experiment comparison.
    pub fn difference_mean(&self, other: &Signal) -> f64 {
        let other_y = other.resample_onto(&self.x);
        let sum: f64 = self.y.iter().zip(other_y.iter()).map(|(a, b)| a - b).sum();
        sum / self.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_signal(x: Vec<f64>, y: Vec<f64>) -> Signal {
        Signal::new(SignalKind::Generic, x, y).unwrap()
    }

    #[test]
    fn test_signal_validation() {
        assert!(Signal::new(SignalKind::Generic, vec![], vec![]).is_err());
        assert!(Signal::new(SignalKind::Generic, vec![1.0, 2.0], vec![1.0]).is_err());
        // Non-ascending x rejected
        assert!(Signal::new(SignalKind::Generic, vec![1.0, 1.0], vec![0.0, 0.0]).is_err());
        assert!(Signal::new(SignalKind::Generic, vec![2.0, 1.0], vec![0.0, 0.0]).is_err());

        let ok = Signal::new(SignalKind::Nmr, vec![1.0, 2.0, 3.0], vec![0.0, 1.0, 0.0]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_nearest_index() {
        let s = make_signal(vec![0.0, 1.0, 2.0, 3.0], vec![0.0; 4]);
        assert_eq!(s.nearest_index(1.2), 1);
        assert_eq!(s.nearest_index(2.6), 3);
        assert_eq!(s.nearest_index(-5.0), 0);
    }

    #[test]
    fn test_area_unit_square() {
        // y = 1 over x in [0, 4] integrates to 4
        let s = make_signal(vec![0.0, 1.0, 2.0, 3.0, 4.0], vec![1.0; 5]);
        let a = s.area(0, 4);
        assert!((a - 4.0).abs() < 1e-12, "got {}", a);

        // Degenerate ranges integrate to 0
        assert_eq!(s.area(2, 2), 0.0);
        assert_eq!(s.area(3, 100), 0.0);
    }

    #[test]
    fn test_area_triangle() {
        // Triangle peak: integral = base * height / 2 = 2 * 1 / 2 = 1
        let s = make_signal(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 0.0]);
        let a = s.area(0, 2);
        assert!((a - 1.0).abs() < 1e-12, "got {}", a);
    }

    #[test]
    fn test_area_between_swapped_borders() {
        let s = make_signal(vec![0.0, 1.0, 2.0, 3.0, 4.0], vec![1.0; 5]);
        let a = s.area_between(3.0, 1.0);
        assert!((a - 2.0).abs() < 1e-12, "got {}", a);
    }

    #[test]
    fn test_resample_identity_and_clamp() {
        let s = make_signal(vec![0.0, 1.0, 2.0], vec![0.0, 2.0, 4.0]);

        let same = s.resample_onto(&[0.0, 1.0, 2.0]);
        assert_eq!(same, vec![0.0, 2.0, 4.0]);

        let mid = s.resample_onto(&[0.5, 1.5]);
        assert!((mid[0] - 1.0).abs() < 1e-12, "got {}", mid[0]);
        assert!((mid[1] - 3.0).abs() < 1e-12, "got {}", mid[1]);

        // Outside the range clamps to edges
        let outside = s.resample_onto(&[-1.0, 5.0]);
        assert_eq!(outside, vec![0.0, 4.0]);
    }

    #[test]
    fn test_difference_mean() {
        let a = make_signal(vec![0.0, 1.0, 2.0], vec![3.0, 3.0, 3.0]);
        let b = make_signal(vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 1.0]);
        let d = a.difference_mean(&b);
        assert!((d - 2.0).abs() < 1e-12, "got {}", d);
        let neg = b.difference_mean(&a);
        assert!((neg + 2.0).abs() < 1e-12, "got {}", neg);
    }
}
