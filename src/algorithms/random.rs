//! Random search: uniform draws within bounds.
//!
//! Ignores history entirely. Values are rounded to 2 decimals (hardware
//! setpoints rarely resolve finer) and clamped back into bounds when the
//! rounding would nudge them past an edge.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

use super::{derive_rng, Algorithm};
use crate::error::Result;

#[derive(Debug)]
pub struct RandomSearch {
    seed: u64,
    calls: u64,
}

impl RandomSearch {
    pub fn new(seed: u64) -> Self {
        Self { seed, calls: 0 }
    }
}

impl Algorithm for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn suggest(
        &mut self,
        _params: ArrayView2<'_, f64>,
        _results: ArrayView1<'_, f64>,
        bounds: ArrayView2<'_, f64>,
        n_returns: usize,
    ) -> Result<Array2<f64>> {
        let mut rng = derive_rng(self.seed, self.calls);
        self.calls += 1;

        let ndim = bounds.nrows();
        let mut out = Array2::zeros((n_returns, ndim));
        for i in 0..n_returns {
            for d in 0..ndim {
                let (lo, hi) = (bounds[[d, 0]], bounds[[d, 1]]);
                let v = round2(rng.gen_range(lo..=hi));
                out[[i, d]] = v.clamp(lo, hi);
            }
        }
        Ok(out)
    }

    fn calls(&self) -> u64 {
        self.calls
    }

    fn set_calls(&mut self, calls: u64) {
        self.calls = calls;
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array1};

    fn empty_history() -> (Array2<f64>, Array1<f64>) {
        (Array2::zeros((0, 2)), arr1(&[]))
    }

    #[test]
    fn test_in_bounds_and_rounded() {
        let (params, results) = empty_history();
        let bounds = arr2(&[[28.0, 42.0], [0.5, 2.5]]);
        let mut algo = RandomSearch::new(42);

        let out = algo
            .suggest(params.view(), results.view(), bounds.view(), 5)
            .unwrap();
        assert_eq!(out.shape(), &[5, 2]);

        for i in 0..5 {
            for d in 0..2 {
                let v = out[[i, d]];
                assert!(v >= bounds[[d, 0]] && v <= bounds[[d, 1]], "got {}", v);
                // Two-decimal grid
                let scaled = v * 100.0;
                assert!((scaled - scaled.round()).abs() < 1e-9, "got {}", v);
            }
        }
    }

    #[test]
    fn test_same_seed_same_suggestions() {
        let (params, results) = empty_history();
        let bounds = arr2(&[[0.0, 1.0], [10.0, 20.0]]);

        let mut a = RandomSearch::new(7);
        let mut b = RandomSearch::new(7);

        let out_a = a.suggest(params.view(), results.view(), bounds.view(), 3).unwrap();
        let out_b = b.suggest(params.view(), results.view(), bounds.view(), 3).unwrap();
        assert_eq!(out_a, out_b);

        // Successive calls draw fresh values
        let out_a2 = a.suggest(params.view(), results.view(), bounds.view(), 3).unwrap();
        assert_ne!(out_a, out_a2);
    }

    #[test]
    fn test_set_calls_replays_later_call() {
        let (params, results) = empty_history();
        let bounds = arr2(&[[0.0, 100.0]]);

        let mut full = RandomSearch::new(9);
        let _first = full.suggest(params.view(), results.view(), bounds.view(), 2).unwrap();
        let second = full.suggest(params.view(), results.view(), bounds.view(), 2).unwrap();

        // A resumed instance skips straight to call index 1
        let mut resumed = RandomSearch::new(9);
        resumed.set_calls(1);
        let replay = resumed.suggest(params.view(), results.view(), bounds.view(), 2).unwrap();
        assert_eq!(second, replay);
        assert_eq!(resumed.calls(), 2);
    }

    #[test]
    fn test_zero_returns() {
        let (params, results) = empty_history();
        let bounds = arr2(&[[0.0, 1.0]]);
        let mut algo = RandomSearch::new(1);

        let out = algo.suggest(params.view(), results.view(), bounds.view(), 0).unwrap();
        assert_eq!(out.shape(), &[0, 1]);
    }

    #[test]
    fn test_degenerate_point_bounds() {
        let (params, results) = empty_history();
        let bounds = arr2(&[[5.0, 5.0]]);
        let mut algo = RandomSearch::new(3);

        let out = algo.suggest(params.view(), results.view(), bounds.view(), 2).unwrap();
        assert_eq!(out[[0, 0]], 5.0);
        assert_eq!(out[[1, 0]], 5.0);
    }
}
