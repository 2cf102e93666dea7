//! Reproducibility checks: replay parameters from completed experiments.
//!
//! Not a search at all. Picks historical rows either by the explicit index
//! list from the config or by seeded random choice without replacement, and
//! hands them back as the next suggestions. The platform then shows whether
//! re-running the same parameters reproduces the same result.
//!
//! An internal counter tracks how many rows this instance already replayed:
//! those land at the tail of the history passed back in, and must not be
//! picked a second time.

use ndarray::{s, Array2, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;

use super::{derive_rng, Algorithm};
use crate::error::{OptimizerError, Result};

#[derive(Debug)]
pub struct Reproduce {
    seed: u64,
    calls: u64,
    /// Rows replayed so far; excludes that many tail rows from the pool.
    replayed: usize,
    selected: Vec<usize>,
}

impl Reproduce {
    pub fn new(seed: u64, selected: Vec<usize>) -> Self {
        Self { seed, calls: 0, replayed: 0, selected }
    }
}

impl Algorithm for Reproduce {
    fn name(&self) -> &str {
        "reproduce"
    }

    fn suggest(
        &mut self,
        params: ArrayView2<'_, f64>,
        _results: ArrayView1<'_, f64>,
        bounds: ArrayView2<'_, f64>,
        n_returns: usize,
    ) -> Result<Array2<f64>> {
        let mut rng = derive_rng(self.seed, self.calls);
        self.calls += 1;

        let pool = params.nrows().saturating_sub(self.replayed);
        if pool == 0 {
            return Err(OptimizerError::config(
                "reproduce has no historical parameter sets to replay",
            ));
        }

        let rows: Vec<usize> = if !self.selected.is_empty() {
            // Walk the configured index list, clamping past its end
            (0..n_returns)
                .map(|k| {
                    let pos = (self.replayed + k).min(self.selected.len() - 1);
                    let row = self.selected[pos];
                    if row >= pool {
                        return Err(OptimizerError::config(format!(
                            "selected experiment {} outside history of {} rows",
                            row, pool
                        )));
                    }
                    Ok(row)
                })
                .collect::<Result<_>>()?
        } else {
            if n_returns > pool {
                return Err(OptimizerError::config(format!(
                    "cannot replay {} distinct rows from a pool of {}",
                    n_returns, pool
                )));
            }
            let indices: Vec<usize> = (0..pool).collect();
            indices.choose_multiple(&mut rng, n_returns).copied().collect()
        };

        let ndim = bounds.nrows();
        let mut out = Array2::zeros((rows.len(), ndim));
        for (i, &row) in rows.iter().enumerate() {
            out.slice_mut(s![i, ..]).assign(&params.slice(s![row, ..]));
        }

        self.replayed += n_returns;
        Ok(out)
    }

    fn calls(&self) -> u64 {
        self.calls
    }

    fn set_calls(&mut self, calls: u64) {
        self.calls = calls;
    }
}
