//! Search algorithms behind a uniform suggest contract.
//!
//! Every algorithm sees the same inputs: the matrix of completed parameter
//! sets (`n_obs x n_dims`), their results (`n_obs`), the bounds matrix
//! (`n_dims x 2`) and how many new rows to return. Empty history must be
//! tolerated; the first call of a run usually has none.
//!
//! ## Determinism across resume
//!
//! Each suggest call draws from a fresh RNG derived from `(seed, call
//! index)`. The snapshot records the call count, so a resumed run re-creates
//! algorithm state by setting the count instead of serializing RNG
//! internals. Call k after a resume produces exactly what call k of an
//! uninterrupted run would have.
//!
//! ## Registry
//!
//! | Name        | Strategy                                          |
//! |-------------|---------------------------------------------------|
//! | `random`    | per-dim uniform in bounds, rounded to 2 decimals  |
//! | `lhs`       | Latin hypercube: one sample per stratum per dim   |
//! | `reproduce` | replay historical rows for platform validation    |

pub mod lhs;
pub mod random;
pub mod reproduce;

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{OptimizerError, Result};
use crate::types::AlgorithmConfig;

pub use lhs::LatinHypercube;
pub use random::RandomSearch;
pub use reproduce::Reproduce;

/// Algorithm names `create_algorithm` accepts.
pub const KNOWN_ALGORITHMS: &[&str] = &["random", "lhs", "reproduce"];

pub trait Algorithm: std::fmt::Debug {
    fn name(&self) -> &str;

    /// Propose `n_returns` new parameter rows.
    ///
    /// `params` holds completed observations as rows, `results` their
    /// scores, `bounds` one `[min, max]` row per dimension. The returned
    /// matrix is `n_returns x n_dims` with every value inside bounds.
    fn suggest(
        &mut self,
        params: ArrayView2<'_, f64>,
        results: ArrayView1<'_, f64>,
        bounds: ArrayView2<'_, f64>,
        n_returns: usize,
    ) -> Result<Array2<f64>>;

    /// Suggest calls made so far (snapshot bookkeeping).
    fn calls(&self) -> u64;

    /// Restore the call count after a resume.
    fn set_calls(&mut self, calls: u64);
}

/// Instantiate by config name. Unknown names are configuration errors.
pub fn create_algorithm(cfg: &AlgorithmConfig) -> Result<Box<dyn Algorithm>> {
    match cfg.name.as_str() {
        "random" => Ok(Box::new(RandomSearch::new(cfg.seed))),
        "lhs" | "latin-hypercube" => Ok(Box::new(LatinHypercube::new(cfg.seed))),
        "reproduce" => Ok(Box::new(Reproduce::new(
            cfg.seed,
            cfg.selected_experiments.clone(),
        ))),
        other => Err(OptimizerError::config(format!(
            "unknown algorithm '{}', known: {}",
            other,
            KNOWN_ALGORITHMS.join(", ")
        ))),
    }
}

/// RNG for one suggest call, derived from the base seed and call index.
pub(crate) fn derive_rng(seed: u64, call: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(call))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_known_names() {
        for name in KNOWN_ALGORITHMS {
            let cfg = AlgorithmConfig { name: name.to_string(), ..AlgorithmConfig::default() };
            let algo = create_algorithm(&cfg).unwrap();
            assert_eq!(algo.name(), *name);
        }
    }

    #[test]
    fn test_registry_unknown_name() {
        let cfg = AlgorithmConfig { name: "gradient-descent".into(), ..AlgorithmConfig::default() };
        let err = create_algorithm(&cfg).unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("gradient-descent"), "got {}", msg);
        assert!(msg.contains("random"), "got {}", msg);
    }
}
