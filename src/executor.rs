//! Procedure execution backends.
//!
//! The engine drives anything that can run a [`BoundProcedure`] and hand
//! back signals. [`SimulatedExecutor`] is the built-in bench: a pure
//! function from batch values to a synthetic spectrum, so repeated runs
//! (and resumed runs) reproduce byte-identical measurements.
//!
//! ## Simulated response
//!
//! Each searched parameter owns one gaussian peak on a fixed `0..10` grid.
//! Peak height is the parameter's "quality", itself a gaussian over the
//! parameter range peaking at the midpoint:
//!
//! ```text
//! q_i = exp(-(v_i - mid_i)^2 / (2 * ((hi_i - lo_i)/4)^2))
//! y(x) = sum_i q_i * exp(-(x - c_i)^2 / (2 * 0.08^2)) + noise
//! ```
//!
//! The reported scalar is `prod(q_i)`, reaching 1.0 when every parameter
//! sits at its midpoint. Noise is seeded from the batch values, not from
//! shared RNG state.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use crate::error::{OptimizerError, Result};
use crate::procedure::BoundProcedure;
use crate::signal::Signal;
use crate::state::fnv1a;
use crate::types::ParameterSpec;

/// What one procedure run produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Signals from the analysis step, in acquisition order.
    pub signals: Vec<Signal>,
    /// Scalar the bench reported directly, when it has one.
    pub reported: Option<f64>,
}

/// Anything that can run a bound procedure and measure the result.
pub trait Executor {
    fn execute(&mut self, procedure: &BoundProcedure) -> Result<ExecutionOutcome>;
}

const GRID_START: f64 = 0.0;
const GRID_END: f64 = 10.0;
const GRID_STEP: f64 = 0.01;
const PEAK_SIGMA: f64 = 0.08;
const NOISE_AMPLITUDE: f64 = 5e-4;

#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    seed: u64,
    specs: Vec<ParameterSpec>,
}

impl SimulatedExecutor {
    pub fn new(seed: u64, specs: &[ParameterSpec]) -> Self {
        Self { seed, specs: specs.to_vec() }
    }

    /// Quality of one parameter value, 1.0 at the midpoint of its range.
    fn quality(spec: &ParameterSpec, value: f64) -> f64 {
        let width = (spec.max - spec.min) / 4.0;
        if width <= 0.0 {
            return 1.0;
        }
        gauss(value, spec.midpoint(), width)
    }

    /// Peak centers spread evenly across the interior of the grid.
    fn center(&self, index: usize) -> f64 {
        2.0 + 7.0 * (index as f64 + 0.5) / self.specs.len() as f64
    }

    fn noise_seed(&self, values: &BTreeMap<String, f64>) -> u64 {
        let mut tag = format!("{}", self.seed);
        for (name, value) in values {
            tag.push_str(&format!("|{}={:.6}", name, value));
        }
        fnv1a(tag.as_bytes())
    }
}

impl Executor for SimulatedExecutor {
    fn execute(&mut self, procedure: &BoundProcedure) -> Result<ExecutionOutcome> {
        let values = procedure.all_values();

        let mut qualities = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let value = values.get(&spec.name).copied().ok_or_else(|| {
                OptimizerError::Measurement {
                    batch_id: procedure.batch_id.clone(),
                    source: anyhow::anyhow!("no bound value for parameter '{}'", spec.name),
                }
            })?;
            qualities.push(Self::quality(spec, value));
        }

        let n_points = ((GRID_END - GRID_START) / GRID_STEP).round() as usize + 1;
        let mut rng = StdRng::seed_from_u64(self.noise_seed(&values));

        let mut x = Vec::with_capacity(n_points);
        let mut y = Vec::with_capacity(n_points);
        for i in 0..n_points {
            let xi = GRID_START + i as f64 * GRID_STEP;
            let mut yi = 0.0;
            for (j, q) in qualities.iter().enumerate() {
                yi += q * gauss(xi, self.center(j), PEAK_SIGMA);
            }
            yi += rng.gen_range(-1.0..1.0) * NOISE_AMPLITUDE;
            x.push(xi);
            y.push(yi);
        }

        let kind = procedure.analysis_method().signal_kind();
        let mut signal = Signal::new(kind, x, y)?;
        signal.batch_id = Some(procedure.batch_id.clone());

        let reported = qualities.iter().product();
        Ok(ExecutionOutcome { signals: vec![signal], reported: Some(reported) })
    }
}

fn gauss(x: f64, center: f64, sigma: f64) -> f64 {
    (-(x - center).powi(2) / (2.0 * sigma * sigma)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{AnalysisMethod, Procedure};
    use crate::types::Batch;

    fn specs() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("Add_1-volume", 0.0, 4.0, 2.0),
            ParameterSpec::new("HeatChill_2-temp", 20.0, 60.0, 40.0),
        ]
    }

    fn bound_at(values: &[(&str, f64)]) -> BoundProcedure {
        let proc = Procedure::from_parts(&specs(), &[], AnalysisMethod::Simulated).unwrap();
        let mut batch = Batch::new("batch 1");
        for (name, v) in values {
            batch.values.insert(name.to_string(), *v);
        }
        proc.bind(&batch).unwrap()
    }

    #[test]
    fn test_midpoints_report_unity() {
        let mut exec = SimulatedExecutor::new(7, &specs());
        let bound = bound_at(&[("Add_1-volume", 2.0), ("HeatChill_2-temp", 40.0)]);

        let outcome = exec.execute(&bound).unwrap();
        let reported = outcome.reported.unwrap();
        assert!((reported - 1.0).abs() < 1e-12, "got {}", reported);

        let signal = &outcome.signals[0];
        assert_eq!(signal.len(), 1001);
        assert_eq!(signal.x[0], 0.0);
        assert!((signal.x[1000] - 10.0).abs() < 1e-9);
        assert_eq!(signal.batch_id.as_deref(), Some("batch 1"));
    }

    #[test]
    fn test_off_midpoint_scores_lower() {
        let mut exec = SimulatedExecutor::new(7, &specs());
        let best = bound_at(&[("Add_1-volume", 2.0), ("HeatChill_2-temp", 40.0)]);
        let off = bound_at(&[("Add_1-volume", 3.5), ("HeatChill_2-temp", 40.0)]);

        let r_best = exec.execute(&best).unwrap().reported.unwrap();
        let r_off = exec.execute(&off).unwrap().reported.unwrap();
        assert!(r_off < r_best, "got {} vs {}", r_off, r_best);
    }

    #[test]
    fn test_execution_is_pure() {
        let mut exec = SimulatedExecutor::new(7, &specs());
        let bound = bound_at(&[("Add_1-volume", 1.0), ("HeatChill_2-temp", 25.0)]);

        let a = exec.execute(&bound).unwrap();
        let b = exec.execute(&bound).unwrap();
        assert_eq!(a.signals[0].y, b.signals[0].y);
    }

    #[test]
    fn test_distinct_batches_distinct_noise() {
        let mut exec = SimulatedExecutor::new(7, &specs());
        let a = bound_at(&[("Add_1-volume", 1.0), ("HeatChill_2-temp", 25.0)]);
        let b = bound_at(&[("Add_1-volume", 1.1), ("HeatChill_2-temp", 25.0)]);

        let ya = exec.execute(&a).unwrap().signals[0].y.clone();
        let yb = exec.execute(&b).unwrap().signals[0].y.clone();
        assert_ne!(ya, yb);
    }

    #[test]
    fn test_missing_parameter_is_measurement_error() {
        let mut exec = SimulatedExecutor::new(7, &specs());
        // bind against a procedure that only knows one of the two parameters
        let partial = vec![ParameterSpec::new("Add_1-volume", 0.0, 4.0, 2.0)];
        let proc = Procedure::from_parts(&partial, &[], AnalysisMethod::Simulated).unwrap();
        let mut batch = Batch::new("batch 1");
        batch.values.insert("Add_1-volume".into(), 2.0);
        let bound = proc.bind(&batch).unwrap();

        let err = exec.execute(&bound).unwrap_err();
        assert!(err.is_batch_local(), "got {}", err);
    }
}
