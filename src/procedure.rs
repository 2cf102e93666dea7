//! Parameterized procedures and their per-batch bindings.
//!
//! A [`Procedure`] is an ordered list of steps; tunable steps carry
//! [`ParameterSpec`]s, derived steps carry a [`ConstrainedParameter`], and
//! exactly one step is the analysis point that produces the signal. Binding
//! a [`Batch`] substitutes concrete values into every tunable slot, giving
//! a [`BoundProcedure`] the executor can run.
//!
//! Parameter keys follow the `"{StepName}_{index}-{param}"` convention, so
//! a flat parameter list regroups into steps by the prefix before the first
//! dash.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};
use crate::types::{Batch, ConstrainedParameter, ParameterSpec, SignalKind};

/// How the analysis step measures. Interactive analysis is deliberately
/// absent; the engine runs unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMethod {
    Nmr,
    Raman,
    Hplc,
    Simulated,
}

impl AnalysisMethod {
    pub fn signal_kind(self) -> SignalKind {
        match self {
            AnalysisMethod::Nmr => SignalKind::Nmr,
            AnalysisMethod::Raman => SignalKind::Raman,
            AnalysisMethod::Hplc => SignalKind::Hplc,
            AnalysisMethod::Simulated => SignalKind::Generic,
        }
    }
}

/// One step of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProcStep {
    /// Fixed operation, nothing to tune.
    Op { name: String },
    /// Step with searched parameters.
    Tune { name: String, params: Vec<ParameterSpec> },
    /// Step whose single parameter derives from others.
    Constrained { name: String, param: ConstrainedParameter },
    /// The measurement point.
    Analyze { method: AnalysisMethod },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    steps: Vec<ProcStep>,
}

impl Procedure {
    /// A procedure must carry exactly one analysis step; everything else is
    /// free-form.
    pub fn new(steps: Vec<ProcStep>) -> Result<Self> {
        let analyses = steps
            .iter()
            .filter(|s| matches!(s, ProcStep::Analyze { .. }))
            .count();
        if analyses != 1 {
            return Err(OptimizerError::config(format!(
                "procedure needs exactly one analysis step, found {}",
                analyses
            )));
        }
        Ok(Self { steps })
    }

    /// Assemble a procedure from flat parameter lists: parameters regroup
    /// into tunable steps by key prefix, constrained parameters become their
    /// own steps, and the analysis step closes the procedure.
    pub fn from_parts(
        params: &[ParameterSpec],
        constrained: &[ConstrainedParameter],
        method: AnalysisMethod,
    ) -> Result<Self> {
        let mut grouped: BTreeMap<String, Vec<ParameterSpec>> = BTreeMap::new();
        for p in params {
            grouped
                .entry(step_prefix(&p.name).to_string())
                .or_default()
                .push(p.clone());
        }

        let mut steps: Vec<ProcStep> = grouped
            .into_iter()
            .map(|(name, params)| ProcStep::Tune { name, params })
            .collect();
        for c in constrained {
            steps.push(ProcStep::Constrained {
                name: step_prefix(&c.name).to_string(),
                param: c.clone(),
            });
        }
        steps.push(ProcStep::Analyze { method });
        Self::new(steps)
    }

    pub fn steps(&self) -> &[ProcStep] {
        &self.steps
    }

    /// All searched parameters in step order.
    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                ProcStep::Tune { params, .. } => Some(params.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn constrained_params(&self) -> Vec<ConstrainedParameter> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                ProcStep::Constrained { param, .. } => Some(param.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn analysis_method(&self) -> AnalysisMethod {
        for step in &self.steps {
            if let ProcStep::Analyze { method } = step {
                return *method;
            }
        }
        // new() guarantees one exists
        AnalysisMethod::Simulated
    }

    /// Substitute a batch's values into every tunable and constrained slot.
    pub fn bind(&self, batch: &Batch) -> Result<BoundProcedure> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let bound = match step {
                ProcStep::Op { name } => BoundStep::Op { name: name.clone() },
                ProcStep::Tune { name, params } => {
                    let mut values = BTreeMap::new();
                    for p in params {
                        let v = lookup(batch, &p.name)?;
                        values.insert(p.name.clone(), v);
                    }
                    BoundStep::Tune { name: name.clone(), values }
                }
                ProcStep::Constrained { name, param } => {
                    let v = lookup(batch, &param.name)?;
                    let mut values = BTreeMap::new();
                    values.insert(param.name.clone(), v);
                    BoundStep::Tune { name: name.clone(), values }
                }
                ProcStep::Analyze { method } => BoundStep::Analyze { method: *method },
            };
            steps.push(bound);
        }
        Ok(BoundProcedure { batch_id: batch.id.clone(), steps })
    }
}

fn lookup(batch: &Batch, name: &str) -> Result<f64> {
    batch.values.get(name).copied().ok_or_else(|| {
        OptimizerError::Fatal(anyhow::anyhow!(
            "{} carries no value for parameter '{}'",
            batch.id,
            name
        ))
    })
}

/// `"HeatChill_1-temp"` -> `"HeatChill_1"`.
fn step_prefix(key: &str) -> &str {
    key.split_once('-').map(|(head, _)| head).unwrap_or(key)
}

/// A procedure with every parameter slot filled for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundProcedure {
    pub batch_id: String,
    pub steps: Vec<BoundStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BoundStep {
    Op { name: String },
    Tune { name: String, values: BTreeMap<String, f64> },
    Analyze { method: AnalysisMethod },
}

impl BoundProcedure {
    /// All bound parameter values, flattened across steps.
    pub fn all_values(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for step in &self.steps {
            if let BoundStep::Tune { values, .. } = step {
                out.extend(values.iter().map(|(k, v)| (k.clone(), *v)));
            }
        }
        out
    }

    pub fn analysis_method(&self) -> AnalysisMethod {
        for step in &self.steps {
            if let BoundStep::Analyze { method } = step {
                return *method;
            }
        }
        AnalysisMethod::Simulated
    }
}
