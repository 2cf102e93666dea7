//! Configuration loading from a run TOML file.
//!
//! One file describes a whole campaign: the budget, the objective, the
//! algorithm, the searched and constrained parameters, and the analysis
//! method. Unset keys fall back to single-iteration, single-batch
//! defaults so a minimal file stays minimal.
//!
//! ## Example
//!
//! ```toml
//! max-iterations = 20
//! batch-size = 2
//! analysis-method = "simulated"
//!
//! [target]
//! objective = "novelty"
//! threshold = 0.8
//!
//! [algorithm]
//! name = "random"
//! seed = 42
//!
//! [[parameter]]
//! name = "HeatChill_1-temp"
//! nominal = 35.0
//! min = 28.0
//! max = 42.0
//!
//! [[parameter]]
//! name = "Add_2-volume"
//! nominal = 1.5   # bounds default to 0.8x..1.2x nominal
//! ```

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::algorithms::KNOWN_ALGORITHMS;
use crate::error::{OptimizerError, Result};
use crate::procedure::AnalysisMethod;
use crate::signal::peaks::RegionDetection;
use crate::state::fnv1a;
use crate::types::{
    AlgorithmConfig, ConstrainedParameter, ControlSettings, Objective, ParameterSpec,
};

/// Settings for the simulated bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulationSettings {
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { seed: 7 }
    }
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    #[serde(default = "one")]
    max_iterations: usize,
    #[serde(default = "one")]
    batch_size: usize,
    #[serde(default)]
    target: RawTarget,
    #[serde(default)]
    algorithm: AlgorithmConfig,
    #[serde(default)]
    control: ControlSettings,
    #[serde(default)]
    detection: RegionDetection,
    #[serde(default)]
    simulation: SimulationSettings,
    #[serde(rename = "parameter", default)]
    parameters: Vec<RawParameter>,
    #[serde(rename = "constrained", default)]
    constrained: Vec<ConstrainedParameter>,
    #[serde(default = "default_analysis_method")]
    analysis_method: AnalysisMethod,
}

fn one() -> usize {
    1
}

fn default_analysis_method() -> AnalysisMethod {
    AnalysisMethod::Simulated
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawTarget {
    #[serde(default)]
    objective: Objective,
    threshold: Option<f64>,
}

impl Default for RawTarget {
    fn default() -> Self {
        Self { objective: Objective::default(), threshold: None }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawParameter {
    name: String,
    nominal: f64,
    min: Option<f64>,
    max: Option<f64>,
}

/// Validated campaign configuration.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    pub batch_size: usize,
    pub objective: Objective,
    /// Result above this ends the run early. Absent means budget-only.
    pub threshold: Option<f64>,
    pub algorithm: AlgorithmConfig,
    pub control: ControlSettings,
    pub detection: RegionDetection,
    pub simulation: SimulationSettings,
    pub parameters: Vec<ParameterSpec>,
    pub constrained: Vec<ConstrainedParameter>,
    pub analysis_method: AnalysisMethod,
}

impl OptimizerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(raw)
            .map_err(|e| OptimizerError::config(format!("parsing configuration: {}", e)))?;

        let mut parameters = Vec::with_capacity(raw.parameters.len());
        for p in &raw.parameters {
            parameters.push(resolve_parameter(p)?);
        }

        let config = Self {
            max_iterations: raw.max_iterations,
            batch_size: raw.batch_size,
            objective: raw.target.objective,
            threshold: raw.target.threshold,
            algorithm: raw.algorithm,
            control: raw.control,
            detection: raw.detection,
            simulation: raw.simulation,
            parameters,
            constrained: raw.constrained,
            analysis_method: raw.analysis_method,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(OptimizerError::config("max-iterations must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(OptimizerError::config("batch-size must be at least 1"));
        }
        if self.parameters.is_empty() {
            return Err(OptimizerError::config("at least one [[parameter]] is required"));
        }
        if !KNOWN_ALGORITHMS.contains(&self.algorithm.name.as_str())
            && self.algorithm.name != "latin-hypercube"
        {
            return Err(OptimizerError::config(format!(
                "unknown algorithm '{}', known: {}",
                self.algorithm.name,
                KNOWN_ALGORITHMS.join(", ")
            )));
        }
        if let Some(t) = self.threshold {
            if !t.is_finite() {
                return Err(OptimizerError::config("target threshold must be finite"));
            }
        }
        Ok(())
    }

    /// Stable digest of the whole configuration; a resumed run refuses a
    /// state file whose digest differs.
    pub fn digest(&self) -> u64 {
        match serde_json::to_string(self) {
            Ok(json) => fnv1a(json.as_bytes()),
            Err(_) => 0,
        }
    }
}

fn resolve_parameter(raw: &RawParameter) -> Result<ParameterSpec> {
    if !raw.nominal.is_finite() {
        return Err(OptimizerError::config(format!(
            "parameter '{}': nominal must be finite",
            raw.name
        )));
    }
    let spec = match (raw.min, raw.max) {
        (Some(min), Some(max)) => {
            if min >= max {
                return Err(OptimizerError::config(format!(
                    "parameter '{}': min {} is not below max {}",
                    raw.name, min, max
                )));
            }
            if raw.nominal < min || raw.nominal > max {
                return Err(OptimizerError::config(format!(
                    "parameter '{}': nominal {} outside [{}, {}]",
                    raw.name, raw.nominal, min, max
                )));
            }
            ParameterSpec::new(&raw.name, min, max, raw.nominal)
        }
        (None, None) => ParameterSpec::from_nominal(&raw.name, raw.nominal),
        _ => {
            return Err(OptimizerError::config(format!(
                "parameter '{}': give both min and max, or neither",
                raw.name
            )));
        }
    };
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectiveKind;

    const FULL: &str = r#"
max-iterations = 20
batch-size = 2
analysis-method = "nmr"

[target]
objective = "neg-peak-area-6.72"
threshold = 0.8

[algorithm]
name = "lhs"
seed = 17

[control]
n-runs = 2
every = 3

[[parameter]]
name = "HeatChill_1-temp"
nominal = 35.0
min = 28.0
max = 42.0

[[parameter]]
name = "Add_2-volume"
nominal = 1.5

[[constrained]]
name = "Add_3-volume"
target = 50.0
refs = ["Add_2-volume"]
min = 0.0
max = 50.0
"#;

    #[test]
    fn test_full_config_parses() {
        let config = OptimizerConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.analysis_method, AnalysisMethod::Nmr);
        assert!(config.objective.minimize);
        assert!(matches!(
            config.objective.kind,
            ObjectiveKind::PeakArea { position } if (position - 6.72).abs() < 1e-9
        ));
        assert_eq!(config.threshold, Some(0.8));
        assert_eq!(config.algorithm.name, "lhs");
        assert_eq!(config.control.every, 3);
        assert_eq!(config.constrained.len(), 1);

        // bounds-free parameter got the default spread
        let volume = &config.parameters[1];
        assert!((volume.min - 1.2).abs() < 1e-9, "got {}", volume.min);
        assert!((volume.max - 1.8).abs() < 1e-9, "got {}", volume.max);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let toml = r#"
[[parameter]]
name = "Add_1-volume"
nominal = 1.0
"#;
        let config = OptimizerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.max_iterations, 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.algorithm.name, "random");
        assert_eq!(config.algorithm.seed, 42);
        assert_eq!(config.control.n_runs, 1);
        assert_eq!(config.control.every, 5);
        assert_eq!(config.threshold, None);
        assert_eq!(config.analysis_method, AnalysisMethod::Simulated);
        assert!(matches!(config.objective.kind, ObjectiveKind::FinalParameter));
    }

    #[test]
    fn test_rejects_empty_parameters() {
        let err = OptimizerConfig::from_toml_str("max-iterations = 5").unwrap_err();
        assert!(err.to_string().contains("parameter"), "got {}", err);
    }

    #[test]
    fn test_rejects_half_specified_bounds() {
        let toml = r#"
[[parameter]]
name = "Add_1-volume"
nominal = 1.0
min = 0.5
"#;
        assert!(OptimizerConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_rejects_nominal_outside_bounds() {
        let toml = r#"
[[parameter]]
name = "Add_1-volume"
nominal = 5.0
min = 0.0
max = 2.0
"#;
        assert!(OptimizerConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let toml = r#"
[algorithm]
name = "bayesian"

[[parameter]]
name = "Add_1-volume"
nominal = 1.0
"#;
        let err = OptimizerConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("bayesian"), "got {}", err);
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = OptimizerConfig::from_toml_str(FULL).unwrap();
        let b = OptimizerConfig::from_toml_str(FULL).unwrap();
        assert_eq!(a.digest(), b.digest());

        let changed = FULL.replace("batch-size = 2", "batch-size = 3");
        let c = OptimizerConfig::from_toml_str(&changed).unwrap();
        assert_ne!(a.digest(), c.digest());
    }
}
