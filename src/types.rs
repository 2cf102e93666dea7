//! Core types for retort - the closed-loop optimization engine.
//!
//! Everything that crosses module boundaries lives here: parameter
//! descriptions, batches, iteration records, controller phases and the
//! objective grammar. Key design decisions:
//! - Flat string keys for parameters (`"HeatChill_1-temp"`) so batches and
//!   records stay order-stable in `BTreeMap`s
//! - `Objective` round-trips through its string spelling for serde, which
//!   keeps config files and snapshots human-readable
//! - Phases are a closed enum with an explicit legality check instead of
//!   free-form state strings

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default bounds spread applied when a tunable parameter declares only a
/// nominal value: `nominal * 0.8 ..= nominal * 1.2`.
pub const DEFAULT_BOUNDS_SPREAD: (f64, f64) = (0.8, 1.2);

/// Maximum x-distance between a requested peak position and the nearest
/// detected region before peak-area scoring gives up.
pub const TARGET_THRESHOLD_DISTANCE: f64 = 0.5;

/// Stable display id for the n-th batch of an iteration (1-based).
pub fn batch_id(n: usize) -> String {
    format!("batch {}", n)
}

/// One tunable quantity of a procedure step.
///
/// `name` is the flat key `"{StepName}_{step_index}-{param}"`, e.g.
/// `"HeatChill_1-temp"`. Bounds are linear and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Value the unmodified procedure would run with.
    pub nominal: f64,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, min: f64, max: f64, nominal: f64) -> Self {
        Self { name: name.into(), min, max, nominal }
    }

    /// Spec with the default spread around a nominal value.
    pub fn from_nominal(name: impl Into<String>, nominal: f64) -> Self {
        let (lo, hi) = DEFAULT_BOUNDS_SPREAD;
        // A negative nominal flips the product ordering.
        let (a, b) = (nominal * lo, nominal * hi);
        Self { name: name.into(), min: a.min(b), max: a.max(b), nominal }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// A derived parameter: `value = target - sum(current values of refs)`.
///
/// Never searched by the algorithm; resolved after each suggestion. The
/// resolved value must land inside `[min, max]` or the batch is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstrainedParameter {
    pub name: String,
    pub target: f64,
    /// Names of the parameters whose current values are subtracted.
    pub refs: Vec<String>,
    pub min: f64,
    pub max: f64,
}

/// One proposed parameter set, ready to bind into the procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// `"batch 1"`, `"batch 2"`, ... within an iteration.
    pub id: String,
    /// Parameter name -> bound value (searched and constrained alike).
    pub values: BTreeMap<String, f64>,
}

impl Batch {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), values: BTreeMap::new() }
    }
}

/// One executed batch and its eventual score.
///
/// `result` stays `None` until scoring succeeds; only complete records are
/// packed into algorithm matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub batch_id: String,
    pub values: BTreeMap<String, f64>,
    pub result: Option<f64>,
}

impl IterationRecord {
    pub fn from_batch(iteration: usize, batch: &Batch) -> Self {
        Self {
            iteration,
            batch_id: batch.id.clone(),
            values: batch.values.clone(),
            result: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }
}

/// Controller phases. Transitions are linear with a single branch after
/// `Updating`; anything else is a bug, not a recoverable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Preparing,
    AwaitingCompletion,
    Scoring,
    Updating,
    Terminated,
}

impl Phase {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Preparing)
                | (Preparing, AwaitingCompletion)
                | (AwaitingCompletion, Scoring)
                | (Scoring, Updating)
                | (Updating, Idle)
                | (Updating, Terminated)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Preparing => "preparing",
            Phase::AwaitingCompletion => "awaiting completion",
            Phase::Scoring => "scoring",
            Phase::Updating => "updating",
            Phase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Control-experiment cadence: after every `every` completed iterations,
/// replay `n_runs` historical parameter sets as extra non-counted batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ControlSettings {
    pub n_runs: usize,
    pub every: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self { n_runs: 1, every: 5 }
    }
}

/// Search-algorithm selection plus the knobs individual algorithms read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AlgorithmConfig {
    pub name: String,
    pub seed: u64,
    /// Explicit historical row indices for `reproduce`; empty = random pick.
    pub selected_experiments: Vec<usize>,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self { name: "random".into(), seed: 42, selected_experiments: Vec::new() }
    }
}

/// Kind of measured signal. Parsed from instrument class names; a
/// `_simulated` suffix is stripped first, unknown names map to `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Nmr,
    Raman,
    Hplc,
    Generic,
}

impl SignalKind {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        let name = lower.strip_suffix("_simulated").unwrap_or(&lower);
        match name {
            "spinsolvenmrspectrum" | "nmr" => SignalKind::Nmr,
            "ramanspectrum" | "raman" => SignalKind::Raman,
            "agilenthplcchromatogram" | "hplc" => SignalKind::Hplc,
            _ => SignalKind::Generic,
        }
    }
}

/// Payload-free objective discriminant, used as a dispatch-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectiveKey {
    PeakArea,
    IntegrationArea,
    FinalParameter,
    Novelty,
}

/// What to compute from a measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveKind {
    /// Area of the peak nearest `position` (x-units).
    PeakArea { position: f64 },
    /// Trapezoid integral of y over x in `[left, right]`.
    IntegrationArea { left: f64, right: f64 },
    /// Scalar reported directly by the procedure (e.g. simulated yield).
    FinalParameter,
    /// Information score x novelty coefficient against the retained corpus.
    Novelty,
}

/// A parsed objective. `minimize` negates the raw score, so the controller
/// always maximizes.
#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub kind: ObjectiveKind,
    pub minimize: bool,
}

impl Default for Objective {
    fn default() -> Self {
        Self { kind: ObjectiveKind::FinalParameter, minimize: false }
    }
}

impl Objective {
    pub fn key(&self) -> ObjectiveKey {
        match self.kind {
            ObjectiveKind::PeakArea { .. } => ObjectiveKey::PeakArea,
            ObjectiveKind::IntegrationArea { .. } => ObjectiveKey::IntegrationArea,
            ObjectiveKind::FinalParameter => ObjectiveKey::FinalParameter,
            ObjectiveKind::Novelty => ObjectiveKey::Novelty,
        }
    }

    /// Novelty needs the retained-signal corpus; it cannot be scored from a
    /// single signal and is routed around the dispatch table.
    pub fn needs_history(&self) -> bool {
        matches!(self.kind, ObjectiveKind::Novelty)
    }

    /// Column header used in exported CSV history.
    pub fn column_name(&self) -> String {
        format!("{}", self)
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minimize {
            f.write_str("neg-")?;
        }
        match &self.kind {
            ObjectiveKind::PeakArea { position } => {
                write!(f, "spectrum-peak-area-{}", position)
            }
            ObjectiveKind::IntegrationArea { left, right } => {
                write!(f, "spectrum-integration-area-{}..{}", left, right)
            }
            ObjectiveKind::FinalParameter => f.write_str("final-parameter"),
            ObjectiveKind::Novelty => f.write_str("novelty"),
        }
    }
}

impl FromStr for Objective {
    type Err = crate::error::OptimizerError;

    /// Accepts kebab and underscore spellings, with or without the
    /// `spectrum-` prefix: `spectrum-peak-area-350` / `peak_area_350`,
    /// `integration-area-6.1..6.7`, `final-parameter`, `novelty`, each
    /// optionally prefixed with `neg-` / `negative-` to minimize.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        use crate::error::OptimizerError;

        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");

        let (minimize, rest) = if let Some(r) = normalized.strip_prefix("negative-") {
            (true, r)
        } else if let Some(r) = normalized.strip_prefix("neg-") {
            (true, r)
        } else {
            (false, normalized.as_str())
        };
        let rest = rest.strip_prefix("spectrum-").unwrap_or(rest);

        let kind = if rest == "final-parameter" {
            ObjectiveKind::FinalParameter
        } else if rest == "novelty" {
            ObjectiveKind::Novelty
        } else if let Some(tail) = rest.strip_prefix("peak-area-") {
            let position: f64 = tail.parse().map_err(|_| {
                OptimizerError::config(format!("bad peak position in objective '{}'", raw))
            })?;
            ObjectiveKind::PeakArea { position }
        } else if let Some(tail) = rest.strip_prefix("integration-area-") {
            let (l, r) = tail.split_once("..").ok_or_else(|| {
                OptimizerError::config(format!(
                    "integration objective '{}' needs 'left..right'",
                    raw
                ))
            })?;
            let left: f64 = l.parse().map_err(|_| {
                OptimizerError::config(format!("bad left border in objective '{}'", raw))
            })?;
            let right: f64 = r.parse().map_err(|_| {
                OptimizerError::config(format!("bad right border in objective '{}'", raw))
            })?;
            if left >= right {
                return Err(OptimizerError::config(format!(
                    "empty integration window in objective '{}'",
                    raw
                )));
            }
            ObjectiveKind::IntegrationArea { left, right }
        } else {
            return Err(OptimizerError::config(format!("unknown objective '{}'", raw)));
        };

        Ok(Objective { kind, minimize })
    }
}

impl Serialize for Objective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Objective {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
