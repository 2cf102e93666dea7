//! Run state: snapshots, resume, and history import/export.
//!
//! The controller snapshots [`OptimizationState`] at every iteration
//! boundary. A snapshot plus the saved signal files is everything a
//! resumed process needs: records rebuild the algorithm's view of
//! history, and the stored call/pick counters replay the RNG-dependent
//! decisions exactly.
//!
//! Snapshots are pretty-printed JSON so a run directory stays greppable.
//! History also round-trips through a plain CSV (one column per
//! parameter plus the objective column) for seeding a fresh run from
//! earlier campaigns.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::control::ControlLogEntry;
use crate::types::{IterationRecord, Phase};

/// 64-bit FNV-1a. Used for config digests and value-derived noise seeds;
/// stable across platforms and runs, unlike `DefaultHasher`.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Everything that survives a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationState {
    pub phase: Phase,
    /// 1-based number of the next iteration to run.
    pub iteration: usize,
    pub records: Vec<IterationRecord>,
    pub control_log: Vec<ControlLogEntry>,
    /// How many times the algorithm has been asked to suggest.
    pub algorithm_calls: u64,
    /// How many times the control scheduler has picked history rows.
    pub control_picks: u64,
    /// Saved signal files in insertion order, relative to the run dir.
    pub signal_files: Vec<String>,
    /// Digest of the configuration this state belongs to.
    pub config_digest: u64,
    /// Set once the run ends, with the reason.
    pub terminated: Option<String>,
}

impl OptimizationState {
    pub fn new(config_digest: u64) -> Self {
        Self {
            phase: Phase::Idle,
            iteration: 1,
            records: Vec::new(),
            control_log: Vec::new(),
            algorithm_calls: 0,
            control_picks: 0,
            signal_files: Vec::new(),
            config_digest,
            terminated: None,
        }
    }

    /// Iterations fully finished so far.
    pub fn completed(&self) -> usize {
        self.iteration.saturating_sub(1)
    }

    /// Best complete record by result. NaN results never win.
    pub fn best(&self) -> Option<&IterationRecord> {
        self.records
            .iter()
            .filter(|r| r.result.is_some_and(|v| v.is_finite()))
            .max_by(|a, b| {
                let (x, y) = (a.result.unwrap_or(f64::MIN), b.result.unwrap_or(f64::MIN));
                x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing run state")?;
        fs::write(path, json)
            .with_context(|| format!("writing state to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading state from {}", path.display()))?;
        let state: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing state from {}", path.display()))?;
        Ok(state)
    }

    /// Write completed records as CSV: one column per parameter in the
    /// given order, then the objective column, values at 4 decimals.
    pub fn export_csv(
        &self,
        names: &[String],
        objective_column: &str,
        path: &Path,
    ) -> anyhow::Result<()> {
        let mut out = String::new();
        out.push_str(&names.join(","));
        out.push(',');
        out.push_str(objective_column);
        out.push('\n');

        for record in self.records.iter().filter(|r| r.is_complete()) {
            let mut cells = Vec::with_capacity(names.len() + 1);
            for name in names {
                match record.values.get(name) {
                    Some(v) => cells.push(format!("{:.4}", v)),
                    None => bail!("{} carries no value for '{}'", record.batch_id, name),
                }
            }
            if let Some(result) = record.result {
                cells.push(format!("{:.4}", result));
            }
            out.push_str(&cells.join(","));
            out.push('\n');
        }

        fs::write(path, out)
            .with_context(|| format!("writing history to {}", path.display()))?;
        Ok(())
    }

    /// Read a history CSV back into seed records (iteration 0, batch ids
    /// `seed 1..`). Extra columns are ignored; missing ones fail.
    pub fn seed_from_csv(
        path: &Path,
        names: &[String],
        objective_column: &str,
    ) -> anyhow::Result<Vec<IterationRecord>> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading history from {}", path.display()))?;
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());

        let header = match lines.next() {
            Some(h) => h,
            None => bail!("history file {} is empty", path.display()),
        };
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &str| columns.iter().position(|c| *c == name);

        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            match find(name) {
                Some(i) => indices.push(i),
                None => bail!("history file lacks a '{}' column", name),
            }
        }
        let result_index = match find(objective_column) {
            Some(i) => i,
            None => bail!("history file lacks the objective column '{}'", objective_column),
        };

        let mut records = Vec::new();
        for (row, line) in lines.enumerate() {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let cell = |i: usize| -> anyhow::Result<f64> {
                let text = cells
                    .get(i)
                    .with_context(|| format!("row {} is short", row + 1))?;
                text.parse::<f64>()
                    .with_context(|| format!("row {}: '{}' is not a number", row + 1, text))
            };

            let mut values = BTreeMap::new();
            for (name, &i) in names.iter().zip(&indices) {
                values.insert(name.clone(), cell(i)?);
            }
            records.push(IterationRecord {
                iteration: 0,
                batch_id: format!("seed {}", row + 1),
                values,
                result: Some(cell(result_index)?),
            });
        }
        Ok(records)
    }
}
