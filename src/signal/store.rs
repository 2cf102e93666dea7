//! Ordered corpus of retained signals.
//!
//! Novelty scoring compares each new signal against everything measured
//! before it, so the store preserves acquisition order and keeps the
//! expanded region points of every signal alongside the raw arrays (the
//! points are computed once at insert time with the store's detection
//! settings).
//!
//! Persistence is one JSON file per signal plus a manifest kept by the run
//! snapshot; `load` rebuilds the corpus from the manifest paths in order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::peaks::{self, RegionDetection};
use super::Signal;

pub struct SignalStore {
    detection: RegionDetection,
    signals: Vec<Signal>,
    /// Expanded region points per signal, same index as `signals`.
    point_lists: Vec<Vec<i64>>,
}

impl SignalStore {
    pub fn new(detection: RegionDetection) -> Self {
        Self { detection, signals: Vec::new(), point_lists: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Append a signal, computing its region points. Returns its index.
    pub fn insert(&mut self, signal: Signal) -> usize {
        let regions = peaks::find_regions(&signal, &self.detection);
        let points = peaks::expand_region_points(&signal, &regions);
        self.signals.push(signal);
        self.point_lists.push(points);
        self.signals.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Signal> {
        self.signals.get(index)
    }

    pub fn last(&self) -> Option<&Signal> {
        self.signals.last()
    }

    /// Look a signal up by the iteration and batch that produced it.
    pub fn find(&self, iteration: usize, batch_id: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| {
            s.iteration == Some(iteration) && s.batch_id.as_deref() == Some(batch_id)
        })
    }

    pub fn point_lists(&self) -> &[Vec<i64>] {
        &self.point_lists
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    /// Write every signal as `signal_NNNN.json` under `dir`, returning the
    /// paths in acquisition order (the snapshot stores them as a manifest).
    pub fn save_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating signal dir {}", dir.display()))?;
        let mut paths = Vec::with_capacity(self.signals.len());
        for (i, signal) in self.signals.iter().enumerate() {
            let path = dir.join(format!("signal_{:04}.json", i));
            let json = serde_json::to_string_pretty(signal)
                .context("serializing signal")?;
            fs::write(&path, json)
                .with_context(|| format!("writing {}", path.display()))?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Rebuild a corpus from saved signal files, preserving the given order.
    pub fn load(detection: RegionDetection, paths: &[PathBuf]) -> Result<Self> {
        let mut store = Self::new(detection);
        for path in paths {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let signal: Signal = serde_json::from_str(&json)
                .with_context(|| format!("parsing {}", path.display()))?;
            store.insert(signal);
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalKind;

    fn flat_signal(tag: usize) -> Signal {
        let x: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
        let y = vec![0.0; 50];
        Signal::new(SignalKind::Generic, x, y)
            .unwrap()
            .with_provenance(tag, "batch 1")
    }

    fn bump_signal(center: f64) -> Signal {
        let x: Vec<f64> = (0..1001).map(|i| i as f64 * 0.01).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| {
                let d = (xi - center).abs();
                if d < 0.5 { 2.0 * (1.0 - d / 0.5) } else { 0.0 }
            })
            .collect();
        Signal::new(SignalKind::Generic, x, y).unwrap()
    }

    fn magnitude_detection() -> RegionDetection {
        RegionDetection { magnitude: true, derivative: false, ..RegionDetection::default() }
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut store = SignalStore::new(RegionDetection::default());
        for i in 1..=3 {
            let idx = store.insert(flat_signal(i));
            assert_eq!(idx, i - 1);
        }
        assert_eq!(store.len(), 3);

        let iterations: Vec<_> = store.iter().map(|s| s.iteration.unwrap()).collect();
        assert_eq!(iterations, vec![1, 2, 3]);
    }

    #[test]
    fn test_point_lists_computed_at_insert() {
        let mut store = SignalStore::new(magnitude_detection());
        store.insert(bump_signal(4.5));
        let lists = store.point_lists();
        assert_eq!(lists.len(), 1);
        assert!(!lists[0].is_empty(), "bump should produce region points");

        // All points cluster around the bump center (4500 in milli-units)
        for &p in &lists[0] {
            assert!((p - 4500).abs() < 1000, "got {}", p);
        }
    }

    #[test]
    fn test_find_by_provenance() {
        let mut store = SignalStore::new(RegionDetection::default());
        store.insert(flat_signal(1));
        store.insert(flat_signal(2));

        assert!(store.find(2, "batch 1").is_some());
        assert!(store.find(2, "batch 9").is_none());
        assert!(store.find(5, "batch 1").is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = std::env::temp_dir().join("retort_store_test");
        let _ = fs::remove_dir_all(&dir);

        let mut store = SignalStore::new(magnitude_detection());
        store.insert(bump_signal(3.0).with_provenance(1, "batch 1"));
        store.insert(bump_signal(6.0).with_provenance(2, "batch 1"));

        let paths = store.save_all(&dir).unwrap();
        assert_eq!(paths.len(), 2);

        let reloaded = SignalStore::load(magnitude_detection(), &paths).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(0).unwrap().iteration, Some(1));
        assert_eq!(reloaded.get(1).unwrap().iteration, Some(2));
        assert_eq!(reloaded.point_lists(), store.point_lists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
