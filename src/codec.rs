//! Parameter codec: records on one side, matrices on the other.
//!
//! Algorithms see flat `f64` matrices; the rest of the engine works with
//! named parameter maps. The codec owns the translation and the invariants
//! that make it safe:
//!
//! - a single canonical column order (parameter names, sorted) used for
//!   every matrix, bounds row and CSV column alike
//! - only complete records (scored ones) are packed into matrices
//! - constrained parameters are resolved after decoding, in an order fixed
//!   by a topological sort of their reference graph, so chained references
//!   always see their inputs already resolved
//!
//! A constrained value landing outside its declared bounds invalidates only
//! the batch being decoded, never the run.

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, Array2, ArrayView2};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::error::{OptimizerError, Result};
use crate::types::{batch_id, Batch, ConstrainedParameter, IterationRecord, ParameterSpec};

pub struct ParamCodec {
    /// Searched parameters, sorted by name. Column d of every matrix is
    /// `specs[d]`.
    specs: Vec<ParameterSpec>,
    /// Derived parameters in resolution order.
    constrained: Vec<ConstrainedParameter>,
}

impl ParamCodec {
    pub fn new(
        mut specs: Vec<ParameterSpec>,
        constrained: Vec<ConstrainedParameter>,
    ) -> Result<Self> {
        if specs.is_empty() {
            return Err(OptimizerError::config("need at least one tunable parameter"));
        }
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in specs.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(OptimizerError::config(format!(
                    "duplicate parameter '{}'",
                    pair[0].name
                )));
            }
        }
        for c in &constrained {
            if specs.iter().any(|s| s.name == c.name) {
                return Err(OptimizerError::config(format!(
                    "'{}' is both searched and constrained",
                    c.name
                )));
            }
        }

        let constrained = sort_constrained(&specs, constrained)?;
        Ok(Self { specs, constrained })
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn ndim(&self) -> usize {
        self.specs.len()
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    /// Bounds matrix, one `[min, max]` row per searched parameter.
    pub fn bounds(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.specs.len(), 2), |(d, j)| {
            if j == 0 {
                self.specs[d].min
            } else {
                self.specs[d].max
            }
        })
    }

    /// Pack complete records into algorithm matrices. `window` keeps only
    /// the most recent rows; `None` keeps everything.
    pub fn matrices(
        &self,
        records: &[IterationRecord],
        window: Option<usize>,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        let complete: Vec<&IterationRecord> =
            records.iter().filter(|r| r.is_complete()).collect();
        let skip = match window {
            Some(k) if complete.len() > k => complete.len() - k,
            _ => 0,
        };
        let rows = &complete[skip..];

        let mut params = Array2::zeros((rows.len(), self.specs.len()));
        let mut results = Array1::zeros(rows.len());
        for (i, record) in rows.iter().enumerate() {
            for (d, spec) in self.specs.iter().enumerate() {
                let value = record.values.get(&spec.name).ok_or_else(|| {
                    OptimizerError::Fatal(anyhow::anyhow!(
                        "record {} (iteration {}) lacks parameter '{}'",
                        record.batch_id,
                        record.iteration,
                        spec.name
                    ))
                })?;
                params[[i, d]] = *value;
            }
            // is_complete() filtered above
            results[i] = record.result.unwrap_or(f64::NAN);
        }
        Ok((params, results))
    }

    /// Turn suggestion rows into batches with ids starting at
    /// `"batch {start}"`. Constraint violations fail individual batches.
    pub fn decode_rows(
        &self,
        rows: ArrayView2<'_, f64>,
        start: usize,
    ) -> Vec<Result<Batch>> {
        rows.rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let mut batch = Batch::new(batch_id(start + i));
                for (d, spec) in self.specs.iter().enumerate() {
                    batch.values.insert(spec.name.clone(), row[d]);
                }
                self.resolve_constrained(&mut batch)?;
                Ok(batch)
            })
            .collect()
    }

    /// Batch 1 built from nominal values; the first iteration runs the
    /// procedure unmodified.
    pub fn nominal_batch(&self) -> Result<Batch> {
        let mut batch = Batch::new(batch_id(1));
        for spec in &self.specs {
            batch.values.insert(spec.name.clone(), spec.nominal);
        }
        self.resolve_constrained(&mut batch)?;
        Ok(batch)
    }

    fn resolve_constrained(&self, batch: &mut Batch) -> Result<()> {
        for c in &self.constrained {
            let mut sum = 0.0;
            for r in &c.refs {
                // Referenced values exist: new() checked names, topo order
                // guarantees earlier constrained ones are already in place
                sum += batch.values.get(r).copied().ok_or_else(|| {
                    OptimizerError::Fatal(anyhow::anyhow!(
                        "unresolved reference '{}' while computing '{}'",
                        r,
                        c.name
                    ))
                })?;
            }
            let value = c.target - sum;
            if value < c.min || value > c.max {
                return Err(OptimizerError::ConstraintViolation {
                    batch_id: batch.id.clone(),
                    param: c.name.clone(),
                    value,
                    min: c.min,
                    max: c.max,
                });
            }
            batch.values.insert(c.name.clone(), value);
        }
        Ok(())
    }
}

/// Validate references and order constrained parameters so dependencies
/// resolve first.
fn sort_constrained(
    specs: &[ParameterSpec],
    constrained: Vec<ConstrainedParameter>,
) -> Result<Vec<ConstrainedParameter>> {
    let index: HashMap<&str, usize> = constrained
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();
    if index.len() != constrained.len() {
        return Err(OptimizerError::config("duplicate constrained parameter name"));
    }

    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<_> = (0..constrained.len()).map(|i| graph.add_node(i)).collect();

    for (i, c) in constrained.iter().enumerate() {
        for r in &c.refs {
            if let Some(&dep) = index.get(r.as_str()) {
                // dependency before dependent
                graph.add_edge(nodes[dep], nodes[i], ());
            } else if !specs.iter().any(|s| s.name == *r) {
                return Err(OptimizerError::config(format!(
                    "constrained parameter '{}' references unknown '{}'",
                    c.name, r
                )));
            }
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let name = &constrained[graph[cycle.node_id()]].name;
        OptimizerError::config(format!(
            "cyclic constraint references involving '{}'",
            name
        ))
    })?;

    let mut by_index: BTreeMap<usize, ConstrainedParameter> =
        constrained.into_iter().enumerate().collect();
    let mut sorted = Vec::with_capacity(by_index.len());
    for node in order {
        let i = graph[node];
        if let Some(c) = by_index.remove(&i) {
            sorted.push(c);
        }
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn spec(name: &str, min: f64, max: f64, nominal: f64) -> ParameterSpec {
        ParameterSpec::new(name, min, max, nominal)
    }

    fn record(iteration: usize, batch: &str, pairs: &[(&str, f64)], result: Option<f64>) -> IterationRecord {
        IterationRecord {
            iteration,
            batch_id: batch.into(),
            values: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            result,
        }
    }

    #[test]
    fn test_column_order_is_sorted_names() {
        let codec = ParamCodec::new(
            vec![
                spec("z-last", 0.0, 1.0, 0.5),
                spec("a-first", 0.0, 1.0, 0.5),
                spec("m-middle", 0.0, 1.0, 0.5),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(codec.names(), vec!["a-first", "m-middle", "z-last"]);
        assert_eq!(codec.ndim(), 3);
    }

    #[test]
    fn test_duplicate_and_empty_specs_rejected() {
        assert!(ParamCodec::new(vec![], vec![]).is_err());

        let dup = ParamCodec::new(
            vec![spec("a", 0.0, 1.0, 0.5), spec("a", 0.0, 2.0, 1.0)],
            vec![],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_bounds_matrix() {
        let codec = ParamCodec::new(
            vec![spec("a", 1.0, 2.0, 1.5), spec("b", 10.0, 20.0, 15.0)],
            vec![],
        )
        .unwrap();
        assert_eq!(codec.bounds(), arr2(&[[1.0, 2.0], [10.0, 20.0]]));
    }

    #[test]
    fn test_matrices_skip_incomplete_and_window() {
        let codec =
            ParamCodec::new(vec![spec("a", 0.0, 10.0, 5.0)], vec![]).unwrap();
        let records = vec![
            record(1, "batch 1", &[("a", 1.0)], Some(0.1)),
            record(2, "batch 1", &[("a", 2.0)], None), // unscored, dropped
            record(3, "batch 1", &[("a", 3.0)], Some(0.3)),
            record(4, "batch 1", &[("a", 4.0)], Some(0.4)),
        ];

        let (params, results) = codec.matrices(&records, None).unwrap();
        assert_eq!(params, arr2(&[[1.0], [3.0], [4.0]]));
        assert_eq!(results.to_vec(), vec![0.1, 0.3, 0.4]);

        let (windowed, wres) = codec.matrices(&records, Some(2)).unwrap();
        assert_eq!(windowed, arr2(&[[3.0], [4.0]]));
        assert_eq!(wres.to_vec(), vec![0.3, 0.4]);
    }

    #[test]
    fn test_constrained_resolution() {
        // volume_c = 50 - (a + b) with a=10, b=15 -> 25
        let codec = ParamCodec::new(
            vec![spec("a", 0.0, 20.0, 10.0), spec("b", 0.0, 20.0, 15.0)],
            vec![ConstrainedParameter {
                name: "c".into(),
                target: 50.0,
                refs: vec!["a".into(), "b".into()],
                min: 0.0,
                max: 50.0,
            }],
        )
        .unwrap();

        let batch = codec.nominal_batch().unwrap();
        assert_eq!(batch.values["c"], 25.0);
    }

    #[test]
    fn test_chained_constraints_resolve_in_order() {
        // d depends on c which depends on a; declaration order is reversed
        let codec = ParamCodec::new(
            vec![spec("a", 0.0, 20.0, 10.0)],
            vec![
                ConstrainedParameter {
                    name: "d".into(),
                    target: 30.0,
                    refs: vec!["c".into()],
                    min: -30.0,
                    max: 30.0,
                },
                ConstrainedParameter {
                    name: "c".into(),
                    target: 50.0,
                    refs: vec!["a".into()],
                    min: 0.0,
                    max: 50.0,
                },
            ],
        )
        .unwrap();

        let batch = codec.nominal_batch().unwrap();
        assert_eq!(batch.values["c"], 40.0); // 50 - 10
        assert_eq!(batch.values["d"], -10.0); // 30 - 40
    }

    #[test]
    fn test_unknown_ref_rejected() {
        let err = ParamCodec::new(
            vec![spec("a", 0.0, 1.0, 0.5)],
            vec![ConstrainedParameter {
                name: "c".into(),
                target: 1.0,
                refs: vec!["ghost".into()],
                min: 0.0,
                max: 1.0,
            }],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_cyclic_refs_rejected() {
        let err = ParamCodec::new(
            vec![spec("a", 0.0, 1.0, 0.5)],
            vec![
                ConstrainedParameter {
                    name: "c1".into(),
                    target: 1.0,
                    refs: vec!["c2".into()],
                    min: -10.0,
                    max: 10.0,
                },
                ConstrainedParameter {
                    name: "c2".into(),
                    target: 1.0,
                    refs: vec!["c1".into()],
                    min: -10.0,
                    max: 10.0,
                },
            ],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_violation_fails_only_that_batch() {
        let codec = ParamCodec::new(
            vec![spec("a", 0.0, 60.0, 10.0)],
            vec![ConstrainedParameter {
                name: "c".into(),
                target: 50.0,
                refs: vec!["a".into()],
                min: 0.0,
                max: 50.0,
            }],
        )
        .unwrap();

        // Row 0 resolves to c=30 (fine); row 1 to c=-5 (violation)
        let rows = arr2(&[[20.0], [55.0]]);
        let decoded = codec.decode_rows(rows.view(), 1);
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_ok());
        let err = decoded[1].as_ref().unwrap_err();
        assert!(err.is_batch_local(), "got {}", err);
    }

    #[test]
    fn test_decode_batch_ids_start_offset() {
        let codec = ParamCodec::new(vec![spec("a", 0.0, 1.0, 0.5)], vec![]).unwrap();
        let rows = arr2(&[[0.1], [0.2]]);
        let decoded = codec.decode_rows(rows.view(), 2);
        assert_eq!(decoded[0].as_ref().unwrap().id, "batch 2");
        assert_eq!(decoded[1].as_ref().unwrap().id, "batch 3");
    }
}
