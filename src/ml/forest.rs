//! Random forest classifier over sparse, non-negative feature vectors.
//!
//! CART trees with Gini impurity, bootstrap sampling, `sqrt(n_features)`
//! candidate features per split and optional balanced class weights. A
//! missing entry in a sparse row is a zero, so at every node each feature
//! splits "zero (and small values) left, larger values right".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rng::SeededRng;
use super::vectorizer::SparseVector;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub balanced_class_weight: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_trees: 200,
            max_depth: 30,
            min_samples_leaf: 1,
            balanced_class_weight: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    n_classes: usize,
    n_features: usize,
    params: ForestParams,
    trees: Vec<DecisionTree>,
}

fn feature_value(row: &SparseVector, feature: usize) -> f64 {
    row.binary_search_by_key(&feature, |&(idx, _)| idx)
        .map(|pos| row[pos].1)
        .unwrap_or(0.0)
}

impl RandomForest {
    /// Fit on rows `x` with class labels `y` in `0..n_classes`
    pub fn fit(
        x: &[SparseVector],
        y: &[usize],
        n_classes: usize,
        n_features: usize,
        params: ForestParams,
    ) -> Self {
        let class_weights = class_weights(y, n_classes, params.balanced_class_weight);
        let max_candidates = ((n_features as f64).sqrt() as usize).max(1);

        let mut rng = SeededRng::new(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let mut tree_rng = rng.fork();

            // Bootstrap: multiplicity of each drawn row becomes part of its weight
            let mut multiplicity = vec![0usize; x.len()];
            for _ in 0..x.len() {
                multiplicity[tree_rng.below(x.len())] += 1;
            }
            let samples: Vec<Sample> = multiplicity
                .iter()
                .enumerate()
                .filter(|(_, &m)| m > 0)
                .map(|(i, &m)| Sample {
                    row: i,
                    weight: class_weights[y[i]] * m as f64,
                })
                .collect();

            let mut builder = TreeBuilder {
                x,
                y,
                n_classes,
                max_candidates,
                params: &params,
                rng: tree_rng,
                nodes: Vec::new(),
            };
            builder.build(samples, 0);
            trees.push(DecisionTree {
                nodes: builder.nodes,
            });
        }

        RandomForest {
            n_classes,
            n_features,
            params,
            trees,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Mean of the per-tree leaf class distributions; sums to 1
    pub fn predict_proba(&self, row: &SparseVector) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        if self.trees.is_empty() {
            return proba;
        }
        for tree in &self.trees {
            for (p, d) in proba.iter_mut().zip(tree.leaf_distribution(row)) {
                *p += d;
            }
        }
        let n = self.trees.len() as f64;
        for p in &mut proba {
            *p /= n;
        }
        proba
    }

    /// Most probable class; lowest index wins ties
    pub fn predict(&self, row: &SparseVector) -> usize {
        argmax(&self.predict_proba(row)).0
    }

    /// Check a deserialized forest can be walked without panicking or looping.
    ///
    /// Children are stored after their parent, so every split must point
    /// strictly forward and inside the tree.
    pub fn validate(&self) -> Result<(), String> {
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {} has no nodes", t));
            }
            for (idx, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Leaf { distribution } => {
                        if distribution.len() != self.n_classes {
                            return Err(format!(
                                "tree {} node {}: distribution has {} entries for {} classes",
                                t,
                                idx,
                                distribution.len(),
                                self.n_classes
                            ));
                        }
                        if distribution.iter().any(|p| !p.is_finite()) {
                            return Err(format!("tree {} node {}: non-finite probability", t, idx));
                        }
                    }
                    Node::Split {
                        feature,
                        left,
                        right,
                        ..
                    } => {
                        if *feature >= self.n_features {
                            return Err(format!(
                                "tree {} node {}: feature {} out of {} features",
                                t, idx, feature, self.n_features
                            ));
                        }
                        for &child in [left, right] {
                            if child <= idx || child >= tree.nodes.len() {
                                return Err(format!(
                                    "tree {} node {}: child {} out of range",
                                    t, idx, child
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// `(index, value)` of the largest entry, first one on ties
pub fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}

fn class_weights(y: &[usize], n_classes: usize, balanced: bool) -> Vec<f64> {
    if !balanced {
        return vec![1.0; n_classes];
    }
    let mut counts = vec![0usize; n_classes];
    for &label in y {
        counts[label] += 1;
    }
    counts
        .iter()
        .map(|&c| {
            if c == 0 {
                0.0
            } else {
                y.len() as f64 / (n_classes as f64 * c as f64)
            }
        })
        .collect()
}

impl DecisionTree {
    fn leaf_distribution(&self, row: &SparseVector) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if feature_value(row, *feature) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

// ============================================================================
// TREE CONSTRUCTION
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Sample {
    row: usize,
    weight: f64,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct TreeBuilder<'a> {
    x: &'a [SparseVector],
    y: &'a [usize],
    n_classes: usize,
    max_candidates: usize,
    params: &'a ForestParams,
    rng: SeededRng,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn class_totals(&self, samples: &[Sample]) -> Vec<f64> {
        let mut totals = vec![0.0; self.n_classes];
        for s in samples {
            totals[self.y[s.row]] += s.weight;
        }
        totals
    }

    fn leaf(&mut self, totals: &[f64]) -> usize {
        let sum: f64 = totals.iter().sum();
        let distribution = if sum > 0.0 {
            totals.iter().map(|t| t / sum).collect()
        } else {
            vec![1.0 / self.n_classes as f64; self.n_classes]
        };
        self.nodes.push(Node::Leaf { distribution });
        self.nodes.len() - 1
    }

    fn build(&mut self, samples: Vec<Sample>, depth: usize) -> usize {
        let totals = self.class_totals(&samples);
        let classes_present = totals.iter().filter(|&&t| t > 0.0).count();

        if depth >= self.params.max_depth
            || classes_present <= 1
            || samples.len() < 2 * self.params.min_samples_leaf.max(1)
        {
            return self.leaf(&totals);
        }

        let Some(best) = self.best_split(&samples, &totals) else {
            return self.leaf(&totals);
        };

        let (left, right): (Vec<Sample>, Vec<Sample>) = samples
            .into_iter()
            .partition(|s| feature_value(&self.x[s.row], best.feature) <= best.threshold);

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: Vec::new(),
        });
        let left_idx = self.build(left, depth + 1);
        let right_idx = self.build(right, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_idx,
            right: right_idx,
        };
        idx
    }

    fn best_split(&mut self, samples: &[Sample], totals: &[f64]) -> Option<BestSplit> {
        // Nonzero entries per feature among this node's samples
        let mut columns: BTreeMap<usize, Vec<(f64, usize)>> = BTreeMap::new();
        for (pos, s) in samples.iter().enumerate() {
            for &(feature, value) in &self.x[s.row] {
                if value != 0.0 {
                    columns.entry(feature).or_default().push((value, pos));
                }
            }
        }

        let mut features: Vec<usize> = columns.keys().copied().collect();
        self.rng.shuffle(&mut features);

        let mut best: Option<BestSplit> = None;
        let mut evaluated = 0;

        for feature in features {
            if evaluated >= self.max_candidates && best.is_some() {
                break;
            }
            let Some(mut column) = columns.remove(&feature) else {
                continue;
            };
            column.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            if let Some(candidate) = self.evaluate_feature(feature, &column, samples, totals) {
                evaluated += 1;
                if best.as_ref().map_or(true, |b| candidate.score > b.score) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Best threshold for one feature. `column` holds the node's nonzero
    /// `(value, sample position)` pairs in ascending value order; every other
    /// sample has value 0 and starts on the left.
    fn evaluate_feature(
        &self,
        feature: usize,
        column: &[(f64, usize)],
        samples: &[Sample],
        totals: &[f64],
    ) -> Option<BestSplit> {
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut right = vec![0.0; self.n_classes];
        for &(_, pos) in column {
            let s = samples[pos];
            right[self.y[s.row]] += s.weight;
        }
        let mut left: Vec<f64> = totals.iter().zip(&right).map(|(t, r)| t - r).collect();

        let mut left_count = samples.len() - column.len();
        let mut right_count = column.len();

        let mut left_sum: f64 = left.iter().sum();
        let mut right_sum: f64 = right.iter().sum();
        let mut left_sq: f64 = left.iter().map(|w| w * w).sum();
        let mut right_sq: f64 = right.iter().map(|w| w * w).sum();

        let mut best: Option<BestSplit> = None;
        let mut consider = |threshold: f64,
                            left_count: usize,
                            right_count: usize,
                            ls: f64,
                            lsq: f64,
                            rs: f64,
                            rsq: f64| {
            if left_count < min_leaf || right_count < min_leaf || ls <= 0.0 || rs <= 0.0 {
                return;
            }
            // Maximizing this is minimizing weighted Gini impurity
            let score = lsq / ls + rsq / rs;
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(BestSplit {
                    feature,
                    threshold,
                    score,
                });
            }
        };

        // Zeros left, every nonzero right
        if let Some(&(first, _)) = column.first() {
            consider(
                first / 2.0,
                left_count,
                right_count,
                left_sum,
                left_sq,
                right_sum,
                right_sq,
            );
        }

        let mut i = 0;
        while i < column.len() {
            let value = column[i].0;
            // Move every sample with this value from right to left
            while i < column.len() && column[i].0 == value {
                let s = samples[column[i].1];
                let class = self.y[s.row];
                let w = s.weight;

                left_sq += (left[class] + w).powi(2) - left[class].powi(2);
                right_sq += (right[class] - w).powi(2) - right[class].powi(2);
                left[class] += w;
                right[class] -= w;
                left_sum += w;
                right_sum -= w;
                left_count += 1;
                right_count -= 1;
                i += 1;
            }
            if i < column.len() {
                let threshold = (value + column[i].0) / 2.0;
                consider(
                    threshold,
                    left_count,
                    right_count,
                    left_sum,
                    left_sq,
                    right_sum,
                    right_sq,
                );
            }
        }

        best
    }
}
