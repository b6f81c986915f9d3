use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tfidf::{SparseVector, sparse_get};

/// Random-forest hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// Divides each feature by its standard deviation. No centring, so rows stay sparse.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    scale: Vec<f64>,
}

impl Scaler {
    pub fn fit(rows: &[SparseVector], features: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut sum = vec![0.0f64; features];
        let mut sum_sq = vec![0.0f64; features];
        for row in rows {
            for &(feature, value) in row {
                sum[feature] += value;
                sum_sq[feature] += value * value;
            }
        }
        let scale = sum
            .iter()
            .zip(&sum_sq)
            .map(|(&s, &sq)| {
                let mean = s / n;
                let std = (sq / n - mean * mean).max(0.0).sqrt();
                if std > 0.0 { std } else { 1.0 }
            })
            .collect();
        Self { scale }
    }

    pub fn transform(&self, row: &[(usize, f64)]) -> SparseVector {
        row.iter()
            .map(|&(feature, value)| (feature, value / self.scale[feature]))
            .collect()
    }
}

/// A decision tree stored as parallel arrays.
///
/// Node 0 is the root, so a `left` of 0 marks a leaf. `value` holds the fraction of
/// positive training samples that reached the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatTree {
    feature: Vec<usize>,
    threshold: Vec<f64>,
    left: Vec<usize>,
    right: Vec<usize>,
    value: Vec<f64>,
}

impl FlatTree {
    fn add_node(&mut self) -> usize {
        self.feature.push(0);
        self.threshold.push(0.0);
        self.left.push(0);
        self.right.push(0);
        self.value.push(0.0);
        self.value.len() - 1
    }

    pub fn node_count(&self) -> usize {
        self.value.len()
    }

    /// Probability of the positive class.
    pub fn predict(&self, row: &[(usize, f64)]) -> f64 {
        if self.value.is_empty() {
            return 0.0;
        }
        let mut node = 0;
        while self.left[node] != 0 {
            node = if sparse_get(row, self.feature[node]) <= self.threshold[node] {
                self.left[node]
            } else {
                self.right[node]
            };
        }
        self.value[node]
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

/// Best Gini split over √(features) randomly drawn non-constant features.
fn best_split(
    rows: &[SparseVector],
    labels: &[bool],
    samples: &[usize],
    features: usize,
    params: &ForestParams,
    rng: &mut StdRng,
) -> Option<Split> {
    let max_features = ((features as f64).sqrt() as usize).max(1);
    let min_leaf = params.min_samples_leaf.max(1);
    let n = samples.len();

    // Features absent from every sample are constant zero here.
    let mut candidates: Vec<usize> = samples
        .iter()
        .flat_map(|&i| rows[i].iter().map(|&(f, _)| f))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();
    candidates.shuffle(rng);

    let mut best: Option<Split> = None;
    let mut visited = 0;
    for feature in candidates {
        if visited >= max_features {
            break;
        }
        let mut values: Vec<(f64, bool)> = samples
            .iter()
            .map(|&i| (sparse_get(&rows[i], feature), labels[i]))
            .collect();
        values.sort_by(|a, b| a.0.total_cmp(&b.0));
        if values[0].0 == values[n - 1].0 {
            continue;
        }
        visited += 1;

        let total_pos = values.iter().filter(|(_, label)| *label).count();
        let mut left_pos = 0;
        for k in 0..n - 1 {
            if values[k].1 {
                left_pos += 1;
            }
            if values[k].0 == values[k + 1].0 {
                continue;
            }
            let left_n = k + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let impurity = (left_n as f64 * gini(left_pos, left_n)
                + right_n as f64 * gini(total_pos - left_pos, right_n))
                / n as f64;
            if best.as_ref().is_none_or(|b| impurity < b.impurity) {
                best = Some(Split {
                    feature,
                    threshold: (values[k].0 + values[k + 1].0) / 2.0,
                    impurity,
                });
            }
        }
    }
    best
}

fn grow_tree(
    rows: &[SparseVector],
    labels: &[bool],
    samples: Vec<usize>,
    features: usize,
    params: &ForestParams,
    rng: &mut StdRng,
) -> FlatTree {
    let mut tree = FlatTree::default();
    let root = tree.add_node();
    let mut stack = vec![(root, samples)];

    while let Some((node, samples)) = stack.pop() {
        let positives = samples.iter().filter(|&&i| labels[i]).count();
        tree.value[node] = positives as f64 / samples.len().max(1) as f64;

        let pure = positives == 0 || positives == samples.len();
        if pure || samples.len() < params.min_samples_split.max(2) {
            continue;
        }
        let Some(split) = best_split(rows, labels, &samples, features, params, rng) else {
            continue;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| sparse_get(&rows[i], split.feature) <= split.threshold);
        let left_node = tree.add_node();
        let right_node = tree.add_node();
        tree.feature[node] = split.feature;
        tree.threshold[node] = split.threshold;
        tree.left[node] = left_node;
        tree.right[node] = right_node;
        stack.push((right_node, right));
        stack.push((left_node, left));
    }
    tree
}

/// Bagged Gini trees trained on scaled features.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<FlatTree>,
    scaler: Scaler,
}

impl RandomForest {
    /// Fits one tree per estimator on a bootstrap sample; trees are grown in parallel
    /// with a seed derived from `params.seed` and the tree's position.
    pub fn fit(rows: &[SparseVector], labels: &[bool], features: usize, params: &ForestParams) -> Self {
        let scaler = Scaler::fit(rows, features);
        let scaled: Vec<SparseVector> = rows.iter().map(|r| scaler.transform(r)).collect();
        let n = scaled.len();
        if n == 0 {
            return Self {
                trees: Vec::new(),
                scaler,
            };
        }

        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64));
                let samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                grow_tree(&scaled, labels, samples, features, params, &mut rng)
            })
            .collect();

        Self { trees, scaler }
    }

    /// Mean positive probability over trees, on an unscaled row.
    pub fn predict_proba(&self, row: &[(usize, f64)]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let scaled = self.scaler.transform(row);
        self.trees.iter().map(|t| t.predict(&scaled)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, row: &[(usize, f64)]) -> bool {
        self.predict_proba(row) > 0.5
    }

    /// Folds the scaler into the split thresholds, leaving a forest that reads raw rows.
    pub fn compile(&self) -> CompiledForest {
        let trees = self
            .trees
            .iter()
            .map(|tree| {
                let mut compiled = tree.clone();
                for node in 0..compiled.node_count() {
                    if compiled.left[node] != 0 {
                        compiled.threshold[node] *= self.scaler.scale[compiled.feature[node]];
                    }
                }
                compiled
            })
            .collect();
        CompiledForest { trees }
    }
}

/// Inference-only forest over unscaled TF-IDF rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledForest {
    trees: Vec<FlatTree>,
}

impl CompiledForest {
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_proba(&self, row: &[(usize, f64)]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, row: &[(usize, f64)]) -> bool {
        self.predict_proba(row) > 0.5
    }
}
