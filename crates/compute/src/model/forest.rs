//! Isolation forest.
//!
//! Random axis-aligned split trees grown on sub-samples. Outliers are
//! isolated in fewer splits, so their average path length is short.
//! The decision score is `0.5 - 2^(-E[h(x)] / c(psi))`, which lies in
//! `[-0.5, 0.5]` and is negative for outliers.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            sample_size: 256,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
enum TreeNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<TreeNode>,
}

impl IsolationTree {
    fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                TreeNode::Leaf { size } => return depth + average_path_length(*size),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
}

impl IsolationForest {
    /// Fit on row-major samples. All rows must share one finite dimension.
    pub fn fit(samples: &[Vec<f64>], params: &ForestParams) -> Result<Self, ComputeError> {
        if samples.len() < 2 {
            return Err(ComputeError::Training(format!(
                "need at least 2 samples, got {}",
                samples.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(ComputeError::Training("n_trees must be > 0".into()));
        }
        let n_features = samples[0].len();
        if n_features == 0 {
            return Err(ComputeError::Training("samples have no features".into()));
        }
        for row in samples {
            if row.len() != n_features {
                return Err(ComputeError::DimensionMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(ComputeError::Training("non-finite training value".into()));
            }
        }

        let psi = params.sample_size.clamp(2, samples.len());
        let height_limit = (psi as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_trees)
            .map(|_| {
                let rows = index::sample(&mut rng, samples.len(), psi).into_vec();
                let mut nodes = Vec::new();
                grow(&mut nodes, samples, rows, 0, height_limit, &mut rng);
                IsolationTree { nodes }
            })
            .collect();

        Ok(Self {
            trees,
            sample_size: psi,
            n_features,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean path length across trees.
    pub fn path_length(&self, x: &[f64]) -> Result<f64, ComputeError> {
        if x.len() != self.n_features {
            return Err(ComputeError::DimensionMismatch {
                expected: self.n_features,
                actual: x.len(),
            });
        }
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        Ok(total / self.trees.len() as f64)
    }

    /// Anomaly score in `(0, 1]`; close to 1 means easily isolated.
    pub fn anomaly_score(&self, x: &[f64]) -> Result<f64, ComputeError> {
        let h = self.path_length(x)?;
        Ok(2f64.powf(-h / average_path_length(self.sample_size)))
    }

    /// Decision score in `[-0.5, 0.5]`; negative means outlier.
    pub fn decision(&self, x: &[f64]) -> Result<f64, ComputeError> {
        Ok(0.5 - self.anomaly_score(x)?)
    }

    /// Structural check for artifacts read from disk.
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.trees.is_empty() || self.sample_size < 2 || self.n_features == 0 {
            return Err(ComputeError::Artifact("empty or degenerate forest".into()));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ComputeError::Artifact(format!("tree {t} has no nodes")));
            }
            let n = tree.nodes.len();
            for (idx, node) in tree.nodes.iter().enumerate() {
                if let TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } = node
                {
                    // Children always follow their parent, so the walk in
                    // `path_length` cannot revisit a node.
                    let children_ok =
                        *left > idx && *right > idx && left != right && *left < n && *right < n;
                    if *feature >= self.n_features || !children_ok || !threshold.is_finite() {
                        return Err(ComputeError::Artifact(format!(
                            "tree {t} has a malformed split at node {idx}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Grow one subtree over `rows` and return its node index.
fn grow(
    nodes: &mut Vec<TreeNode>,
    samples: &[Vec<f64>],
    rows: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> usize {
    let id = nodes.len();
    nodes.push(TreeNode::Leaf { size: rows.len() });
    if depth >= height_limit || rows.len() <= 1 {
        return id;
    }

    // Only features that still vary within this node can split it.
    let n_features = samples[rows[0]].len();
    let candidates: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(samples[r][f]), hi.max(samples[r][f]))
            });
            (lo < hi).then_some((f, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return id;
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| samples[r][feature] < threshold);

    let left = grow(nodes, samples, left_rows, depth + 1, height_limit, rng);
    let right = grow(nodes, samples, right_rows, depth + 1, height_limit, rng);
    nodes[id] = TreeNode::Split {
        feature,
        threshold,
        left,
        right,
    };
    id
}

/// Expected path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
