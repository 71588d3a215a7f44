//! Scoring for LightGBM text dumps of regression models.

use crate::model::{check_input, check_output, ModelError, Regressor};
use anyhow::{anyhow, bail, Result};
use std::iter::Peekable;
use std::str::{FromStr, Lines};

#[derive(Debug)]
struct Tree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
}

impl Tree {
    fn from_lines(lines: &mut Peekable<Lines<'_>>) -> Result<Self> {
        let mut num_leaves: Option<usize> = None;
        let mut split_features = Vec::new();
        let mut thresholds = Vec::new();
        let mut decision_types: Vec<u8> = Vec::new();
        let mut left_child = Vec::new();
        let mut right_child = Vec::new();
        let mut leaf_values = Vec::new();

        while let Some(peeked) = lines.peek() {
            let peeked = peeked.trim();
            if peeked.starts_with("Tree=") || peeked == "end of trees" {
                break;
            }
            let Some(line) = lines.next().map(str::trim) else {
                break;
            };

            if line.starts_with("num_leaves=") {
                num_leaves = Some(parse_value(line, "num_leaves=")?);
            } else if line.starts_with("split_feature=") {
                split_features = parse_array(line, "split_feature=")?;
            } else if line.starts_with("threshold=") {
                thresholds = parse_array(line, "threshold=")?;
            } else if line.starts_with("decision_type=") {
                decision_types = parse_array(line, "decision_type=")?;
            } else if line.starts_with("left_child=") {
                left_child = parse_array(line, "left_child=")?;
            } else if line.starts_with("right_child=") {
                right_child = parse_array(line, "right_child=")?;
            } else if line.starts_with("leaf_value=") {
                leaf_values = parse_array(line, "leaf_value=")?;
            }
        }

        let internal_nodes = split_features.len();
        if thresholds.len() != internal_nodes
            || left_child.len() != internal_nodes
            || right_child.len() != internal_nodes
        {
            bail!("tree definition invalid: split/child/threshold length mismatch");
        }
        if decision_types.iter().any(|d| d & 1 == 1) {
            bail!("categorical splits are not supported");
        }

        let declared_leaves = num_leaves.unwrap_or(leaf_values.len());
        if declared_leaves == 0 || declared_leaves != leaf_values.len() {
            bail!(
                "tree leaf count mismatch: expected {declared_leaves}, found {}",
                leaf_values.len()
            );
        }

        let node_in_range = |child: &i32| {
            if *child < 0 {
                ((-child - 1) as usize) < leaf_values.len()
            } else {
                (*child as usize) < internal_nodes
            }
        };
        if !left_child.iter().chain(&right_child).all(node_in_range) {
            bail!("tree child index out of range");
        }

        Ok(Self {
            split_features,
            thresholds,
            left_child,
            right_child,
            leaf_values,
        })
    }

    fn max_feature(&self) -> Option<usize> {
        self.split_features.iter().copied().max()
    }

    // Leaf values in the text dump already include shrinkage.
    fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values[0];
        }

        let mut node_idx = 0usize;
        // Bounded by node count; a malformed cycle falls out as 0.0.
        for _ in 0..=self.split_features.len() {
            let feature_value = features
                .get(self.split_features[node_idx])
                .copied()
                .unwrap_or(0.0);
            let child = if feature_value <= self.thresholds[node_idx] {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };

            if child < 0 {
                return self.leaf_values[(-child - 1) as usize];
            }
            node_idx = child as usize;
        }
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputTransform {
    Identity,
    /// Log-link objectives (poisson, gamma, tweedie).
    Exp,
}

#[derive(Debug)]
pub struct LightGbmRegressor {
    trees: Vec<Tree>,
    feature_count: usize,
    feature_names: Option<Vec<String>>,
    average_output: bool,
    transform: OutputTransform,
    name: String,
}

impl LightGbmRegressor {
    pub fn from_model_text(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();
        let mut trees = Vec::new();
        let mut max_feature_idx: Option<usize> = None;
        let mut feature_names: Option<Vec<String>> = None;
        let mut average_output = false;
        let mut transform = OutputTransform::Identity;
        let mut objective = String::from("regression");

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "end of trees" {
                break;
            }

            if let Some(raw) = trimmed.strip_prefix("objective=") {
                let kind = raw.split_whitespace().next().unwrap_or_default();
                transform = match kind {
                    "regression" | "regression_l2" | "regression_l1" | "l1" | "l2" | "huber"
                    | "fair" | "quantile" | "mape" => OutputTransform::Identity,
                    "poisson" | "gamma" | "tweedie" => OutputTransform::Exp,
                    other => bail!("objective '{other}' is not a scalar regression"),
                };
                objective = kind.to_string();
            } else if trimmed.starts_with("max_feature_idx=") {
                max_feature_idx = Some(parse_value(trimmed, "max_feature_idx=")?);
            } else if let Some(raw) = trimmed.strip_prefix("feature_names=") {
                feature_names = Some(raw.split_whitespace().map(str::to_string).collect());
            } else if trimmed == "average_output" {
                average_output = true;
            } else if trimmed.starts_with("Tree=") {
                trees.push(Tree::from_lines(&mut lines)?);
            }
        }

        if trees.is_empty() {
            bail!("model contained no trees");
        }

        let inferred = trees.iter().filter_map(Tree::max_feature).max().unwrap_or(0) + 1;
        let feature_count = max_feature_idx.map(|idx| idx + 1).unwrap_or(inferred);
        if inferred > feature_count {
            bail!("trees split on feature {} beyond max_feature_idx", inferred - 1);
        }
        if let Some(names) = &feature_names {
            if names.len() != feature_count {
                bail!(
                    "feature_names lists {} names but model has {feature_count} features",
                    names.len()
                );
            }
        }

        Ok(Self {
            name: format!("lightgbm/{objective}/{}-trees", trees.len()),
            trees,
            feature_count,
            feature_names,
            average_output,
            transform,
        })
    }
}

impl Regressor for LightGbmRegressor {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_features(&self) -> usize {
        self.feature_count
    }

    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        check_input(features, self.feature_count)?;

        let mut raw: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        if self.average_output {
            raw /= self.trees.len() as f64;
        }
        let value = match self.transform {
            OutputTransform::Identity => raw,
            OutputTransform::Exp => raw.exp(),
        };
        check_output(value)
    }
}

fn parse_value<T>(line: &str, prefix: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("expected prefix {prefix}"))?;
    raw.trim()
        .parse::<T>()
        .map_err(|err| anyhow!("failed to parse {prefix} from \"{line}\": {err}"))
}

fn parse_array<T>(line: &str, prefix: &str) -> Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("expected prefix {prefix}"))?;
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|err| anyhow!("failed to parse value {token} for {prefix}: {err}"))
        })
        .collect()
}
