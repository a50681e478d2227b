use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::features;
use crate::models::{RawRecord, TaskFeatureVector, TaskPrediction};

/// Fixed seed so every refit over the same data scores identically.
const RANDOM_SEED: u64 = 42;
const NUM_FEATURES: usize = 4;
const NUM_TREES: usize = 50;
const MAX_DEPTH: usize = 5;
const MIN_SPLIT: usize = 2;
/// Features sampled per split; floor(sqrt(NUM_FEATURES)).
const FEATURES_PER_SPLIT: usize = 2;

/// Classifier input row. Undefined numerics are imputed to 0.0 here and
/// nowhere else; the stored feature table keeps them as None.
pub fn feature_row(vector: &TaskFeatureVector) -> [f64; NUM_FEATURES] {
    [
        vector.response_time_mean.unwrap_or(0.0),
        vector.num_followups as f64,
        vector.reply_score_mean,
        vector.past_success_rate,
    ]
}

/// Full core pipeline: derive, aggregate, fit, score. Stateless; every
/// call retrains from scratch on the records it is handed.
pub fn run_pipeline(records: &[RawRecord]) -> Vec<TaskPrediction> {
    let derived = features::derive_records(records);
    let vectors = features::aggregate_features(&derived);
    predict_completions(&vectors)
}

/// Fit on the feature table and score that same table. Self-scoring on
/// the training set is deliberate; there is no held-out split, so the
/// probabilities read optimistic.
pub fn predict_completions(vectors: &[TaskFeatureVector]) -> Vec<TaskPrediction> {
    if vectors.is_empty() {
        return Vec::new();
    }

    let labels: Vec<u8> = vectors.iter().map(|v| u8::from(v.task_completed)).collect();
    let mut distinct = labels.clone();
    distinct.sort_unstable();
    distinct.dedup();

    // A classifier cannot be fit on fewer than two samples or a single
    // class; fall back to a uniform probability instead of failing.
    if vectors.len() < MIN_SPLIT || distinct.len() < 2 {
        return vectors
            .iter()
            .map(|vector| TaskPrediction {
                task_id: vector.task_id,
                completion_prob: 0.5,
                task_completed: u8::from(vector.task_completed),
            })
            .collect();
    }

    let matrix: Vec<[f64; NUM_FEATURES]> = vectors.iter().map(feature_row).collect();
    let forest = Forest::fit(&matrix, &labels, RANDOM_SEED);

    vectors
        .iter()
        .zip(matrix.iter())
        .map(|(vector, row)| TaskPrediction {
            task_id: vector.task_id,
            completion_prob: positive_probability(&forest.predict_proba(row), forest.classes()),
            task_completed: u8::from(vector.task_completed),
        })
        .collect()
}

/// Select P(label == 1) from a class-ordered probability distribution by
/// label value, never by column position. A model that only ever saw
/// label 0 has no positive column; its positive probability is the
/// complement of the lone column.
pub fn positive_probability(distribution: &[f64], classes: &[u8]) -> f64 {
    match classes.iter().position(|&class| class == 1) {
        Some(index) => distribution[index],
        None => 1.0 - distribution.first().copied().unwrap_or(0.0),
    }
}

/// Random forest over the four task features: bootstrap-resampled gini
/// trees with per-split feature subsampling, all driven by one seeded rng.
pub struct Forest {
    trees: Vec<Node>,
    classes: Vec<u8>,
}

enum Node {
    Leaf {
        /// Class counts aligned to Forest::classes.
        counts: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Forest {
    pub fn fit(matrix: &[[f64; NUM_FEATURES]], labels: &[u8], seed: u64) -> Self {
        let mut classes: Vec<u8> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();

        let label_indices: Vec<usize> = labels
            .iter()
            .map(|label| classes.iter().position(|c| c == label).unwrap_or(0))
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..NUM_TREES)
            .map(|_| {
                let sample: Vec<usize> = (0..matrix.len())
                    .map(|_| rng.gen_range(0..matrix.len()))
                    .collect();
                grow_tree(matrix, &label_indices, classes.len(), &sample, 0, &mut rng)
            })
            .collect();

        Forest { trees, classes }
    }

    /// Distinct labels seen at fit time, ascending. Probability columns
    /// from predict_proba are aligned to this ordering.
    pub fn classes(&self) -> &[u8] {
        &self.classes
    }

    /// Mean of per-tree leaf distributions for one sample.
    pub fn predict_proba(&self, row: &[f64; NUM_FEATURES]) -> Vec<f64> {
        let mut summed = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let counts = tree.leaf_counts(row);
            let total: f64 = counts.iter().sum();
            if total > 0.0 {
                for (slot, count) in summed.iter_mut().zip(counts) {
                    *slot += count / total;
                }
            }
        }
        for slot in summed.iter_mut() {
            *slot /= self.trees.len() as f64;
        }
        summed
    }
}

impl Node {
    fn leaf_counts(&self, row: &[f64; NUM_FEATURES]) -> &[f64] {
        match self {
            Node::Leaf { counts } => counts,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.leaf_counts(row)
                } else {
                    right.leaf_counts(row)
                }
            }
        }
    }
}

fn class_counts(label_indices: &[usize], rows: &[usize], num_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; num_classes];
    for &row in rows {
        counts[label_indices[row]] += 1.0;
    }
    counts
}

fn gini(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|count| (count / total).powi(2)).sum::<f64>()
}

fn grow_tree(
    matrix: &[[f64; NUM_FEATURES]],
    label_indices: &[usize],
    num_classes: usize,
    rows: &[usize],
    depth: usize,
    rng: &mut StdRng,
) -> Node {
    let counts = class_counts(label_indices, rows, num_classes);
    let is_pure = counts.iter().filter(|&&count| count > 0.0).count() <= 1;
    if depth >= MAX_DEPTH || rows.len() < MIN_SPLIT || is_pure {
        return Node::Leaf { counts };
    }

    let mut candidates: Vec<usize> = (0..NUM_FEATURES).collect();
    candidates.shuffle(rng);
    candidates.truncate(FEATURES_PER_SPLIT);

    let parent = gini(&counts);
    let mut best: Option<(f64, usize, f64)> = None;

    for &feature in &candidates {
        let mut values: Vec<f64> = rows.iter().map(|&row| matrix[row][feature]).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();

        for pair in values.windows(2) {
            let threshold = (pair[0] + pair[1]) / 2.0;
            let left: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&row| matrix[row][feature] <= threshold)
                .collect();
            let right: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&row| matrix[row][feature] > threshold)
                .collect();

            let weighted = (left.len() as f64
                * gini(&class_counts(label_indices, &left, num_classes))
                + right.len() as f64 * gini(&class_counts(label_indices, &right, num_classes)))
                / rows.len() as f64;
            let gain = parent - weighted;

            if gain > 1e-12 && best.map_or(true, |(best_gain, _, _)| gain > best_gain) {
                best = Some((gain, feature, threshold));
            }
        }
    }

    match best {
        None => Node::Leaf { counts },
        Some((_, feature, threshold)) => {
            let left_rows: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&row| matrix[row][feature] <= threshold)
                .collect();
            let right_rows: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&row| matrix[row][feature] > threshold)
                .collect();
            Node::Split {
                feature,
                threshold,
                left: Box::new(grow_tree(
                    matrix,
                    label_indices,
                    num_classes,
                    &left_rows,
                    depth + 1,
                    rng,
                )),
                right: Box::new(grow_tree(
                    matrix,
                    label_indices,
                    num_classes,
                    &right_rows,
                    depth + 1,
                    rng,
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(task_id: i32, member_id: i32, completed: bool) -> TaskFeatureVector {
        TaskFeatureVector {
            task_id,
            member_id,
            response_time_mean: Some(2.0),
            num_followups: 1,
            reply_score_mean: 0.5,
            past_success_rate: 0.5,
            task_completed: completed,
        }
    }

    fn strong_vector(task_id: i32, completed: bool) -> TaskFeatureVector {
        // Clearly separable toy data: quick enthusiastic replies from a
        // reliable member for completed tasks, silence for the rest.
        if completed {
            TaskFeatureVector {
                task_id,
                member_id: 1,
                response_time_mean: Some(1.0),
                num_followups: 1,
                reply_score_mean: 1.0,
                past_success_rate: 1.0,
                task_completed: true,
            }
        } else {
            TaskFeatureVector {
                task_id,
                member_id: 2,
                response_time_mean: None,
                num_followups: 1,
                reply_score_mean: 0.0,
                past_success_rate: 0.0,
                task_completed: false,
            }
        }
    }

    #[test]
    fn empty_feature_table_gives_empty_predictions() {
        assert!(predict_completions(&[]).is_empty());
    }

    #[test]
    fn single_class_skips_fit_and_returns_uniform() {
        let vectors = vec![
            vector(1, 1, false),
            vector(2, 1, false),
            vector(3, 2, false),
        ];
        let predictions = predict_completions(&vectors);
        assert_eq!(predictions.len(), 3);
        assert!(predictions.iter().all(|p| p.completion_prob == 0.5));
        assert!(predictions.iter().all(|p| p.task_completed == 0));
    }

    #[test]
    fn single_task_returns_uniform() {
        let predictions = predict_completions(&[vector(9, 1, true)]);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].completion_prob, 0.5);
        assert_eq!(predictions[0].task_completed, 1);
    }

    #[test]
    fn probabilities_are_bounded() {
        let vectors: Vec<TaskFeatureVector> =
            (0..10).map(|i| strong_vector(i, i % 2 == 0)).collect();
        for prediction in predict_completions(&vectors) {
            assert!(prediction.completion_prob >= 0.0);
            assert!(prediction.completion_prob <= 1.0);
        }
    }

    #[test]
    fn separable_data_scores_completed_above_open() {
        let vectors: Vec<TaskFeatureVector> =
            (0..8).map(|i| strong_vector(i, i < 4)).collect();
        let predictions = predict_completions(&vectors);
        let completed_min = predictions
            .iter()
            .filter(|p| p.task_completed == 1)
            .map(|p| p.completion_prob)
            .fold(f64::INFINITY, f64::min);
        let open_max = predictions
            .iter()
            .filter(|p| p.task_completed == 0)
            .map(|p| p.completion_prob)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(completed_min > open_max);
    }

    #[test]
    fn fixed_seed_makes_predictions_reproducible() {
        let vectors: Vec<TaskFeatureVector> =
            (0..6).map(|i| strong_vector(i, i % 2 == 0)).collect();
        let first = predict_completions(&vectors);
        let second = predict_completions(&vectors);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.task_id, b.task_id);
            assert_eq!(a.completion_prob, b.completion_prob);
        }
    }

    #[test]
    fn positive_column_is_selected_by_label_not_position() {
        // Two classes: column order is [0, 1].
        assert_eq!(positive_probability(&[0.3, 0.7], &[0, 1]), 0.7);
        // Degenerate single-class fits: the positive column may be the
        // only column, or absent entirely.
        assert_eq!(positive_probability(&[1.0], &[1]), 1.0);
        assert_eq!(positive_probability(&[1.0], &[0]), 0.0);
    }

    #[test]
    fn forest_tracks_observed_classes_in_order() {
        let matrix = vec![[0.0, 1.0, 0.0, 0.0], [5.0, 1.0, 1.0, 1.0]];
        let forest = Forest::fit(&matrix, &[0, 1], 7);
        assert_eq!(forest.classes(), &[0, 1]);
        let distribution = forest.predict_proba(&matrix[0]);
        assert_eq!(distribution.len(), 2);
        assert!((distribution.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn imputation_happens_only_at_the_matrix_boundary() {
        let mut v = vector(1, 1, false);
        v.response_time_mean = None;
        assert_eq!(feature_row(&v)[0], 0.0);
        // The stored vector itself is untouched.
        assert!(v.response_time_mean.is_none());
    }

    #[test]
    fn pipeline_empty_records_give_empty_output() {
        assert!(run_pipeline(&[]).is_empty());
    }
}
