use serde::{Deserialize, Serialize};

use super::tfidf::SparseVector;

/// Binary multinomial naive Bayes over non-negative feature weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayes {
    /// Training rows per class, `[negative, positive]`.
    class_count: [usize; 2],
    /// `ln P(feature | class)` per class, additively smoothed.
    feature_log_prob: [Vec<f64>; 2],
}

impl NaiveBayes {
    pub fn fit(rows: &[SparseVector], labels: &[bool], features: usize, alpha: f64) -> Self {
        let mut class_count = [0usize; 2];
        let mut totals = [vec![0.0f64; features], vec![0.0f64; features]];
        for (row, &label) in rows.iter().zip(labels) {
            let class = usize::from(label);
            class_count[class] += 1;
            for &(feature, value) in row {
                totals[class][feature] += value;
            }
        }

        let feature_log_prob = totals.map(|counts| {
            let denominator: f64 = counts.iter().sum::<f64>() + alpha * features as f64;
            counts
                .into_iter()
                .map(|count| ((count + alpha) / denominator).ln())
                .collect::<Vec<f64>>()
        });

        Self {
            class_count,
            feature_log_prob,
        }
    }

    fn joint_log_likelihood(&self, row: &[(usize, f64)], class: usize) -> Option<f64> {
        let total: usize = self.class_count.iter().sum();
        if self.class_count[class] == 0 {
            return None;
        }
        let prior = (self.class_count[class] as f64 / total as f64).ln();
        let likelihood: f64 = row
            .iter()
            .filter_map(|&(feature, value)| {
                self.feature_log_prob[class].get(feature).map(|lp| lp * value)
            })
            .sum();
        Some(prior + likelihood)
    }

    /// Predicts the positive class when its joint log-likelihood is strictly higher.
    pub fn predict(&self, row: &[(usize, f64)]) -> bool {
        match (
            self.joint_log_likelihood(row, 0),
            self.joint_log_likelihood(row, 1),
        ) {
            (Some(negative), Some(positive)) => positive > negative,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_feature_association() {
        let rows = vec![vec![(0, 1.0)], vec![(0, 0.8)], vec![(1, 1.0)], vec![(1, 0.9)]];
        let labels = [true, true, false, false];
        let model = NaiveBayes::fit(&rows, &labels, 2, 1.0);

        assert!(model.predict(&[(0, 1.0)]));
        assert!(!model.predict(&[(1, 1.0)]));
    }

    #[test]
    fn single_class_training_predicts_that_class() {
        let rows = vec![vec![(0, 1.0)], vec![(1, 1.0)]];
        let negatives = NaiveBayes::fit(&rows, &[false, false], 2, 1.0);
        let positives = NaiveBayes::fit(&rows, &[true, true], 2, 1.0);

        assert!(!negatives.predict(&[(0, 1.0)]));
        assert!(positives.predict(&[(0, 1.0)]));
    }

    #[test]
    fn survives_json_round_trip() {
        let rows = vec![vec![(0, 1.0)], vec![(1, 1.0)]];
        let model = NaiveBayes::fit(&rows, &[true, false], 2, 1.0);
        let json = serde_json::to_string(&model).unwrap();
        let restored: NaiveBayes = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.class_count, [1, 1]);
        assert!(restored.predict(&[(0, 1.0)]));
        assert!(!restored.predict(&[(1, 1.0)]));
    }
}
