use serde::{Deserialize, Serialize};

/// Held-out scores of one binary tag classifier, rounded to 3 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Scores predictions against the true labels.
///
/// - Precision: true positives / (true positives + false positives)
/// - Recall: true positives / (true positives + false negatives)
///
/// A ratio whose denominator is zero is reported as 0.
///
/// # Examples
///
/// ```
/// use craml::classifier::score;
///
/// let actual = [true, true, false, false];
/// let predicted = [true, false, true, false];
///
/// let metrics = score(&actual, &predicted);
/// assert_eq!(metrics.accuracy, 0.5);
/// assert_eq!(metrics.precision, 0.5);
/// assert_eq!(metrics.recall, 0.5);
/// ```
pub fn score(actual: &[bool], predicted: &[bool]) -> Metrics {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    let mut correct = 0usize;
    for (&truth, &guess) in actual.iter().zip(predicted) {
        match (truth, guess) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
        if truth == guess {
            correct += 1;
        }
    }

    let total = actual.len().min(predicted.len());
    let accuracy = ratio(correct, total);
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    Metrics {
        accuracy: round3(accuracy),
        precision: round3(precision),
        recall: round3(recall),
        f1: round3(f1),
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions() {
        let labels = [true, false, true];
        let metrics = score(&labels, &labels);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.f1, 1.0);
    }

    #[test]
    fn no_positive_examples_scores_zero_not_nan() {
        let metrics = score(&[false, false], &[false, false]);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.f1, 0.0);
    }

    #[test]
    fn values_are_rounded() {
        let metrics = score(&[true, true, true], &[true, false, false]);
        assert_eq!(metrics.recall, 0.333);
        assert_eq!(metrics.accuracy, 0.333);
        assert_eq!(metrics.f1, 0.5);
    }

    #[test]
    fn empty_input() {
        let metrics = score(&[], &[]);
        assert_eq!(metrics.accuracy, 0.0);
    }
}
