//! Holdout evaluation metrics for binary classifiers.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Area under the ROC curve via the Mann-Whitney rank statistic.
///
/// Tied scores receive their average rank. Returns 0.5 when only one class is
/// present, since no ranking can be judged.
pub fn roc_auc(y: ArrayView1<f64>, scores: ArrayView1<f64>) -> f64 {
    assert_eq!(y.len(), scores.len());
    let n = y.len();
    let n_pos = y.iter().filter(|&&t| t > 0.5).count() as f64;
    let n_neg = n as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| scores[i].total_cmp(&scores[j]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && scores[idx[j]] == scores[idx[i]] {
            j += 1;
        }
        let avg_rank = (i + j - 1) as f64 / 2.0 + 1.0;
        for &k in &idx[i..j] {
            ranks[k] = avg_rank;
        }
        i = j;
    }

    let sum_ranks_pos: f64 = y
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t > 0.5)
        .map(|(_, r)| r)
        .sum();

    (sum_ranks_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Fraction of rows whose 0.5-thresholded probability matches the label.
pub fn accuracy(y: ArrayView1<f64>, probabilities: ArrayView1<f64>) -> f64 {
    assert_eq!(y.len(), probabilities.len());
    if y.is_empty() {
        return 0.0;
    }
    let correct = y
        .iter()
        .zip(probabilities.iter())
        .filter(|(t, p)| (**t > 0.5) == (**p >= 0.5))
        .count();
    correct as f64 / y.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_probabilities(y: ArrayView1<f64>, probabilities: ArrayView1<f64>) -> Self {
        let mut matrix = Self::default();
        for (t, p) in y.iter().zip(probabilities.iter()) {
            match (*t > 0.5, *p >= 0.5) {
                (false, false) => matrix.true_negative += 1,
                (false, true) => matrix.false_positive += 1,
                (true, false) => matrix.false_negative += 1,
                (true, true) => matrix.true_positive += 1,
            }
        }
        matrix
    }
}

/// Precision, recall and F1 for one class label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn new(true_hits: usize, predicted: usize, support: usize) -> Self {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(true_hits, predicted);
        let recall = ratio(true_hits, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// Per-class summary of holdout predictions at the 0.5 cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub negative: ClassMetrics,
    pub positive: ClassMetrics,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn new(y: ArrayView1<f64>, probabilities: ArrayView1<f64>) -> Self {
        let c = ConfusionMatrix::from_probabilities(y, probabilities);
        let total = c.true_negative + c.false_positive + c.false_negative + c.true_positive;
        Self {
            negative: ClassMetrics::new(
                c.true_negative,
                c.true_negative + c.false_negative,
                c.true_negative + c.false_positive,
            ),
            positive: ClassMetrics::new(
                c.true_positive,
                c.true_positive + c.false_positive,
                c.true_positive + c.false_negative,
            ),
            accuracy: if total == 0 {
                0.0
            } else {
                (c.true_negative + c.true_positive) as f64 / total as f64
            },
            confusion: c,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>10} {:>10} {:>10} {:>10}", "", "precision", "recall", "f1", "support")?;
        for (label, m) in [("0", &self.negative), ("1", &self.positive)] {
            writeln!(
                f,
                "{:>10} {:>10.4} {:>10.4} {:>10.4} {:>10}",
                label, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f, "{:>10} {:>32.4}", "accuracy", self.accuracy)?;
        writeln!(f, "confusion matrix [[tn fp] [fn tp]]:")?;
        write!(
            f,
            "[[{} {}] [{} {}]]",
            self.confusion.true_negative,
            self.confusion.false_positive,
            self.confusion.false_negative,
            self.confusion.true_positive
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn auc_of_perfect_and_reversed_rankings() {
        let y = array![0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(y.view(), array![0.1, 0.2, 0.8, 0.9].view()), 1.0);
        assert_eq!(roc_auc(y.view(), array![0.9, 0.8, 0.2, 0.1].view()), 0.0);
    }

    #[test]
    fn auc_averages_tied_ranks() {
        let y = array![0.0, 1.0, 0.0, 1.0];
        assert_abs_diff_eq!(
            roc_auc(y.view(), array![0.5, 0.5, 0.5, 0.5].view()),
            0.5,
            epsilon = 1e-12
        );
        // One positive outranks both negatives, the other ties one of them.
        let scores = array![0.1, 0.9, 0.4, 0.4];
        assert_abs_diff_eq!(roc_auc(y.view(), scores.view()), 0.875, epsilon = 1e-12);
    }

    #[test]
    fn auc_with_one_class_is_uninformative() {
        let y = array![1.0, 1.0, 1.0];
        assert_eq!(roc_auc(y.view(), array![0.1, 0.5, 0.9].view()), 0.5);
    }

    #[test]
    fn report_counts_each_cell() {
        let y = array![0.0, 0.0, 1.0, 1.0, 1.0];
        let p = array![0.2, 0.7, 0.9, 0.4, 0.6];
        let report = ClassificationReport::new(y.view(), p.view());
        assert_eq!(
            report.confusion,
            ConfusionMatrix {
                true_negative: 1,
                false_positive: 1,
                false_negative: 1,
                true_positive: 2,
            }
        );
        assert_abs_diff_eq!(report.positive.precision, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(report.positive.recall, 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(report.negative.support, 2);
        assert_abs_diff_eq!(report.accuracy, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(accuracy(y.view(), p.view()), 0.6, epsilon = 1e-12);
        assert!(report.to_string().contains("precision"));
    }
}
