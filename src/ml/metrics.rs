// Held-out evaluation: accuracy and per-class precision / recall / F1.
// Classes with no predicted or no true samples score 0 instead of NaN.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub category_id: i64,
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// `labels[i]` is `(category_id, name)` for class index `i`
pub fn classification_report(
    y_true: &[usize],
    y_pred: &[usize],
    labels: &[(i64, String)],
) -> ClassificationReport {
    let mut classes = Vec::with_capacity(labels.len());

    for (class, (category_id, name)) in labels.iter().enumerate() {
        let mut tp = 0;
        let mut predicted = 0;
        let mut support = 0;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if p == class {
                predicted += 1;
            }
            if t == class {
                support += 1;
                if p == class {
                    tp += 1;
                }
            }
        }

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        classes.push(ClassMetrics {
            category_id: *category_id,
            name: name.clone(),
            precision,
            recall,
            f1_score,
            support,
        });
    }

    let total_support: usize = classes.iter().map(|c| c.support).sum();
    let n = classes.len().max(1) as f64;
    let macro_avg = AverageMetrics {
        precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
        recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
        f1_score: classes.iter().map(|c| c.f1_score).sum::<f64>() / n,
        support: total_support,
    };

    let weighted = |f: fn(&ClassMetrics) -> f64| {
        if total_support == 0 {
            0.0
        } else {
            classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total_support as f64
        }
    };
    let weighted_avg = AverageMetrics {
        precision: weighted(|c| c.precision),
        recall: weighted(|c| c.recall),
        f1_score: weighted(|c| c.f1_score),
        support: total_support,
    };

    ClassificationReport {
        accuracy: accuracy(y_true, y_pred),
        classes,
        macro_avg,
        weighted_avg,
    }
}
