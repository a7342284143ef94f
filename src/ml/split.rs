// Stratified train/test split

use std::collections::BTreeMap;

use super::rng::SeededRng;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split sample indices so that every class with at least two samples lands
/// in both halves. `test_fraction` of each class (rounded, at least one, at
/// most all but one) goes to test. Singleton classes stay in train.
pub fn stratified_split(labels: &[usize], test_fraction: f64, rng: &mut SeededRng) -> TrainTestSplit {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut train = Vec::new();
    let mut test = Vec::new();

    for (_, mut indices) in by_class {
        rng.shuffle(&mut indices);
        let n = indices.len();
        let n_test = if n < 2 {
            0
        } else {
            ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1)
        };
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    TrainTestSplit { train, test }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_class_in_both_halves() {
        // 5 classes x 3 samples
        let labels: Vec<usize> = (0..15).map(|i| i / 3).collect();
        let split = stratified_split(&labels, 0.2, &mut SeededRng::new(42));

        assert_eq!(split.test.len(), 5);
        assert_eq!(split.train.len(), 10);

        let train_classes: HashSet<usize> = split.train.iter().map(|&i| labels[i]).collect();
        let test_classes: HashSet<usize> = split.test.iter().map(|&i| labels[i]).collect();
        assert_eq!(train_classes.len(), 5);
        assert_eq!(test_classes.len(), 5);
    }

    #[test]
    fn test_split_is_a_partition() {
        let labels: Vec<usize> = (0..40).map(|i| i % 4).collect();
        let split = stratified_split(&labels, 0.2, &mut SeededRng::new(1));
        let mut all: Vec<usize> = split.train.iter().chain(split.test.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..40).collect::<Vec<_>>());
        assert_eq!(split.test.len(), 8);
    }

    #[test]
    fn test_split_is_reproducible() {
        let labels: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let a = stratified_split(&labels, 0.2, &mut SeededRng::new(42));
        let b = stratified_split(&labels, 0.2, &mut SeededRng::new(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_singleton_class_stays_in_train() {
        let labels = vec![0, 0, 0, 1];
        let split = stratified_split(&labels, 0.2, &mut SeededRng::new(42));
        assert!(split.train.contains(&3));
        assert!(!split.test.contains(&3));
    }
}
