//! Trainable classifier seam.
//!
//! The rest of the system only sees [`SignalClassifier`]: a class
//! probability vector over {Hold, Long, Short} for one feature vector.
//! The shipped implementation is a one-vs-rest ensemble of smartcore
//! random-forest regressors, one per class, with scores normalized into
//! probabilities.

use crate::domain::errors::ModelError;
use crate::domain::signal::Signal;
use crate::domain::strategy::StrategyParams;
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

pub trait SignalClassifier: Send + Sync {
    /// Class probabilities indexed by [`Signal`], summing to 1.
    fn predict(&self, feature: &[f64]) -> Result<[f64; Signal::COUNT], ModelError>;
}

/// Index of the largest element.
pub fn argmax(values: &[f64]) -> usize {
    let mut max_index = 0;
    let mut max_value = f64::MIN;
    for (i, value) in values.iter().enumerate() {
        if *value > max_value {
            max_value = *value;
            max_index = i;
        }
    }
    max_index
}

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug)]
pub struct ForestClassifier {
    forests: Vec<Forest>,
}

impl ForestClassifier {
    /// Train one regressor per class against a binary target (1.0 when
    /// the sample belongs to the class).
    pub fn train(
        features: &[Vec<f64>],
        labels: &[Signal],
        params: &StrategyParams,
    ) -> Result<Self, ModelError> {
        if features.is_empty() || features.len() != labels.len() {
            return Err(ModelError::Training(format!(
                "feature/label shape mismatch: {} features, {} labels",
                features.len(),
                labels.len()
            )));
        }

        let x = DenseMatrix::from_2d_vec(&features.to_vec())
            .map_err(|e| ModelError::Training(format!("matrix error: {}", e)))?;

        let mut forests = Vec::with_capacity(Signal::COUNT);
        for class in 0..Signal::COUNT {
            let y: Vec<f64> = labels
                .iter()
                .map(|label| if label.index() == class { 1.0 } else { 0.0 })
                .collect();

            let forest_params = RandomForestRegressorParameters::default()
                .with_n_trees(params.num_trees)
                .with_max_depth(params.max_tree_depth)
                .with_min_samples_split(4);

            let forest = RandomForestRegressor::fit(&x, &y, forest_params)
                .map_err(|e| ModelError::Training(format!("class {}: {}", class, e)))?;
            forests.push(forest);
        }

        Ok(Self { forests })
    }
}

impl SignalClassifier for ForestClassifier {
    fn predict(&self, feature: &[f64]) -> Result<[f64; Signal::COUNT], ModelError> {
        let x = DenseMatrix::from_2d_vec(&vec![feature.to_vec()])
            .map_err(|e| ModelError::Prediction(format!("matrix error: {}", e)))?;

        let mut scores = [0.0; Signal::COUNT];
        for (class, forest) in self.forests.iter().enumerate() {
            let prediction = forest
                .predict(&x)
                .map_err(|e| ModelError::Prediction(format!("class {}: {}", class, e)))?;
            scores[class] = prediction.first().copied().unwrap_or(0.0).max(0.0);
        }

        let total: f64 = scores.iter().sum();
        if total <= 1e-12 {
            return Ok([1.0 / Signal::COUNT as f64; Signal::COUNT]);
        }
        for score in &mut scores {
            *score /= total;
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::{Genome, TradeSettings};

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.9, 0.05, 0.05]), 0);
        assert_eq!(argmax(&[0.0, 0.0, 1.0]), 2);
    }

    #[test]
    fn test_forest_learns_separable_classes() {
        // Class is fully determined by the first feature
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let class = i % 3;
            let base = class as f64;
            features.push(vec![base + 0.001 * i as f64, 0.5, (i % 7) as f64 / 7.0]);
            labels.push(Signal::from_index(class));
        }

        let params = Genome::new("DOGE-USDT-SWAP").params(&TradeSettings::default());
        let classifier = ForestClassifier::train(&features, &labels, &params).unwrap();

        let long_probabilities = classifier.predict(&[1.0, 0.5, 0.1]).unwrap();
        assert_eq!(argmax(&long_probabilities), Signal::Long.index());

        let short_probabilities = classifier.predict(&[2.0, 0.5, 0.1]).unwrap();
        assert_eq!(argmax(&short_probabilities), Signal::Short.index());

        let total: f64 = long_probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_train_rejects_empty_input() {
        let params = Genome::new("DOGE-USDT-SWAP").params(&TradeSettings::default());
        let err = ForestClassifier::train(&[], &[], &params).unwrap_err();
        assert!(matches!(err, ModelError::Training(_)));
    }
}
