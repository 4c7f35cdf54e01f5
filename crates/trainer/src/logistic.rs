//! L2-Regularised Logistic Regression

use crate::TrainError;
use inference_engine::sigmoid;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gradient descent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub max_iter: usize,
    /// Stop once the loss improves by less than this
    pub tolerance: f64,
    /// L2 penalty on the weights (never on the intercept)
    pub l2: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_iter: 1000,
            tolerance: 1e-7,
            l2: 0.01,
        }
    }
}

/// Column means and scales fitted on the training rows
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    pub means: Array1<f64>,
    pub scales: Array1<f64>,
}

impl Standardizer {
    /// Fit per-column mean and population std; constant columns get scale 1
    pub fn fit(x: &Array2<f64>) -> Result<Self, TrainError> {
        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| TrainError::Shape("cannot standardise an empty matrix".to_string()))?;
        let scales = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > 1e-12 { s } else { 1.0 });
        Ok(Self { means, scales })
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.means) / &self.scales
    }
}

/// Fitted weights in standardised space
#[derive(Debug, Clone)]
pub struct LogisticFit {
    pub weights: Array1<f64>,
    pub intercept: f64,
    pub iterations: usize,
    pub final_loss: f64,
}

/// Mean binary cross-entropy
fn log_loss(y: &Array1<f64>, p: &Array1<f64>) -> f64 {
    let eps = 1e-15;
    -y.iter()
        .zip(p.iter())
        .map(|(&y, &p)| {
            let p = p.clamp(eps, 1.0 - eps);
            y * p.ln() + (1.0 - y) * (1.0 - p).ln()
        })
        .sum::<f64>()
        / y.len() as f64
}

/// Fit by batch gradient descent on already-standardised inputs
pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: &LogisticConfig) -> Result<LogisticFit, TrainError> {
    if x.nrows() != y.len() {
        return Err(TrainError::Shape(format!(
            "{} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() == 0 {
        return Err(TrainError::Shape("no training rows".to_string()));
    }

    let n = x.nrows() as f64;
    let mut weights = Array1::<f64>::zeros(x.ncols());
    let mut intercept = 0.0;
    let mut previous_loss = f64::INFINITY;
    let mut final_loss = f64::INFINITY;
    let mut iterations = 0;

    for iter in 0..config.max_iter {
        let predictions = (x.dot(&weights) + intercept).mapv(sigmoid);
        let loss = log_loss(y, &predictions)
            + 0.5 * config.l2 * weights.dot(&weights);

        let errors = &predictions - y;
        let dw = x.t().dot(&errors) / n + &weights * config.l2;
        let db = errors.sum() / n;

        weights = &weights - &(dw * config.learning_rate);
        intercept -= config.learning_rate * db;

        iterations = iter + 1;
        final_loss = loss;
        if (previous_loss - loss).abs() < config.tolerance {
            debug!(iterations, loss, "Gradient descent converged");
            break;
        }
        previous_loss = loss;
    }

    if !final_loss.is_finite() || weights.iter().any(|w| !w.is_finite()) {
        return Err(TrainError::Diverged { iterations });
    }
    Ok(LogisticFit {
        weights,
        intercept,
        iterations,
        final_loss,
    })
}

/// Probabilities for standardised rows
pub fn predict_proba(x: &Array2<f64>, weights: &Array1<f64>, intercept: f64) -> Array1<f64> {
    (x.dot(weights) + intercept).mapv(sigmoid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardizer_constant_column() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let s = Standardizer::fit(&x).unwrap();
        assert_eq!(s.means, array![2.0, 5.0]);
        assert_eq!(s.scales, array![1.0, 1.0]);
        assert_eq!(s.transform(&x), array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_separable_data() {
        let x = array![[-2.0], [-1.5], [-1.0], [1.0], [1.5], [2.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let fit = fit(&x, &y, &LogisticConfig::default()).unwrap();

        assert!(fit.weights[0] > 0.0);
        let p = predict_proba(&x, &fit.weights, fit.intercept);
        assert!(p[0] < 0.5 && p[5] > 0.5);
        assert!(fit.final_loss < 0.69);
    }

    #[test]
    fn test_extreme_scores_stay_finite() {
        let x = array![[-800.0], [0.0], [800.0]];
        let p = predict_proba(&x, &array![1.0], 0.0);
        assert!(p.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
        assert_eq!(p[1], 0.5);
        assert_eq!(p[2], 1.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0];
        assert!(matches!(
            fit(&x, &y, &LogisticConfig::default()),
            Err(TrainError::Shape(_))
        ));
    }
}
