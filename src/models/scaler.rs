//! Per-feature standardization fit at training time

use serde::{Deserialize, Serialize};

/// Standard scaler: `(x - mean) / scale` per dimension.
///
/// Zero-variance columns get a scale of 1.0 so they pass through centred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Self {
        Self { mean, scale }
    }

    /// Fit on the rows of a training matrix (population standard deviation)
    pub fn fit(rows: &[Vec<f64>]) -> Option<Self> {
        let width = rows.first()?.len();
        if width == 0 || rows.iter().any(|r| r.len() != width) {
            return None;
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut scale = vec![0.0; width];
        for row in rows {
            for ((s, &v), &m) in scale.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2);
            }
        }
        for s in scale.iter_mut() {
            let std = (*s / n).sqrt();
            *s = if std > f64::EPSILON { std } else { 1.0 };
        }

        Some(Self { mean, scale })
    }

    /// Number of features the scaler was fit on
    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// Whether the parameters are usable
    pub fn is_valid(&self) -> bool {
        self.mean.len() == self.scale.len()
            && self.mean.iter().all(|m| m.is_finite())
            && self.scale.iter().all(|s| s.is_finite() && *s != 0.0)
    }

    /// Standardize one vector. Returns `None` on a width mismatch.
    pub fn transform(&self, features: &[f64]) -> Option<Vec<f64>> {
        if features.len() != self.width() || self.scale.len() != self.width() {
            return None;
        }

        Some(
            features
                .iter()
                .zip(&self.mean)
                .zip(&self.scale)
                .map(|((&x, &m), &s)| (x - m) / s)
                .collect(),
        )
    }

    pub fn transform_rows(&self, rows: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_and_transform() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0], vec![5.0, 10.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();

        assert_eq!(scaler.mean, vec![3.0, 10.0]);
        assert!((scaler.scale[0] - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        // Constant column
        assert_eq!(scaler.scale[1], 1.0);
        assert!(scaler.is_valid());

        let scaled = scaler.transform(&[3.0, 12.0]).unwrap();
        assert_eq!(scaled, vec![0.0, 2.0]);
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = StandardScaler::new(vec![0.0; 3], vec![1.0; 3]);
        assert!(scaler.transform(&[1.0, 2.0]).is_none());
        assert!(StandardScaler::fit(&[vec![1.0], vec![1.0, 2.0]]).is_none());
        assert!(StandardScaler::fit(&[]).is_none());
    }

    #[test]
    fn test_invalid_parameters() {
        let scaler = StandardScaler::new(vec![0.0, 1.0], vec![1.0, 0.0]);
        assert!(!scaler.is_valid());
    }
}
