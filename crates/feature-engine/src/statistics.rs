//! Statistical Features Computation

/// Summary statistics for one signal
#[derive(Debug, Clone, Default)]
pub struct StatisticalFeatures {
    /// Mean value
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Least-squares slope against the sample index
    pub slope: f64,
}

impl StatisticalFeatures {
    /// Compute summary statistics from a sequence of values
    pub fn compute<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let max = values.iter().cloned().fold(f64::MIN, f64::max);

        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        // slope = cov(i, v) / var(i)
        let slope = if values.len() >= 2 {
            let t_mean = (n - 1.0) / 2.0;
            let mut cov = 0.0;
            let mut t_var = 0.0;
            for (i, v) in values.iter().enumerate() {
                let dt = i as f64 - t_mean;
                cov += dt * (v - mean);
                t_var += dt * dt;
            }
            cov / t_var
        } else {
            0.0
        };

        Self {
            mean,
            std_dev,
            min,
            max,
            slope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_computation() {
        let stats = StatisticalFeatures::compute(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((stats.mean - 3.0).abs() < 0.001);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
    }

    #[test]
    fn test_std_dev_computation() {
        let stats = StatisticalFeatures::compute(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((stats.std_dev - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_slope() {
        let stats = StatisticalFeatures::compute(vec![1.0, 3.0, 5.0, 7.0]);
        assert!((stats.slope - 2.0).abs() < 1e-9);

        let flat = StatisticalFeatures::compute(vec![4.0, 4.0, 4.0]);
        assert_eq!(flat.slope, 0.0);
    }

    #[test]
    fn test_empty_values() {
        let stats = StatisticalFeatures::compute(Vec::new());
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.std_dev, 0.0);
    }
}
