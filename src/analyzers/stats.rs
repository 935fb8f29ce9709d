//! Small descriptive statistics over `f64` slices
//!
//! Quantiles use linear interpolation between closest ranks, the same
//! definition as the "linear" method of most numeric libraries.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with `n` in the denominator
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Standard deviation with `n - 1` in the denominator
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Quantile `q` in [0, 1] of already sorted values
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    quantile_sorted(&sorted(values), q)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Largest spread that is indistinguishable from rounding noise for values
/// around `scale`
pub fn spread_tolerance(scale: f64) -> f64 {
    f64::EPSILON * scale.abs().max(1.0) * 16.0
}

/// `(value - mean) / std`, 0 when the spread is zero
pub fn z_score(value: f64, mean: f64, std: f64) -> f64 {
    if std > 0.0 {
        (value - mean) / std
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_spread_tolerance_scales() {
        assert_eq!(spread_tolerance(0.1), spread_tolerance(1.0));
        assert!(spread_tolerance(1000.0) > spread_tolerance(1.0));
        assert!(population_std(&[0.1; 15]).unwrap() <= spread_tolerance(0.1));
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(mean(&[]), None);
        assert_eq!(population_std(&[]), None);
        assert_eq!(sample_std(&[1.0]), None);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert!(close(quantile(&values, 0.0).unwrap(), 1.0));
        assert!(close(quantile(&values, 1.0).unwrap(), 4.0));
        assert!(close(median(&values).unwrap(), 2.5));
        assert!(close(quantile(&values, 0.95).unwrap(), 3.85));
    }

    #[test]
    fn test_quartiles_of_error_buckets() {
        let values = [0.0, 0.0, 0.05, 0.0, 0.6];
        assert!(close(quantile(&values, 0.25).unwrap(), 0.0));
        assert!(close(quantile(&values, 0.75).unwrap(), 0.05));
    }

    #[test]
    fn test_standard_deviations() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(close(mean(&values).unwrap(), 5.0));
        assert!(close(population_std(&values).unwrap(), 2.0));
        assert!(close(sample_std(&values).unwrap(), (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn test_z_score_zero_spread() {
        assert_eq!(z_score(5.0, 5.0, 0.0), 0.0);
        assert!(close(z_score(7.0, 5.0, 2.0), 1.0));
    }
}
