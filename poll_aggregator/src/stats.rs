/*!
Weighted statistics used by the aggregation.

These functions work on plain slices and know nothing about polls or
candidates. The values and the weights must have the same length.
*/

use chrono::NaiveDate;

/// The time constant of the recency decay, in days.
pub const RECENCY_TIME_CONSTANT_DAYS: f64 = 7.0;

/// The weight of a poll published `days_ago` days before the reference date.
///
/// Dates after the reference (negative values) are clamped to a weight of 1.
pub fn recency_weight(days_ago: i64) -> f64 {
    let days = days_ago.max(0) as f64;
    (-days / RECENCY_TIME_CONSTANT_DAYS).exp()
}

pub fn recency_weights(dates: &[NaiveDate], reference_date: NaiveDate) -> Vec<f64> {
    dates
        .iter()
        .map(|d| recency_weight((reference_date - *d).num_days()))
        .collect()
}

/// The weighted average of the values.
///
/// Returns NaN if there is no value or if the weights sum to zero.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    debug_assert_eq!(values.len(), weights.len());
    let total_weight: f64 = weights.iter().sum();
    if values.is_empty() || total_weight <= 0.0 {
        return f64::NAN;
    }
    let total: f64 = values.iter().zip(weights).map(|(x, w)| x * w).sum();
    total / total_weight
}

/// The weighted standard deviation of the values around their weighted mean.
///
/// NaN (no value, zero total weight) is propagated.
pub fn weighted_std(values: &[f64], weights: &[f64]) -> f64 {
    let mean = weighted_mean(values, weights);
    let squares: Vec<f64> = values.iter().map(|x| (x - mean) * (x - mean)).collect();
    sqrt_non_negative(weighted_mean(&squares, weights))
}

/// Combines two independent deviations: sqrt(a² + b²).
pub fn quadrature(a: f64, b: f64) -> f64 {
    sqrt_non_negative(a * a + b * b)
}

// Rounding can make a variance slightly negative. f64::max(NaN, 0.0) is 0.0,
// so only negative values are floored.
fn sqrt_non_negative(x: f64) -> f64 {
    if x < 0.0 {
        0.0
    } else {
        x.sqrt()
    }
}
