//! Statistics and consolidation primitives shared by the calculators.
//!
//! Helpers return a caller-supplied default (or a neutral value) on empty
//! input rather than failing; callers that care about emptiness check first.

use tracing::warn;

const EPSILON: f64 = 1e-9;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the population standard deviation given a pre-computed mean.
/// Returns 0.0 for empty input.
pub fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// Mean with optional per-value weights; `default` when empty or the weights sum to zero.
pub fn avg(values: &[f64], weights: Option<&[f64]>, default: f64) -> f64 {
    if values.is_empty() {
        return default;
    }
    match weights {
        None => mean(values),
        Some(weights) => {
            let total: f64 = weights.iter().sum();
            if total == 0.0 {
                return default;
            }
            values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total
        }
    }
}

/// Every value tied for the highest count, in first-occurrence order.
pub fn modes<T: Clone + PartialEq>(values: &[T]) -> Vec<T> {
    let mut counted: Vec<(T, usize)> = Vec::new();
    for value in values {
        match counted.iter_mut().find(|(v, _)| v == value) {
            Some((_, count)) => *count += 1,
            None => counted.push((value.clone(), 1)),
        }
    }
    let top = counted.iter().map(|(_, c)| *c).max().unwrap_or(0);
    counted
        .into_iter()
        .filter(|(_, c)| *c == top)
        .map(|(v, _)| v)
        .collect()
}

/// Median after dropping values equal to `ignore`; 0.0 when nothing is left.
pub fn median(values: &[f64], ignore: Option<f64>) -> f64 {
    let mut kept: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| ignore.is_none_or(|i| (v - i).abs() > EPSILON))
        .collect();
    if kept.is_empty() {
        return 0.0;
    }
    kept.sort_by(f64::total_cmp);
    let mid = kept.len() / 2;
    if kept.len() % 2 == 0 {
        (kept[mid - 1] + kept[mid]) / 2.0
    } else {
        kept[mid]
    }
}

/// Rounds half away from zero to two decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Merges conflicting numeric reports into one value.
///
/// When the mean is itself one of the reports it wins. Otherwise repeated
/// values narrow the input to its modes and the rule recurses. With all
/// reports distinct, each is weighted by `1/z²` against the population
/// standard deviation so outliers count least. The result is rounded to an
/// integer, or to two decimals when `decimal` is set.
pub fn consolidate_nums(values: &[f64], decimal: bool) -> f64 {
    let finish = |x: f64| if decimal { round2(x) } else { x.round() };

    let average = mean(values);
    if values.is_empty() || values.iter().any(|v| (v - average).abs() < EPSILON) {
        return finish(average);
    }

    let modal = modes(values);
    if modal.len() < values.len() {
        return consolidate_nums(&modal, decimal);
    }

    let sd = stddev(values, average);
    if sd < EPSILON {
        return finish(average);
    }
    let weights: Vec<f64> = values
        .iter()
        .map(|v| {
            let z = (v - average) / sd;
            1.0 / (z * z)
        })
        .collect();
    finish(avg(values, Some(&weights), average))
}

/// Modal boolean; a tie is false.
pub fn consolidate_bools(values: &[bool]) -> bool {
    let trues = values.iter().filter(|b| **b).count();
    trues * 2 > values.len()
}

/// Modal member of `enumeration`. Ties resolve to the member at the average
/// index of the tied values. Values outside the enumeration are reported and
/// the index average over the known values is used instead.
pub fn consolidate_categorical(
    field: &str,
    values: &[String],
    enumeration: &[String],
) -> Option<String> {
    let index_of = |v: &String| enumeration.iter().position(|e| e == v);
    let modal = modes(values);

    let unknown: Vec<&String> = values.iter().filter(|v| index_of(v).is_none()).collect();
    let averaged_over: Vec<&String> = if unknown.is_empty() {
        if modal.len() == 1 {
            return modal.into_iter().next();
        }
        modal.iter().collect()
    } else {
        warn!(field, unknown = ?unknown, "Unknown categorical values, index-averaging");
        values.iter().filter(|v| index_of(v).is_some()).collect()
    };

    let indices: Vec<f64> = averaged_over
        .iter()
        .filter_map(|v| index_of(v))
        .map(|i| i as f64)
        .collect();
    if indices.is_empty() {
        return modal.into_iter().next();
    }
    let index = mean(&indices).round() as usize;
    enumeration.get(index).cloned()
}
