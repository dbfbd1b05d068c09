/// Hampel-style robust averaging: the mean of the values inside
/// median ± 3×MAD, falling back to the median when nothing survives the
/// trim. A single wild entry in a short history barely moves the result.
pub fn robust_average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[sorted.len() / 2];

    let mut deviations: Vec<f64> = sorted.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_by(|a, b| a.total_cmp(b));
    let mad = deviations[deviations.len() / 2];
    let threshold = 3.0 * mad;

    let kept: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| (v - median).abs() <= threshold)
        .collect();
    if kept.is_empty() {
        median
    } else {
        kept.iter().sum::<f64>() / kept.len() as f64
    }
}
