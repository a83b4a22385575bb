//! Distances between embeddings and the break threshold.

/// Cosine distance between two embeddings.
///
/// Returns `None` when the vectors differ in length, are empty, or contain
/// non-finite values. Two zero vectors are identical (distance 0); a zero
/// vector against a non-zero one is maximally apart (distance 1).
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    if a.iter().chain(b).any(|v| !v.is_finite()) {
        return None;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    match (norm_a == 0.0, norm_b == 0.0) {
        (true, true) => Some(0.0),
        (true, false) | (false, true) => Some(1.0),
        (false, false) => {
            let cosine = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
            let distance = 1.0 - cosine;
            distance.is_finite().then_some(distance)
        }
    }
}

/// Distances between each pair of consecutive embeddings.
#[must_use]
pub fn consecutive_distances(embeddings: &[Vec<f32>]) -> Vec<Option<f64>> {
    embeddings
        .windows(2)
        .map(|pair| cosine_distance(&pair[0], &pair[1]))
        .collect()
}

/// Nearest-rank percentile: `sorted[ceil(p / 100 * n) - 1]`.
///
/// `percentile` is clamped to `0..=100`; `0` picks the minimum. Returns `None`
/// for an empty input.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn percentile(values: &[f64], percentile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let p = if percentile.is_nan() { 100.0 } else { percentile.clamp(0.0, 100.0) };
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    let index = rank.max(1).min(sorted.len()) - 1;
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_orthogonal() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]), Some(0.0));
        let d = cosine_distance(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!((d - 1.0).abs() < 1e-12);
        let d = cosine_distance(&[1.0], &[-1.0]).unwrap();
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_vectors() {
        assert_eq!(cosine_distance(&[0.0], &[0.0]), Some(0.0));
        assert_eq!(cosine_distance(&[1.0], &[0.0]), Some(1.0));
        assert_eq!(cosine_distance(&[0.0], &[3.0]), Some(1.0));
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(cosine_distance(&[], &[]), None);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(cosine_distance(&[f32::NAN], &[1.0]), None);
        assert_eq!(cosine_distance(&[1.0], &[f32::INFINITY]), None);
    }

    #[test]
    fn test_consecutive_distances_golden() {
        let embeddings = vec![vec![1.0], vec![1.0], vec![0.0], vec![0.0]];
        assert_eq!(consecutive_distances(&embeddings), vec![Some(0.0), Some(1.0), Some(0.0)]);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values = [0.0, 1.0, 0.0];
        assert_eq!(percentile(&values, 99.0), Some(1.0));
        assert_eq!(percentile(&values, 50.0), Some(0.0));
        assert_eq!(percentile(&values, 0.0), Some(0.0));

        let values = [0.4, 0.1, 0.3, 0.2];
        assert_eq!(percentile(&values, 50.0), Some(0.2));
        assert_eq!(percentile(&values, 75.0), Some(0.3));
        assert_eq!(percentile(&values, 100.0), Some(0.4));
        assert_eq!(percentile(&[], 95.0), None);
    }
}
