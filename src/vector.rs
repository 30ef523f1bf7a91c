/// Cosine distance between two vectors of equal length. LOWER is closer,
/// range [0, 2].
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    // Zero vectors are orthogonal to everything
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Turns a cosine distance back into the cosine similarity, in [-1, 1].
/// HIGHER is closer.
#[inline]
pub fn similarity(distance: f32) -> f32 {
    1.0 - distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_are_zero_distance() {
        let a = [0.3, -1.2, 4.0, 0.5];
        let d = cosine_distance(&a, &a);
        assert!(d.abs() < 1e-6);
        assert!((similarity(d) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orders_by_angle_not_length() {
        let q = [1.0, 0.0];
        assert!(cosine_distance(&q, &[0.9, 0.1]) < cosine_distance(&q, &[0.0, 1.0]));
        assert!(cosine_distance(&q, &[10.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_are_maximally_distant() {
        assert!((cosine_distance(&[1.0, 0.0], &[-2.0, 0.0]) - 2.0).abs() < 1e-6);
        assert!((similarity(2.0) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_has_unit_distance() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
