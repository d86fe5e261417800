/// Guards the denominator for zero-norm vectors
pub const COSINE_EPSILON: f32 = 1e-8;

/// `dot(a, b) / (|a| * |b| + eps)`
///
/// 0.0 when either vector is empty or the dimensions differ (embeddings from two
/// different models are not comparable).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let similarity = dot / (mag_a * mag_b + COSINE_EPSILON);
    if similarity.is_nan() {
        // overflowed or NaN components
        return 0.0;
    }
    similarity.clamp(-1.0, 1.0)
}
