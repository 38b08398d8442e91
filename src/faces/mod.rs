// Face clustering, naming and search over the organised tree.

pub mod annotate;
pub mod cluster;
pub mod embedder;
pub mod thumbnail;

/// Euclidean distance between two embeddings of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
