//! Cosine-similarity ranking over embedding vectors.
//!
//! Unlike raw cosine, [`cosine_similarity`] is clamped to `[0, 1]`: a vector
//! pointing away from the query ranks the same as an unrelated one, and a
//! zero vector never matches anything.

use std::cmp::Ordering;

use galleria_core::Scored;

use crate::error::SimilarityError;

/// Euclidean length of `v`.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    check_dims(a, b)?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// Cosine similarity of `a` and `b`, clamped to `[0, 1]`.
///
/// Returns 0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    let d = dot(a, b)?;
    let (ma, mb) = (magnitude(a), magnitude(b));
    if ma == 0.0 || mb == 0.0 {
        return Ok(0.0);
    }
    // Rounding can push parallel vectors a hair past 1.
    Ok((d / (ma * mb)).clamp(0.0, 1.0))
}

/// Pair `items` with `scores` and sort descending by score.
///
/// The sort is stable, so equal scores keep their input order. NaN scores
/// sort last.
pub fn rank<T>(items: Vec<T>, scores: &[f32]) -> Result<Vec<Scored<T>>, SimilarityError> {
    if items.len() != scores.len() {
        return Err(SimilarityError::LengthMismatch {
            items: items.len(),
            scores: scores.len(),
        });
    }
    let mut ranked: Vec<Scored<T>> = items
        .into_iter()
        .zip(scores.iter().copied())
        .map(|(item, score)| Scored { item, score })
        .collect();
    ranked.sort_by(|a, b| cmp_desc(a.score, b.score));
    Ok(ranked)
}

/// Rank `items` by cosine similarity of their vectors to `query`, keeping the best `k`.
pub fn top_k_by_similarity<T>(
    query: &[f32],
    items: Vec<(T, Vec<f32>)>,
    k: usize,
) -> Result<Vec<Scored<T>>, SimilarityError> {
    let mut scores = Vec::with_capacity(items.len());
    for (_, v) in &items {
        scores.push(cosine_similarity(query, v)?);
    }
    let items: Vec<T> = items.into_iter().map(|(item, _)| item).collect();
    let mut ranked = rank(items, &scores)?;
    ranked.truncate(k);
    Ok(ranked)
}

fn check_dims(a: &[f32], b: &[f32]) -> Result<(), SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

fn cmp_desc(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
