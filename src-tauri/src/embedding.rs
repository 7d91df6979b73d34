use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingSettings;
use crate::llm::sse::error_for_status;
use crate::llm::LlmError;

/// Inputs longer than this are cut before being sent.
pub const MAX_INPUT_CHARS: usize = 8000;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// One embedding per input text, in input order, from an OpenAI-compatible
/// `/embeddings` endpoint.
pub async fn generate_embeddings(
    client: &Client,
    settings: &EmbeddingSettings,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, LlmError> {
    let body = EmbeddingRequest {
        model: &settings.model,
        input: texts.iter().map(|t| truncate_chars(t, MAX_INPUT_CHARS)).collect(),
    };

    let mut req = client
        .post(format!("{}/embeddings", settings.base_url.trim_end_matches('/')))
        .json(&body);
    if !settings.api_key.is_empty() {
        req = req.bearer_auth(&settings.api_key);
    }

    let resp = error_for_status(req.send().await?).await?;
    let mut data: EmbeddingResponse = resp
        .json()
        .await
        .map_err(|e| LlmError::Parse(e.to_string()))?;
    data.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
    Ok(data.data.into_iter().map(|d| d.embedding).collect())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Cosine of the angle between `a` and `b`; 0 when either is empty, zero or
/// the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let norm = aa.sqrt() * bb.sqrt();
    if norm == 0.0 {
        0.0
    } else {
        dot / norm
    }
}

/// Rank `embeddings` against the query and return `(index, score)` pairs,
/// best first, keeping at most `top_k` whose score is strictly above
/// `threshold`.
pub fn search_similar(
    query_embedding: &[f32],
    embeddings: &[Vec<f32>],
    top_k: usize,
    threshold: f32,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = embeddings
        .iter()
        .enumerate()
        .map(|(i, emb)| (i, cosine_similarity(query_embedding, emb)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored.retain(|(_, score)| *score > threshold);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_search_similar_descending_and_strict_threshold() {
        let query = vec![1.0, 0.0];
        let embeddings = vec![
            vec![0.0, 1.0], // 0.0
            vec![1.0, 1.0], // ~0.707
            vec![1.0, 0.0], // 1.0
            vec![1.0, 1.8], // ~0.486
            vec![3.0, 1.0], // ~0.949
        ];
        let ranked = search_similar(&query, &embeddings, 10, 0.5);
        let ids: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(ids, vec![2, 4, 1]);
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
        assert!(ranked.iter().all(|(_, s)| *s > 0.5));

        // a score equal to the threshold is excluded
        let ranked = search_similar(&query, &embeddings[..1], 10, 0.0);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_search_similar_top_k() {
        let query = vec![1.0, 0.0];
        let embeddings = vec![vec![1.0, 0.0]; 5];
        assert_eq!(search_similar(&query, &embeddings, 3, 0.5).len(), 3);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("perché", 5), "perch");
        assert_eq!(truncate_chars("€€€", 2), "€€");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }
}
